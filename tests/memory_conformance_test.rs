//! The full behavioral suite against the in-memory backend.

mod common;

use tidelog::MemoryEventStore;

macro_rules! conformance {
    ($($name:ident),* $(,)?) => {
        $(
            #[tokio::test]
            async fn $name() {
                let store = MemoryEventStore::new();
                common::$name(&store).await;
            }
        )*
    };
}

conformance!(
    append_assigns_consecutive_revisions,
    append_any_skips_the_concurrency_check,
    no_stream_rejects_an_existing_stream,
    stale_expected_revision_appends_nothing,
    empty_append_is_rejected,
    reading_an_absent_stream_fails,
    reads_preserve_append_order,
    from_revision_is_exclusive_forwards,
    forwards_from_end_is_empty,
    backwards_from_end_reverses,
    backwards_from_start_is_empty,
    from_revision_is_exclusive_backwards,
    max_count_caps_both_directions,
    read_all_interleaves_streams_in_append_order,
    read_all_from_position_is_exclusive,
    read_all_backwards_reverses,
    read_all_never_raises_not_found,
    read_all_max_count_caps,
    delete_stream_round_trip,
    catch_up_delivers_history_then_live,
    catch_up_from_revision_skips_earlier_events,
    live_only_skips_history,
    subscribing_to_an_absent_stream_waits_live,
    subscription_ignores_other_streams,
    cancellation_is_silent,
    global_catch_up_spans_streams,
    global_subscription_resumes_from_position,
    global_live_only_skips_history,
    global_subscription_on_empty_store_goes_live,
    seam_has_no_gap_and_no_duplicate,
);
