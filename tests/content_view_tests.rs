//! Content view scenarios: overflow policies, cursor, retention, lookup.

use std::sync::{Arc, Mutex};

use mediabuf_core::config::{OverflowPolicy, ViewConfig};
use mediabuf_core::handle::{AllocationHandle, INVALID_HANDLE};
use mediabuf_view::{Aggregate, ContentView, Error, ItemFlags, NewItem};

type Evictions = Arc<Mutex<Vec<(u64, bool)>>>;

const DUR: u64 = 10;

fn view(max_items: u64, max_duration: u64, policy: OverflowPolicy) -> (ContentView<AllocationHandle>, Evictions) {
    let evictions: Evictions = Arc::default();
    let sink = Arc::clone(&evictions);
    let view = ContentView::new(
        ViewConfig::new(max_items, max_duration, policy),
        move |item, delivered| sink.lock().unwrap().push((item.index, delivered)),
    )
    .expect("view creates");
    (view, evictions)
}

fn add(view: &mut ContentView<AllocationHandle>, ts: u64, flags: ItemFlags) -> u64 {
    view.add(NewItem::new(ts, DUR, AllocationHandle::new(ts + 1), 100).with_flags(flags))
        .expect("item accepted")
}

fn take(evictions: &Evictions) -> Vec<(u64, bool)> {
    std::mem::take(&mut *evictions.lock().unwrap())
}

fn assert_ordered(view: &ContentView<AllocationHandle>) {
    let mut prev_end = None;
    for index in view.tail_index()..view.next_index() {
        let item = view.get_item_at(index).unwrap();
        if let Some(end) = prev_end {
            assert!(end <= item.timestamp, "item {index} overlaps its predecessor");
        }
        prev_end = Some(item.end());
    }
}

#[test]
fn test_basic_fifo() {
    let (mut view, evictions) = view(100, 1_000_000, OverflowPolicy::DropTail);
    for i in 0..150 {
        add(&mut view, i * DUR, ItemFlags::FRAGMENT_START);
        assert!(view.len() <= 100);
    }

    assert_eq!(view.window_item_count().window, 100);
    assert_eq!(view.get_tail().unwrap().index, 50);
    assert_eq!(view.get_head().unwrap().index, 149);

    let evicted = take(&evictions);
    assert_eq!(evicted.len(), 50);
    assert_eq!(evicted.first(), Some(&(0, false)));
    assert!(evicted.iter().all(|(_, delivered)| !delivered));
    assert_ordered(&view);
}

#[test]
fn test_fragment_aligned_drop() {
    const FRAGMENT: u64 = 25;
    let (mut view, evictions) = view(FRAGMENT, 1_000_000, OverflowPolicy::DropUntilFragmentStart);
    for i in 0..FRAGMENT {
        let flags = if i == 0 { ItemFlags::FRAGMENT_START } else { ItemFlags::NONE };
        add(&mut view, i * DUR, flags);
    }
    assert!(take(&evictions).is_empty());

    add(&mut view, FRAGMENT * DUR, ItemFlags::FRAGMENT_START);
    let evicted = take(&evictions);
    assert_eq!(evicted.len(), FRAGMENT as usize);
    assert_eq!(evicted.iter().map(|(i, _)| *i).collect::<Vec<_>>(), (0..FRAGMENT).collect::<Vec<_>>());
    assert_eq!(view.len(), 1);
    assert_eq!(view.get_tail().unwrap().index, FRAGMENT);
}

#[test]
fn test_fragment_drop_stops_at_next_fragment() {
    let (mut view, evictions) = view(12, 1_000_000, OverflowPolicy::DropUntilFragmentStart);
    for i in 0..12 {
        let flags = if i % 5 == 0 { ItemFlags::FRAGMENT_START } else { ItemFlags::NONE };
        add(&mut view, i * DUR, flags);
    }
    add(&mut view, 12 * DUR, ItemFlags::NONE);

    assert_eq!(take(&evictions).len(), 5);
    assert_eq!(view.get_tail().unwrap().index, 5);
    assert!(view.get_tail().unwrap().flags.contains(ItemFlags::FRAGMENT_START));
    assert_eq!(view.len(), 8);
}

#[test]
fn test_stream_start_counts_as_fragment_start() {
    let (mut view, evictions) = view(11, 1_000_000, OverflowPolicy::DropUntilFragmentStart);
    add(&mut view, 0, ItemFlags::FRAGMENT_START);
    for i in 1..11 {
        let flags = if i == 3 { ItemFlags::STREAM_START } else { ItemFlags::NONE };
        add(&mut view, i * DUR, flags);
    }
    add(&mut view, 11 * DUR, ItemFlags::NONE);
    assert_eq!(take(&evictions).len(), 3);
    assert_eq!(view.get_tail().unwrap().index, 3);
}

#[test]
fn test_window_bounds_hold_after_every_add() {
    for policy in [OverflowPolicy::DropTail, OverflowPolicy::DropUntilFragmentStart] {
        let (mut view, _) = view(20, 150, policy);
        let mut ts = 0;
        for i in 0..500u64 {
            let duration = 1 + i % 17;
            let flags = if i % 7 == 0 { ItemFlags::FRAGMENT_START } else { ItemFlags::NONE };
            view.add(NewItem::new(ts, duration, INVALID_HANDLE, i).with_flags(flags))
                .unwrap();
            ts += duration + i % 3;

            let count = view.window_item_count();
            let duration = view.window_duration();
            assert!(count.window <= 20, "{policy:?}");
            assert!(duration.window <= 150, "{policy:?}");
            assert!(count.current <= count.window);
        }
        assert_ordered(&view);
    }
}

#[test]
fn test_out_of_order_items_are_rejected() {
    let (mut view, _) = view(20, 1_000, OverflowPolicy::DropTail);
    add(&mut view, 1_000, ItemFlags::NONE);
    let err = view
        .add(NewItem::new(995, DUR, INVALID_HANDLE, 1))
        .unwrap_err();
    assert_eq!(err, Error::OutOfOrder { timestamp: 995, newest_end: 1_010 });
    assert_eq!(view.len(), 1);

    // An empty view accepts any first timestamp.
    view.remove_all();
    add(&mut view, 0, ItemFlags::NONE);
}

#[test]
fn test_trim_reports_delivered_items() {
    let (mut view, evictions) = view(20, 1_000, OverflowPolicy::DropTail);
    for i in 0..6 {
        add(&mut view, i * DUR, ItemFlags::NONE);
    }
    for expected in 0..5 {
        assert_eq!(view.get_next().unwrap().index, expected);
    }

    view.trim_tail(5).unwrap();
    assert_eq!(take(&evictions), (0..5u64).map(|i| (i, true)).collect::<Vec<_>>());
    assert_eq!(view.get_tail().unwrap().index, 5);
    assert_eq!(view.current_index(), 5);
    assert_eq!(view.get_next().unwrap().index, 5);
}

#[test]
fn test_trim_and_remove_all_report_undelivered_items() {
    let (mut view, evictions) = view(20, 1_000, OverflowPolicy::DropTail);
    for i in 0..6 {
        add(&mut view, i * DUR, ItemFlags::NONE);
    }
    view.get_next().unwrap();

    view.trim_tail(3).unwrap();
    assert_eq!(take(&evictions), vec![(0, true), (1, false), (2, false)]);
    assert_eq!(view.current_index(), 3);

    assert_eq!(view.trim_tail(7), Err(Error::InvalidIndex(7)));
    view.trim_tail(6).unwrap();
    assert_eq!(take(&evictions).len(), 3);
    assert!(view.is_empty());
    assert_eq!(view.get_tail().unwrap_err(), Error::NoMoreItems);

    add(&mut view, 100, ItemFlags::NONE);
    add(&mut view, 110, ItemFlags::NONE);
    view.get_next().unwrap();
    view.remove_all();
    assert_eq!(take(&evictions), vec![(6, true), (7, false)]);
    assert_eq!(view.window_item_count(), Aggregate::default());
    assert_eq!(view.window_duration(), Aggregate::default());
    assert_eq!(view.window_allocation_size(), Aggregate::default());
    assert_eq!(view.current_index(), view.next_index());
}

#[test]
fn test_in_flight_item_survives_overflow() {
    let (mut view, evictions) = view(15, 1_000_000, OverflowPolicy::DropTail);
    for i in 0..15 {
        add(&mut view, i * DUR, ItemFlags::NONE);
    }
    let in_flight = view.get_next().unwrap().clone();

    for i in 15..75 {
        add(&mut view, i * DUR, ItemFlags::NONE);
        assert_eq!(view.retained().map(|r| r.index), Some(in_flight.index));
    }
    let evicted = take(&evictions);
    assert!(!evicted.iter().any(|(i, _)| *i == in_flight.index));
    assert_eq!(evicted.len(), 59);
    assert_eq!(view.window_item_count().window, 15);
    assert_eq!(view.retained().unwrap().handle, in_flight.handle);

    // Once the cursor moves on, the next overflow releases it. The item now
    // in flight is held back in its place.
    let next = view.get_next().unwrap().index;
    add(&mut view, 75 * DUR, ItemFlags::NONE);
    let evicted = take(&evictions);
    assert_eq!(evicted, vec![(in_flight.index, true)]);
    assert_eq!(view.retained().map(|r| r.index), Some(next));
}

#[test]
fn test_in_flight_item_survives_fragment_drop() {
    let (mut view, evictions) = view(11, 1_000_000, OverflowPolicy::DropUntilFragmentStart);
    for i in 0..11 {
        let flags = if i % 4 == 0 { ItemFlags::FRAGMENT_START } else { ItemFlags::NONE };
        add(&mut view, i * DUR, flags);
    }
    view.get_next().unwrap();
    view.get_next().unwrap();

    add(&mut view, 11 * DUR, ItemFlags::FRAGMENT_START);
    assert_eq!(take(&evictions), vec![(0, true), (2, false), (3, false)]);
    assert_eq!(view.retained().map(|r| r.index), Some(1));
    assert_eq!(view.get_tail().unwrap().index, 4);
    assert_eq!(view.current_index(), 4);

    // Explicit removal still reports it.
    view.remove_all();
    assert_eq!(take(&evictions)[0], (1, true));
}

#[test]
fn test_trim_past_retained_item_evicts_it() {
    let (mut view, evictions) = view(11, 1_000_000, OverflowPolicy::DropTail);
    for i in 0..11 {
        add(&mut view, i * DUR, ItemFlags::NONE);
    }
    assert_eq!(view.get_next().unwrap().index, 0);
    add(&mut view, 11 * DUR, ItemFlags::NONE);
    assert_eq!(view.retained().map(|r| r.index), Some(0));
    assert!(take(&evictions).is_empty());

    view.trim_tail(view.next_index()).unwrap();
    let evicted = take(&evictions);
    assert_eq!(evicted[0], (0, true));
    assert_eq!(evicted.len(), 12);
    assert!(evicted[1..].iter().all(|(_, delivered)| !delivered));
    assert!(view.retained().is_none());
    assert!(view.is_empty());

    // Nothing is left behind to report later.
    assert_eq!(view.get_next().unwrap_err(), Error::NoMoreItems);
    add(&mut view, 12 * DUR, ItemFlags::NONE);
    view.remove_all();
    assert_eq!(take(&evictions), vec![(12, false)]);
}

#[test]
fn test_timestamp_lookup() {
    let (mut view, _) = view(20, 1_000, OverflowPolicy::DropTail);
    view.add(NewItem::new(100, 10, INVALID_HANDLE, 1).with_ack_timestamp(200)).unwrap();
    view.add(NewItem::new(110, 10, INVALID_HANDLE, 1).with_ack_timestamp(210)).unwrap();
    view.add(NewItem::new(150, 10, INVALID_HANDLE, 1).with_ack_timestamp(250)).unwrap();

    assert_eq!(view.get_item_with_timestamp(100, false).unwrap().index, 0);
    assert_eq!(view.get_item_with_timestamp(119, false).unwrap().index, 1);
    // Gap between 120 and 150 resolves to the newer item.
    assert_eq!(view.get_item_with_timestamp(130, false).unwrap().index, 2);
    assert_eq!(view.get_item_with_timestamp(215, true).unwrap().index, 1);
    assert_eq!(view.get_item_with_timestamp(230, true).unwrap().index, 2);

    assert_eq!(view.get_item_with_timestamp(99, false).unwrap_err(), Error::InvalidTimestamp(99));
    assert_eq!(view.get_item_with_timestamp(160, false).unwrap_err(), Error::InvalidTimestamp(160));
    assert!(view.timestamp_in_range(205, true));
    assert!(!view.timestamp_in_range(205, false));

    assert!(view.item_exists(2));
    assert!(!view.item_exists(3));
    assert_eq!(view.get_item_at(3).unwrap_err(), Error::InvalidIndex(3));
}

#[test]
fn test_rollback_by_duration() {
    let (mut view, _) = view(20, 1_000, OverflowPolicy::DropTail);
    for i in 0..10 {
        add(&mut view, i * DUR, ItemFlags::NONE);
    }
    view.set_current_index(8).unwrap();

    view.rollback_current(25, false, false).unwrap();
    assert_eq!(view.current_index(), 5);

    view.rollback_current(1_000, false, false).unwrap();
    assert_eq!(view.current_index(), 0);

    // Nothing delivered, nothing to roll back.
    view.rollback_current(1_000, false, false).unwrap();
    assert_eq!(view.current_index(), 0);
}

#[test]
fn test_rollback_stops_at_fragment_start() {
    let (mut view, _) = view(20, 1_000, OverflowPolicy::DropTail);
    for i in 0..12 {
        let flags = if i % 4 == 0 { ItemFlags::FRAGMENT_START } else { ItemFlags::NONE };
        add(&mut view, i * DUR, flags);
    }
    view.set_current_index(7).unwrap();
    view.rollback_current(1_000, true, false).unwrap();
    assert_eq!(view.current_index(), 4);

    view.set_current_index(6).unwrap();
    view.rollback_current(5, true, false).unwrap();
    assert_eq!(view.current_index(), 4);
}

#[test]
fn test_rollback_only_through_acked_items() {
    let acked = ItemFlags::BUFFERING_ACK | ItemFlags::RECEIVED_ACK;
    let (mut view, _) = view(20, 1_000, OverflowPolicy::DropTail);
    add(&mut view, 0, acked);
    add(&mut view, 10, ItemFlags::BUFFERING_ACK);
    add(&mut view, 20, acked);
    add(&mut view, 30, acked);
    add(&mut view, 40, ItemFlags::NONE);
    view.set_current_index(4).unwrap();

    view.rollback_current(1_000, false, true).unwrap();
    assert_eq!(view.current_index(), 2);

    view.set_current_index(5).unwrap();
    view.rollback_current(1_000, false, true).unwrap();
    assert_eq!(view.current_index(), 5);
}

#[test]
fn test_aggregates_track_cursor() {
    let (mut view, _) = view(20, 1_000, OverflowPolicy::DropTail);
    for i in 0..5 {
        view.add(NewItem::new(i * DUR, DUR, INVALID_HANDLE, 10 * (i + 1))).unwrap();
    }
    assert_eq!(view.window_allocation_size(), Aggregate { current: 150, window: 150 });

    view.get_next().unwrap();
    view.get_next().unwrap();
    assert_eq!(view.window_item_count(), Aggregate { current: 3, window: 5 });
    assert_eq!(view.window_duration(), Aggregate { current: 30, window: 50 });
    assert_eq!(view.window_allocation_size(), Aggregate { current: 120, window: 150 });

    view.reset_current();
    assert_eq!(view.window_item_count(), Aggregate { current: 5, window: 5 });
}

#[test]
fn test_availability() {
    let (mut view, _) = view(11, 100, OverflowPolicy::DropTail);
    assert!(view.check_availability());
    for i in 0..10 {
        add(&mut view, i * DUR, ItemFlags::NONE);
    }
    // Duration is at the limit.
    assert!(!view.check_availability());
    view.trim_tail(1).unwrap();
    assert!(view.check_availability());
}

#[test]
fn test_invalid_configs_are_rejected() {
    let bad = [
        ViewConfig::new(10, 1_000, OverflowPolicy::DropTail),
        ViewConfig::new(11, 0, OverflowPolicy::DropTail),
    ];
    for config in bad {
        let err = ContentView::<u64>::new(config, |_, _| {}).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
