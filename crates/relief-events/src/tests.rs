//! Unit tests for the bounded event log.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use relief_types::Payload;
use serde_json::json;

use crate::clock::Clock;
use crate::error::EventLogError;
use crate::event_log::EventLog;

/// Clock whose time only moves when a test says so.
#[derive(Clone, Default)]
struct ManualClock(Arc<AtomicI64>);

impl ManualClock {
    fn set(&self, millis: i64) {
        self.0.store(millis, Ordering::SeqCst);
    }

    fn advance(&self, millis: i64) {
        self.0.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

fn payload(id: &str) -> Payload {
    let mut p = Payload::new();
    p.insert("id".to_string(), json!(id));
    p
}

fn test_log(capacity: usize) -> (EventLog, ManualClock) {
    let clock = ManualClock::default();
    clock.set(1_000);
    let log = EventLog::with_clock(capacity, clock.clone()).expect("capacity is non-zero");
    (log, clock)
}

// ── publish ──────────────────────────────────────────────────────────

#[test]
fn zero_capacity_is_rejected() {
    let err = EventLog::new(0).expect_err("zero capacity must fail");
    assert_eq!(err, EventLogError::ZeroCapacity);
}

#[test]
fn publish_assigns_increasing_ids_and_timestamps() {
    let (mut log, clock) = test_log(10);

    let first = log.publish("rescue", "rescue.created", payload("RO-1"));
    clock.advance(5);
    let second = log.publish("rescue", "rescue.status_changed", payload("RO-1"));

    assert_eq!(first.id, 1);
    assert_eq!(second.id, 2);
    assert_eq!(first.timestamp, 1_000);
    assert_eq!(second.timestamp, 1_005);
    assert_eq!(second.channel, "rescue");
    assert_eq!(second.payload["id"], "RO-1");
    assert_eq!(log.len(), 2);
    assert_eq!(log.last_id(), Some(2));
}

#[test]
fn timestamps_never_go_backwards() {
    let (mut log, clock) = test_log(10);

    clock.set(5_000);
    let a = log.publish("c", "x.y", Payload::new());
    clock.set(4_000);
    let b = log.publish("c", "x.y", Payload::new());

    assert_eq!(a.timestamp, 5_000);
    assert_eq!(b.timestamp, 5_000, "clock step back is clamped");
    assert!(b.id > a.id);
}

#[test]
fn empty_log_reports_nothing() {
    let (log, _) = test_log(3);
    assert!(log.is_empty());
    assert_eq!(log.last_id(), None);
    assert_eq!(log.oldest_id(), None);
    assert!(log.latest_events(5).is_empty());
    assert!(log.events_since(i64::MIN).is_empty());
}

// ── eviction ─────────────────────────────────────────────────────────

#[test]
fn eviction_keeps_most_recent_capacity_events() {
    let capacity = 5;
    let (mut log, clock) = test_log(capacity);

    for i in 0..(capacity + 3) {
        log.publish("supply", "supply.approved", payload(&format!("RS-{i}")));
        clock.advance(1);
    }

    assert_eq!(log.len(), capacity);
    let ids: Vec<u64> = log.latest_events(usize::MAX).iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![4, 5, 6, 7, 8], "oldest entries evicted first");
    assert_eq!(log.oldest_id(), Some(4));
    assert_eq!(log.last_id(), Some(8));
}

#[test]
fn ids_are_not_reused_after_eviction() {
    let (mut log, _) = test_log(1);
    let a = log.publish("c", "a.b", Payload::new());
    let b = log.publish("c", "a.b", Payload::new());
    let c = log.publish("c", "a.b", Payload::new());
    assert_eq!((a.id, b.id, c.id), (1, 2, 3));
    assert_eq!(log.len(), 1);
}

#[test]
fn default_capacity_holds_exactly_max_events() {
    let mut log = EventLog::new(relief_types::DEFAULT_MAX_EVENTS).expect("valid capacity");
    for _ in 0..(relief_types::DEFAULT_MAX_EVENTS + 1) {
        log.publish("task", "task.updated", Payload::new());
    }
    assert_eq!(log.len(), relief_types::DEFAULT_MAX_EVENTS);
    assert_eq!(log.oldest_id(), Some(2));
}

// ── events_since ─────────────────────────────────────────────────────

#[test]
fn events_since_is_strictly_greater() {
    let (mut log, clock) = test_log(100);

    // Two events share a millisecond to exercise the strict comparison.
    clock.set(100);
    log.publish("c", "a.one", Payload::new());
    log.publish("c", "a.two", Payload::new());
    clock.set(200);
    log.publish("c", "a.three", Payload::new());
    clock.set(300);
    log.publish("c", "a.four", Payload::new());

    let types: Vec<String> = log
        .events_since(100)
        .into_iter()
        .map(|e| e.event_type)
        .collect();
    assert_eq!(types, vec!["a.three", "a.four"]);

    assert_eq!(log.events_since(99).len(), 4);
    assert!(log.events_since(300).is_empty());
}

#[test]
fn events_since_matches_filter_over_every_cutoff() {
    let (mut log, clock) = test_log(8);
    let mut published = Vec::new();
    for step in [0, 3, 0, 7, 1, 0, 2, 5, 4, 0, 1] {
        clock.advance(step);
        published.push(log.publish("c", "a.b", Payload::new()));
    }
    let retained: Vec<_> = published[published.len() - 8..].to_vec();

    for cutoff in 990..1_040 {
        let expected: Vec<u64> = retained
            .iter()
            .filter(|e| e.timestamp > cutoff)
            .map(|e| e.id)
            .collect();
        let got: Vec<u64> = log.events_since(cutoff).iter().map(|e| e.id).collect();
        assert_eq!(got, expected, "cutoff {cutoff}");
        assert!(got.windows(2).all(|w| w[0] < w[1]), "ids must ascend");
    }
}

// ── events_after ─────────────────────────────────────────────────────

#[test]
fn events_after_returns_suffix_by_id() {
    let (mut log, _) = test_log(3);
    for _ in 0..5 {
        log.publish("c", "a.b", Payload::new());
    }

    let ids: Vec<u64> = log.events_after(3).iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![4, 5]);

    // An id older than the retained window yields everything retained.
    let ids: Vec<u64> = log.events_after(0).iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![3, 4, 5]);

    assert!(log.events_after(5).is_empty());
}

// ── latest_events ────────────────────────────────────────────────────

#[test]
fn latest_events_on_short_log_returns_all_in_order() {
    let (mut log, _) = test_log(10);
    log.publish("c", "a.one", Payload::new());
    log.publish("c", "a.two", Payload::new());

    let types: Vec<String> = log
        .latest_events(5)
        .into_iter()
        .map(|e| e.event_type)
        .collect();
    assert_eq!(types, vec!["a.one", "a.two"]);
}

#[test]
fn latest_events_returns_exactly_last_n() {
    let (mut log, _) = test_log(10);
    for _ in 0..6 {
        log.publish("c", "a.b", Payload::new());
    }

    let ids: Vec<u64> = log.latest_events(3).iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![4, 5, 6]);
    assert!(log.latest_events(0).is_empty());
}
