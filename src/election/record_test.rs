//! Tests for the election record value

#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::record::{now_micro, ElectionRecord};
use chrono::Duration;

#[test]
fn test_new_record_is_well_formed() {
    let record = ElectionRecord::new("replica-a", 30, now_micro());
    assert!(record.is_well_formed());
    assert_eq!(record.holder, "replica-a");
    assert_eq!(record.lease_duration_seconds, 30);
    assert!(record.renew_time.is_some());
}

#[test]
fn test_records_compare_field_wise() {
    let now = now_micro();
    let record = ElectionRecord::new("replica-a", 30, now);

    assert_eq!(record, record.clone());
    assert_eq!(record, ElectionRecord::new("replica-a", 30, now));

    assert_ne!(record, ElectionRecord::new("replica-b", 30, now));
    assert_ne!(record, ElectionRecord::new("replica-a", 15, now));
    assert_ne!(
        record,
        ElectionRecord::new("replica-a", 30, now + Duration::microseconds(1))
    );
}

#[test]
fn test_empty_holder_is_malformed() {
    let record = ElectionRecord::new("", 30, now_micro());
    assert!(!record.is_well_formed());
}

#[test]
fn test_non_positive_duration_is_malformed() {
    assert!(!ElectionRecord::new("replica-a", 0, now_micro()).is_well_formed());
    assert!(!ElectionRecord::new("replica-a", -5, now_micro()).is_well_formed());
}

#[test]
fn test_missing_renew_time_is_malformed() {
    let record = ElectionRecord {
        holder: "replica-a".to_string(),
        lease_duration_seconds: 30,
        renew_time: None,
    };
    assert!(!record.is_well_formed());
}

/// The wire format carries microseconds; fresh timestamps must not hold
/// sub-microsecond precision or a read-back record would never compare
/// equal to the one written.
#[test]
fn test_now_micro_truncates_to_whole_microseconds() {
    for _ in 0..100 {
        let now = now_micro();
        assert_eq!(now.timestamp_subsec_nanos() % 1_000, 0);
    }
}
