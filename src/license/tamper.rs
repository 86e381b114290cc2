use chrono::Duration;
use std::sync::Arc;

use super::clock::Clock;
use super::store::EntitlementStore;
use super::types::{TamperCheck, TamperCheckState};

/// Smallest tolerance accepted; covers timezone and DST corrections.
pub const MIN_TOLERANCE_SECS: i64 = 120;

/// Detects the system clock moving backwards past a persisted watermark.
pub struct TamperDetector {
    store: Arc<EntitlementStore>,
    clock: Arc<dyn Clock>,
    tolerance: Duration,
}

impl TamperDetector {
    pub fn new(store: Arc<EntitlementStore>, clock: Arc<dyn Clock>, tolerance: Duration) -> Self {
        let floor = Duration::seconds(MIN_TOLERANCE_SECS);
        Self {
            store,
            clock,
            tolerance: tolerance.max(floor),
        }
    }

    pub fn tolerance(&self) -> Duration {
        self.tolerance
    }

    /// Compares now against the watermark and advances it when time looks sane.
    ///
    /// The watermark is never lowered, including when manipulation is found.
    pub fn check_time_manipulation(&self) -> TamperCheck {
        let now = self.clock.now();

        if let Some(state) = self.store.load_watermark() {
            let watermark = state.last_known_good_timestamp;
            if now < watermark - self.tolerance {
                log::error!(
                    "System clock is {} seconds behind the last known good time",
                    (watermark - now).num_seconds()
                );
                return TamperCheck { manipulated: true };
            }
            if now <= watermark {
                return TamperCheck { manipulated: false };
            }
        }

        let advanced = TamperCheckState {
            last_known_good_timestamp: now,
        };
        // A failed write only means the next check compares against an older mark
        if let Err(e) = self.store.save_watermark(&advanced) {
            log::warn!("Failed to advance time watermark: {}", e);
        }
        TamperCheck { manipulated: false }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::license::clock::ManualClock;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn detector(dir: &TempDir, clock: Arc<ManualClock>) -> (TamperDetector, Arc<EntitlementStore>) {
        let store = Arc::new(EntitlementStore::open(dir.path(), "machine-a"));
        let detector = TamperDetector::new(store.clone(), clock, Duration::seconds(120));
        (detector, store)
    }

    fn start() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_first_check_sets_watermark() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(start()));
        let (detector, store) = detector(&dir, clock);

        assert!(!detector.check_time_manipulation().manipulated);
        assert_eq!(
            store.load_watermark().unwrap().last_known_good_timestamp,
            start()
        );
    }

    #[test]
    fn test_repeated_check_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(start()));
        let (detector, _) = detector(&dir, clock);

        assert!(!detector.check_time_manipulation().manipulated);
        assert!(!detector.check_time_manipulation().manipulated);
    }

    #[test]
    fn test_small_backward_step_is_tolerated() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(start()));
        let (detector, store) = detector(&dir, clock.clone());

        detector.check_time_manipulation();
        clock.advance(Duration::seconds(-90));

        assert!(!detector.check_time_manipulation().manipulated);
        // Watermark did not move backwards
        assert_eq!(
            store.load_watermark().unwrap().last_known_good_timestamp,
            start()
        );
    }

    #[test]
    fn test_rollback_beyond_tolerance_is_flagged() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(start()));
        let (detector, store) = detector(&dir, clock.clone());

        detector.check_time_manipulation();
        clock.advance(Duration::hours(-1));

        assert!(detector.check_time_manipulation().manipulated);
        assert_eq!(
            store.load_watermark().unwrap().last_known_good_timestamp,
            start()
        );
    }

    #[test]
    fn test_watermark_advances_with_time() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(start()));
        let (detector, store) = detector(&dir, clock.clone());

        detector.check_time_manipulation();
        clock.advance(Duration::days(3));
        detector.check_time_manipulation();

        assert_eq!(
            store.load_watermark().unwrap().last_known_good_timestamp,
            start() + Duration::days(3)
        );
    }

    #[test]
    fn test_tolerance_has_a_floor() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(EntitlementStore::open(dir.path(), "machine-a"));
        let clock = Arc::new(ManualClock::new(start()));
        let detector = TamperDetector::new(store, clock, Duration::seconds(5));
        assert_eq!(detector.tolerance(), Duration::seconds(MIN_TOLERANCE_SECS));
    }
}
