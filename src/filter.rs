use std::sync::Arc;

use crate::fix::{FixRecord, KM_TO_M};
use crate::store::{ConfigurationStore, RemoteSettings};

/// # Explanation
/// The values of the last admitted fix the filter compares new fixes against. `has_previous` is false
/// after construction and after a reset, in which case the next fix is always admitted.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FilterState {
    pub has_previous: bool,
    pub timestamp_ms: u64,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub heading: f64,
    pub total_distance_m: i32,
}

/// # Explanation
/// The FixFilter decides whether a fix is worth transmitting. A fix is admitted when its position
/// differs from the last admitted fix and at least one of the time, heading or distance thresholds
/// is reached. The thresholds are read from the configuration store on every call.
pub struct FixFilter {
    state: FilterState,
    store: Arc<dyn ConfigurationStore>,
}

impl FixFilter {
    pub fn new(store: Arc<dyn ConfigurationStore>) -> Self {
        FixFilter {
            state: FilterState::default(),
            store,
        }
    }

    pub fn state(&self) -> &FilterState {
        &self.state
    }

    pub fn should_admit(&self, fix: &FixRecord) -> bool {
        if !self.state.has_previous {
            log::debug!("FixFilter: no previous fix, admitting");
            return true;
        }

        let last = &self.state;
        let settings = RemoteSettings::new(self.store.as_ref());

        // exact comparison, a fix reported at the very same position is a duplicate
        let position_changed = fix.latitude != last.latitude
            || fix.longitude != last.longitude
            || fix.altitude != last.altitude;
        if !position_changed {
            log::debug!("FixFilter: position unchanged, fix dropped");
            return false;
        }

        let elapsed_s = fix.timestamp_ms.abs_diff(last.timestamp_ms) as f64 / 1000.0;
        let time_ok = elapsed_s >= f64::from(settings.filter_time());

        let heading_ok = heading_difference(fix.heading, last.heading) >= settings.filter_heading();

        let travelled_km = f64::from(fix.total_distance_m - last.total_distance_m) / KM_TO_M;
        let distance_ok = travelled_km >= settings.filter_distance();

        log::debug!(
            "FixFilter: time_ok = {}, heading_ok = {}, distance_ok = {}",
            time_ok,
            heading_ok,
            distance_ok
        );
        time_ok || heading_ok || distance_ok
    }

    pub fn record_admitted(&mut self, fix: &FixRecord) {
        self.state = FilterState {
            has_previous: true,
            timestamp_ms: fix.timestamp_ms,
            latitude: fix.latitude,
            longitude: fix.longitude,
            altitude: fix.altitude,
            heading: fix.heading,
            total_distance_m: fix.total_distance_m,
        };
    }

    /// Forces the admission of the next fix.
    pub fn reset(&mut self) {
        self.state.has_previous = false;
    }
}

/// # Explanation
/// The shortest angular distance between two headings in degrees (0 to 180).
pub fn heading_difference(a: f64, b: f64) -> f64 {
    let difference = (a - b).abs() % 360.0;
    if difference > 180.0 {
        360.0 - difference
    } else {
        difference
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::filter::{heading_difference, FixFilter};
    use crate::fix::FixRecord;
    use crate::store::MemoryStore;

    fn fix(latitude: f64, timestamp_s: u64, heading: f64, total_distance_m: i32) -> FixRecord {
        FixRecord {
            latitude,
            longitude: 7.0,
            altitude: 300.0,
            heading,
            timestamp_ms: timestamp_s * 1000,
            total_distance_m,
            ..FixRecord::default()
        }
    }

    fn filter() -> FixFilter {
        let store = MemoryStore::new()
            .with("filter_time", 60)
            .with("filter_heading", 45.0)
            .with("filter_distance", 1.0);
        FixFilter::new(Arc::new(store))
    }

    #[test]
    fn test_heading_difference() {
        assert_eq!(heading_difference(10.0, 350.0), 20.0);
        assert_eq!(heading_difference(350.0, 10.0), 20.0);
        assert_eq!(heading_difference(0.0, 180.0), 180.0);
        assert_eq!(heading_difference(90.0, 90.0), 0.0);
        assert_eq!(heading_difference(720.0, 45.0), 45.0);
    }

    #[test]
    fn test_identical_position_is_never_admitted() {
        let mut filter = filter();
        let first = fix(45.0, 0, 0.0, 0);
        assert!(filter.should_admit(&first));
        filter.record_admitted(&first);

        // every threshold reached, but the position did not change
        let same = fix(45.0, 10_000, 180.0, 50_000);
        assert!(!filter.should_admit(&same));
    }

    #[test]
    fn test_thresholds() {
        let mut filter = filter();
        let first = fix(45.0, 1000, 0.0, 0);
        filter.record_admitted(&first);

        // moved, but below every threshold
        assert!(!filter.should_admit(&fix(45.001, 1030, 10.0, 500)));
        // time
        assert!(filter.should_admit(&fix(45.001, 1060, 10.0, 500)));
        // time measured as absolute difference
        assert!(filter.should_admit(&fix(45.001, 900, 10.0, 500)));
        // heading across north
        assert!(filter.should_admit(&fix(45.001, 1030, 300.0, 500)));
        // distance
        assert!(filter.should_admit(&fix(45.001, 1030, 10.0, 1000)));
    }

    #[test]
    fn test_first_fix_after_reset() {
        let mut filter = filter();
        let first = fix(45.0, 0, 0.0, 0);
        filter.record_admitted(&first);
        assert!(!filter.should_admit(&first));

        filter.reset();
        assert!(!filter.state().has_previous);
        assert!(filter.should_admit(&first));
    }

    #[test]
    fn test_fallback_thresholds() {
        let mut filter = FixFilter::new(Arc::new(MemoryStore::new()));
        filter.record_admitted(&fix(45.0, 0, 0.0, 0));

        assert!(!filter.should_admit(&fix(45.1, 299, 89.0, 1999)));
        assert!(filter.should_admit(&fix(45.1, 300, 89.0, 1999)));
        assert!(filter.should_admit(&fix(45.1, 10, 90.0, 0)));
        assert!(filter.should_admit(&fix(45.1, 10, 0.0, 2000)));
    }
}
