use crate::fix::PositionRecord;

const MILLISECOND_TO_HOUR: f64 = 1.0 / 3_600_000.0;

/// # Explanation
/// The odometer integrates the trip distance (km) from the speed (km/h) and the timestamp of
/// consecutive positions. Between two positions the average of both speeds is used.
#[derive(Debug, Default)]
pub struct Odometer {
    total_distance: f64,
    last_position: Option<(f64, u64)>,
}

impl Odometer {
    pub fn new() -> Self {
        Odometer::default()
    }

    pub fn reset(&mut self) {
        self.total_distance = 0.0;
        self.last_position = None;
    }

    pub fn position_received(&mut self, position: &PositionRecord) {
        if let Some((last_speed, last_time)) = self.last_position {
            let average_speed = (position.speed + last_speed) * 0.5;
            let delta_time = (position.timestamp_ms as f64 - last_time as f64) * MILLISECOND_TO_HOUR;
            // only forward movement in time counts
            if average_speed > 0.0 && delta_time > 0.0 {
                self.total_distance += average_speed * delta_time;
            }
            log::debug!("Odometer: trip distance is now {:.3} km", self.total_distance);
        }

        self.last_position = Some((position.speed, position.timestamp_ms));
    }

    pub fn trip_distance(&self) -> f64 {
        self.total_distance
    }
}

#[cfg(test)]
mod tests {
    use crate::fix::PositionRecord;
    use crate::odometer::Odometer;

    fn position(speed: f64, timestamp_ms: u64) -> PositionRecord {
        PositionRecord {
            speed,
            timestamp_ms,
            ..PositionRecord::default()
        }
    }

    #[test]
    fn test_integrates_average_speed() {
        let mut odometer = Odometer::new();
        odometer.position_received(&position(60.0, 0));
        assert_eq!(odometer.trip_distance(), 0.0);

        // 30 minutes at an average of 80 km/h
        odometer.position_received(&position(100.0, 1_800_000));
        assert!((odometer.trip_distance() - 40.0).abs() < 1e-6);
    }

    #[test]
    fn test_ignores_backwards_time_and_standstill() {
        let mut odometer = Odometer::new();
        odometer.position_received(&position(50.0, 10_000));
        odometer.position_received(&position(50.0, 5_000));
        assert_eq!(odometer.trip_distance(), 0.0);

        odometer.position_received(&position(0.0, 6_000));
        odometer.position_received(&position(0.0, 60_000));
        assert_eq!(odometer.trip_distance(), 0.0);
    }

    #[test]
    fn test_reset() {
        let mut odometer = Odometer::new();
        odometer.position_received(&position(36.0, 0));
        odometer.position_received(&position(36.0, 100_000));
        assert!(odometer.trip_distance() > 0.0);

        odometer.reset();
        assert_eq!(odometer.trip_distance(), 0.0);
        odometer.position_received(&position(36.0, 200_000));
        assert_eq!(odometer.trip_distance(), 0.0);
    }
}
