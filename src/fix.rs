use serde::Serialize;

pub const KM_TO_M: f64 = 1000.0;

/// # Explanation
/// A position sample as delivered by the positioning provider. Speed is in km/h, heading in degrees,
/// the timestamp is the fix epoch in milliseconds. The trip distance is not part of the sample, it is
/// counted by the Odometer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PositionRecord {
    pub fix_validity: u32,
    pub fix_type: u8,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub heading: f64,
    pub speed: f64,
    pub accuracy: f64,
    pub pdop: f64,
    pub hdop: f64,
    pub vdop: f64,
    pub satellites: Vec<u32>,
    pub timestamp_ms: u64,
}

/// # Explanation
/// The vehicle data that is copied into every fix. It comes from the remote configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VehicleData {
    pub axles: u32,
    pub train_weight: u32,
    pub actual_weight: u32,
    pub trailer_type: i32,
}

/// # Explanation
/// A fix as it is stored in the transmission queue. Once a FixRecord is admitted to the queue it is
/// never modified again; it is moved out of the queue either to be sent or to be written to disk.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct FixRecord {
    pub id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub heading: f64,
    pub speed: f64,
    pub accuracy: f64,
    pub satellites: u32,
    pub fix_validity: u32,
    pub fix_type: u8,
    pub pdop: f64,
    pub hdop: f64,
    pub vdop: f64,
    pub timestamp_ms: u64,
    pub total_distance_m: i32,
    pub axles: u32,
    pub train_weight: u32,
    pub actual_weight: u32,
    pub trailer_type: i32,
}

impl FixRecord {
    /// # Explanation
    /// Builds a fix from a position sample. The trip distance is the odometer value (km) at the time
    /// the position was received. The identifier stays empty until the fix is admitted.
    pub fn from_position(position: &PositionRecord, trip_distance_km: f64, vehicle: VehicleData) -> Self {
        FixRecord {
            id: String::new(),
            latitude: position.latitude,
            longitude: position.longitude,
            altitude: position.altitude,
            heading: position.heading,
            speed: position.speed,
            accuracy: position.accuracy,
            satellites: position.satellites.len() as u32,
            fix_validity: position.fix_validity,
            fix_type: position.fix_type,
            pdop: position.pdop,
            hdop: position.hdop,
            vdop: position.vdop,
            timestamp_ms: position.timestamp_ms,
            total_distance_m: (trip_distance_km * KM_TO_M) as i32,
            axles: vehicle.axles,
            train_weight: vehicle.train_weight,
            actual_weight: vehicle.actual_weight,
            trailer_type: vehicle.trailer_type,
        }
    }

    pub fn trip_distance_km(&self) -> f64 {
        f64::from(self.total_distance_m) / KM_TO_M
    }
}
