use std::path::Path;
use std::sync::mpsc::Sender;
use std::thread::JoinHandle;

use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use nmea::sentences::{GgaData, RmcData};
use nmea::ParseResult;
use regex::Regex;

use crate::events::Event;
use crate::fix::PositionRecord;
use crate::utils::GameLoop;

const KNOTS_TO_KMH: f64 = 1.852;
const SENTENCE_PATTERN: &str = r"\$.{0,2}(GGA|RMC)[^\r\n]{0,200}";

/// # Explanation
/// This function returns the GGA and RMC sentences found in the given text, in order.
pub fn extract_sentences(text: &str) -> Vec<String> {
    match Regex::new(SENTENCE_PATTERN) {
        Ok(re) => re.find_iter(text).map(|m| m.as_str().trim().to_string()).collect(),
        Err(e) => {
            log::error!("invalid sentence pattern: {}", e);
            Vec::new()
        }
    }
}

/// # Explanation
/// Builds position records from a stream of NMEA sentences. The RMC sentence carries the position, time,
/// speed and course, and completes a record; the GGA sentence before it adds the altitude, the hdop and
/// the fix quality.
#[derive(Debug, Default)]
pub struct PositionAssembler {
    last_gga: Option<GgaData>,
}

impl PositionAssembler {
    pub fn new() -> Self {
        PositionAssembler::default()
    }

    pub fn feed(&mut self, sentence: &str) -> Option<PositionRecord> {
        match nmea::parse_str(sentence) {
            Ok(ParseResult::GGA(gga)) => {
                log::trace!("GGA: {:?}", gga);
                self.last_gga = Some(gga);
                None
            }
            Ok(ParseResult::RMC(rmc)) => {
                log::trace!("RMC: {:?}", rmc);
                self.position_from_rmc(rmc)
            }
            Ok(_) => None,
            Err(e) => {
                log::debug!("cannot parse '{}': {:?}", sentence, e);
                None
            }
        }
    }

    fn position_from_rmc(&self, rmc: RmcData) -> Option<PositionRecord> {
        let (latitude, longitude) = match rmc {
            RmcData {
                lat: Some(lat),
                lon: Some(lon),
                ..
            } => (lat, lon),
            _ => return None,
        };

        let mut position = PositionRecord {
            fix_validity: 1,
            latitude,
            longitude,
            heading: rmc.true_course.map_or(0.0, f64::from),
            speed: rmc.speed_over_ground.map_or(0.0, |knots| f64::from(knots) * KNOTS_TO_KMH),
            timestamp_ms: timestamp_ms(rmc.fix_date, rmc.fix_time).unwrap_or(0),
            ..PositionRecord::default()
        };

        if let Some(gga) = &self.last_gga {
            position.altitude = gga.altitude.map_or(0.0, f64::from);
            position.hdop = gga.hdop.map_or(0.0, f64::from);
            // 3d fix with four satellites or more
            position.fix_type = match gga.fix_satellites {
                Some(count) if count >= 4 => 3,
                Some(_) => 2,
                None => 0,
            };
        }
        Some(position)
    }
}

fn timestamp_ms(date: Option<NaiveDate>, time: Option<NaiveTime>) -> Option<u64> {
    let date_time = date?.and_time(time?);
    let millis = Utc.from_utc_datetime(&date_time).timestamp_millis();
    u64::try_from(millis).ok()
}

/// # Explanation
/// The positioning provider of the binary: it replays a recorded NMEA log at a fixed rate of positions per
/// second and emits a position update event for each of them.
pub struct NmeaReplay {
    sentences: Vec<String>,
}

impl NmeaReplay {
    pub fn from_text(text: &str) -> Self {
        NmeaReplay {
            sentences: extract_sentences(text),
        }
    }

    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self::from_text(&text))
    }

    pub fn positions(&self) -> Vec<PositionRecord> {
        let mut assembler = PositionAssembler::new();
        self.sentences
            .iter()
            .filter_map(|sentence| assembler.feed(sentence))
            .collect()
    }

    pub fn spawn(self, rate: f64, sender: Sender<Event>) -> std::io::Result<JoinHandle<()>> {
        let positions = self.positions();
        log::info!("replaying {} positions at {} per second", positions.len(), rate);

        std::thread::Builder::new()
            .name("nmea replay".to_string())
            .spawn(move || {
                for (position, _) in positions.into_iter().zip(GameLoop::from_fps(rate)) {
                    if sender.send(Event::PositionUpdated(position)).is_err() {
                        break;
                    }
                }
                log::info!("nmea replay finished");
            })
    }
}
