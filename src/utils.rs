use std::error::Error;
use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;
use std::time::{Duration, Instant};

use log::LevelFilter;
use simplelog::{Config, WriteLogger};

/// # Explanation
/// This function initializes the logger. The log level is read from the RUST_LOG environment variable and,
/// when it is not set, from the given configured level. It should be one of off, error, warn, info, debug or
/// trace (the default is info). The log is written to the given file.
pub fn logger_init(configured_level: &str, log_file: &Path) -> Result<(), Box<dyn Error>> {
    let log_level = std::env::var("RUST_LOG").unwrap_or(configured_level.to_string());
    let log_level = LevelFilter::from_str(&log_level).unwrap_or(LevelFilter::Info);

    let log_file = std::fs::File::create(log_file)?;
    WriteLogger::init(log_level, Config::default(), log_file)?;
    Ok(())
}

/// # Explanation
/// The game loop is an iterator that waits when the next function is called if the execution is faster
/// than the frame rate allows.
pub struct GameLoop {
    frame: u64,
    current_frame_start: Instant,
    duration_per_frame: Duration,
}

impl GameLoop {
    pub fn new(duration_per_frame: Duration) -> GameLoop {
        GameLoop {
            frame: 0,
            current_frame_start: Instant::now(),
            duration_per_frame,
        }
    }

    pub fn from_fps(fps: f64) -> GameLoop {
        let duration_per_frame = Duration::from_secs_f64(1.0 / fps.max(0.001));
        Self::new(duration_per_frame)
    }
}

impl Iterator for GameLoop {
    type Item = u64;

    fn next(&mut self) -> Option<Self::Item> {
        let end_time = self.current_frame_start + self.duration_per_frame;
        let now = Instant::now();
        if now <= end_time {
            std::thread::sleep(end_time - now);
        } else {
            log::warn!("The game loop is hanging behind by {:?}.", now - end_time);
        }

        let frame_number = self.frame;
        self.frame += 1;
        self.current_frame_start = Instant::now();

        Some(frame_number)
    }
}

/// # Explanation
/// The LogErrUnwrap trait contains the function log_err_unwrap. This function should be used to unwrap
/// a result and when this result is an error then the error is logged and the given default value is returned.
pub trait LogErrUnwrap<T> {
    fn log_err_unwrap(self, default: T) -> T;
}

impl<T, E: Display> LogErrUnwrap<T> for Result<T, E> {
    fn log_err_unwrap(self, default: T) -> T {
        self.unwrap_or_else(|e| {
            log::error!("{}", e);
            default
        })
    }
}
