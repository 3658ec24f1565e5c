use std::error::Error;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use tolling_core::adapters::{LogNetworkControl, LogNotifier, LogTransport};
use tolling_core::application::TollingApplication;
use tolling_core::command::{Command, CommandError};
use tolling_core::config::Config;
use tolling_core::events::Event;
use tolling_core::nmea_source::NmeaReplay;
use tolling_core::queue::persistence::QueueFile;
use tolling_core::utils::logger_init;

const DEFAULT_CONFIG_FILE: &str = "tolling.toml";

fn main() -> Result<(), Box<dyn Error>> {
    let config_file = std::env::args()
        .nth(1)
        .map_or(PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from);
    let config = Config::load(&config_file)?;
    logger_init(&config.log_level, &config.log_file)?;
    log::info!("Tolling service started");

    let result = run(config);
    if let Err(e) = result {
        log::error!("{}", e);
        Err(e)
    } else {
        log::info!("The application terminated successfully.");
        Ok(())
    }
}

/// # Explanation
/// The run function wires the service: the configuration store seeded from the configuration file, the
/// logging transport and notifier, the dispatcher with its transmission queue and the providers (the NMEA
/// replay, if configured, and the commands read from stdin). It returns when stdin is closed (or `quit`
/// is entered) and the replay is over; the queued fixes are then sent or saved.
fn run(config: Config) -> Result<(), Box<dyn Error>> {
    let store = Arc::new(config.store());
    let transport = Arc::new(LogTransport::new(&config.obu_id, &config.topic_prefix, config.context_id));

    let mut application = TollingApplication::new(
        store,
        transport.clone(),
        Box::new(LogNotifier),
        Box::new(LogNetworkControl),
        QueueFile::new(&config.persistence_dir, &config.domain_name),
        Instant::now(),
    );
    transport.attach_monitor(application.queue().publish_monitor());
    application.start_transmission();

    let (sender, receiver) = mpsc::channel();
    let replay = match &config.nmea_replay {
        Some(path) => Some(NmeaReplay::from_file(path)?.spawn(config.replay_rate, sender.clone())?),
        None => None,
    };
    let commands = spawn_command_reader(sender)?;

    println!("The tolling service is running, enter commands (quit to stop).");
    application.run(receiver);
    application.shutdown();

    for handle in [Some(commands), replay].into_iter().flatten() {
        if handle.join().is_err() {
            log::error!("a provider thread panicked");
        }
    }
    Ok(())
}

fn spawn_command_reader(sender: Sender<Event>) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("commands".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        log::error!("cannot read the commands: {}", e);
                        break;
                    }
                };
                if line.trim() == "quit" {
                    break;
                }

                match line.parse::<Command>() {
                    Ok(command) => {
                        if sender.send(command.into_event()).is_err() {
                            break;
                        }
                    }
                    Err(CommandError::Empty) => {}
                    Err(e) => println!("{}", e),
                }
            }
        })
}
