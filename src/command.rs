use std::str::FromStr;

use thiserror::Error;

use crate::events::Event;
use crate::fix::PositionRecord;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("empty command")]
    Empty,
    #[error("unknown command '{0}'")]
    Unknown(String),
    #[error("'{command}' expects {expected}")]
    MissingArgument { command: String, expected: &'static str },
    #[error("invalid argument '{0}'")]
    InvalidArgument(String),
}

/// # Explanation
/// A line of the control input of the binary. Every command maps to one input event:
///
/// run | hold | stop | connected | disconnected | service_configured | vehicle_configured | activate |
/// deactivate | other_active <bool> | config_changed | enter_gnss | exit_gnss | enter_ccc [flags] |
/// exit_ccc | axles <count> [transaction id] | ack <json> | position <lat> <lon> [speed km/h] [heading]
#[derive(Debug, Clone, PartialEq)]
pub struct Command(pub Event);

impl Command {
    pub fn into_event(self) -> Event {
        self.0
    }
}

fn parse<T: FromStr>(argument: &str) -> Result<T, CommandError> {
    argument
        .parse()
        .map_err(|_| CommandError::InvalidArgument(argument.to_string()))
}

fn required<'a>(argument: Option<&'a str>, command: &str, expected: &'static str) -> Result<&'a str, CommandError> {
    argument.ok_or_else(|| CommandError::MissingArgument {
        command: command.to_string(),
        expected,
    })
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (name, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim();
        let mut arguments = rest.split_whitespace();

        let event = match name {
            "" => return Err(CommandError::Empty),
            "run" => Event::Run,
            "hold" => Event::OnHold,
            "stop" => Event::Stop,
            "connected" => Event::NetworkConnected,
            "disconnected" => Event::NetworkDisconnected,
            "service_configured" => Event::ServiceConfigured,
            "vehicle_configured" => Event::VehicleConfigured,
            "activate" => Event::ServiceActivated,
            "deactivate" => Event::ServiceDeactivated,
            "other_active" => {
                let active = required(arguments.next(), name, "true or false")?;
                Event::OtherServicesActive(parse(active)?)
            }
            "config_changed" => Event::ConfigurationChanged,
            "enter_gnss" => Event::EnterGnssDomain,
            "exit_gnss" => Event::ExitGnssDomain,
            "enter_ccc" => {
                let go_nogo_flags = match arguments.next() {
                    Some(flags) => parse(flags)?,
                    None => 0,
                };
                Event::EnterCccDomain { go_nogo_flags }
            }
            "exit_ccc" => Event::ExitCccDomain,
            "axles" => {
                let axles = parse(required(arguments.next(), name, "an axle count")?)?;
                let transaction_id = arguments.next().unwrap_or("").to_string();
                Event::AxlesChangeRequested { axles, transaction_id }
            }
            "ack" => {
                let message = Some(rest).filter(|message| !message.is_empty());
                Event::AxlesChangeAck(required(message, name, "a json message")?.to_string())
            }
            "position" => {
                let latitude = parse(required(arguments.next(), name, "a latitude and a longitude")?)?;
                let longitude = parse(required(arguments.next(), name, "a latitude and a longitude")?)?;
                let speed = arguments.next().map(parse).transpose()?.unwrap_or(0.0);
                let heading = arguments.next().map(parse).transpose()?.unwrap_or(0.0);
                Event::PositionUpdated(PositionRecord {
                    fix_validity: 1,
                    latitude,
                    longitude,
                    speed,
                    heading,
                    timestamp_ms: chrono::Utc::now().timestamp_millis().max(0) as u64,
                    ..PositionRecord::default()
                })
            }
            other => return Err(CommandError::Unknown(other.to_string())),
        };
        Ok(Command(event))
    }
}
