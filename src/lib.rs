pub mod activation;
pub mod adapters;
pub mod application;
pub mod axles;
pub mod collaborators;
pub mod command;
pub mod config;
pub mod data_id;
pub mod events;
pub mod filter;
pub mod fix;
pub mod machine;
pub mod nmea_source;
pub mod odometer;
pub mod queue;
pub mod store;
pub mod utils;
