pub mod benchmark;
pub mod config;
pub mod context;
pub mod csv_writer;
pub mod daemons;
pub mod error;
pub mod events;
pub mod experiment;
pub mod mount;
pub mod netem;
pub mod process;
pub mod readiness;
pub mod runner;
pub mod runtime;
pub mod telemetry;
pub mod utils;
