//! Telnet transport for switchboard channels.
//!
//! Each channel binds its own TCP listener. Connected clients are addressed
//! by `ip:port`; lines they send are inbound messages.

pub mod config;
pub mod error;
pub mod history;
pub mod worker;

pub use {
    config::TelnetConfig,
    error::{Error, Result},
    history::History,
    worker::{CHANNEL_TYPE, DeliveryStatus, InboundMessage, TelnetFactory, TelnetWorker},
};
