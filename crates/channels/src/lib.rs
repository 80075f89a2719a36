//! Channel lifecycle core.
//!
//! A channel is a persisted record plus at most one running transport
//! worker. The [`ChannelRegistry`] owns every channel, serializes lifecycle
//! operations per id, and reconciles stored intent with live workers at
//! startup. Transports plug in through [`WorkerFactory`].

pub mod channel;
pub mod error;
pub mod message;
pub mod registry;
pub mod store;
pub mod store_memory;
pub mod supervisor;
pub mod worker;

#[cfg(test)]
mod test_support;

pub use {
    channel::{ChannelPatch, Lifecycle, merge_patch},
    error::{Error, ErrorKind, Result},
    message::{Destination, OutboundMessage},
    registry::{ChannelRegistry, NewChannel},
    store::{ChannelRecord, ChannelState, ChannelStore},
    store_memory::InMemoryChannelStore,
    supervisor::WorkerSupervisor,
    worker::{
        FaultReporter, SendError, Worker, WorkerContext, WorkerEvent, WorkerFactories,
        WorkerFactory,
    },
};
