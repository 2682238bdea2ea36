//! # Sync Agent
//!
//! Runs once per gateway pod as the injected adjunct (§4.3). Reads the
//! metadata document, drives the sync engine against one profile, talks to
//! the gateway's reload API, and publishes its own status entry.

mod gateway_client;
mod metadata_reader;
pub mod metrics;
mod poll_loop;
mod status_publisher;

pub use gateway_client::{DesignerSession, GatewayClient, GatewayError};
pub use metadata_reader::{MetadataReadError, MetadataReader};
pub use poll_loop::PollLoop;
pub use status_publisher::StatusPublisher;
