//! # nvmf-client
//!
//! Async NVMe over Fabrics host for the TCP transport.
//!
//! This crate provides:
//! - Connection setup: ICReq/ICResp negotiation, Fabric Connect, property
//!   reads
//! - A per-connection command engine with command-id correlation,
//!   timeouts, keep-alive, and R2T-driven data transfers
//! - Typed admin and NVM operations (Identify, log pages, read/write,
//!   features, reservations)
//! - A polled asynchronous event channel
//!
//! ```no_run
//! use nvmf_client::{Client, ClientConfig};
//!
//! # async fn run() -> Result<(), nvmf_client::Error> {
//! let client = Client::new(
//!     ClientConfig::new("10.0.0.1").with_subsystem_nqn("nqn.2024-01.com.example:s1"),
//! );
//! client.connect().await?;
//! let controller = client.identify_controller().await?;
//! println!("connected to {}", controller.model_number);
//! client.disconnect().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
mod engine;
pub mod error;
pub mod hostid;
mod session;
mod transport;

pub use client::Client;
pub use config::{ClientConfig, QueueFullPolicy};
pub use engine::ConnectionState;
pub use error::{CommandFailure, Error};

/// Convenience alias for results carrying [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

// Re-export the protocol types that appear in the public API.
pub use nvmf_protocol as protocol;
pub use nvmf_protocol::{
    AcquireAction, AnaGroup, AnaLogPage, AnaState, AsyncEvent, AsyncEventType, ControllerCaps,
    ControllerInfo, ControllerVersion, DiscoveryEntry, NamespaceInfo, RegisterAction, Registrant,
    ReleaseAction, ReservationReport, ReservationType, DISCOVERY_NQN, NVME_DISCOVERY_PORT,
    NVME_TCP_PORT,
};
