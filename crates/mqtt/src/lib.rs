//! # sensors-report-mqtt
//!
//! MQTT transport used by `sensors-report`, built on `rumqttc`:
//!
//! - [`ClientBuilder`] turns a validated [`Config`] into a client (TCP or TLS,
//!   optional credentials).
//! - [`ConnectionKernel`] drives the event loop, reports [`ConnectionState`]
//!   through a watch channel and reconnects with exponential [`Backoff`].
//! - [`MqttManager`] wires both together and returns an [`MqttInstance`].
//! - [`Publisher`] enqueues pre-formatted payloads on fully resolved topics.
//!
//! ```ignore
//! let instance = MqttManager::from_config(config)?.build_and_start().await?;
//! let publisher = Publisher::new(Arc::new(instance.clone()))?;
//! publisher.publish("sensors/cpu", b"42.5".to_vec()).await?;
//! instance.shutdown(Duration::from_secs(5)).await?;
//! ```
//!
//! ```text
//! Connecting ──(CONNACK)──> Connected ──(network error)──> Disconnected
//!     ▲                                                        │
//!     └──────────────(delay elapsed)── Reconnecting(secs) <────┘
//! ```

pub mod backoff;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod manager;
pub mod publisher;
pub mod state;

pub use backoff::Backoff;
pub use client::ClientBuilder;
pub use config::{Config, Credentials, ReconnectConfig, TlsConfig};
pub use connection::ConnectionKernel;
pub use error::TransferError;
pub use manager::{MqttInstance, MqttManager};
pub use publisher::Publisher;
pub use state::ConnectionState;

/// Result type for MQTT operations.
pub type Result<T> = std::result::Result<T, TransferError>;
