//! Broker connection configuration.
//!
//! The `Config` struct is deserialized from the `mqtt` section of the
//! configuration document and validated with the `validator` crate before a
//! client is built. Defaults target a local, unauthenticated broker.
//!
//! ```ignore
//! let config = Config {
//!     host: "mqtt.example.com".into(),
//!     port: 8883,
//!     tls: Some(TlsConfig::with_ca_only("/etc/mqtt/ca.crt")),
//!     ..Default::default()
//! };
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// Main MQTT connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct Config {
    /// Broker hostname or IP address.
    #[validate(length(
        min = 1,
        max = 255,
        message = "Host must be between 1 and 255 characters"
    ))]
    pub host: String,

    /// Broker port (1883 plain, 8883 TLS by convention).
    #[validate(range(min = 1, message = "Port must be between 1 and 65535"))]
    pub port: u16,

    /// Client identifier. A random UUID is generated when empty.
    #[validate(length(max = 128, message = "Client id must not exceed 128 characters"))]
    pub client_id: String,

    /// Keep-alive interval in seconds.
    #[validate(range(
        min = 5,
        max = 3600,
        message = "Keep alive must be between 5 and 3600 seconds"
    ))]
    pub keep_alive: u64,

    /// Start every connection with a clean session.
    pub clean_session: bool,

    /// Maximum number of unacknowledged outgoing QoS 1/2 messages.
    #[validate(range(min = 1, message = "Max inflight must be at least 1"))]
    pub max_inflight: u16,

    /// Capacity of the request channel between `AsyncClient` and the event loop.
    #[validate(range(
        min = 1,
        max = 1024,
        message = "Request channel capacity must be between 1 and 1024"
    ))]
    pub request_channel_capacity: usize,

    /// Optional username/password authentication.
    #[validate(nested)]
    pub credentials: Option<Credentials>,

    /// Optional TLS transport. Plain TCP when absent.
    #[validate(nested)]
    pub tls: Option<TlsConfig>,

    /// Reconnect policy applied by the connection kernel.
    #[validate(nested)]
    pub reconnect: ReconnectConfig,

    /// QoS used for every published message (0, 1 or 2).
    #[validate(range(max = 2, message = "Invalid QoS value, must be 0, 1, or 2"))]
    pub qos: u8,

    /// Retain flag used for every published message.
    pub retain: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: "localhost".to_string(),
            port: 1883,
            client_id: String::new(),
            keep_alive: 60,
            clean_session: true,
            max_inflight: 10,
            request_channel_capacity: 64,
            credentials: None,
            tls: None,
            reconnect: ReconnectConfig::default(),
            qos: 0,
            retain: false,
        }
    }
}

/// Username/password pair sent in the CONNECT packet.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq, Eq)]
pub struct Credentials {
    #[validate(length(min = 1, message = "Username must not be empty"))]
    pub username: String,
    pub password: String,
}

/// Exponential backoff parameters for reconnecting to the broker.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ReconnectConfig {
    /// First delay in seconds.
    #[validate(range(
        min = 1,
        max = 60,
        message = "Initial reconnect delay must be between 1 and 60 seconds"
    ))]
    pub initial_delay: u64,

    /// Upper bound for a single delay in seconds.
    #[validate(range(
        min = 1,
        max = 3600,
        message = "Max reconnect delay must be between 1 and 3600 seconds"
    ))]
    pub max_delay: u64,

    /// Growth factor between consecutive delays.
    #[validate(range(
        min = 1.0,
        max = 10.0,
        message = "Reconnect multiplier must be between 1.0 and 10.0"
    ))]
    pub multiplier: f64,

    /// Give up after this many consecutive failures; 0 means derive the
    /// limit from the delay range.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: 1,
            max_delay: 60,
            multiplier: 1.5,
            max_attempts: 0,
        }
    }
}

/// TLS settings. A CA certificate enables TLS; a client certificate/key pair
/// additionally enables mutual authentication.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
#[serde(default)]
pub struct TlsConfig {
    #[validate(custom(
        function = "validate_file_path",
        message = "CA certificate file does not exist"
    ))]
    pub ca_cert_path: Option<String>,

    #[validate(custom(
        function = "validate_file_path",
        message = "Client certificate file does not exist"
    ))]
    pub client_cert_path: Option<String>,

    #[validate(custom(
        function = "validate_file_path",
        message = "Client key file does not exist"
    ))]
    pub client_key_path: Option<String>,
}

impl TlsConfig {
    pub fn new(
        ca_cert_path: impl Into<String>,
        client_cert_path: impl Into<String>,
        client_key_path: impl Into<String>,
    ) -> Self {
        TlsConfig {
            ca_cert_path: Some(ca_cert_path.into()),
            client_cert_path: Some(client_cert_path.into()),
            client_key_path: Some(client_key_path.into()),
        }
    }

    pub fn with_ca_only(ca_cert_path: impl Into<String>) -> Self {
        TlsConfig {
            ca_cert_path: Some(ca_cert_path.into()),
            ..Default::default()
        }
    }

    pub fn has_client_auth(&self) -> bool {
        self.client_cert_path.is_some() && self.client_key_path.is_some()
    }

    pub fn is_enabled(&self) -> bool {
        self.ca_cert_path.is_some()
    }

    /// Checks the combination of paths, not only each path on its own.
    pub fn validate_config(&self) -> Result<(), ValidationError> {
        let Some(ca) = &self.ca_cert_path else {
            return Err(ValidationError::new("missing_ca_cert")
                .with_message("CA certificate path is required".into()));
        };
        validate_file_path(ca)?;

        match (&self.client_cert_path, &self.client_key_path) {
            (Some(cert), Some(key)) => {
                validate_file_path(cert)?;
                validate_file_path(key)
            }
            (None, None) => Ok(()),
            _ => Err(ValidationError::new("incomplete_client_auth").with_message(
                "Both client certificate and key must be provided or neither".into(),
            )),
        }
    }
}

fn validate_file_path(path: &str) -> Result<(), ValidationError> {
    if path.is_empty() {
        return Err(
            ValidationError::new("empty_path").with_message("File path cannot be empty".into())
        );
    }

    let path_obj = Path::new(path);
    if !path_obj.is_file() {
        return Err(ValidationError::new("file_not_found")
            .with_message(format!("File does not exist: {path}").into()));
    }

    Ok(())
}
