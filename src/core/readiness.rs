//! Readiness of the publishing path.
//!
//! The scheduler does not start polling until the broker connection is up.
//! [`Readiness`] holds the current [`ReadinessState`] in a watch channel and
//! can follow the MQTT [`ConnectionState`] in a background task. Once the
//! connection kernel is gone the state becomes [`ReadinessState::Closed`] for
//! good.

use std::fmt;

use sensors_report_mqtt::ConnectionState;
use tokio::sync::watch;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessState {
    Ready,
    NotReadyYet(String),
    Unknown,
    /// The transport stopped and will not come back.
    Closed(String),
}

impl ReadinessState {
    pub fn is_ready(&self) -> bool {
        matches!(self, ReadinessState::Ready)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, ReadinessState::Closed(_))
    }

    pub fn reason(&self) -> &str {
        match self {
            ReadinessState::NotReadyYet(reason) | ReadinessState::Closed(reason) => reason,
            _ => "",
        }
    }
}

impl fmt::Display for ReadinessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadinessState::Ready => write!(f, "Ready"),
            ReadinessState::NotReadyYet(reason) => write!(f, "NotReadyYet: {}", reason),
            ReadinessState::Unknown => write!(f, "Unknown"),
            ReadinessState::Closed(reason) => write!(f, "Closed: {}", reason),
        }
    }
}

impl From<&ConnectionState> for ReadinessState {
    fn from(state: &ConnectionState) -> Self {
        match state {
            ConnectionState::Connected => ReadinessState::Ready,
            ConnectionState::Connecting => {
                ReadinessState::NotReadyYet("Connecting...".to_string())
            }
            ConnectionState::Disconnected(reason) => {
                ReadinessState::NotReadyYet(format!("Disconnected: {}", reason))
            }
            ConnectionState::Reconnecting(secs) => {
                ReadinessState::NotReadyYet(format!("Reconnecting in {:.1} sec", secs))
            }
        }
    }
}

/// Shared, cloneable readiness tracker.
#[derive(Debug, Clone)]
pub struct Readiness {
    state_tx: watch::Sender<ReadinessState>,
    state_rx: watch::Receiver<ReadinessState>,
}

impl Readiness {
    pub fn new() -> Self {
        let (state_tx, state_rx) = watch::channel(ReadinessState::Unknown);
        Self { state_tx, state_rx }
    }

    /// Starts in `Ready`. Used when no transport gate is wanted.
    pub fn ready() -> Self {
        let readiness = Self::new();
        readiness.set_state(ReadinessState::Ready);
        readiness
    }

    pub fn subscribe(&self) -> watch::Receiver<ReadinessState> {
        self.state_rx.clone()
    }

    pub fn set_state(&self, state: ReadinessState) {
        let old_state = self.state_tx.send_replace(state.clone());
        debug!("Readiness changed: {} -> {}", old_state, state);
    }

    /// Mirrors MQTT connection state into readiness. When the connection
    /// state channel closes the state turns `Closed`.
    pub fn start_listening(
        &self,
        connection_rx: watch::Receiver<ConnectionState>,
    ) -> tokio::task::JoinHandle<()> {
        let state_tx = self.state_tx.clone();
        tokio::spawn(listen(connection_rx, state_tx))
    }
}

impl Default for Readiness {
    fn default() -> Self {
        Self::new()
    }
}

async fn listen(
    mut connection_rx: watch::Receiver<ConnectionState>,
    state_tx: watch::Sender<ReadinessState>,
) {
    let mut last = connection_rx.borrow_and_update().to_string();
    let initial = ReadinessState::from(&*connection_rx.borrow());
    debug!("Initial readiness: {}", initial);
    state_tx.send_replace(initial);

    while connection_rx.changed().await.is_ok() {
        let conn_state = connection_rx.borrow_and_update().clone();
        let readiness = ReadinessState::from(&conn_state);
        debug!("MQTT {} -> readiness {}", conn_state, readiness);
        last = conn_state.to_string();

        if state_tx.send(readiness).is_err() {
            warn!("No subscribers to readiness status");
            return;
        }
    }

    warn!("MQTT connection kernel stopped ({}), transport closed", last);
    state_tx.send_replace(ReadinessState::Closed(last));
}
