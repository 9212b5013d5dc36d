//! Connection kernel: drives the rumqttc event loop.
//!
//! The kernel owns the `EventLoop`, polls it until cancelled, publishes
//! [`ConnectionState`] transitions and reconnects with exponential backoff on
//! transient errors. Fatal errors (bad credentials, TLS failures, protocol
//! violations) end the kernel with an error.

use std::time::Duration;

use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, Outgoing, Packet,
};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::{backoff::Backoff, error::TransferError, state::ConnectionState};

/// What the kernel should do after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

pub struct ConnectionKernel {
    client: AsyncClient,
    event_loop: EventLoop,
    backoff: Backoff,
    cancel: CancellationToken,
    state_tx: watch::Sender<ConnectionState>,
}

impl ConnectionKernel {
    pub fn new(
        client: AsyncClient,
        event_loop: EventLoop,
        backoff: Backoff,
        cancel: CancellationToken,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Connecting);
        Self {
            client,
            event_loop,
            backoff,
            cancel,
            state_tx,
        }
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    fn update_state(&self, state: ConnectionState) {
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state.clone();
                true
            }
        });
        if changed {
            info!("Connection state changed to: {}", state);
        }
    }

    /// Polls the event loop until cancellation, a flushed DISCONNECT, a fatal
    /// error, or an exhausted reconnect policy.
    pub async fn run(mut self) -> Result<(), TransferError> {
        self.update_state(ConnectionState::Connecting);
        info!("Starting connection event loop...");

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    info!("Shutdown signal received, disconnecting from broker");
                    if let Err(e) = self.client.disconnect().await {
                        warn!("Error sending disconnect packet: {:?}", e);
                    }
                    self.drain_until_disconnect().await;
                    self.update_state(ConnectionState::Disconnected("shutdown".into()));
                    info!("Connection kernel shutdown completed");
                    return Ok(());
                }

                event = self.event_loop.poll() => match event {
                    Ok(event) => {
                        if self.handle_event(event) == Flow::Stop {
                            let reason = "client disconnected".to_string();
                            self.update_state(ConnectionState::Disconnected(reason));
                            info!("Disconnect flushed, connection kernel stopped");
                            return Ok(());
                        }
                    }
                    Err(e) => {
                        if is_fatal_error(&e) {
                            error!("Fatal MQTT connection error: {}", root_cause(&e));
                            self.update_state(ConnectionState::Disconnected(e.to_string()));
                            return Err(TransferError::from(e));
                        }

                        let delay = match self.backoff.next_sleep() {
                            Ok(delay) => delay,
                            Err(backoff_err) => {
                                error!("Maximum reconnect attempts exceeded: {}", backoff_err);
                                let reason = backoff_err.to_string();
                                self.update_state(ConnectionState::Disconnected(reason));
                                return Err(backoff_err.into());
                            }
                        };

                        warn!(
                            "Reconnecting in {:.2} seconds due to error: {}",
                            delay.as_secs_f64(),
                            root_cause(&e)
                        );
                        self.update_state(ConnectionState::Reconnecting(delay.as_secs_f64()));
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = self.cancel.cancelled() => {}
                        }
                    }
                }
            }
        }
    }

    /// Keeps polling briefly so queued publishes and the DISCONNECT reach the
    /// socket before the kernel exits.
    async fn drain_until_disconnect(&mut self) {
        let drain = async {
            loop {
                match self.event_loop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(event) => trace!("Draining event: {:?}", event),
                }
            }
        };
        if tokio::time::timeout(Duration::from_secs(2), drain).await.is_err() {
            debug!("Timed out waiting for DISCONNECT to flush");
        }
    }

    fn handle_event(&mut self, event: Event) -> Flow {
        match event {
            Event::Incoming(Packet::ConnAck(conn_ack)) => {
                if conn_ack.code == ConnectReturnCode::Success {
                    info!("Connection established successfully");
                    self.update_state(ConnectionState::Connected);
                    self.backoff.reset();
                }
            }
            Event::Incoming(Packet::Disconnect) => {
                warn!("Disconnected by broker");
                self.update_state(ConnectionState::Disconnected(
                    "Disconnected by broker".into(),
                ));
            }
            Event::Incoming(packet) => trace!("Incoming packet: {:?}", packet),
            Event::Outgoing(Outgoing::Disconnect) => return Flow::Stop,
            Event::Outgoing(outgoing) => trace!("Outgoing packet: {:?}", outgoing),
        }
        Flow::Continue
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Fatal,
    Reconnect,
}

fn classify_connection_error(err: &ConnectionError) -> Disposition {
    use Disposition::*;

    match err {
        ConnectionError::Tls(_)
        | ConnectionError::MqttState(_)
        | ConnectionError::NotConnAck(_)
        | ConnectionError::RequestsDone => Fatal,

        ConnectionError::Io(e) => match e.kind() {
            std::io::ErrorKind::AddrInUse
            | std::io::ErrorKind::PermissionDenied
            | std::io::ErrorKind::InvalidInput
            | std::io::ErrorKind::InvalidData => Fatal,
            _ => Reconnect,
        },

        ConnectionError::NetworkTimeout | ConnectionError::FlushTimeout => Reconnect,

        ConnectionError::ConnectionRefused(code) => match code {
            ConnectReturnCode::RefusedProtocolVersion
            | ConnectReturnCode::BadClientId
            | ConnectReturnCode::BadUserNamePassword
            | ConnectReturnCode::NotAuthorized => Fatal,
            _ => Reconnect,
        },

        #[allow(unreachable_patterns)]
        _ => Reconnect,
    }
}

fn is_fatal_error(err: &ConnectionError) -> bool {
    classify_connection_error(err) == Disposition::Fatal
}

fn root_cause(e: &dyn std::error::Error) -> String {
    let mut current = e;
    while let Some(source) = current.source() {
        current = source;
    }
    current.to_string().trim_matches('"').to_string()
}
