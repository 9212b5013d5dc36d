//! High-level entry point: build the client, spawn the connection kernel and
//! hand out an [`MqttInstance`] for publishing and lifecycle control.

use std::{sync::Arc, time::Duration};

use rumqttc::AsyncClient;
use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use validator::Validate;

use super::{
    backoff::Backoff, client::ClientBuilder, config::Config, connection::ConnectionKernel,
    error::TransferError, state::ConnectionState,
};

type KernelHandle = JoinHandle<Result<(), TransferError>>;

pub struct MqttManager {
    config: Config,
    cancel_token: CancellationToken,
}

impl MqttManager {
    /// Validates the configuration and prepares a manager.
    pub fn from_config(config: Config) -> Result<Self, TransferError> {
        config.validate()?;
        Ok(Self {
            config,
            cancel_token: CancellationToken::new(),
        })
    }

    /// Builds the client and spawns the connection kernel. Returns as soon as
    /// the kernel is running; connection progress is observable through
    /// [`MqttInstance::state_receiver`].
    pub async fn build_and_start(self) -> Result<MqttInstance, TransferError> {
        info!(
            "Connecting to MQTT broker at {}:{}",
            self.config.host, self.config.port
        );

        let (client, event_loop) = ClientBuilder::from_config(&self.config).build()?;
        let kernel = ConnectionKernel::new(
            client.clone(),
            event_loop,
            Backoff::from_config(&self.config.reconnect),
            self.cancel_token.clone(),
        );
        let state_rx = kernel.subscribe_state();
        let closed = CancellationToken::new();

        let handle = tokio::spawn({
            let closed = closed.clone();
            async move {
                let result = kernel.run().await;
                if let Err(e) = &result {
                    error!("MQTT connection kernel exited with error: {}", e);
                }
                closed.cancel();
                result
            }
        });

        Ok(MqttInstance {
            client,
            state_rx,
            cancel_token: self.cancel_token,
            closed,
            kernel: Arc::new(Mutex::new(Some(handle))),
            qos: self.config.qos,
            retain: self.config.retain,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

/// A running MQTT connection. Cheap to clone.
#[derive(Clone)]
pub struct MqttInstance {
    client: AsyncClient,
    state_rx: watch::Receiver<ConnectionState>,
    cancel_token: CancellationToken,
    /// Cancelled once the kernel task has returned.
    closed: CancellationToken,
    kernel: Arc<Mutex<Option<KernelHandle>>>,
    qos: u8,
    retain: bool,
}

impl MqttInstance {
    pub fn client(&self) -> &AsyncClient {
        &self.client
    }

    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Resolves when the connection kernel has stopped, whether through
    /// [`shutdown`](Self::shutdown), a fatal error or an exhausted reconnect
    /// policy. Nothing is published after that.
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub fn qos(&self) -> u8 {
        self.qos
    }

    pub fn retain(&self) -> bool {
        self.retain
    }

    /// Requests a disconnect and waits up to `timeout` for the kernel to flush
    /// queued messages and exit. Calling it more than once is a no-op.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), TransferError> {
        let Some(handle) = self.kernel.lock().await.take() else {
            debug!("MQTT instance already shut down");
            return Ok(());
        };

        self.cancel_token.cancel();
        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(TransferError::ConnectionKernel(join_err.to_string())),
            Err(_) => {
                warn!("MQTT connection kernel did not stop within {:?}", timeout);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_validates() {
        let config = Config {
            port: 0,
            ..Default::default()
        };
        assert!(matches!(
            MqttManager::from_config(config),
            Err(TransferError::ConfigError(_))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let mut config = Config {
            host: "127.0.0.1".into(),
            port: 1,
            ..Default::default()
        };
        config.reconnect.max_attempts = 100;
        let instance = MqttManager::from_config(config)
            .unwrap()
            .build_and_start()
            .await
            .unwrap();

        assert!(!instance.state_receiver().borrow().is_connected());
        assert!(instance.shutdown(Duration::from_secs(5)).await.is_ok());
        assert!(instance.shutdown(Duration::from_secs(5)).await.is_ok());
        assert!(instance.cancel_token().is_cancelled());
        assert!(instance.is_closed());
    }

    #[tokio::test]
    async fn test_closed_after_reconnect_attempts_exhausted() {
        let mut config = Config {
            host: "127.0.0.1".into(),
            port: 1,
            ..Default::default()
        };
        config.reconnect.max_attempts = 1;
        let instance = MqttManager::from_config(config)
            .unwrap()
            .build_and_start()
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(10), instance.closed())
            .await
            .expect("kernel should stop after its last reconnect attempt");
        assert!(instance.is_closed());
        assert!(!instance.cancel_token().is_cancelled());
        assert!(matches!(
            &*instance.state_receiver().borrow(),
            ConnectionState::Disconnected(_)
        ));
        assert!(instance.shutdown(Duration::from_secs(1)).await.is_err());
    }
}
