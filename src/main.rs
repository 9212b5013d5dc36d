use std::{process, sync::Arc, time::Duration};

use sensors_report::{
    config::{schedule::ScheduleMode, Config},
    core::{
        providers::{HwmonBackend, SensorBackend},
        readiness::Readiness,
        scheduler::{Publisher, Scheduler},
    },
    logger::LoggerManager,
    print_error,
};
use sensors_report_mqtt::MqttManager;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

fn log_sensor_table(config: &Config) {
    let resolver = config.topic_resolver();
    let rows: Vec<(&str, &str, String)> = config
        .sensors
        .iter()
        .map(|s| (s.label.as_str(), s.provider.kind(), resolver.sensor_topic(s)))
        .collect();

    let label_width = rows
        .iter()
        .map(|(label, _, _)| label.len())
        .max()
        .unwrap_or(0)
        .max("Sensor".len());
    let kind_width = "lm-sensors".len().max("Provider".len());

    info!(
        "{:<lw$} | {:<kw$} | Topic",
        "Sensor",
        "Provider",
        lw = label_width,
        kw = kind_width
    );
    info!("{}-+-{}-+-{}", "-".repeat(label_width), "-".repeat(kind_width), "-".repeat(24));
    for (label, kind, topic) in rows {
        info!(
            "{:<lw$} | {:<kw$} | {}",
            label,
            kind,
            topic,
            lw = label_width,
            kw = kind_width
        );
    }
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, finishing current sensor..."),
        _ = terminate => info!("Received SIGTERM, finishing current sensor..."),
    }
}

#[tokio::main]
async fn main() {
    let cfg = Config::new().unwrap_or_else(|e| {
        print_error!("{}", e);
        process::exit(1);
    });

    let logger_manager = LoggerManager::new(cfg.logger.clone()).unwrap_or_else(|e| {
        print_error!("Failed to setup Log Manager: {}", e);
        process::exit(1);
    });
    logger_manager.init().unwrap_or_else(|e| {
        print_error!("Failed to init Log Manager: {}", e);
        process::exit(1);
    });

    info!("Starting sensors-report version {}...", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", cfg.logger.level);
    debug!(
        "MQTT broker {}:{}, publish mode {}, schedule {:?} every {}s",
        cfg.mqtt.host, cfg.mqtt.port, cfg.events.mode, cfg.schedule.mode, cfg.schedule.interval
    );
    log_sensor_table(&cfg);

    let backend: Arc<dyn SensorBackend> = Arc::new(HwmonBackend::new());

    let manager = MqttManager::from_config(cfg.mqtt.clone()).unwrap_or_else(|e| {
        error!("Failed to create MqttManager: {}", e);
        process::exit(1);
    });
    let instance = manager.build_and_start().await.unwrap_or_else(|e| {
        error!("Failed to start MQTT connection: {}", e);
        process::exit(1);
    });
    info!("MQTT client started");

    let readiness = Readiness::new();
    readiness.start_listening(instance.state_receiver());

    let publisher = sensors_report_mqtt::Publisher::new(Arc::new(instance.clone()))
        .unwrap_or_else(|e| {
            error!("Failed to create MQTT publisher: {}", e);
            process::exit(1);
        });

    let cancel = CancellationToken::new();
    let scheduler = Scheduler::from_config(
        &cfg,
        backend,
        Arc::new(publisher) as Arc<dyn Publisher>,
        readiness,
    )
    .with_cancel_token(cancel.clone());

    tokio::spawn(async move {
        shutdown_signal().await;
        cancel.cancel();
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Second interrupt, exiting immediately");
            process::exit(130);
        }
    });

    let cycles = tokio::select! {
        cycles = scheduler.run() => cycles,
        _ = instance.closed() => {
            error!("MQTT connection kernel stopped, cannot publish any more");
            scheduler.cancel_token().cancel();
            if let Err(e) = instance.shutdown(SHUTDOWN_TIMEOUT).await {
                error!("MQTT connection failed: {}", e);
            }
            process::exit(1);
        }
    };
    if cfg.schedule.mode == ScheduleMode::Once {
        info!("Single pass finished ({} cycle)", cycles);
    }

    info!("Disconnecting from MQTT broker...");
    if let Err(e) = instance.shutdown(SHUTDOWN_TIMEOUT).await {
        error!("MQTT shutdown failed: {}", e);
    }
    info!("Shutdown complete");
}
