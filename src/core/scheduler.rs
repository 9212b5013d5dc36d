//! Polling and publishing loop.
//!
//! The [`Scheduler`] waits for transport readiness, then runs cycles. A cycle
//! visits every sensor in order: read, format, publish. Failures are logged
//! and counted per sensor; they never abort the cycle. Cancellation is checked
//! before each sensor, while a publish is pending, and during the wait between
//! cycles. A transport that closes for good stops the scheduler.
//!
//! ```text
//! Idle ──> Polling ──> Publishing ──> Polling ... ──> Idle ──(interval)──> Idle ...
//! ```

use std::{fmt, sync::Arc};

use thiserror::Error;
use tokio::{
    sync::watch,
    time::{sleep, Duration, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    formatter::PayloadFormatter,
    providers::{Provider, SensorBackend},
    readiness::{Readiness, ReadinessState},
    reading::SensorReading,
};
use crate::config::{
    schedule::{ScheduleConfig, ScheduleMode},
    sensors::SensorDefinition,
    Config,
};

/// How often a pending readiness wait is reported.
const READINESS_REMINDER: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum PublishError {
    #[error(transparent)]
    Transport(#[from] sensors_report_mqtt::TransferError),

    #[error("{0}")]
    Other(String),
}

/// Destination of formatted messages.
#[async_trait::async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError>;
}

#[async_trait::async_trait]
impl Publisher for sensors_report_mqtt::Publisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError> {
        sensors_report_mqtt::Publisher::publish(self, topic, payload)
            .await
            .map_err(PublishError::from)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Polling,
    Publishing,
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerState::Idle => write!(f, "Idle"),
            SchedulerState::Polling => write!(f, "Polling"),
            SchedulerState::Publishing => write!(f, "Publishing"),
        }
    }
}

/// Outcome counters of one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub published: usize,
    pub read_failures: usize,
    pub format_failures: usize,
    pub publish_failures: usize,
    /// Sensors not visited because cancellation was requested.
    pub skipped: usize,
}

impl CycleReport {
    pub fn failures(&self) -> usize {
        self.read_failures + self.format_failures + self.publish_failures
    }
}

/// A definition bound to its provider.
#[derive(Debug)]
pub struct Sensor {
    pub definition: SensorDefinition,
    pub provider: Provider,
}

impl Sensor {
    pub fn new(definition: SensorDefinition, backend: &Arc<dyn SensorBackend>) -> Self {
        let provider = Provider::from_config(&definition.provider, backend);
        Self {
            definition,
            provider,
        }
    }
}

pub struct Scheduler {
    sensors: Vec<Sensor>,
    formatter: PayloadFormatter,
    publisher: Arc<dyn Publisher>,
    readiness: Readiness,
    schedule: ScheduleConfig,
    cancel: CancellationToken,
    state_tx: watch::Sender<SchedulerState>,
}

impl Scheduler {
    pub fn new(
        sensors: Vec<Sensor>,
        formatter: PayloadFormatter,
        publisher: Arc<dyn Publisher>,
        readiness: Readiness,
    ) -> Self {
        let (state_tx, _) = watch::channel(SchedulerState::Idle);
        Self {
            sensors,
            formatter,
            publisher,
            readiness,
            schedule: ScheduleConfig::default(),
            cancel: CancellationToken::new(),
            state_tx,
        }
    }

    /// Sensors, formatter and schedule from a validated configuration.
    pub fn from_config(
        config: &Config,
        backend: Arc<dyn SensorBackend>,
        publisher: Arc<dyn Publisher>,
        readiness: Readiness,
    ) -> Self {
        let sensors = config
            .sensors
            .iter()
            .cloned()
            .map(|def| Sensor::new(def, &backend))
            .collect();
        let formatter = PayloadFormatter::new(&config.events, config.topic_resolver());
        Self::new(sensors, formatter, publisher, readiness).with_schedule(config.schedule.clone())
    }

    pub fn with_schedule(mut self, schedule: ScheduleConfig) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SchedulerState> {
        self.state_tx.subscribe()
    }

    pub fn sensors(&self) -> &[Sensor] {
        &self.sensors
    }

    /// Runs until cancelled, or for a single cycle in `once` mode. Returns the
    /// number of completed cycles.
    pub async fn run(&self) -> usize {
        if !self.wait_until_ready().await {
            info!("Transport never became ready, not polling");
            return 0;
        }

        let interval = self.schedule.interval();
        info!(
            "Polling {} sensor(s), mode {:?}, interval {}s",
            self.sensors.len(),
            self.schedule.mode,
            self.schedule.interval
        );

        let mut cycles = 0;
        loop {
            let start = Instant::now();
            let report = self.run_cycle().await;
            cycles += 1;

            if report.failures() > 0 {
                warn!(
                    "Cycle {} finished with {} failure(s), {} message(s) published",
                    cycles,
                    report.failures(),
                    report.published
                );
            }

            if self.schedule.mode == ScheduleMode::Once || self.cancel.is_cancelled() {
                break;
            }
            if let ReadinessState::Closed(reason) = &*self.readiness.subscribe().borrow() {
                error!("Transport closed ({}), stopping", reason);
                break;
            }

            let wait = interval.saturating_sub(start.elapsed());
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = sleep(wait) => {}
            }
        }

        info!("Scheduler stopped after {} cycle(s)", cycles);
        cycles
    }

    /// One pass over every sensor.
    pub async fn run_cycle(&self) -> CycleReport {
        let mut report = CycleReport::default();

        for (index, sensor) in self.sensors.iter().enumerate() {
            if self.cancel.is_cancelled() {
                report.skipped += self.sensors.len() - index;
                debug!("Cancellation requested, skipping {} sensor(s)", report.skipped);
                break;
            }
            self.process(sensor, &mut report).await;
        }

        self.set_state(SchedulerState::Idle);
        debug!(?report, "Cycle complete");
        report
    }

    async fn process(&self, sensor: &Sensor, report: &mut CycleReport) {
        let label = &sensor.definition.label;
        self.set_state(SchedulerState::Polling);

        let value = match sensor.provider.read().await {
            Ok(value) => value,
            Err(e) => {
                error!("Failed to read sensor '{}': {}", label, e);
                report.read_failures += 1;
                return;
            }
        };

        let reading = SensorReading::new(&sensor.definition, value);
        let messages = match self.formatter.format(&reading) {
            Ok(messages) => messages,
            Err(e) => {
                error!("Failed to format reading of '{}': {}", label, e);
                report.format_failures += 1;
                return;
            }
        };

        self.set_state(SchedulerState::Publishing);
        for message in messages {
            let topic = message.topic;
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    warn!("Cancelled while publishing '{}' to '{}'", label, topic);
                    report.skipped += 1;
                    return;
                }
                result = self.publisher.publish(&topic, message.payload) => result,
            };
            match result {
                Ok(()) => {
                    debug!("Published '{}' ({:?}) to '{}'", label, message.kind, topic);
                    report.published += 1;
                }
                Err(e) => {
                    error!("Publish of '{}' to '{}' failed: {}", label, topic, e);
                    report.publish_failures += 1;
                }
            }
        }
    }

    fn set_state(&self, state: SchedulerState) {
        self.state_tx.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
    }

    /// `false` when cancelled or when the transport closes first.
    async fn wait_until_ready(&self) -> bool {
        let mut rx = self.readiness.subscribe();
        {
            let state = rx.borrow_and_update();
            if state.is_ready() {
                debug!("Transport already ready");
                return true;
            }
            if state.is_closed() {
                error!("Transport closed before becoming ready: {}", state.reason());
                return false;
            }
        }

        warn!("Waiting for readiness... Current: {}", *rx.borrow());
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return false,
                changed = rx.changed() => {
                    if changed.is_err() {
                        warn!("Readiness channel closed");
                        return false;
                    }
                    let state = rx.borrow_and_update().clone();
                    if state.is_ready() {
                        info!("Transport is ready, starting to poll");
                        return true;
                    }
                    if state.is_closed() {
                        error!("Transport closed before becoming ready: {}", state.reason());
                        return false;
                    }
                    debug!("Still not ready: {}", state);
                }
                _ = sleep(READINESS_REMINDER) => {
                    warn!("Still waiting for readiness... Current: {}", *rx.borrow());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{io::Write, sync::Mutex};

    use tempfile::NamedTempFile;
    use tracing_test::traced_test;

    use super::*;
    use crate::{
        config::{
            events::{EventsConfig, PublishMode},
            sensors::{FileConfig, HardwareSensorConfig, ProviderConfig},
        },
        core::{
            providers::{ReadError, SensorValue},
            topics::TopicResolver,
        },
    };

    #[derive(Default)]
    struct MockPublisher {
        sent: Mutex<Vec<(String, String)>>,
        fail_topic: Option<String>,
        cancel_on_publish: Option<CancellationToken>,
    }

    #[async_trait::async_trait]
    impl Publisher for MockPublisher {
        async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError> {
            if let Some(token) = &self.cancel_on_publish {
                token.cancel();
            }
            if self.fail_topic.as_deref() == Some(topic) {
                return Err(PublishError::Other("broker rejected".into()));
            }
            self.sent
                .lock()
                .unwrap()
                .push((topic.to_string(), String::from_utf8(payload).unwrap()));
            Ok(())
        }
    }

    impl MockPublisher {
        fn sent(&self) -> Vec<(String, String)> {
            self.sent.lock().unwrap().clone()
        }
    }

    struct StaticBackend;

    #[async_trait::async_trait]
    impl SensorBackend for StaticBackend {
        async fn read(&self, chip: &str, feature: &str) -> Result<f64, ReadError> {
            match (chip, feature) {
                ("coretemp", "temp1") => Ok(45.0),
                ("coretemp", _) => Err(ReadError::FeatureNotFound {
                    chip: chip.into(),
                    feature: feature.into(),
                }),
                ("nan", _) => Ok(f64::NAN),
                _ => Err(ReadError::ChipNotFound(chip.into())),
            }
        }
    }

    fn hw(label: &str, chip: &str, feature: &str) -> SensorDefinition {
        SensorDefinition {
            label: label.into(),
            topic: label.to_lowercase(),
            provider: ProviderConfig::HardwareSensor(HardwareSensorConfig {
                chip: chip.into(),
                feature: feature.into(),
            }),
        }
    }

    fn file(label: &str, path: &std::path::Path) -> SensorDefinition {
        SensorDefinition {
            label: label.into(),
            topic: label.to_lowercase(),
            provider: ProviderConfig::File(FileConfig { path: path.into() }),
        }
    }

    fn scheduler(
        defs: Vec<SensorDefinition>,
        publisher: Arc<MockPublisher>,
        readiness: Readiness,
    ) -> Scheduler {
        let backend: Arc<dyn SensorBackend> = Arc::new(StaticBackend);
        let sensors = defs.into_iter().map(|d| Sensor::new(d, &backend)).collect();
        let formatter = PayloadFormatter::new(
            &EventsConfig {
                mode: PublishMode::Plain,
                ..Default::default()
            },
            TopicResolver::new("test", None),
        );
        Scheduler::new(sensors, formatter, publisher, readiness)
    }

    #[tokio::test]
    #[traced_test]
    async fn test_failed_sensor_does_not_block_siblings() {
        let publisher = Arc::new(MockPublisher::default());
        let sched = scheduler(
            vec![
                hw("Missing", "k10temp-pci-00c3", "Tctl"),
                hw("CPU", "coretemp", "temp1"),
                hw("Core", "coretemp", "Core 9"),
            ],
            publisher.clone(),
            Readiness::ready(),
        );

        let report = sched.run_cycle().await;
        assert_eq!(report.published, 1);
        assert_eq!(report.read_failures, 2);
        assert_eq!(publisher.sent(), vec![("test/cpu".to_string(), "45".to_string())]);
        assert!(logs_contain("ChipNotFound"));
        assert!(logs_contain("FeatureNotFound"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_format_and_publish_failures_counted() {
        let publisher = Arc::new(MockPublisher {
            fail_topic: Some("test/cpu".into()),
            ..Default::default()
        });
        let sched = scheduler(
            vec![hw("Broken", "nan", "x"), hw("CPU", "coretemp", "temp1")],
            publisher.clone(),
            Readiness::ready(),
        );

        let report = sched.run_cycle().await;
        assert_eq!(report.format_failures, 1);
        assert_eq!(report.publish_failures, 1);
        assert_eq!(report.published, 0);
        assert!(logs_contain("broker rejected"));
    }

    #[tokio::test]
    async fn test_cancellation_checked_between_sensors() {
        let token = CancellationToken::new();
        let publisher = Arc::new(MockPublisher {
            cancel_on_publish: Some(token.clone()),
            ..Default::default()
        });
        let sched = scheduler(
            vec![
                hw("CPU", "coretemp", "temp1"),
                hw("A", "coretemp", "temp1"),
                hw("B", "coretemp", "temp1"),
            ],
            publisher.clone(),
            Readiness::ready(),
        )
        .with_cancel_token(token);

        let report = sched.run_cycle().await;
        assert_eq!(report.published, 1);
        assert_eq!(report.skipped, 2);
    }

    #[tokio::test]
    async fn test_once_mode_runs_single_cycle() {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(b"open\n").unwrap();

        let publisher = Arc::new(MockPublisher::default());
        let sched = scheduler(vec![file("Door", f.path())], publisher.clone(), Readiness::ready())
            .with_schedule(ScheduleConfig {
                mode: ScheduleMode::Once,
                interval: 1,
            });

        assert_eq!(sched.run().await, 1);
        assert_eq!(publisher.sent(), vec![("test/door".to_string(), "open".to_string())]);
        assert_eq!(*sched.subscribe_state().borrow(), SchedulerState::Idle);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_waits_for_readiness() {
        let readiness = Readiness::new();
        readiness.set_state(ReadinessState::NotReadyYet("Connecting...".into()));

        let publisher = Arc::new(MockPublisher::default());
        let sched = Arc::new(
            scheduler(vec![hw("CPU", "coretemp", "temp1")], publisher.clone(), readiness.clone())
                .with_schedule(ScheduleConfig {
                    mode: ScheduleMode::Once,
                    interval: 1,
                }),
        );

        let runner = tokio::spawn({
            let sched = sched.clone();
            async move { sched.run().await }
        });

        sleep(Duration::from_millis(200)).await;
        assert!(publisher.sent().is_empty());

        readiness.set_state(ReadinessState::Ready);
        let cycles = tokio::time::timeout(Duration::from_secs(2), runner)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cycles, 1);
        assert_eq!(publisher.sent().len(), 1);
        assert!(logs_contain("Waiting for readiness"));
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_readiness() {
        let publisher = Arc::new(MockPublisher::default());
        let sched = scheduler(
            vec![hw("CPU", "coretemp", "temp1")],
            publisher.clone(),
            Readiness::new(),
        );
        let token = sched.cancel_token();

        tokio::spawn(async move {
            sleep(Duration::from_millis(100)).await;
            token.cancel();
        });

        let cycles = tokio::time::timeout(Duration::from_secs(2), sched.run())
            .await
            .unwrap();
        assert_eq!(cycles, 0);
        assert!(publisher.sent().is_empty());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_transport_closed_while_waiting_for_readiness() {
        let readiness = Readiness::new();
        readiness.set_state(ReadinessState::NotReadyYet("Connecting...".into()));

        let publisher = Arc::new(MockPublisher::default());
        let sched = scheduler(
            vec![hw("CPU", "coretemp", "temp1")],
            publisher.clone(),
            readiness.clone(),
        );

        tokio::spawn(async move {
            sleep(Duration::from_millis(100)).await;
            readiness.set_state(ReadinessState::Closed("Disconnected (auth failed)".into()));
        });

        let cycles = tokio::time::timeout(Duration::from_secs(2), sched.run())
            .await
            .unwrap();
        assert_eq!(cycles, 0);
        assert!(publisher.sent().is_empty());
        assert!(!sched.cancel_token().is_cancelled());
        assert!(logs_contain("auth failed"));
    }

    #[tokio::test]
    async fn test_interval_mode_stops_when_transport_closes() {
        let readiness = Readiness::ready();
        let publisher = Arc::new(MockPublisher::default());
        let sched = scheduler(
            vec![hw("CPU", "coretemp", "temp1")],
            publisher.clone(),
            readiness.clone(),
        )
        .with_schedule(ScheduleConfig {
            mode: ScheduleMode::Interval,
            interval: 1,
        });

        tokio::spawn(async move {
            sleep(Duration::from_millis(300)).await;
            readiness.set_state(ReadinessState::Closed("kernel stopped".into()));
        });

        let cycles = tokio::time::timeout(Duration::from_secs(5), sched.run())
            .await
            .unwrap();
        assert_eq!(cycles, 2);
    }

    struct StuckPublisher;

    #[async_trait::async_trait]
    impl Publisher for StuckPublisher {
        async fn publish(&self, _topic: &str, _payload: Vec<u8>) -> Result<(), PublishError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn test_cancel_interrupts_stuck_publish() {
        let backend: Arc<dyn SensorBackend> = Arc::new(StaticBackend);
        let sensors = vec![
            Sensor::new(hw("CPU", "coretemp", "temp1"), &backend),
            Sensor::new(hw("A", "coretemp", "temp1"), &backend),
        ];
        let formatter =
            PayloadFormatter::new(&EventsConfig::default(), TopicResolver::new("t", None));
        let sched =
            Scheduler::new(sensors, formatter, Arc::new(StuckPublisher), Readiness::ready());
        let token = sched.cancel_token();

        tokio::spawn(async move {
            sleep(Duration::from_millis(100)).await;
            token.cancel();
        });

        let report = tokio::time::timeout(Duration::from_secs(2), sched.run_cycle())
            .await
            .unwrap();
        assert_eq!(report.published, 0);
        assert_eq!(report.skipped, 2);
        assert!(logs_contain("Cancelled while publishing 'CPU'"));
    }

    #[tokio::test]
    async fn test_interval_mode_repeats_until_cancelled() {
        let publisher = Arc::new(MockPublisher::default());
        let sched = scheduler(
            vec![hw("CPU", "coretemp", "temp1")],
            publisher.clone(),
            Readiness::ready(),
        )
        .with_schedule(ScheduleConfig {
            mode: ScheduleMode::Interval,
            interval: 1,
        });
        let token = sched.cancel_token();

        tokio::spawn(async move {
            sleep(Duration::from_millis(1500)).await;
            token.cancel();
        });

        let cycles = tokio::time::timeout(Duration::from_secs(5), sched.run())
            .await
            .unwrap();
        assert_eq!(cycles, 2);
        assert_eq!(publisher.sent().len(), 2);
    }

    #[tokio::test]
    async fn test_value_text_published_verbatim() {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(b"21.5\n").unwrap();
        let publisher = Arc::new(MockPublisher::default());
        let sched = scheduler(vec![file("Room", f.path())], publisher.clone(), Readiness::ready());

        let report = sched.run_cycle().await;
        assert_eq!(report, CycleReport { published: 1, ..Default::default() });
        assert_eq!(publisher.sent()[0].1, "21.5");
        assert!(matches!(
            sched.sensors()[0].provider.read().await.unwrap(),
            SensorValue::Text(_)
        ));
    }
}
