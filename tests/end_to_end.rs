use std::{
    collections::HashMap,
    fs,
    path::Path,
    sync::{Arc, Mutex},
    time::Duration,
};

use sensors_report::{
    config::{
        schedule::{ScheduleConfig, ScheduleMode},
        Config,
    },
    core::{
        providers::{HwmonBackend, SensorBackend},
        readiness::Readiness,
        scheduler::{PublishError, Publisher, Scheduler},
    },
};
use sensors_report_mqtt::MqttManager;
use tempfile::TempDir;
use tracing_test::traced_test;

#[derive(Default)]
struct RecordingPublisher {
    sent: Mutex<Vec<(String, Vec<u8>)>>,
}

#[async_trait::async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError> {
        self.sent.lock().unwrap().push((topic.to_string(), payload));
        Ok(())
    }
}

impl RecordingPublisher {
    fn topics(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(t, _)| t.clone()).collect()
    }

    fn payload(&self, index: usize) -> Vec<u8> {
        self.sent.lock().unwrap()[index].1.clone()
    }
}

struct Fixture {
    dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("hwmon")).unwrap();
        fs::write(dir.path().join("room"), "21.5\n").unwrap();
        Self { dir }
    }

    fn hwmon_root(&self) -> std::path::PathBuf {
        self.dir.path().join("hwmon")
    }

    fn document(&self, events: &str) -> String {
        format!(
            r#"{{
                "topic": "home/sensors",
                "events": {events},
                "sensors": [
                    {{"label": "Room", "topic": "room", "file": {{"path": "{}"}}}},
                    {{
                        "label": "CPU",
                        "topic": "cpu",
                        "lm-sensors": {{"chip": "coretemp-isa-0000", "feature": "Package id 0"}}
                    }}
                ]
            }}"#,
            self.dir.path().join("room").display()
        )
    }

    fn config(&self, events: &str, env: &[(&str, &str)]) -> Config {
        let path = self.dir.path().join("sensors-report-cfg.json");
        fs::write(&path, self.document(events)).unwrap();

        let vars: HashMap<String, String> = env
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mut config = Config::load(Path::new(&path)).unwrap();
        config.apply_env_overrides(|key| vars.get(key).cloned()).unwrap();
        config.validate_all().unwrap();
        config
    }

    fn scheduler(&self, config: &Config, publisher: Arc<RecordingPublisher>) -> Scheduler {
        self.scheduler_with(config, publisher, Readiness::ready())
    }

    fn scheduler_with(
        &self,
        config: &Config,
        publisher: Arc<RecordingPublisher>,
        readiness: Readiness,
    ) -> Scheduler {
        let backend: Arc<dyn SensorBackend> = Arc::new(HwmonBackend::with_root(self.hwmon_root()));
        Scheduler::from_config(config, backend, publisher, readiness)
    }
}

#[tokio::test]
#[traced_test]
async fn file_sensor_published_while_missing_chip_is_logged() {
    let fixture = Fixture::new();
    let config = fixture.config(r#"{"mode": "plain"}"#, &[]);
    let publisher = Arc::new(RecordingPublisher::default());

    let report = fixture.scheduler(&config, publisher.clone()).run_cycle().await;

    assert_eq!(report.published, 1);
    assert_eq!(report.read_failures, 1);
    assert_eq!(publisher.topics(), vec!["home/sensors/room"]);
    assert_eq!(publisher.payload(0), b"21.5");
    assert!(logs_contain("ChipNotFound"));
    assert!(logs_contain("coretemp-isa-0000"));
}

#[tokio::test]
async fn envelope_topics_follow_sensor_topics_without_shared_topic() {
    let fixture = Fixture::new();
    fs::create_dir(fixture.hwmon_root().join("hwmon0")).unwrap();
    fs::write(fixture.hwmon_root().join("hwmon0/name"), "coretemp\n").unwrap();
    fs::write(fixture.hwmon_root().join("hwmon0/temp1_input"), "45000\n").unwrap();
    fs::write(fixture.hwmon_root().join("hwmon0/temp1_label"), "Package id 0\n").unwrap();

    let config = fixture.config(r#"{"mode": "cloudevents"}"#, &[]);
    let publisher = Arc::new(RecordingPublisher::default());

    let report = fixture.scheduler(&config, publisher.clone()).run_cycle().await;

    assert_eq!(report.published, 2);
    assert_eq!(
        publisher.topics(),
        vec!["home/sensors/room/CloudEvent", "home/sensors/cpu/CloudEvent"]
    );

    let envelope: serde_json::Value = serde_json::from_slice(&publisher.payload(1)).unwrap();
    assert_eq!(envelope["subject"], "home/sensors/cpu");
    assert_eq!(envelope["data"]["value"], 45.0);
    assert_eq!(envelope["data"]["sensor_config"]["label"], "CPU");
}

#[tokio::test]
async fn shared_envelope_topic_from_environment() {
    let fixture = Fixture::new();
    fs::create_dir(fixture.hwmon_root().join("hwmon3")).unwrap();
    fs::write(fixture.hwmon_root().join("hwmon3/name"), "coretemp\n").unwrap();
    fs::write(fixture.hwmon_root().join("hwmon3/temp1_input"), "50000\n").unwrap();
    fs::write(fixture.hwmon_root().join("hwmon3/temp1_label"), "Package id 0\n").unwrap();

    let config = fixture.config(
        r#"{"mode": "plain"}"#,
        &[("PUBLISH_MODE", "both"), ("CE_MQTT_TOPIC", "shared/events")],
    );
    let publisher = Arc::new(RecordingPublisher::default());

    let report = fixture.scheduler(&config, publisher.clone()).run_cycle().await;

    assert_eq!(report.published, 4);
    assert_eq!(
        publisher.topics(),
        vec![
            "home/sensors/room",
            "shared/events",
            "home/sensors/cpu",
            "shared/events"
        ]
    );
    assert_eq!(publisher.payload(2), b"50");
}

#[tokio::test]
#[traced_test]
async fn scheduler_gives_up_when_broker_never_accepts() {
    let fixture = Fixture::new();
    let mut config = fixture.config(r#"{"mode": "plain"}"#, &[]);
    config.schedule = ScheduleConfig {
        mode: ScheduleMode::Interval,
        interval: 1,
    };
    config.mqtt.host = "127.0.0.1".into();
    config.mqtt.port = 1;
    config.mqtt.reconnect.max_attempts = 1;

    let instance = MqttManager::from_config(config.mqtt.clone())
        .unwrap()
        .build_and_start()
        .await
        .unwrap();
    let readiness = Readiness::new();
    readiness.start_listening(instance.state_receiver());

    let publisher = Arc::new(RecordingPublisher::default());
    let scheduler = fixture.scheduler_with(&config, publisher.clone(), readiness);

    let cycles = tokio::time::timeout(Duration::from_secs(10), scheduler.run())
        .await
        .expect("scheduler should stop once the connection kernel is gone");
    assert_eq!(cycles, 0);
    assert!(publisher.topics().is_empty());
    assert!(instance.is_closed());
    assert!(logs_contain("transport closed"));
}

#[test]
fn conflicting_provider_keys_fail_at_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cfg.json");
    let doc = r#"{"sensors": [
        {"label": "X", "topic": "x", "file": {"path": "/a"}, "lm-sensors": {"chip": "c", "feature": "f"}}
    ]}"#;
    fs::write(&path, doc).unwrap();

    assert!(Config::load(&path).is_err());
}
