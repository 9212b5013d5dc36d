//! Application configuration loading, validation, and environment overrides.
//!
//! The configuration is a JSON document (see `sensors-report-cfg.json.example`)
//! aggregating sensor definitions, MQTT transport, topic prefix, payload mode,
//! schedule and logging. Selected settings can be overridden by environment
//! variables so the same document can be reused across deployments.
//!
//! The configuration is loaded once at startup and is immutable afterwards.
//! Any error here is fatal.

use std::{
    collections::HashSet,
    fmt, fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use validator::Validate;

use self::{
    events::{EventsConfig, PublishMode},
    logger::LoggerConfig,
    schedule::{ScheduleConfig, ScheduleMode},
    sensors::SensorDefinition,
};
use crate::core::topics::TopicResolver;

pub mod events;
pub mod logger;
pub mod schedule;
pub mod sensors;

pub use sensors_report_mqtt::Config as MqttConfig;

/// Environment variable pointing at the configuration document.
pub const CONFIG_PATH_ENV: &str = "SENSORS_REPORT_CONFIG";

const DEFAULT_CONFIG_PATHS: [&str; 2] = [
    "sensors-report-cfg.json",
    "/etc/sensors-report/config.json",
];

/// Severity used by the pre-logger console helpers.
#[doc(hidden)]
#[derive(Debug, Clone, Copy)]
pub enum EarlyLevel {
    Info,
    Warn,
    Error,
}

/// Writes a timestamped line before the tracing subscriber exists.
#[doc(hidden)]
pub fn early_print(level: EarlyLevel, args: fmt::Arguments<'_>) {
    let now = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default();
    let now = console::style(now).dim();
    match level {
        EarlyLevel::Info => println!("{}  {} {}", now, console::style("INFO").green(), args),
        EarlyLevel::Warn => println!("{}  {} {}", now, console::style("WARN").yellow(), args),
        EarlyLevel::Error => eprintln!("{}  {} {}", now, console::style("ERROR").red(), args),
    }
}

#[macro_export]
macro_rules! print_info {
    ($($arg:tt)*) => {
        $crate::config::early_print($crate::config::EarlyLevel::Info, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! print_warn {
    ($($arg:tt)*) => {
        $crate::config::early_print($crate::config::EarlyLevel::Warn, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! print_error {
    ($($arg:tt)*) => {
        $crate::config::early_print($crate::config::EarlyLevel::Error, format_args!($($arg)*))
    };
}

/// Errors raised while locating, parsing, overriding or validating the
/// configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error while reading configuration: {0}")]
    IoError(#[from] std::io::Error),

    /// Malformed JSON, or a sensor entry that failed conversion.
    #[error("Parse error while reading configuration: {0}")]
    ParseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    /// An environment override could not be parsed.
    #[error("Invalid value '{value}' for {variable}: {reason}")]
    EnvOverride {
        variable: &'static str,
        value: String,
        reason: String,
    },
}

/// Top-level application configuration.
#[derive(Serialize, Deserialize, Debug, Validate, Clone, Default)]
#[serde(default)]
pub struct Config {
    /// Sensors to poll, in publishing order.
    #[validate(length(min = 1, message = "At least one sensor must be configured"))]
    pub sensors: Vec<SensorDefinition>,

    /// Prefix prepended to every sensor topic.
    pub topic: String,

    #[validate(nested)]
    pub events: EventsConfig,

    #[validate(nested)]
    pub schedule: ScheduleConfig,

    #[validate(nested)]
    pub mqtt: MqttConfig,

    #[validate(nested)]
    pub logger: LoggerConfig,
}

impl Config {
    /// Locates the document, loads it, applies process environment overrides
    /// and validates the result.
    pub fn new() -> Result<Self, ConfigError> {
        let path = Self::get_config_path(|key| std::env::var(key).ok())?;
        let mut config = Self::load(&path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate_all()?;
        print_info!(
            "Configuration ready: {} sensor(s), mode {}",
            config.sensors.len(),
            config.events.mode
        );
        Ok(config)
    }

    /// Priority: `SENSORS_REPORT_CONFIG`, `./sensors-report-cfg.json`,
    /// `/etc/sensors-report/config.json`.
    fn get_config_path<F>(lookup: F) -> Result<PathBuf, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(CONFIG_PATH_ENV) {
            let path = PathBuf::from(path);
            print_info!("Using config from {}: {}", CONFIG_PATH_ENV, path.display());
            return Ok(path);
        }

        DEFAULT_CONFIG_PATHS
            .iter()
            .map(Path::new)
            .find(|p| p.exists())
            .map(|p| {
                print_info!("Using default config path: {}", p.display());
                p.to_path_buf()
            })
            .ok_or_else(|| {
                ConfigError::Config(format!(
                    "No configuration file found. Set {} or create one of: {}",
                    CONFIG_PATH_ENV,
                    DEFAULT_CONFIG_PATHS.join(", ")
                ))
            })
    }

    /// Reads and parses the document without applying overrides or
    /// cross-field validation.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        print_info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(ConfigError::Config(format!(
                "configuration file not found: {}",
                path.display()
            )));
        }

        let text = fs::read_to_string(path)?;
        text.parse()
    }

    /// Applies environment overrides. `lookup` returns the value of a
    /// variable, or `None` when unset.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("MQTT_HOST") {
            self.mqtt.host = host;
        }
        if let Some(port) = lookup("MQTT_PORT") {
            self.mqtt.port = parse_env("MQTT_PORT", &port)?;
        }
        if let Some(client_id) = lookup("MQTT_CLIENT_ID") {
            self.mqtt.client_id = client_id;
        }
        if let Some(username) = lookup("MQTT_USERNAME") {
            self.mqtt.credentials = Some(sensors_report_mqtt::Credentials {
                username,
                password: lookup("MQTT_PASSWORD").unwrap_or_default(),
            });
        }
        if let Some(prefix) = lookup("MQTT_TOPIC") {
            self.topic = prefix;
        }
        if let Some(ce_topic) = lookup("CE_MQTT_TOPIC") {
            self.events.topic = Some(ce_topic).filter(|t| !t.trim().is_empty());
        }
        if let Some(source) = lookup("CE_SOURCE") {
            self.events.source = source;
        }
        if let Some(event_type) = lookup("CE_TYPE") {
            self.events.event_type = event_type;
        }
        if let Some(mode) = lookup("PUBLISH_MODE") {
            self.events.mode = mode.parse().map_err(|reason| ConfigError::EnvOverride {
                variable: "PUBLISH_MODE",
                value: mode.clone(),
                reason,
            })?;
        }
        if let Some(interval) = lookup("POLL_INTERVAL") {
            self.schedule.interval = parse_env("POLL_INTERVAL", &interval)?;
        }
        if let Some(oneshot) = lookup("ONESHOT") {
            if parse_flag("ONESHOT", &oneshot)? {
                self.schedule.mode = ScheduleMode::Once;
            } else {
                self.schedule.mode = ScheduleMode::Interval;
            }
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            self.logger.level = level;
        }
        Ok(())
    }

    /// Field-level validation plus topic checks.
    pub fn validate_all(&self) -> Result<(), ConfigError> {
        self.validate()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        self.check_topics()
    }

    pub fn topic_resolver(&self) -> TopicResolver {
        TopicResolver::new(&self.topic, self.events.topic.as_deref())
    }

    /// Every published topic must belong to exactly one sensor. A shared
    /// envelope topic is exempt among envelopes but may not collide with a
    /// plain topic.
    fn check_topics(&self) -> Result<(), ConfigError> {
        if self.topic.contains(['+', '#']) {
            return Err(ConfigError::ValidationError(format!(
                "topic prefix '{}' must not contain MQTT wildcards",
                self.topic
            )));
        }
        if let Some(shared) = &self.events.topic {
            if shared.contains(['+', '#']) {
                return Err(ConfigError::ValidationError(format!(
                    "envelope topic '{shared}' must not contain MQTT wildcards"
                )));
            }
        }

        let resolver = self.topic_resolver();
        let mode: PublishMode = self.events.mode;
        let mut seen: HashSet<String> = HashSet::new();

        let mut claim = |topic: String, label: &str| -> Result<(), ConfigError> {
            if seen.insert(topic.clone()) {
                Ok(())
            } else {
                Err(ConfigError::ValidationError(format!(
                    "sensor '{label}' resolves to topic '{topic}' which is already in use"
                )))
            }
        };

        for sensor in &self.sensors {
            if mode.publishes_plain() {
                claim(resolver.sensor_topic(sensor), &sensor.label)?;
            }
            if mode.publishes_envelope() && !resolver.has_shared_envelope_topic() {
                claim(resolver.envelope_topic(sensor), &sensor.label)?;
            }
        }

        if mode.publishes_envelope() {
            if let Some(shared) = &self.events.topic {
                if mode.publishes_plain() && seen.contains(shared) {
                    return Err(ConfigError::ValidationError(format!(
                        "envelope topic '{shared}' collides with a sensor topic"
                    )));
                }
            }
        }

        Ok(())
    }
}

impl std::str::FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_str(s).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

fn parse_env<T>(variable: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::EnvOverride {
            variable,
            value: value.to_string(),
            reason: e.to_string(),
        })
}

fn parse_flag(variable: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::EnvOverride {
            variable,
            value: value.to_string(),
            reason: "expected a boolean".into(),
        }),
    }
}
