//! sensors-report: publishes hardware sensor and file readings over MQTT.
//!
//! Every configured sensor is read through a [`core::providers::Provider`]
//! (a hwmon chip feature or the first line of a file), formatted as a plain
//! value and/or a CloudEvents envelope, and published under
//! `<prefix>/<sensor topic>`. Polling runs at a fixed interval or as a single
//! pass.
//!
//! ## Modules
//!
//! * `config` - JSON configuration, environment overrides and validation.
//! * `core` - providers, formatter, topic resolution, readiness and the
//!   scheduler loop.
//! * `logger` - `tracing` subscriber setup (console and journald).
//!
//! The MQTT transport lives in the `sensors-report-mqtt` workspace crate.

pub mod config;
pub mod core;
pub mod logger;
