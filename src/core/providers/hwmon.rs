//! Hardware sensor subsystem.
//!
//! [`SensorBackend`] is the capability handed to every hardware provider. It
//! is created once at startup and shared, so tests can substitute a fake tree
//! or a mock.
//!
//! [`HwmonBackend`] reads the Linux hwmon sysfs class directly:
//!
//! ```text
//! /sys/class/hwmon/hwmon2/name          -> "coretemp"
//! /sys/class/hwmon/hwmon2/temp1_label   -> "Package id 0"
//! /sys/class/hwmon/hwmon2/temp1_input   -> "45000"   (millidegrees)
//! ```
//!
//! A chip is matched by its `hwmonN` directory, its `name` attribute, or a
//! libsensors-style identifier such as `coretemp-isa-0000`. The identifier's
//! bus and address come from the `device` link, so two chips sharing a driver
//! name are told apart. A name that still fits several chips is an error, not
//! a guess. A feature is matched by its sysfs name (`temp1`) or by its label.

use std::path::{Path, PathBuf};

use tracing::trace;

use super::error::ReadError;

#[async_trait::async_trait]
pub trait SensorBackend: Send + Sync {
    /// Current value of `feature` on `chip`, scaled to its natural unit.
    async fn read(&self, chip: &str, feature: &str) -> Result<f64, ReadError>;
}

pub struct HwmonBackend {
    root: PathBuf,
}

impl HwmonBackend {
    pub const DEFAULT_ROOT: &'static str = "/sys/class/hwmon";

    pub fn new() -> Self {
        Self::with_root(Self::DEFAULT_ROOT)
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn find_chip(&self, chip: &str) -> Result<PathBuf, ReadError> {
        let mut entries = tokio::fs::read_dir(&self.root).await.map_err(|e| {
            ReadError::BackendError(format!(
                "cannot enumerate chips in {}: {}",
                self.root.display(),
                e
            ))
        })?;

        let mut dirs = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ReadError::BackendError(e.to_string()))?
        {
            dirs.push(entry.path());
        }
        dirs.sort();

        let mut by_name = Vec::new();
        let mut by_id = Vec::new();
        for dir in dirs {
            let dir_name = dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if chip == dir_name {
                return Ok(dir);
            }

            let Some(name) = read_trimmed(&dir.join("name")).await else {
                continue;
            };
            trace!("hwmon chip {} name={}", dir_name, name);
            if chip == name {
                by_name.push(dir);
            } else if chip
                .strip_prefix(name.as_str())
                .is_some_and(|rest| rest.starts_with('-'))
            {
                by_id.push((dir, name));
            }
        }

        if !by_name.is_empty() {
            return single_chip(chip, by_name);
        }

        let mut unresolved = Vec::new();
        for (dir, name) in by_id {
            match chip_id(&dir, &name).await {
                Some(id) if id.eq_ignore_ascii_case(chip) => return Ok(dir),
                Some(id) => trace!("{} is {}, not {}", dir.display(), id, chip),
                None => unresolved.push(dir),
            }
        }
        single_chip(chip, unresolved)
    }

    async fn find_feature(
        &self,
        chip_dir: &Path,
        chip: &str,
        feature: &str,
    ) -> Result<PathBuf, ReadError> {
        let mut entries = tokio::fs::read_dir(chip_dir)
            .await
            .map_err(|e| ReadError::BackendError(format!("{}: {}", chip_dir.display(), e)))?;

        let mut features = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ReadError::BackendError(e.to_string()))?
        {
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if let Some(base) = feature_base(&file_name) {
                features.push(base.to_string());
            }
        }
        features.sort();
        features.dedup();

        for base in features {
            let label = read_trimmed(&chip_dir.join(format!("{base}_label"))).await;
            if base == feature || label.as_deref() == Some(feature) {
                let input = chip_dir.join(format!("{base}_input"));
                return Ok(if tokio::fs::metadata(&input).await.is_ok() {
                    input
                } else {
                    chip_dir.join(&base)
                });
            }
        }

        Err(ReadError::FeatureNotFound {
            chip: chip.to_string(),
            feature: feature.to_string(),
        })
    }
}

impl Default for HwmonBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl SensorBackend for HwmonBackend {
    async fn read(&self, chip: &str, feature: &str) -> Result<f64, ReadError> {
        let chip_dir = self.find_chip(chip).await?;
        let value_path = self.find_feature(&chip_dir, chip, feature).await?;

        let raw = tokio::fs::read_to_string(&value_path).await.map_err(|e| {
            ReadError::BackendError(format!("{}: {}", value_path.display(), e))
        })?;
        let raw: f64 = raw.trim().parse().map_err(|e| {
            ReadError::BackendError(format!(
                "{}: invalid value {:?}: {}",
                value_path.display(),
                raw.trim(),
                e
            ))
        })?;

        let base = value_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(raw / scale_for(&base))
    }
}

fn single_chip(chip: &str, mut candidates: Vec<PathBuf>) -> Result<PathBuf, ReadError> {
    match candidates.len() {
        0 => Err(ReadError::ChipNotFound(chip.to_string())),
        1 => Ok(candidates.remove(0)),
        _ => {
            let dirs: Vec<String> = candidates.iter().map(|d| d.display().to_string()).collect();
            Err(ReadError::BackendError(format!(
                "chip '{}' is ambiguous, it matches {}; use a bus-qualified id or hwmonN",
                chip,
                dirs.join(", ")
            )))
        }
    }
}

/// libsensors-style id (`nct6775-isa-0290`, `k10temp-pci-00c3`) built from
/// the chip's `device` link. `None` when the link is missing or the bus is
/// unknown.
async fn chip_id(chip_dir: &Path, name: &str) -> Option<String> {
    // Class devices such as nvme sit one level above the bus device.
    let mut device = chip_dir.join("device");
    for _ in 0..2 {
        let target = tokio::fs::read_link(&device).await.ok()?;
        let bus_address = target.file_name()?.to_string_lossy().into_owned();
        let subsystem = tokio::fs::read_link(device.join("subsystem")).await.ok();
        let subsystem = subsystem
            .as_deref()
            .and_then(Path::file_name)
            .map(|s| s.to_string_lossy().into_owned());

        if let Some(id) = subsystem.and_then(|bus| bus_id(name, &bus, &bus_address)) {
            return Some(id);
        }
        device = device.join("device");
    }
    None
}

fn bus_id(name: &str, subsystem: &str, bus_address: &str) -> Option<String> {
    match subsystem {
        "i2c" => {
            let (bus, addr) = bus_address.split_once('-')?;
            let bus: u32 = bus.parse().ok()?;
            let addr = u16::from_str_radix(addr, 16).ok()?;
            Some(format!("{name}-i2c-{bus}-{addr:02x}"))
        }
        "pci" => {
            let mut parts = bus_address.split(':');
            let domain = u32::from_str_radix(parts.next()?, 16).ok()?;
            let bus = u32::from_str_radix(parts.next()?, 16).ok()?;
            let (slot, func) = parts.next()?.split_once('.')?;
            let slot = u32::from_str_radix(slot, 16).ok()?;
            let func = u32::from_str_radix(func, 16).ok()?;
            let addr = (domain << 16) + (bus << 8) + (slot << 3) + func;
            Some(format!("{name}-pci-{addr:04x}"))
        }
        "platform" | "isa" | "of_platform" => {
            let addr = bus_address
                .rsplit_once('.')
                .and_then(|(_, n)| n.parse::<u32>().ok())
                .unwrap_or(0);
            Some(format!("{name}-isa-{addr:04x}"))
        }
        "acpi" => {
            let (_, n) = bus_address.rsplit_once(':')?;
            let addr: u32 = n.parse().ok()?;
            Some(format!("{name}-acpi-{addr:x}"))
        }
        _ => None,
    }
}

/// `temp1_input` -> `temp1`, `pwm1` -> `pwm1`. Other attributes are ignored.
fn feature_base(file_name: &str) -> Option<&str> {
    if let Some(base) = file_name.strip_suffix("_input") {
        return Some(base);
    }
    let digits = file_name.trim_start_matches("pwm");
    if digits.len() < file_name.len()
        && !digits.is_empty()
        && digits.bytes().all(|b| b.is_ascii_digit())
    {
        return Some(file_name);
    }
    None
}

/// Divisor converting the raw sysfs value to its natural unit.
fn scale_for(attribute: &str) -> f64 {
    let kind: String = attribute
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect();
    match kind.as_str() {
        "temp" | "in" | "curr" => 1_000.0,
        "power" | "energy" => 1_000_000.0,
        _ => 1.0,
    }
}

async fn read_trimmed(path: &Path) -> Option<String> {
    tokio::fs::read_to_string(path)
        .await
        .ok()
        .map(|s| s.trim().to_string())
}
