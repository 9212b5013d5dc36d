use std::path::PathBuf;

use thiserror::Error;

/// Failure of a single sensor read. Recovered per sensor; the cycle goes on.
#[derive(Error, Debug)]
pub enum ReadError {
    /// No hardware chip matches the configured name.
    #[error("ChipNotFound: no sensor chip matches '{0}'")]
    ChipNotFound(String),

    /// The chip exists but exposes no matching feature.
    #[error("FeatureNotFound: chip '{chip}' has no feature '{feature}'")]
    FeatureNotFound { chip: String, feature: String },

    #[error("FileNotFound: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("Failed to read {}", path.display())]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The hardware sensor subsystem itself failed (missing sysfs tree,
    /// unreadable or malformed attribute).
    #[error("Sensor backend error: {0}")]
    BackendError(String),
}
