//! Single-line file sensor.

use std::path::{Path, PathBuf};

use tokio::{
    fs::File,
    io::{AsyncBufReadExt, BufReader},
};

use super::{error::ReadError, SensorValue};

#[derive(Debug, Clone)]
pub struct FileProvider {
    path: PathBuf,
}

impl FileProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the first line and strips one trailing newline. The content is
    /// returned as text; no numeric coercion happens here.
    pub async fn read(&self) -> Result<SensorValue, ReadError> {
        let file = File::open(&self.path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ReadError::FileNotFound(self.path.clone()),
            _ => ReadError::IoError {
                path: self.path.clone(),
                source: e,
            },
        })?;

        let mut line = String::new();
        BufReader::new(file)
            .read_line(&mut line)
            .await
            .map_err(|source| ReadError::IoError {
                path: self.path.clone(),
                source,
            })?;

        if line.ends_with('\n') {
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
        }

        Ok(SensorValue::Text(line))
    }
}
