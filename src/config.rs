use serde::{Deserialize, Serialize};
use std::{fs::File, io::BufReader, path::Path};

use crate::{DarkLaunchError, DarkResult};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DarkLaunchConfig {
    /// Maximum number of background evaluations admitted at once.
    #[serde(default = "default_admission_capacity")]
    pub admission_capacity: usize,

    /// Log absorbed faults through `tracing`. When false, faults are dropped silently.
    #[serde(default = "default_true")]
    pub log_faults: bool,
}

impl Default for DarkLaunchConfig {
    fn default() -> Self {
        Self {
            admission_capacity: default_admission_capacity(),
            log_faults: default_true(),
        }
    }
}

impl DarkLaunchConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> DarkResult<Self> {
        from_file(path)
    }

    pub fn from_str(s: &str) -> DarkResult<Self> {
        from_str(s)
    }
}

pub fn from_file<T: for<'de> Deserialize<'de>, P: AsRef<Path>>(path: P) -> DarkResult<T> {
    let file = File::open(path)
        .map_err(|e| DarkLaunchError::Internal(format!("Failed to open config file: {}", e)))?;
    let reader = BufReader::new(file);
    let config = serde_json::from_reader(reader)
        .map_err(|e| DarkLaunchError::Internal(format!("Failed to parse config file: {}", e)))?;
    Ok(config)
}

pub fn from_str<T: for<'de> Deserialize<'de>>(s: &str) -> DarkResult<T> {
    let config = serde_json::from_str(s)
        .map_err(|e| DarkLaunchError::Internal(format!("Failed to parse config: {}", e)))?;
    Ok(config)
}

pub(crate) fn default_admission_capacity() -> usize {
    200
}

fn default_true() -> bool {
    true
}
