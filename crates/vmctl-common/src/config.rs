use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::inventory::PowerState;

/// Which state record the endpoint publishes for task changes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChangeGranularity {
    /// Full `info` record on every change
    #[serde(rename = "info")]
    Info,
    /// Only the `info.state` field
    #[serde(rename = "info.state")]
    InfoState,
}

/// Snapshot in a seeded inventory
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SnapshotSeed {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub power_state: PowerState,
    #[serde(default)]
    pub children: Vec<SnapshotSeed>,
}

/// VM in a seeded inventory
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VmSeed {
    pub name: String,
    pub power_state: PowerState,
    #[serde(default)]
    pub snapshots: Vec<SnapshotSeed>,
}

/// Simulated endpoint configuration loaded from sim.json or using defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// TCP address to listen on (default: 127.0.0.1:8443)
    pub listen_addr: String,
    /// Accepted user name (default: "admin")
    pub user: String,
    /// Accepted password (default: "admin")
    pub password: String,
    /// State record published on task changes (default: info)
    pub granularity: ChangeGranularity,
    /// Delay between task state transitions in milliseconds (default: 500)
    pub task_step_ms: u64,
    /// Seconds to keep completed tasks before cleanup (default: 600)
    pub task_retention_secs: u64,
    /// VMs registered at startup
    pub inventory: Vec<VmSeed>,
}

impl SimConfig {
    /// Load configuration from `path`, or from the default location if it exists
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match Self::default_path() {
                Some(p) if p.exists() => p,
                _ => return Ok(Self::default()),
            },
        };

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: SimConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// `~/.vmctl/sim.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".vmctl").join("sim.json"))
    }

    /// Inventory used when none is configured
    pub fn default_inventory() -> Vec<VmSeed> {
        vec![
            VmSeed {
                name: "web-01".to_string(),
                power_state: PowerState::PoweredOn,
                snapshots: vec![SnapshotSeed {
                    name: "clean-install".to_string(),
                    description: "Fresh OS install".to_string(),
                    power_state: PowerState::PoweredOff,
                    children: vec![SnapshotSeed {
                        name: "patched".to_string(),
                        description: String::new(),
                        power_state: PowerState::PoweredOn,
                        children: vec![],
                    }],
                }],
            },
            VmSeed {
                name: "db-01".to_string(),
                power_state: PowerState::PoweredOff,
                snapshots: vec![],
            },
        ]
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8443".to_string(),
            user: "admin".to_string(),
            password: "admin".to_string(),
            granularity: ChangeGranularity::Info,
            task_step_ms: 500,
            task_retention_secs: 600,
            inventory: Self::default_inventory(),
        }
    }
}
