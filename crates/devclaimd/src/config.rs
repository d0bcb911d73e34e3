//! devclaimd.toml configuration parser.
//!
//! Every section and key is optional; anything left out keeps the
//! component's default. Command-line flags override the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use devclaim_controller::ControllerConfig;
use devclaim_health::HealthMonitorConfig;
use devclaim_scheduler::FilterConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    pub server: Option<ServerConfig>,
    pub controller: Option<ControllerSection>,
    pub health: Option<HealthSection>,
    pub filter: Option<FilterSection>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    pub port: Option<u16>,
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControllerSection {
    pub resync_secs: Option<u64>,
    pub retry_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthSection {
    pub not_ready_threshold_secs: Option<u64>,
    pub quarantine_attempts: Option<u32>,
    pub quarantine_retry_delay_ms: Option<u64>,
    pub requeue_delay_secs: Option<u64>,
    pub resync_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterSection {
    pub parallelism: Option<usize>,
}

impl DaemonConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn port(&self) -> Option<u16> {
        self.server.as_ref().and_then(|s| s.port)
    }

    pub fn data_dir(&self) -> Option<PathBuf> {
        self.server.as_ref().and_then(|s| s.data_dir.clone())
    }

    pub fn controller_config(&self) -> ControllerConfig {
        let mut config = ControllerConfig::default();
        if let Some(section) = &self.controller {
            if let Some(secs) = section.resync_secs {
                config = config.with_resync_interval(Duration::from_secs(secs));
            }
            if let Some(ms) = section.retry_delay_ms {
                config = config.with_retry_delay(Duration::from_millis(ms));
            }
        }
        config
    }

    pub fn health_config(&self) -> HealthMonitorConfig {
        let mut config = HealthMonitorConfig::default();
        let Some(section) = &self.health else {
            return config;
        };
        if let Some(secs) = section.not_ready_threshold_secs {
            config = config.with_not_ready_threshold(Duration::from_secs(secs));
        }
        if let Some(attempts) = section.quarantine_attempts {
            config = config.with_quarantine_attempts(attempts);
        }
        if let Some(ms) = section.quarantine_retry_delay_ms {
            config = config.with_quarantine_retry_delay(Duration::from_millis(ms));
        }
        if let Some(secs) = section.requeue_delay_secs {
            config = config.with_requeue_delay(Duration::from_secs(secs));
        }
        if let Some(secs) = section.resync_secs {
            config = config.with_resync_interval(Duration::from_secs(secs));
        }
        config
    }

    pub fn filter_config(&self) -> FilterConfig {
        match self.filter.as_ref().and_then(|f| f.parallelism) {
            Some(n) => FilterConfig::default().with_parallelism(n),
            None => FilterConfig::default(),
        }
    }
}
