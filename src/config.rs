//! Config model and persistence helpers.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, time::Duration};

/// Top-level configuration stored in `config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Backend location and credentials.
    pub api: ApiCfg,
    /// Company branding printed on generated reports.
    pub branding: Branding,
    /// Background tracker timings.
    pub tracker: TrackerCfg,
    /// Single-generation flow timings and retry bound.
    pub generation: GenerationCfg,
    /// Local persistence.
    pub storage: StorageCfg,
}

/// Backend endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiCfg {
    /// Base URL, e.g. `https://app.example.com`.
    pub base_url: String,
    /// Bearer token issued by the web app's session; empty disables auth.
    pub token: String,
    /// Per-request timeout.
    pub timeout_secs: u64,
}

/// Optional branding fields sent with generation requests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Branding {
    pub company_name: String,
    pub company_logo_url: String,
}

impl Branding {
    pub fn company_name(&self) -> Option<String> {
        non_empty(&self.company_name)
    }

    pub fn company_logo_url(&self) -> Option<String> {
        non_empty(&self.company_logo_url)
    }
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

/// Floor for both poll intervals; a zero interval would stall the timers.
const MIN_POLL_INTERVAL_MS: u64 = 100;

/// Timings for the long-running tracker of every active report job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerCfg {
    pub poll_interval_ms: u64,
    /// How long a completed job stays visible.
    pub completed_grace_ms: u64,
    /// How long a failed job stays visible.
    pub failed_grace_ms: u64,
    /// Persisted jobs older than this are dropped on startup.
    pub stale_after_secs: u64,
}

impl TrackerCfg {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(MIN_POLL_INTERVAL_MS))
    }

    pub fn completed_grace(&self) -> Duration {
        Duration::from_millis(self.completed_grace_ms)
    }

    pub fn failed_grace(&self) -> Duration {
        Duration::from_millis(self.failed_grace_ms)
    }

    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stale_after_secs as i64)
    }
}

/// Bounds for one user-initiated "generate report" action.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationCfg {
    /// Total attempts, including the first.
    pub max_retries: u32,
    /// Fixed wait between attempts.
    pub retry_delay_ms: u64,
    pub poll_interval_ms: u64,
    /// Status checks per attempt before giving up client-side.
    pub max_polls: u32,
}

impl GenerationCfg {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(MIN_POLL_INTERVAL_MS))
    }
}

/// Where tracked jobs are persisted between runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageCfg {
    pub jobs_path: String,
}

impl Default for ApiCfg {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".into(),
            token: "".into(),
            timeout_secs: 30,
        }
    }
}

impl Default for TrackerCfg {
    fn default() -> Self {
        Self {
            poll_interval_ms: 3_000,
            completed_grace_ms: 2_000,
            failed_grace_ms: 5_000,
            stale_after_secs: 10 * 60,
        }
    }
}

impl Default for GenerationCfg {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 3_000,
            poll_interval_ms: 2_000,
            max_polls: 120,
        }
    }
}

impl Default for StorageCfg {
    fn default() -> Self {
        Self {
            jobs_path: "jobs.json".into(),
        }
    }
}

impl Config {
    /// Load from disk or create defaults when missing.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            let s = fs::read_to_string(path)?;
            Ok(toml::from_str(&s)?)
        } else {
            let cfg = Self::default();
            cfg.save(path)?;
            Ok(cfg)
        }
    }

    /// Persist the config as pretty TOML.
    pub fn save(&self, path: &Path) -> Result<()> {
        let s = toml::to_string_pretty(self)?;
        fs::write(path, s)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_job_timings() {
        let cfg = Config::default();
        assert_eq!(cfg.tracker.poll_interval(), Duration::from_secs(3));
        assert_eq!(cfg.tracker.stale_after(), chrono::Duration::minutes(10));
        assert_eq!(cfg.generation.max_retries, 3);
        assert_eq!(cfg.generation.retry_delay(), Duration::from_millis(3_000));
        assert_eq!(cfg.generation.poll_interval(), Duration::from_millis(2_000));
        assert_eq!(cfg.generation.max_polls, 120);
    }

    #[test]
    fn zero_poll_intervals_are_raised_to_the_floor() {
        let cfg: Config = toml::from_str(
            r#"
            [tracker]
            poll_interval_ms = 0

            [generation]
            poll_interval_ms = 0
            "#,
        )
        .unwrap();
        assert_eq!(cfg.tracker.poll_interval(), Duration::from_millis(100));
        assert_eq!(cfg.generation.poll_interval(), Duration::from_millis(100));
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            [api]
            base_url = "https://app.example.com"

            [branding]
            company_name = "Harbour Realty"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.api.base_url, "https://app.example.com");
        assert_eq!(cfg.api.timeout_secs, 30);
        assert_eq!(cfg.branding.company_name().as_deref(), Some("Harbour Realty"));
        assert_eq!(cfg.branding.company_logo_url(), None);
        assert_eq!(cfg.tracker.failed_grace_ms, 5_000);
    }

    #[test]
    fn save_then_load_keeps_values() {
        let dir = std::env::temp_dir().join(format!("appraisal_tui_{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");

        let mut cfg = Config::load_or_default(&path).unwrap();
        assert!(path.exists());
        cfg.branding.company_logo_url = "https://cdn.example.com/logo.png".into();
        cfg.save(&path).unwrap();

        let loaded = Config::load_or_default(&path).unwrap();
        assert_eq!(loaded.branding, cfg.branding);
    }
}
