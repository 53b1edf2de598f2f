/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{bail, Context, Result};
use directories::ProjectDirs;
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

#[derive(Clone, Debug, serde::Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Origin of this node. Actors and videos under it are local.
    #[serde(alias = "base_url")]
    pub public_base_url: String,
    pub data_dir: Option<String>,
    pub db_file: String,
    pub db_busy_timeout_ms: u64,
    pub max_thread_depth: u32,
    pub retry: RetryPolicy,
    pub fetch: FetchConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            public_base_url: String::new(),
            data_dir: None,
            db_file: "vidfed.sqlite3".to_string(),
            db_busy_timeout_ms: 5_000,
            max_thread_depth: 100,
            retry: RetryPolicy::default(),
            fetch: FetchConfig::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, serde::Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff_ms: 100,
            max_backoff_ms: 2_000,
        }
    }
}

impl RetryPolicy {
    pub fn attempts(&self) -> u32 {
        self.max_attempts.clamp(1, 10)
    }

    pub fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.base_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms.max(self.base_backoff_ms))
    }
}

#[derive(Clone, Copy, Debug, serde::Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub enabled: bool,
    pub attempts: u32,
    pub timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            attempts: 3,
            timeout_secs: 10,
        }
    }
}

impl NodeConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config: {}", path.display()))?;
        let cfg: NodeConfig = serde_json::from_str(&text)
            .with_context(|| format!("parse config json: {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        let base = self.public_base_url.trim();
        if base.is_empty() {
            bail!("public_base_url is required");
        }
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            bail!("public_base_url must be an http(s) origin: {base}");
        }
        if self.db_file.trim().is_empty() {
            bail!("db_file must not be empty");
        }
        if self.max_thread_depth == 0 {
            bail!("max_thread_depth must be at least 1");
        }
        Ok(())
    }

    pub fn local_base(&self) -> &str {
        self.public_base_url.trim().trim_end_matches('/')
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        match self.data_dir.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(dir) => Ok(PathBuf::from(dir)),
            None => default_data_dir(),
        }
    }

    pub fn db_path(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join(&self.db_file))
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.db_busy_timeout_ms)
    }
}

pub fn default_data_dir() -> Result<PathBuf> {
    if let Ok(v) = std::env::var("VIDFED_DATA_DIR") {
        return Ok(PathBuf::from(v));
    }
    let proj = ProjectDirs::from("net", "vidfed", "Vidfed")
        .context("unable to determine platform data dir")?;
    Ok(proj.data_local_dir().to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_fills_defaults() {
        let cfg: NodeConfig = serde_json::from_str(
            r#"{ "base_url": "https://videos.example/", "retry": { "max_attempts": 3 } }"#,
        )
        .unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.local_base(), "https://videos.example");
        assert_eq!(cfg.retry.attempts(), 3);
        assert_eq!(cfg.retry.base_backoff_ms, 100);
        assert_eq!(cfg.max_thread_depth, 100);
        assert!(cfg.fetch.enabled);
    }

    #[test]
    fn retry_attempts_are_clamped() {
        let policy = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.attempts(), 1);
        let policy = RetryPolicy {
            max_attempts: 99,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.attempts(), 10);
    }

    #[test]
    fn rejects_missing_origin() {
        let cfg = NodeConfig::default();
        assert!(cfg.validate().is_err());
        let cfg = NodeConfig {
            public_base_url: "videos.example".to_string(),
            ..NodeConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
