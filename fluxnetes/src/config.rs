//! Daemon configuration. File-based settings following the same
//! `serde_yaml` + `load_config` shape as `protocol::config` elsewhere in this
//! codebase; `DATABASE_URL` and the matcher endpoint can still be overridden
//! by environment variables at startup.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct Config {
    /// `DATABASE_URL` repurposed as etcd endpoints.
    pub store_endpoints: Vec<String>,
    #[serde(default)]
    pub matcher: MatcherSettings,
    /// `-1` disables reservations, `0` is unlimited, `n > 0` caps retained
    /// future reservations.
    #[serde(default = "default_reservation_depth")]
    pub reservation_depth: i32,
}

#[derive(Debug, Deserialize)]
pub struct MatcherSettings {
    #[serde(default = "default_matcher_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_matcher_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for MatcherSettings {
    fn default() -> Self {
        Self {
            endpoint: default_matcher_endpoint(),
            timeout_secs: default_matcher_timeout_secs(),
        }
    }
}

impl MatcherSettings {
    pub fn to_matcher_config(&self) -> scheduler::MatcherConfig {
        scheduler::MatcherConfig {
            endpoint: self.endpoint.clone(),
            request_timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

fn default_matcher_endpoint() -> String {
    "http://127.0.0.1:4242".to_string()
}

fn default_matcher_timeout_secs() -> u64 {
    200
}

fn default_reservation_depth() -> i32 {
    0
}

pub fn load_config(path: &str) -> Result<Config> {
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read config from {path}"))?;
    let mut cfg: Config = serde_yaml::from_str(&content).context("failed to parse YAML config")?;

    if let Ok(url) = std::env::var("DATABASE_URL") {
        cfg.store_endpoints = url.split(',').map(str::to_string).collect();
    }
    if let Ok(endpoint) = std::env::var("FLUXNETES_MATCHER_ENDPOINT") {
        cfg.matcher.endpoint = endpoint;
    }

    Ok(cfg)
}
