//! Dynamic configuration polling.
//!
//! When `dynamicConfig` is on, a background task fetches
//! `dynamicConfigUrl` every `configPollIntervalSeconds`, hashes the raw
//! document and, on digest change, parses, validates and applies it through
//! [`Gateway::apply`]. A document that fails to parse or validate leaves the
//! running configuration untouched; identical content is a no-op.

use crate::config::settings::parse_settings;
use crate::config::validation::ConfigValidator;
use crate::gateway::Gateway;
use log::{error, info, warn};
use std::collections::hash_map::DefaultHasher;
use std::hash::Hasher;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Remote config poller.
pub struct ConfigPoller {
    gateway: Arc<Gateway>,
    url: String,
    interval: Duration,
    client: reqwest::Client,
}

impl ConfigPoller {
    /// Builds a poller from the gateway's current settings, or `None` when
    /// dynamic config is off.
    pub fn from_gateway(gateway: Arc<Gateway>) -> Option<ConfigPoller> {
        let settings = gateway.settings();
        if !settings.dynamic_config {
            return None;
        }
        let url = settings.dynamic_config_url.clone()?;
        Some(ConfigPoller {
            gateway,
            url,
            interval: Duration::from_secs(settings.config_poll_interval_seconds.max(1)),
            client: reqwest::Client::new(),
        })
    }

    /// Spawns the poll loop.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "dynamic config polling {} every {}s",
                self.url,
                self.interval.as_secs()
            );
            let mut last_digest: Option<u64> = None;
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match self.poll_once(last_digest).await {
                    Ok(Some(digest)) => last_digest = Some(digest),
                    Ok(None) => {}
                    Err(e) => warn!("dynamic config poll failed: {}", e),
                }
            }
        })
    }

    /// One poll cycle. Returns the new digest when the document changed.
    async fn poll_once(&self, last_digest: Option<u64>) -> Result<Option<u64>, String> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("config source returned {}", response.status()));
        }
        let raw = response.text().await.map_err(|e| e.to_string())?;

        let digest = digest_of(&raw);
        if last_digest == Some(digest) {
            return Ok(None);
        }

        let settings = match parse_settings(&raw) {
            Ok(settings) => settings,
            Err(e) => {
                error!("dynamic config rejected (parse): {}", e);
                // Remember the digest so a broken document is not re-parsed
                // every cycle.
                return Ok(Some(digest));
            }
        };

        let result = ConfigValidator::validate_comprehensive(&settings);
        if !result.is_valid() {
            for e in &result.errors {
                error!("dynamic config rejected: {}", e);
            }
            return Ok(Some(digest));
        }
        ConfigValidator::report(&result);

        match self.gateway.apply(settings) {
            Ok(true) => info!("dynamic config applied"),
            Ok(false) => info!("dynamic config unchanged, no-op"),
            Err(e) => error!("dynamic config apply failed, keeping previous: {}", e),
        }
        Ok(Some(digest))
    }
}

fn digest_of(raw: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    hasher.write(raw.as_bytes());
    hasher.finish()
}
