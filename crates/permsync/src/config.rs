//! Service configuration.
//!
//! Durations are given in milliseconds in the JSON document
//! (`"period_ms": 600000`). Every section has defaults, so `{}` is a valid
//! document.

use std::time::Duration;

use permsync_cluster::LockOptions;
use permsync_core::PrincipalId;
use permsync_sync::{SyncConfig, UnresolvedPolicy};
use serde::{Deserialize, Deserializer};

use crate::error::{Result, ServiceError};

/// When the periodic sync fires.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    #[serde(rename = "initial_delay_ms", deserialize_with = "millis")]
    pub initial_delay: Duration,
    #[serde(rename = "period_ms", deserialize_with = "millis")]
    pub period: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(30),
            period: Duration::from_secs(600),
        }
    }
}

/// The fleet-wide sync lease.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LockConfig {
    pub name: String,
    #[serde(rename = "max_hold_ms", deserialize_with = "millis")]
    pub max_hold: Duration,
    #[serde(rename = "acquire_timeout_ms", deserialize_with = "millis")]
    pub acquire_timeout: Duration,
    #[serde(rename = "retry_interval_ms", deserialize_with = "millis")]
    pub retry_interval: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            name: "permission-sync".to_string(),
            max_hold: Duration::from_secs(900),
            acquire_timeout: Duration::from_secs(10),
            retry_interval: Duration::from_millis(250),
        }
    }
}

impl LockConfig {
    pub fn options(&self) -> LockOptions {
        LockOptions::new(self.name.clone(), self.max_hold, self.acquire_timeout)
            .with_retry_interval(self.retry_interval)
    }
}

/// Behavior of a single sync cycle.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncOptions {
    pub unrestricted_principal: String,
    #[serde(rename = "upstream_timeout_ms", deserialize_with = "millis")]
    pub upstream_timeout: Duration,
    #[serde(deserialize_with = "policy")]
    pub unresolved_policy: UnresolvedPolicy,
}

impl Default for SyncOptions {
    fn default() -> Self {
        let engine = SyncConfig::default();
        Self {
            unrestricted_principal: engine.unrestricted_principal.as_str().to_string(),
            upstream_timeout: engine.upstream_timeout,
            unresolved_policy: engine.unresolved_policy,
        }
    }
}

/// Full service configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    pub scheduler: SchedulerConfig,
    pub lock: LockConfig,
    pub sync: SyncOptions,
    /// Require discovery to report `Up` before syncing.
    pub discovery_enabled: bool,
    /// Lock holder identity. Generated when absent.
    pub instance_id: Option<String>,
}

impl ServiceConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: ServiceConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let durations = [
            ("scheduler.initial_delay_ms", self.scheduler.initial_delay),
            ("scheduler.period_ms", self.scheduler.period),
            ("lock.max_hold_ms", self.lock.max_hold),
            ("lock.acquire_timeout_ms", self.lock.acquire_timeout),
            ("lock.retry_interval_ms", self.lock.retry_interval),
            ("sync.upstream_timeout_ms", self.sync.upstream_timeout),
        ];
        for (key, value) in durations {
            if value.is_zero() {
                return Err(ServiceError::Config(format!("{key} must be positive")));
            }
        }
        if self.lock.name.trim().is_empty() {
            return Err(ServiceError::Config("lock.name must not be empty".into()));
        }
        if matches!(&self.instance_id, Some(id) if id.trim().is_empty()) {
            return Err(ServiceError::Config("instance_id must not be empty".into()));
        }
        PrincipalId::new(self.sync.unrestricted_principal.as_str())?;
        Ok(())
    }

    /// Engine configuration for this service.
    pub fn sync_config(&self) -> Result<SyncConfig> {
        Ok(SyncConfig {
            unrestricted_principal: PrincipalId::new(self.sync.unrestricted_principal.as_str())?,
            upstream_timeout: self.sync.upstream_timeout,
            unresolved_policy: self.sync.unresolved_policy,
        })
    }
}

fn millis<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_millis)
}

fn policy<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<UnresolvedPolicy, D::Error> {
    let name = String::deserialize(deserializer)?;
    match name.as_str() {
        "evict" => Ok(UnresolvedPolicy::Evict),
        "retain_previous" => Ok(UnresolvedPolicy::RetainPrevious),
        other => Err(serde::de::Error::unknown_variant(
            other,
            &["evict", "retain_previous"],
        )),
    }
}
