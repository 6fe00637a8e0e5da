//! Whether this instance may run the sync job right now.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

/// Remote membership status as reported by service discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiscoveryStatus {
    Up,
    Down,
    Starting,
    OutOfService,
    #[default]
    Unknown,
}

impl DiscoveryStatus {
    fn to_u8(self) -> u8 {
        match self {
            DiscoveryStatus::Up => 0,
            DiscoveryStatus::Down => 1,
            DiscoveryStatus::Starting => 2,
            DiscoveryStatus::OutOfService => 3,
            DiscoveryStatus::Unknown => 4,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => DiscoveryStatus::Up,
            1 => DiscoveryStatus::Down,
            2 => DiscoveryStatus::Starting,
            3 => DiscoveryStatus::OutOfService,
            _ => DiscoveryStatus::Unknown,
        }
    }
}

/// The eligibility rule.
///
/// `discovery` is `None` when no discovery signal is configured. With a
/// signal, only `Up` counts. Local health is required either way.
pub fn is_eligible(discovery: Option<DiscoveryStatus>, healthy: bool) -> bool {
    healthy && discovery.map_or(true, |status| status == DiscoveryStatus::Up)
}

/// Shared local health flag.
///
/// Starts unhealthy until the first probe reports otherwise.
#[derive(Debug, Clone, Default)]
pub struct HealthIndicator {
    healthy: Arc<AtomicBool>,
}

impl HealthIndicator {
    pub fn new(healthy: bool) -> Self {
        Self {
            healthy: Arc::new(AtomicBool::new(healthy)),
        }
    }

    pub fn set(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}

/// Combines local health with the last known discovery status.
#[derive(Debug)]
pub struct EligibilityGate {
    discovery_enabled: bool,
    status: AtomicU8,
    health: HealthIndicator,
}

impl EligibilityGate {
    /// A gate driven only by local health.
    pub fn without_discovery(health: HealthIndicator) -> Self {
        Self {
            discovery_enabled: false,
            status: AtomicU8::new(DiscoveryStatus::Unknown.to_u8()),
            health,
        }
    }

    /// A gate that also requires discovery to report `Up`.
    pub fn with_discovery(health: HealthIndicator) -> Self {
        Self {
            discovery_enabled: true,
            ..Self::without_discovery(health)
        }
    }

    /// Record a membership status change.
    pub fn on_status_change(&self, status: DiscoveryStatus) {
        let previous = DiscoveryStatus::from_u8(self.status.swap(status.to_u8(), Ordering::SeqCst));
        if previous != status {
            tracing::info!(?previous, current = ?status, "discovery status changed");
        }
    }

    pub fn discovery_status(&self) -> Option<DiscoveryStatus> {
        self.discovery_enabled
            .then(|| DiscoveryStatus::from_u8(self.status.load(Ordering::SeqCst)))
    }

    pub fn health(&self) -> &HealthIndicator {
        &self.health
    }

    pub fn eligible(&self) -> bool {
        is_eligible(self.discovery_status(), self.health.is_healthy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_without_discovery() {
        assert!(is_eligible(None, true));
        assert!(!is_eligible(None, false));
    }

    #[test]
    fn test_rule_with_discovery() {
        assert!(is_eligible(Some(DiscoveryStatus::Up), true));
        for status in [
            DiscoveryStatus::Down,
            DiscoveryStatus::Starting,
            DiscoveryStatus::OutOfService,
            DiscoveryStatus::Unknown,
        ] {
            assert!(!is_eligible(Some(status), true), "{status:?}");
        }
        assert!(!is_eligible(Some(DiscoveryStatus::Up), false));
    }

    #[test]
    fn test_gate_tracks_status_and_health() {
        let health = HealthIndicator::default();
        let gate = EligibilityGate::with_discovery(health.clone());
        assert!(!gate.eligible());

        health.set(true);
        assert!(!gate.eligible());

        gate.on_status_change(DiscoveryStatus::Up);
        assert!(gate.eligible());

        gate.on_status_change(DiscoveryStatus::OutOfService);
        assert!(!gate.eligible());
        assert_eq!(gate.discovery_status(), Some(DiscoveryStatus::OutOfService));
    }

    #[test]
    fn test_gate_without_discovery_ignores_status() {
        let gate = EligibilityGate::without_discovery(HealthIndicator::new(true));
        gate.on_status_change(DiscoveryStatus::Down);
        assert!(gate.eligible());
        assert_eq!(gate.discovery_status(), None);
    }
}
