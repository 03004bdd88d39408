//! Upload capacity checks
//!
//! The lifecycle manager asks a [`CapacityCheck`] before it writes anything.
//! The default policy enforces a per-upload cap and an optional total cap.

use vault_core::config::StorageConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapacityDecision {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl CapacityDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

pub trait CapacityCheck: Send + Sync {
    /// `used_bytes` is the total stored across all users (active and trashed),
    /// so `max_total_bytes` caps the whole vault.
    fn check(&self, used_bytes: u64, incoming_bytes: u64) -> CapacityDecision;
}

/// Fixed limits from configuration. A zero total means unlimited.
#[derive(Debug, Clone, Copy)]
pub struct QuotaPolicy {
    pub max_upload_bytes: u64,
    pub max_total_bytes: u64,
}

impl QuotaPolicy {
    pub fn from_config(cfg: &StorageConfig) -> Self {
        Self {
            max_upload_bytes: cfg.max_upload_bytes,
            max_total_bytes: cfg.max_total_bytes,
        }
    }
}

impl CapacityCheck for QuotaPolicy {
    fn check(&self, used_bytes: u64, incoming_bytes: u64) -> CapacityDecision {
        if incoming_bytes > self.max_upload_bytes {
            return CapacityDecision::deny(format!(
                "file is {incoming_bytes} bytes, limit is {}",
                self.max_upload_bytes
            ));
        }
        if self.max_total_bytes > 0
            && used_bytes.saturating_add(incoming_bytes) > self.max_total_bytes
        {
            return CapacityDecision::deny(format!(
                "storage quota exceeded: {used_bytes} used + {incoming_bytes} incoming > {}",
                self.max_total_bytes
            ));
        }
        CapacityDecision::allow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_cap_is_inclusive() {
        let q = QuotaPolicy {
            max_upload_bytes: 100,
            max_total_bytes: 0,
        };
        assert!(q.check(0, 100).allowed);
        let d = q.check(0, 101);
        assert!(!d.allowed);
        assert!(d.reason.unwrap().contains("limit"));
    }

    #[test]
    fn zero_total_is_unlimited() {
        let q = QuotaPolicy {
            max_upload_bytes: u64::MAX,
            max_total_bytes: 0,
        };
        assert!(q.check(u64::MAX - 1, 10).allowed);
    }

    #[test]
    fn total_cap_counts_existing_usage() {
        let q = QuotaPolicy {
            max_upload_bytes: 1000,
            max_total_bytes: 1000,
        };
        assert!(q.check(900, 100).allowed);
        assert!(!q.check(901, 100).allowed);
    }
}
