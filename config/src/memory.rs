//! Memory profiling
//!
//! Derives per-service memory budgets from the total memory of the host. The
//! host is placed on a fixed ladder of tiers, each with baseline budgets, and
//! a handful of database buffers are derived from the database budget with
//! floor/clamp formulas. Explicit overrides always win.
//!
//! [`MemoryProfile::compute`] is a pure function. Host detection lives in
//! [`detect_total_memory_mb`] and never fails: an unreadable host is reported
//! as `None`, which selects the smallest tier.

use crate::{ConfigError, MemoryConfig, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// Services that receive a memory budget, in ladder column order.
pub const BUDGETED_SERVICES: [&str; 5] = ["database", "search", "broker", "worker", "app"];

/// Keys derived from the database budget.
pub const DERIVED_KEYS: [&str; 4] = [
    "database.maintenance_work_mem",
    "database.wal_buffers",
    "database.work_mem",
    "database.effective_cache_size",
];

/// One rung of the tier ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tier {
    /// Tier label
    pub name: &'static str,
    /// Inclusive lower bound in MB
    pub min_mb: u64,
    /// Exclusive upper bound in MB; `None` for the top tier
    pub max_mb: Option<u64>,
    /// Baseline budgets in MB, indexed like [`BUDGETED_SERVICES`]
    pub budgets: [u64; 5],
}

/// The fixed tier ladder, smallest first.
pub const TIERS: [Tier; 5] = [
    Tier {
        name: "minimal",
        min_mb: 0,
        max_mb: Some(8_192),
        budgets: [1_024, 1_024, 256, 512, 1_024],
    },
    Tier {
        name: "small",
        min_mb: 8_192,
        max_mb: Some(16_384),
        budgets: [2_048, 1_536, 512, 1_024, 2_048],
    },
    Tier {
        name: "medium",
        min_mb: 16_384,
        max_mb: Some(32_768),
        budgets: [4_096, 2_048, 1_024, 2_048, 4_096],
    },
    Tier {
        name: "large",
        min_mb: 32_768,
        max_mb: Some(65_536),
        budgets: [8_192, 4_096, 2_048, 4_096, 8_192],
    },
    Tier {
        name: "xlarge",
        min_mb: 65_536,
        max_mb: None,
        budgets: [16_384, 8_192, 4_096, 8_192, 16_384],
    },
];

impl Tier {
    /// Select the tier for a total memory size.
    pub fn for_total(total_mb: u64) -> &'static Tier {
        TIERS
            .iter()
            .rev()
            .find(|tier| total_mb >= tier.min_mb)
            .unwrap_or(&TIERS[0])
    }

    /// Baseline budget of a service in this tier.
    pub fn budget(&self, service: &str) -> Option<u64> {
        BUDGETED_SERVICES
            .iter()
            .position(|s| *s == service)
            .map(|i| self.budgets[i])
    }
}

/// Concrete memory budgets for one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryProfile {
    /// Selected tier label
    pub tier: String,
    /// Inclusive lower bound of the tier in MB
    pub tier_min_mb: u64,
    /// Exclusive upper bound of the tier in MB
    pub tier_max_mb: Option<u64>,
    /// Total memory the profile was computed for, if known
    pub total_mb: Option<u64>,
    /// Budgets in MB keyed by service or derived key
    pub budgets: BTreeMap<String, u64>,
    /// Keys whose value came from an explicit override
    pub overridden: Vec<String>,
    /// Whether `total_mb` was read from the host rather than configured
    pub detected: bool,
}

impl MemoryProfile {
    /// Compute budgets for a host.
    ///
    /// `total_mb` of `None` (unknown host memory) selects the smallest tier.
    /// Overrides are validated: an unknown key or a zero value is rejected.
    pub fn compute(total_mb: Option<u64>, overrides: &BTreeMap<String, u64>) -> Result<Self> {
        validate_overrides(overrides)?;

        let tier = match total_mb {
            Some(total) => Tier::for_total(total),
            None => &TIERS[0],
        };

        let mut budgets = BTreeMap::new();
        for service in BUDGETED_SERVICES {
            let value = overrides
                .get(service)
                .copied()
                .or_else(|| tier.budget(service))
                .unwrap_or(0);
            budgets.insert(service.to_string(), value);
        }

        let primary = budgets["database"];
        for (key, value) in derived_database_values(primary) {
            let value = overrides.get(key).copied().unwrap_or(value);
            budgets.insert(key.to_string(), value);
        }

        Ok(Self {
            tier: tier.name.to_string(),
            tier_min_mb: tier.min_mb,
            tier_max_mb: tier.max_mb,
            total_mb,
            budgets,
            overridden: overrides.keys().cloned().collect(),
            detected: false,
        })
    }

    /// Compute the profile for a configuration, detecting host memory when
    /// the configuration does not pin it.
    pub fn from_config(config: &MemoryConfig) -> Result<Self> {
        let (total, detected) = match config.total_mb {
            Some(total) => (Some(total), false),
            None => {
                let total = detect_total_memory_mb();
                (total, total.is_some())
            }
        };
        if total.is_none() {
            warn!("Host memory could not be determined, using the smallest tier");
        }
        let mut profile = Self::compute(total, &config.overrides)?;
        profile.detected = detected;
        Ok(profile)
    }

    /// Budget in MB for a service or derived key.
    pub fn get(&self, key: &str) -> Option<u64> {
        self.budgets.get(key).copied()
    }

    /// Whether a key's value came from an override.
    pub fn is_overridden(&self, key: &str) -> bool {
        self.overridden.iter().any(|k| k == key)
    }
}

/// Derived database buffers, floor division then clamp.
fn derived_database_values(primary_mb: u64) -> [(&'static str, u64); 4] {
    [
        (DERIVED_KEYS[0], (primary_mb / 8).clamp(64, 2_048)),
        (DERIVED_KEYS[1], (primary_mb / 32).clamp(16, 64)),
        (DERIVED_KEYS[2], (primary_mb / 64).clamp(4, 256)),
        (DERIVED_KEYS[3], (primary_mb * 3).clamp(512, 49_152)),
    ]
}

fn validate_overrides(overrides: &BTreeMap<String, u64>) -> Result<()> {
    for (key, value) in overrides {
        let known = BUDGETED_SERVICES.contains(&key.as_str()) || DERIVED_KEYS.contains(&key.as_str());
        if !known {
            return Err(ConfigError::InvalidMemoryOverride {
                key: key.clone(),
                reason: "unknown service".to_string(),
            });
        }
        if *value == 0 {
            return Err(ConfigError::InvalidMemoryOverride {
                key: key.clone(),
                reason: "must be greater than zero".to_string(),
            });
        }
    }
    Ok(())
}

/// Total host memory in MB, or `None` when it cannot be read.
pub fn detect_total_memory_mb() -> Option<u64> {
    let mut sys = sysinfo::System::new();
    sys.refresh_memory();
    match sys.total_memory() / (1024 * 1024) {
        0 => None,
        mb => Some(mb),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn no_overrides() -> BTreeMap<String, u64> {
        BTreeMap::new()
    }

    #[test]
    fn test_tier_boundaries() {
        assert_eq!(Tier::for_total(0).name, "minimal");
        assert_eq!(Tier::for_total(8_191).name, "minimal");
        assert_eq!(Tier::for_total(8_192).name, "small");
        assert_eq!(Tier::for_total(16_383).name, "small");
        assert_eq!(Tier::for_total(16_384).name, "medium");
        assert_eq!(Tier::for_total(32_768).name, "large");
        assert_eq!(Tier::for_total(65_535).name, "large");
        assert_eq!(Tier::for_total(65_536).name, "xlarge");
        assert_eq!(Tier::for_total(u64::MAX).name, "xlarge");
    }

    #[test]
    fn test_medium_host() {
        let profile = MemoryProfile::compute(Some(24_000), &no_overrides()).unwrap();
        assert_eq!(profile.tier, "medium");

        let database = profile.get("database").unwrap();
        assert!((4_096..=6_144).contains(&database));
        assert_eq!(profile.get("search"), Some(2_048));
    }

    #[test]
    fn test_override_wins() {
        let mut overrides = BTreeMap::new();
        overrides.insert("search".to_string(), 1_000);

        let profile = MemoryProfile::compute(Some(24_000), &overrides).unwrap();
        assert_eq!(profile.get("search"), Some(1_000));
        assert!(profile.is_overridden("search"));
        assert!(!profile.is_overridden("database"));
    }

    #[test]
    fn test_derived_values() {
        let profile = MemoryProfile::compute(Some(24_000), &no_overrides()).unwrap();
        assert_eq!(profile.get("database.maintenance_work_mem"), Some(512));
        assert_eq!(profile.get("database.wal_buffers"), Some(64));
        assert_eq!(profile.get("database.work_mem"), Some(64));
        assert_eq!(profile.get("database.effective_cache_size"), Some(12_288));
    }

    #[test]
    fn test_derived_values_clamped() {
        let profile = MemoryProfile::compute(Some(2_048), &no_overrides()).unwrap();
        // 1024 / 8 = 128, 1024 / 32 = 32, 1024 / 64 = 16
        assert_eq!(profile.get("database.maintenance_work_mem"), Some(128));
        assert_eq!(profile.get("database.wal_buffers"), Some(32));
        assert_eq!(profile.get("database.work_mem"), Some(16));
        assert_eq!(profile.get("database.effective_cache_size"), Some(3_072));

        let mut overrides = BTreeMap::new();
        overrides.insert("database".to_string(), 100);
        let profile = MemoryProfile::compute(Some(2_048), &overrides).unwrap();
        assert_eq!(profile.get("database.maintenance_work_mem"), Some(64));
        assert_eq!(profile.get("database.wal_buffers"), Some(16));
        assert_eq!(profile.get("database.work_mem"), Some(4));
        assert_eq!(profile.get("database.effective_cache_size"), Some(512));

        let profile = MemoryProfile::compute(Some(500_000), &no_overrides()).unwrap();
        assert_eq!(profile.get("database.maintenance_work_mem"), Some(2_048));
        assert_eq!(profile.get("database.effective_cache_size"), Some(49_152));
    }

    #[test]
    fn test_database_override_feeds_derived() {
        let mut overrides = BTreeMap::new();
        overrides.insert("database".to_string(), 8_192);
        overrides.insert("database.work_mem".to_string(), 32);

        let profile = MemoryProfile::compute(Some(4_000), &overrides).unwrap();
        assert_eq!(profile.tier, "minimal");
        assert_eq!(profile.get("database"), Some(8_192));
        assert_eq!(profile.get("database.maintenance_work_mem"), Some(1_024));
        assert_eq!(profile.get("database.work_mem"), Some(32));
    }

    #[test]
    fn test_unknown_memory_uses_smallest_tier() {
        let profile = MemoryProfile::compute(None, &no_overrides()).unwrap();
        assert_eq!(profile.tier, "minimal");
        assert_eq!(profile.total_mb, None);
        assert_eq!(profile.get("database"), Some(1_024));
    }

    #[test]
    fn test_configured_total_is_not_detected() {
        let config = MemoryConfig {
            total_mb: Some(40_000),
            overrides: BTreeMap::new(),
        };
        let profile = MemoryProfile::from_config(&config).unwrap();
        assert_eq!(profile.tier, "large");
        assert!(!profile.detected);
    }

    #[test]
    fn test_invalid_overrides() {
        let mut overrides = BTreeMap::new();
        overrides.insert("mailer".to_string(), 512);
        assert!(MemoryProfile::compute(Some(24_000), &overrides).is_err());

        let mut overrides = BTreeMap::new();
        overrides.insert("app".to_string(), 0);
        assert!(MemoryProfile::compute(Some(24_000), &overrides).is_err());
    }

    #[test]
    fn test_monotonic_across_tiers() {
        let keys: Vec<&str> = BUDGETED_SERVICES
            .iter()
            .chain(DERIVED_KEYS.iter())
            .copied()
            .collect();

        let mut previous: Option<MemoryProfile> = None;
        let mut total = 0u64;
        while total <= 140_000 {
            let profile = MemoryProfile::compute(Some(total), &no_overrides()).unwrap();
            if let Some(prev) = &previous {
                for key in &keys {
                    assert!(
                        profile.get(key) >= prev.get(key),
                        "{} decreased at {} MB",
                        key,
                        total
                    );
                }
            }
            previous = Some(profile);
            total += 512;
        }
    }

    #[test]
    fn test_override_holds_in_every_tier() {
        let mut overrides = BTreeMap::new();
        overrides.insert("broker".to_string(), 777);
        for tier in TIERS {
            let profile = MemoryProfile::compute(Some(tier.min_mb), &overrides).unwrap();
            assert_eq!(profile.tier, tier.name);
            assert_eq!(profile.get("broker"), Some(777));
        }
    }
}
