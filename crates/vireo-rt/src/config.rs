// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Build switches and runtime knobs.
//!
//! Build switches are cargo features compiled down to constants, so a
//! disabled check costs nothing:
//!
//! | Feature       | Effect                                                   |
//! |---------------|----------------------------------------------------------|
//! | `unchecked`   | strip bounds and nil diagnostics                         |
//! | `production`  | strip source locations, compile out protocol checks      |
//! | `no-refcount` | every managed pointer is a borrowed view                 |
//! | `atomic-rc`   | atomically consistent reference counting                 |
//!
//! Runtime knobs use the `VIREO_` prefix:
//!
//! | Variable            | Description                 | Default      |
//! |---------------------|-----------------------------|--------------|
//! | `VIREO_WORKERS`     | worker threads in a pool    | CPU count    |
//! | `VIREO_THREAD_NAME` | worker thread name prefix   | vireo-worker |

use std::env;

use thiserror::Error;

/// Bounds and nil checks.
pub const SAFETY_CHECKS: bool = !cfg!(feature = "unchecked");

/// Source-location tags on fatal messages.
pub const SOURCE_LOCATIONS: bool = !cfg!(feature = "production");

/// Double retire, double await and park-slot checks.
pub const PROTOCOL_CHECKS: bool = cfg!(debug_assertions) && !cfg!(feature = "production");

/// Managed pointers own their payloads.
pub const REFCOUNTING: bool = !cfg!(feature = "no-refcount");

/// Counter increments and decrements go through atomics.
pub const ATOMIC_REFCOUNT: bool = cfg!(feature = "atomic-rc");

/// Snapshot of the switches this crate was built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct BuildConfig {
    pub safety_checks: bool,
    pub source_locations: bool,
    pub protocol_checks: bool,
    pub refcounting: bool,
    pub atomic_refcount: bool,
}

impl BuildConfig {
    pub const fn current() -> Self {
        Self {
            safety_checks: SAFETY_CHECKS,
            source_locations: SOURCE_LOCATIONS,
            protocol_checks: PROTOCOL_CHECKS,
            refcounting: REFCOUNTING,
            atomic_refcount: ATOMIC_REFCOUNT,
        }
    }
}

/// Error reading runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value `{value}` for {var}: {reason}")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Runtime knobs for a worker pool.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct RuntimeConfig {
    /// Number of worker threads, each with its own driver loop.
    pub workers: usize,
    /// Thread name prefix; workers are named `<prefix>-<id>`.
    pub thread_name: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            thread_name: "vireo-worker".to_string(),
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(4)
}

impl RuntimeConfig {
    pub fn builder() -> RuntimeConfigBuilder {
        RuntimeConfigBuilder {
            config: Self::default(),
        }
    }

    /// Load from `VIREO_*` environment variables, defaults for the rest.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup("VIREO_WORKERS") {
            let n = raw
                .trim()
                .parse::<usize>()
                .map_err(|e| ConfigError::InvalidValue {
                    var: "VIREO_WORKERS",
                    value: raw.clone(),
                    reason: e.to_string(),
                })?;
            // 0 means one worker per core.
            if n != 0 {
                config.workers = n;
            }
        }

        if let Some(name) = lookup("VIREO_THREAD_NAME") {
            if name.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    var: "VIREO_THREAD_NAME",
                    value: name,
                    reason: "must not be empty".to_string(),
                });
            }
            config.thread_name = name;
        }

        Ok(config)
    }
}

/// Builder for [`RuntimeConfig`].
#[derive(Debug, Clone)]
pub struct RuntimeConfigBuilder {
    config: RuntimeConfig,
}

impl RuntimeConfigBuilder {
    /// Worker thread count. 0 means one per core.
    pub fn workers(mut self, n: usize) -> Self {
        self.config.workers = if n == 0 { default_workers() } else { n };
        self
    }

    pub fn thread_name(mut self, prefix: impl Into<String>) -> Self {
        self.config.thread_name = prefix.into();
        self
    }

    pub fn build(self) -> RuntimeConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_env() {
        let config = RuntimeConfig::from_lookup(lookup(&[])).unwrap();
        assert!(config.workers >= 1);
        assert_eq!(config.thread_name, "vireo-worker");
    }

    #[test]
    fn workers_from_env() {
        let config = RuntimeConfig::from_lookup(lookup(&[("VIREO_WORKERS", " 3 ")])).unwrap();
        assert_eq!(config.workers, 3);
    }

    #[test]
    fn zero_workers_means_auto() {
        let config = RuntimeConfig::from_lookup(lookup(&[("VIREO_WORKERS", "0")])).unwrap();
        assert_eq!(config.workers, default_workers());
    }

    #[test]
    fn bad_worker_count_is_rejected() {
        let err = RuntimeConfig::from_lookup(lookup(&[("VIREO_WORKERS", "many")])).unwrap_err();
        match err {
            ConfigError::InvalidValue { var, value, .. } => {
                assert_eq!(var, "VIREO_WORKERS");
                assert_eq!(value, "many");
            }
        }
    }

    #[test]
    fn empty_thread_name_is_rejected() {
        assert!(RuntimeConfig::from_lookup(lookup(&[("VIREO_THREAD_NAME", "  ")])).is_err());
    }

    #[test]
    fn builder_overrides() {
        let config = RuntimeConfig::builder().workers(2).thread_name("io").build();
        assert_eq!(config.workers, 2);
        assert_eq!(config.thread_name, "io");
    }

    #[test]
    fn build_config_reflects_features() {
        let build = BuildConfig::current();
        assert_eq!(build.safety_checks, !cfg!(feature = "unchecked"));
        assert_eq!(build.refcounting, !cfg!(feature = "no-refcount"));
        assert_eq!(build.atomic_refcount, cfg!(feature = "atomic-rc"));
    }
}
