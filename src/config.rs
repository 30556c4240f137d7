//! The run configuration surface (§6): what to replay against, and how
//! often the analyzers should emit. Deserializable from JSON so a run can
//! be described by a config file; a fluent [`RunConfigBuilder`] assembles
//! the same shape from CLI flags.

use crate::driver::InstanceSpec;
use crate::error::{Result, SimError};
use crate::policies::{PolicyKind, PolicySpec};
use serde::{Deserialize, Serialize};

fn default_maxage() -> u64 {
    300
}

fn default_chunk_size() -> usize {
    1000
}

fn default_freq_records() -> u64 {
    1000
}

fn default_freq_seconds() -> f64 {
    3600.0
}

fn default_true() -> bool {
    true
}

fn default_output_dir() -> String {
    "results".to_string()
}

/// One `--policy KIND:CAPACITY` line, or one entry of a config file's
/// `policies` array.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    pub kind: String,
    pub capacity: u64,
    #[serde(default)]
    pub protected: bool,
}

/// The full configuration surface for one replay run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub policies: Vec<PolicyConfig>,
    #[serde(default = "default_maxage")]
    pub default_maxage: u64,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_freq_records")]
    pub freq_records: u64,
    #[serde(default = "default_freq_seconds")]
    pub freq_seconds: f64,
    #[serde(default)]
    pub group_interval: f64,
    #[serde(default = "default_true")]
    pub emit_final: bool,
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    #[serde(default)]
    pub rng_seed: u64,
}

impl RunConfig {
    /// Parses a config file's contents (JSON).
    pub fn from_json(contents: &str) -> Result<Self> {
        let config: RunConfig = serde_json::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.policies.is_empty() {
            return Err(SimError::Config("at least one policy instance must be configured".into()));
        }
        for policy in &self.policies {
            if policy.capacity == 0 {
                return Err(SimError::Config(format!(
                    "policy '{}' has a non-positive capacity",
                    policy.kind
                )));
            }
            policy
                .kind
                .parse::<PolicyKind>()
                .map_err(SimError::Config)?;
        }
        if self.chunk_size == 0 {
            return Err(SimError::Config("chunk_size must be positive".into()));
        }
        Ok(())
    }

    /// Resolves the configured policies into [`InstanceSpec`]s for the
    /// replay driver.
    pub fn instances(&self) -> Result<Vec<InstanceSpec>> {
        self.validate()?;
        self.policies
            .iter()
            .enumerate()
            .map(|(idx, p)| {
                let kind = p.kind.parse::<PolicyKind>().map_err(SimError::Config)?;
                Ok(InstanceSpec {
                    capacity: p.capacity,
                    policy: PolicySpec {
                        kind,
                        protected: p.protected,
                        rng_seed: self.rng_seed.wrapping_add(idx as u64),
                    },
                })
            })
            .collect()
    }
}

/// Fluent assembly of a [`RunConfig`], mirroring this crate's other builder
/// surfaces. Mainly exercised by the `replay` binary when translating CLI
/// flags.
#[derive(Debug, Default)]
pub struct RunConfigBuilder {
    policies: Vec<PolicyConfig>,
    default_maxage: Option<u64>,
    chunk_size: Option<usize>,
    freq_records: Option<u64>,
    freq_seconds: Option<f64>,
    group_interval: Option<f64>,
    emit_final: Option<bool>,
    output_dir: Option<String>,
    rng_seed: Option<u64>,
}

impl RunConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn policy(mut self, kind: impl Into<String>, capacity: u64, protected: bool) -> Self {
        self.policies.push(PolicyConfig {
            kind: kind.into(),
            capacity,
            protected,
        });
        self
    }

    pub fn default_maxage(mut self, seconds: u64) -> Self {
        self.default_maxage = Some(seconds);
        self
    }

    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = Some(size);
        self
    }

    pub fn freq_records(mut self, count: u64) -> Self {
        self.freq_records = Some(count);
        self
    }

    pub fn freq_seconds(mut self, seconds: f64) -> Self {
        self.freq_seconds = Some(seconds);
        self
    }

    pub fn group_interval(mut self, seconds: f64) -> Self {
        self.group_interval = Some(seconds);
        self
    }

    pub fn emit_final(mut self, emit: bool) -> Self {
        self.emit_final = Some(emit);
        self
    }

    pub fn output_dir(mut self, dir: impl Into<String>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    pub fn build(self) -> Result<RunConfig> {
        let config = RunConfig {
            policies: self.policies,
            default_maxage: self.default_maxage.unwrap_or_else(default_maxage),
            chunk_size: self.chunk_size.unwrap_or_else(default_chunk_size),
            freq_records: self.freq_records.unwrap_or_else(default_freq_records),
            freq_seconds: self.freq_seconds.unwrap_or_else(default_freq_seconds),
            group_interval: self.group_interval.unwrap_or(0.0),
            emit_final: self.emit_final.unwrap_or(true),
            output_dir: self.output_dir.unwrap_or_else(default_output_dir),
            rng_seed: self.rng_seed.unwrap_or(0),
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_rejects_an_empty_policy_list() {
        let result = RunConfigBuilder::new().build();
        assert!(result.is_err());
    }

    #[test]
    fn builder_produces_distinct_rng_seeds_per_instance() {
        let config = RunConfigBuilder::new()
            .policy("ran", 100, false)
            .policy("ran", 200, false)
            .rng_seed(42)
            .build()
            .unwrap();
        let instances = config.instances().unwrap();
        assert_ne!(instances[0].policy.rng_seed, instances[1].policy.rng_seed);
    }

    #[test]
    fn from_json_applies_defaults() {
        let json = r#"{"policies":[{"kind":"lru","capacity":1000}]}"#;
        let config = RunConfig::from_json(json).unwrap();
        assert_eq!(config.default_maxage, 300);
        assert_eq!(config.chunk_size, 1000);
    }

    #[test]
    fn unknown_policy_kind_fails_validation() {
        let json = r#"{"policies":[{"kind":"bogus","capacity":1000}]}"#;
        assert!(RunConfig::from_json(json).is_err());
    }
}
