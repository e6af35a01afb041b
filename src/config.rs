use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct SynthConfig {
    #[serde(default)]
    pub solver: SolverConfig,
    #[serde(default)]
    pub kbounded: KBoundedConfig,
    #[serde(default)]
    pub overapproximation: OverapproximationConfig,
    #[serde(default)]
    pub synthesis: SynthesisConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SolverConfig {
    /// Only honoured when built with the `z3` feature.
    #[serde(default = "default_use_z3")]
    pub use_z3: bool,
    /// Z3 time limit per check; 0 disables it.
    #[serde(default)]
    pub timeout_ms: u32,
    /// Built-in search: first magnitude tried for variables without bounds.
    #[serde(default = "default_max_value")]
    pub max_value: i64,
    /// Built-in search: the magnitude is doubled up to this value before giving up.
    #[serde(default = "default_max_value_limit")]
    pub max_value_limit: i64,
    #[serde(default = "default_node_limit")]
    pub node_limit: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            use_z3: default_use_z3(),
            timeout_ms: 0,
            max_value: default_max_value(),
            max_value_limit: default_max_value_limit(),
            node_limit: default_node_limit(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct KBoundedConfig {
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,
}

impl Default for KBoundedConfig {
    fn default() -> Self {
        Self {
            max_candidates: default_max_candidates(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct OverapproximationConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
}

impl Default for OverapproximationConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct SynthesisConfig {
    /// Run the backend-driven tier of the minimizer even without `--minimize`.
    #[serde(default)]
    pub minimize_ilp: bool,
}

impl SynthConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: SynthConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        Ok(config)
    }
}

fn default_use_z3() -> bool {
    true
}

fn default_max_value() -> i64 {
    64
}

fn default_max_value_limit() -> i64 {
    1 << 20
}

fn default_node_limit() -> usize {
    200_000
}

fn default_max_candidates() -> usize {
    100_000
}

fn default_max_iterations() -> usize {
    256
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let config = SynthConfig::load_from_file("/nonexistent/pn-synth.toml").unwrap();
        assert_eq!(config, SynthConfig::default());
        assert!(config.solver.use_z3);
        assert_eq!(config.solver.max_value_limit, 1 << 20);
    }

    #[test]
    fn partial_tables_keep_defaults() {
        let config: SynthConfig = toml::from_str(
            r#"
            [solver]
            node_limit = 10
            use_z3 = false

            [synthesis]
            minimize_ilp = true
            "#,
        )
        .unwrap();
        assert_eq!(config.solver.node_limit, 10);
        assert_eq!(config.solver.max_value, 64);
        assert!(!config.solver.use_z3);
        assert!(config.synthesis.minimize_ilp);
        assert_eq!(config.overapproximation.max_iterations, 256);
    }
}
