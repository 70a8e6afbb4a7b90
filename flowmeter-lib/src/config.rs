//! Flow accounting configuration.
//!
//! Every knob has a default, so a TOML file only needs the values it
//! overrides:
//!
//! ```toml
//! max_lifetime_secs = 3600
//! max_inactive_secs = 60
//! directionality = "bidirectional"
//!
//! [stats]
//! strategy = "approximate"
//! quantiles = [0.1, 0.25, 0.5, 0.75, 0.9]
//! ```

use std::{fmt, fs, path::Path, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{error::ConfigError, timestamp::Interval};

pub const DEFAULT_MAX_LIFETIME_SECS: u32 = 3600;
pub const DEFAULT_MAX_INACTIVE_SECS: u32 = 60;
pub const DEFAULT_SEPARATOR: char = '\t';
pub const DEFAULT_QUANTILES: [f64; 5] = [0.10, 0.25, 0.50, 0.75, 0.90];

/// Whether the reverse direction of a 5-tuple belongs to the same flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Directionality {
    /// `A -> B` and `B -> A` are two distinct flows.
    Unidirectional,
    /// `A -> B` and `B -> A` fold into one session.
    #[default]
    Bidirectional,
}

impl fmt::Display for Directionality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Directionality::Unidirectional => write!(f, "unidirectional"),
            Directionality::Bidirectional => write!(f, "bidirectional"),
        }
    }
}

/// How the per-second rate series of a flow is summarised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StatsStrategy {
    /// Only counters; no per-second series is kept.
    Disabled,
    /// One slot per elapsed second, exact order statistics.
    #[default]
    Exact,
    /// Running moments plus an extended P² sketch, memory independent of duration.
    Approximate,
}

impl fmt::Display for StatsStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatsStrategy::Disabled => write!(f, "none"),
            StatsStrategy::Exact => write!(f, "exact"),
            StatsStrategy::Approximate => write!(f, "approximate"),
        }
    }
}

impl FromStr for StatsStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" | "disabled" => Ok(StatsStrategy::Disabled),
            "exact" => Ok(StatsStrategy::Exact),
            "approximate" | "p2" => Ok(StatsStrategy::Approximate),
            other => Err(ConfigError::Invalid(format!(
                "unknown statistics strategy '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    pub strategy: StatsStrategy,

    /// Probabilities reported as quantile columns, in output order.
    pub quantiles: Vec<f64>,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            strategy: StatsStrategy::default(),
            quantiles: DEFAULT_QUANTILES.to_vec(),
        }
    }
}

impl StatsConfig {
    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.strategy != StatsStrategy::Disabled
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Absolute cap on a flow's duration since its first packet (seconds).
    pub max_lifetime_secs: u32,

    /// Cap on idle time since a flow's last packet (seconds).
    pub max_inactive_secs: u32,

    /// Field separator for exported lines.
    pub separator: char,

    /// Add per-flow `pkts_per_sec` and `bytes_per_sec` columns.
    pub rates: bool,

    pub directionality: Directionality,

    pub stats: StatsConfig,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            max_lifetime_secs: DEFAULT_MAX_LIFETIME_SECS,
            max_inactive_secs: DEFAULT_MAX_INACTIVE_SECS,
            separator: DEFAULT_SEPARATOR,
            rates: false,
            directionality: Directionality::default(),
            stats: StatsConfig::default(),
        }
    }
}

impl FlowConfig {
    /// Load and validate a TOML configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: FlowConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_lifetime_secs == 0 {
            return Err(ConfigError::Invalid(
                "max_lifetime_secs must be at least 1".into(),
            ));
        }
        if self.max_inactive_secs == 0 {
            return Err(ConfigError::Invalid(
                "max_inactive_secs must be at least 1".into(),
            ));
        }
        if matches!(self.separator, '\n' | '\r') {
            return Err(ConfigError::Invalid(
                "separator cannot be a line terminator".into(),
            ));
        }
        if self.stats.is_enabled() && self.stats.quantiles.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one quantile probability is required".into(),
            ));
        }
        if let Some(p) = self
            .stats
            .quantiles
            .iter()
            .find(|p| !(**p > 0.0 && **p < 1.0))
        {
            return Err(ConfigError::Invalid(format!(
                "quantile probability {p} is outside (0, 1)"
            )));
        }
        Ok(())
    }

    #[inline]
    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            max_lifetime: Interval::from_secs(self.max_lifetime_secs),
            max_inactive: Interval::from_secs(self.max_inactive_secs),
        }
    }
}

/// Expiry thresholds, pre-converted for comparison against timestamp differences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub max_lifetime: Interval,
    pub max_inactive: Interval,
}

impl Default for Timeouts {
    fn default() -> Self {
        FlowConfig::default().timeouts()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = FlowConfig::default();
        assert_eq!(config.max_lifetime_secs, 3600);
        assert_eq!(config.max_inactive_secs, 60);
        assert_eq!(config.separator, '\t');
        assert!(!config.rates);
        assert_eq!(config.directionality, Directionality::Bidirectional);
        assert_eq!(config.stats.strategy, StatsStrategy::Exact);
        assert_eq!(config.stats.quantiles, DEFAULT_QUANTILES.to_vec());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = FlowConfig::from_toml_str(
            r#"
            max_inactive_secs = 30
            directionality = "unidirectional"

            [stats]
            strategy = "approximate"
            "#,
        )
        .unwrap();

        assert_eq!(config.max_lifetime_secs, 3600);
        assert_eq!(config.max_inactive_secs, 30);
        assert_eq!(config.directionality, Directionality::Unidirectional);
        assert_eq!(config.stats.strategy, StatsStrategy::Approximate);
        assert_eq!(config.stats.quantiles.len(), 5);
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(matches!(
            FlowConfig::from_toml_str("max_lifetime_secs = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            FlowConfig::from_toml_str("[stats]\nquantiles = [0.5, 1.5]"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            FlowConfig::from_toml_str("[stats]\nquantiles = []"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            FlowConfig::from_toml_str("max_lifetime_secs = \"forever\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_quantiles_may_be_empty_without_stats() {
        let config = FlowConfig::from_toml_str("[stats]\nstrategy = \"disabled\"\nquantiles = []");
        assert!(config.is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_lifetime_secs = 120\nseparator = \",\"").unwrap();

        let config = FlowConfig::load(file.path()).unwrap();
        assert_eq!(config.max_lifetime_secs, 120);
        assert_eq!(config.separator, ',');

        let missing = FlowConfig::load(file.path().with_extension("missing"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!("exact".parse::<StatsStrategy>().unwrap(), StatsStrategy::Exact);
        assert_eq!("p2".parse::<StatsStrategy>().unwrap(), StatsStrategy::Approximate);
        assert_eq!("none".parse::<StatsStrategy>().unwrap(), StatsStrategy::Disabled);
        assert!("fast".parse::<StatsStrategy>().is_err());
    }

    #[test]
    fn test_timeouts() {
        let timeouts = FlowConfig::default().timeouts();
        assert_eq!(timeouts.max_lifetime, Interval::from_secs(3600));
        assert_eq!(timeouts.max_inactive, Interval::from_secs(60));
    }
}
