//! Rate limit rules configuration and matching.
//!
//! This module handles loading rate limit rules from configuration and
//! resolving them against request paths. Exact-match rules take priority
//! over prefix rules; among prefix rules the longest matching prefix wins,
//! with configuration order breaking ties. The candidate prefixes are
//! sorted once at table build time so resolution is deterministic.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::error::{RatewardenError, Result};

/// How a rule pattern is matched against a request path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchKind {
    /// The pattern must equal the full path.
    #[default]
    Exact,
    /// The pattern must be a prefix of the path.
    Prefix,
}

/// One named (limit, window) pair evaluated as part of a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tier {
    /// Tier name, reported back to the client on denial (e.g. "burst")
    pub name: String,
    /// Maximum events allowed inside the window
    pub limit: u64,
    /// Sliding window length in seconds
    pub window_secs: u64,
}

/// A compiled rule: a path pattern plus its tiers, pre-sorted from the
/// shortest window to the longest so the tightest check runs first.
#[derive(Debug, Clone)]
pub struct Rule {
    /// The pattern this rule was declared for
    pub pattern: String,
    /// Tiers in evaluation order (ascending window length)
    pub tiers: Vec<Tier>,
}

/// Configuration for a single rate limit rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Path pattern to match
    pub pattern: String,
    /// Match kind (exact by default)
    #[serde(default)]
    pub kind: MatchKind,
    /// Sustained limit: maximum requests per window
    pub limit: u64,
    /// Sustained window length in seconds
    pub window_secs: u64,
    /// Name of the sustained tier
    #[serde(default = "default_tier_name")]
    pub tier: String,
    /// Optional short-window burst tier evaluated before the sustained tier
    #[serde(default)]
    pub burst: Option<BurstConfig>,
}

/// A short-window burst tier attached to a rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BurstConfig {
    /// Maximum requests per burst window
    pub limit: u64,
    /// Burst window length in seconds
    pub window_secs: u64,
    /// Name of the burst tier
    #[serde(default = "default_burst_name")]
    pub tier: String,
}

fn default_tier_name() -> String {
    "sustained".to_string()
}

fn default_burst_name() -> String {
    "burst".to_string()
}

/// The rule applied when no configured pattern matches a path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultRuleConfig {
    #[serde(default = "default_rule_limit")]
    pub limit: u64,
    #[serde(default = "default_rule_window")]
    pub window_secs: u64,
    #[serde(default = "default_rule_tier")]
    pub tier: String,
}

impl Default for DefaultRuleConfig {
    fn default() -> Self {
        Self {
            limit: default_rule_limit(),
            window_secs: default_rule_window(),
            tier: default_rule_tier(),
        }
    }
}

fn default_rule_limit() -> u64 {
    1000
}

fn default_rule_window() -> u64 {
    60
}

fn default_rule_tier() -> String {
    "default".to_string()
}

/// Paths that bypass rate limiting entirely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExemptConfig {
    /// Exact paths
    #[serde(default = "default_exempt_paths")]
    pub paths: Vec<String>,
    /// Reserved path prefixes (health checks, docs, metrics, admin)
    #[serde(default = "default_exempt_prefixes")]
    pub prefixes: Vec<String>,
}

impl Default for ExemptConfig {
    fn default() -> Self {
        Self {
            paths: default_exempt_paths(),
            prefixes: default_exempt_prefixes(),
        }
    }
}

fn default_exempt_paths() -> Vec<String> {
    vec!["/health".to_string()]
}

fn default_exempt_prefixes() -> Vec<String> {
    vec![
        "/docs".to_string(),
        "/metrics".to_string(),
        "/admin".to_string(),
    ]
}

/// A complete rule table configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleTableConfig {
    /// Ordered rule declarations
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
    /// Fallback rule when nothing matches
    #[serde(default)]
    pub default_rule: DefaultRuleConfig,
    /// Exemption set
    #[serde(default)]
    pub exempt: ExemptConfig,
}

impl RuleTableConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit rules");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| RatewardenError::Config(format!("Failed to parse rules: {}", e)))
    }
}

/// A compiled, immutable rule table.
///
/// Built once at startup. Resolution is a pure function over the table.
pub struct RuleTable {
    exact: HashMap<String, Arc<Rule>>,
    /// Prefix rules sorted by descending pattern length; the sort is stable,
    /// so equally long prefixes keep their declaration order.
    prefixes: Vec<(String, Arc<Rule>)>,
    default_rule: Arc<Rule>,
    exempt_paths: HashSet<String>,
    exempt_prefixes: Vec<String>,
}

impl RuleTable {
    /// Compile a rule table from configuration.
    ///
    /// Rejects rules with a zero limit, zero window, or empty pattern.
    pub fn build(config: RuleTableConfig) -> Result<Self> {
        let mut exact = HashMap::new();
        let mut prefixes = Vec::new();

        for rule_config in &config.rules {
            let rule = Arc::new(compile_rule(rule_config)?);
            match rule_config.kind {
                MatchKind::Exact => {
                    exact.insert(rule_config.pattern.clone(), rule);
                }
                MatchKind::Prefix => {
                    prefixes.push((rule_config.pattern.clone(), rule));
                }
            }
        }

        prefixes.sort_by_key(|(pattern, _)| std::cmp::Reverse(pattern.len()));

        let default_config = &config.default_rule;
        validate_tier(&default_config.tier, default_config.limit, default_config.window_secs)?;
        let default_rule = Arc::new(Rule {
            pattern: String::new(),
            tiers: vec![Tier {
                name: default_config.tier.clone(),
                limit: default_config.limit,
                window_secs: default_config.window_secs,
            }],
        });

        info!(
            exact_rules = exact.len(),
            prefix_rules = prefixes.len(),
            exempt_paths = config.exempt.paths.len(),
            exempt_prefixes = config.exempt.prefixes.len(),
            "Rule table compiled"
        );

        Ok(Self {
            exact,
            prefixes,
            default_rule,
            exempt_paths: config.exempt.paths.iter().cloned().collect(),
            exempt_prefixes: config.exempt.prefixes.clone(),
        })
    }

    /// Build a table from YAML configuration.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Self::build(RuleTableConfig::from_yaml(yaml)?)
    }

    /// Resolve the rule governing a path.
    ///
    /// Exact match first, then the longest matching prefix, then the
    /// default rule. Always succeeds.
    pub fn resolve(&self, path: &str) -> Arc<Rule> {
        if let Some(rule) = self.exact.get(path) {
            return Arc::clone(rule);
        }

        for (pattern, rule) in &self.prefixes {
            if path.starts_with(pattern.as_str()) {
                return Arc::clone(rule);
            }
        }

        Arc::clone(&self.default_rule)
    }

    /// Whether a path bypasses rate limiting entirely.
    pub fn is_exempt(&self, path: &str) -> bool {
        if self.exempt_paths.contains(path) {
            return true;
        }
        self.exempt_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }

    /// All distinct tiers the table declares, including the default rule's.
    ///
    /// Used by the admin facade to enumerate a client's counters.
    pub fn known_tiers(&self) -> Vec<Tier> {
        let mut seen = HashSet::new();
        let mut tiers = Vec::new();

        let rules = self
            .exact
            .values()
            .chain(self.prefixes.iter().map(|(_, rule)| rule))
            .chain(std::iter::once(&self.default_rule));

        for rule in rules {
            for tier in &rule.tiers {
                if seen.insert(tier.name.clone()) {
                    tiers.push(tier.clone());
                }
            }
        }

        tiers
    }
}

fn compile_rule(config: &RuleConfig) -> Result<Rule> {
    if config.pattern.is_empty() {
        return Err(RatewardenError::Config(
            "rule pattern must not be empty".to_string(),
        ));
    }
    validate_tier(&config.tier, config.limit, config.window_secs)?;

    let mut tiers = vec![Tier {
        name: config.tier.clone(),
        limit: config.limit,
        window_secs: config.window_secs,
    }];

    if let Some(ref burst) = config.burst {
        validate_tier(&burst.tier, burst.limit, burst.window_secs)?;
        tiers.push(Tier {
            name: burst.tier.clone(),
            limit: burst.limit,
            window_secs: burst.window_secs,
        });
    }

    // Shortest window first: the tightest check runs (and denies) first.
    tiers.sort_by_key(|tier| tier.window_secs);

    Ok(Rule {
        pattern: config.pattern.clone(),
        tiers,
    })
}

fn validate_tier(name: &str, limit: u64, window_secs: u64) -> Result<()> {
    if limit == 0 {
        return Err(RatewardenError::Config(format!(
            "tier '{}' has a zero limit",
            name
        )));
    }
    if window_secs == 0 {
        return Err(RatewardenError::Config(format!(
            "tier '{}' has a zero window",
            name
        )));
    }
    Ok(())
}
