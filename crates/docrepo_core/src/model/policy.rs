//! Repository policy modes and their resolution.
//!
//! # Responsibility
//! - Define the isolation, soft-delete, consistency-fix and re-audit modes.
//! - Merge a per-call override with the repository default, field by field.
//!
//! # Invariants
//! - Resolution order is: context override, repository default, library default.
//! - Mode string values are stable; they are accepted by `FromStr` and serde.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::Duration;

/// Identity dimension that implicitly scopes queries and writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataIsolation {
    #[default]
    None,
    User,
    Tenant,
    App,
}

impl DataIsolation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::User => "user",
            Self::Tenant => "tenant",
            Self::App => "app",
        }
    }
}

/// Whether delete-audit capable entities are deleted logically.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SoftDeleteMode {
    #[default]
    Enable,
    Disable,
}

impl SoftDeleteMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Enable => "enable",
            Self::Disable => "disable",
        }
    }

    pub fn is_enabled(self) -> bool {
        matches!(self, Self::Enable)
    }
}

/// Read-after-write consistency recovery for single-record reads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FixStrategy {
    #[default]
    None,
    /// Retry `NotFound` with randomized backoff (see [`RetryConfig`]).
    Backoff,
}

impl FixStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Backoff => "backoff",
        }
    }
}

/// When the run context (trace/request ids) is recorded on an entity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReauditMode {
    #[default]
    AtCreating,
    Always,
}

impl ReauditMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AtCreating => "at-creating",
            Self::Always => "always",
        }
    }
}

/// Unknown mode string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsePolicyError {
    pub kind: &'static str,
    pub value: String,
}

impl Display for ParsePolicyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "unsupported {} mode `{}`", self.kind, self.value)
    }
}

impl Error for ParsePolicyError {}

fn parse_error(kind: &'static str, value: &str) -> ParsePolicyError {
    ParsePolicyError {
        kind,
        value: value.to_string(),
    }
}

impl FromStr for DataIsolation {
    type Err = ParsePolicyError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(Self::None),
            "user" => Ok(Self::User),
            "tenant" => Ok(Self::Tenant),
            "app" => Ok(Self::App),
            _ => Err(parse_error("isolation", value)),
        }
    }
}

impl FromStr for SoftDeleteMode {
    type Err = ParsePolicyError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "enable" => Ok(Self::Enable),
            "disable" => Ok(Self::Disable),
            _ => Err(parse_error("soft-delete", value)),
        }
    }
}

impl FromStr for FixStrategy {
    type Err = ParsePolicyError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(Self::None),
            "backoff" => Ok(Self::Backoff),
            _ => Err(parse_error("fix-strategy", value)),
        }
    }
}

impl FromStr for ReauditMode {
    type Err = ParsePolicyError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "at-creating" => Ok(Self::AtCreating),
            "always" => Ok(Self::Always),
            _ => Err(parse_error("re-audit", value)),
        }
    }
}

/// Partial policy: used both as repository default and per-call override.
///
/// `None` fields defer to the next layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoPolicy {
    pub isolation: Option<DataIsolation>,
    pub soft_delete: Option<SoftDeleteMode>,
    pub fix_strategy: Option<FixStrategy>,
    pub reaudit: Option<ReauditMode>,
}

impl RepoPolicy {
    pub fn isolation(mut self, isolation: DataIsolation) -> Self {
        self.isolation = Some(isolation);
        self
    }

    pub fn soft_delete(mut self, soft_delete: SoftDeleteMode) -> Self {
        self.soft_delete = Some(soft_delete);
        self
    }

    pub fn fix_strategy(mut self, fix_strategy: FixStrategy) -> Self {
        self.fix_strategy = Some(fix_strategy);
        self
    }

    pub fn reaudit(mut self, reaudit: ReauditMode) -> Self {
        self.reaudit = Some(reaudit);
        self
    }

    /// Fields set on `self` win; unset fields come from `fallback`.
    pub fn merged_over(&self, fallback: &RepoPolicy) -> RepoPolicy {
        RepoPolicy {
            isolation: self.isolation.or(fallback.isolation),
            soft_delete: self.soft_delete.or(fallback.soft_delete),
            fix_strategy: self.fix_strategy.or(fallback.fix_strategy),
            reaudit: self.reaudit.or(fallback.reaudit),
        }
    }

    /// Fills the remaining gaps with library defaults.
    pub fn effective(&self) -> EffectivePolicy {
        EffectivePolicy {
            isolation: self.isolation.unwrap_or_default(),
            soft_delete: self.soft_delete.unwrap_or_default(),
            fix_strategy: self.fix_strategy.unwrap_or_default(),
            reaudit: self.reaudit.unwrap_or_default(),
        }
    }
}

/// Fully resolved policy for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EffectivePolicy {
    pub isolation: DataIsolation,
    pub soft_delete: SoftDeleteMode,
    pub fix_strategy: FixStrategy,
    pub reaudit: ReauditMode,
}

/// Resolves `override ?? repository default ?? library default` per field.
pub fn resolve_policy(ctx_override: &RepoPolicy, repo_default: &RepoPolicy) -> EffectivePolicy {
    ctx_override.merged_over(repo_default).effective()
}

/// Backoff parameters for read-after-write recovery.
///
/// Attempt `n` (1-based) waits `base_delay * 2^(n-1)` plus a random jitter in
/// `[0, max_jitter]` before the next try.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub attempts: u32,
    pub base_delay_ms: u64,
    pub max_jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay_ms: 50,
            max_jitter_ms: 50,
        }
    }
}

impl RetryConfig {
    /// Delay to wait after the given failed attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let base = self.base_delay_ms.saturating_mul(1_u64 << shift);
        let jitter = if self.max_jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=self.max_jitter_ms)
        };
        Duration::from_millis(base.saturating_add(jitter))
    }
}
