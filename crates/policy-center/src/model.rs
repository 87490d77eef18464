use std::collections::HashMap;

use flockview_performance::RankScale;
use flockview_scheduler::DebounceConfig;
use serde::{Deserialize, Serialize};

use crate::defaults::default_policy;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EnginePolicy {
    pub rev: u64,
    pub sync: SyncPolicy,
    pub invariants: InvariantPolicy,
    pub benchmark: BenchmarkPolicy,
    pub diagnostics: DiagnosticsPolicy,
    pub provenance: HashMap<String, PolicyProvenance>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncPolicy {
    /// Debounce quiet window applied per merge point.
    pub quiet_window_ms: u64,
    /// Session command backlog above which a warning is logged.
    pub backlog_warn: usize,
}

impl Default for EnginePolicy {
    /// Same as [`default_policy`]; zero windows and capacities are never valid.
    fn default() -> Self {
        default_policy()
    }
}

impl Default for SyncPolicy {
    fn default() -> Self {
        default_policy().sync
    }
}

impl SyncPolicy {
    pub fn debounce_config(&self) -> DebounceConfig {
        DebounceConfig {
            quiet_window_ms: self.quiet_window_ms,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct InvariantPolicy {
    /// Invariant violations also trip a debug assertion when set.
    pub strict: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct BenchmarkPolicy {
    pub rank_scale: RankScale,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiagnosticsPolicy {
    pub state_center_capacity: usize,
    pub bus_capacity: usize,
}

impl Default for DiagnosticsPolicy {
    fn default() -> Self {
        default_policy().diagnostics
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PolicyProvenance {
    pub path: String,
    pub source: PolicySource,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum PolicySource {
    Builtin,
    File,
    Env,
    RuntimeOverride,
}

impl EnginePolicy {
    pub fn set_provenance(&mut self, path: &str, source: PolicySource) {
        self.provenance.insert(
            path.to_string(),
            PolicyProvenance {
                path: path.to_string(),
                source,
            },
        );
    }

    pub fn source_of(&self, path: &str) -> Option<PolicySource> {
        self.provenance.get(path).map(|entry| entry.source)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RuntimeOverrideSpec {
    pub path: String,
    pub value: serde_json::Value,
    pub owner: String,
    pub reason: String,
    pub ttl_seconds: u64,
}

impl RuntimeOverrideSpec {
    pub fn permanent(path: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            path: path.into(),
            value,
            owner: String::from("runtime"),
            reason: String::new(),
            ttl_seconds: 0,
        }
    }
}
