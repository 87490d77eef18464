use flockview_performance::RankScale;
use flockview_scheduler::config::DEFAULT_QUIET_WINDOW_MS;

use crate::model::{
    BenchmarkPolicy, DiagnosticsPolicy, EnginePolicy, InvariantPolicy, SyncPolicy,
};

pub fn default_policy() -> EnginePolicy {
    EnginePolicy {
        rev: 1,
        sync: SyncPolicy {
            quiet_window_ms: DEFAULT_QUIET_WINDOW_MS,
            backlog_warn: 1024,
        },
        invariants: InvariantPolicy {
            strict: cfg!(debug_assertions),
        },
        benchmark: BenchmarkPolicy {
            rank_scale: RankScale::Standard,
        },
        diagnostics: DiagnosticsPolicy {
            state_center_capacity: 256,
            bus_capacity: 64,
        },
        provenance: Default::default(),
    }
}
