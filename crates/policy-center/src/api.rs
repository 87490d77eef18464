use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use flockview_performance::RankScale;
use flockview_scheduler::config::MAX_QUIET_WINDOW_MS;
use serde_json::Value;
use tokio::sync::{watch, Mutex};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::errors::PolicyError;
use crate::loader::{load_policy_with_options, LoadOptions};
use crate::model::{EnginePolicy, PolicySource, RuntimeOverrideSpec};
use crate::override_store::RuntimeOverrideStore;

#[async_trait]
pub trait PolicyCenter: Send + Sync {
    async fn snapshot(&self) -> Arc<EnginePolicy>;
    async fn reload(&self) -> Result<(), PolicyError>;
    async fn apply_override(&self, override_spec: RuntimeOverrideSpec) -> Result<(), PolicyError>;
    async fn clear_override(&self, path: &str) -> Result<bool, PolicyError>;
    fn subscribe(&self) -> watch::Receiver<Arc<EnginePolicy>>;
    async fn guard(&self) -> PolicyGuard;
}

struct PolicyState {
    base: EnginePolicy,
    policy: EnginePolicy,
    overrides: RuntimeOverrideStore,
    rev_counter: u64,
}

impl PolicyState {
    fn new(base: EnginePolicy) -> Self {
        let rev_counter = base.rev;
        Self {
            base: base.clone(),
            policy: base,
            overrides: RuntimeOverrideStore::default(),
            rev_counter,
        }
    }

    fn apply_active_overrides(&mut self) -> Result<(), PolicyError> {
        let mut next = self.base.clone();
        for (path, value) in self.overrides.active_entries() {
            apply_override_to_policy(&mut next, &path, &value, PolicySource::RuntimeOverride)?;
        }
        self.rev_counter = self.rev_counter.saturating_add(1);
        next.rev = self.rev_counter;
        self.policy = next;
        Ok(())
    }
}

pub struct InMemoryPolicyCenter {
    state: Arc<Mutex<PolicyState>>,
    watch_tx: watch::Sender<Arc<EnginePolicy>>,
    loader: Option<LoadOptions>,
}

impl InMemoryPolicyCenter {
    pub fn new(policy: EnginePolicy) -> Self {
        let state = PolicyState::new(policy);
        let current = Arc::new(state.policy.clone());
        let (watch_tx, _watch_rx) = watch::channel(current);
        Self {
            state: Arc::new(Mutex::new(state)),
            watch_tx,
            loader: None,
        }
    }

    /// Loads the initial policy from `options`; `reload` re-reads the same sources.
    pub fn from_loader(options: LoadOptions) -> Result<Self, PolicyError> {
        let policy = load_policy_with_options(&options)?;
        let mut center = Self::new(policy);
        center.loader = Some(options);
        Ok(center)
    }

    /// Latest published policy without taking the state lock.
    pub fn current(&self) -> Arc<EnginePolicy> {
        Arc::clone(&self.watch_tx.borrow())
    }

    fn publish(&self, policy: Arc<EnginePolicy>) {
        info!(rev = policy.rev, "policy updated");
        self.watch_tx.send_replace(policy);
    }
}

#[async_trait]
impl PolicyCenter for InMemoryPolicyCenter {
    async fn snapshot(&self) -> Arc<EnginePolicy> {
        let guard = self.state.lock().await;
        Arc::new(guard.policy.clone())
    }

    async fn reload(&self) -> Result<(), PolicyError> {
        let Some(options) = self.loader.as_ref() else {
            return Err(PolicyError::Invalid(
                "policy center was not created from a loader".into(),
            ));
        };
        let base = load_policy_with_options(options)?;
        let mut guard = self.state.lock().await;
        guard.base = base;
        guard.apply_active_overrides()?;
        let policy = Arc::new(guard.policy.clone());
        drop(guard);
        self.publish(policy);
        Ok(())
    }

    async fn apply_override(&self, override_spec: RuntimeOverrideSpec) -> Result<(), PolicyError> {
        // reject bad paths and values before they reach the override store
        let mut probe = self.state.lock().await.policy.clone();
        apply_override_to_policy(
            &mut probe,
            &override_spec.path,
            &override_spec.value,
            PolicySource::RuntimeOverride,
        )?;

        let ttl = if override_spec.ttl_seconds > 0 {
            Some(Duration::from_secs(override_spec.ttl_seconds))
        } else {
            None
        };
        let mut guard = self.state.lock().await;
        guard
            .overrides
            .insert(override_spec.path.clone(), override_spec.value.clone(), ttl);
        guard.apply_active_overrides()?;
        let policy = Arc::new(guard.policy.clone());
        drop(guard);
        info!(
            path = %override_spec.path,
            owner = %override_spec.owner,
            reason = %override_spec.reason,
            "policy override applied"
        );
        self.publish(policy);

        if let Some(ttl) = ttl {
            let state = Arc::clone(&self.state);
            let watch_tx = self.watch_tx.clone();
            let path = override_spec.path.clone();
            tokio::spawn(async move {
                sleep(ttl).await;
                let mut guard = state.lock().await;
                if guard.overrides.remove(&path) {
                    match guard.apply_active_overrides() {
                        Ok(()) => {
                            let policy = Arc::new(guard.policy.clone());
                            drop(guard);
                            if watch_tx.send(policy).is_err() {
                                warn!("policy override expiry broadcast had no listeners");
                            }
                        }
                        Err(err) => {
                            warn!("policy override expiry recompute failed: {err}");
                        }
                    }
                }
            });
        }

        Ok(())
    }

    async fn clear_override(&self, path: &str) -> Result<bool, PolicyError> {
        let mut guard = self.state.lock().await;
        if !guard.overrides.remove(path) {
            return Ok(false);
        }
        guard.apply_active_overrides()?;
        let policy = Arc::new(guard.policy.clone());
        drop(guard);
        self.publish(policy);
        Ok(true)
    }

    fn subscribe(&self) -> watch::Receiver<Arc<EnginePolicy>> {
        self.watch_tx.subscribe()
    }

    async fn guard(&self) -> PolicyGuard {
        let policy = self.snapshot().await;
        PolicyGuard { policy }
    }
}

/// Sticky view of one policy revision.
#[derive(Clone, Debug)]
pub struct PolicyGuard {
    policy: Arc<EnginePolicy>,
}

impl PolicyGuard {
    pub fn revision(&self) -> u64 {
        self.policy.rev
    }

    pub fn policy(&self) -> Arc<EnginePolicy> {
        Arc::clone(&self.policy)
    }
}

pub(crate) fn apply_override_to_policy(
    policy: &mut EnginePolicy,
    path: &str,
    value: &Value,
    source: PolicySource,
) -> Result<(), PolicyError> {
    let changed = match path {
        "sync.quiet_window_ms" => {
            let window = to_u64(value)?;
            if window == 0 || window > MAX_QUIET_WINDOW_MS {
                return Err(PolicyError::InvalidValue(format!(
                    "quiet window {window} outside 1..={MAX_QUIET_WINDOW_MS}"
                )));
            }
            merge(&mut policy.sync.quiet_window_ms, window)
        }
        "sync.backlog_warn" => merge(&mut policy.sync.backlog_warn, to_positive_usize(value)?),
        "invariants.strict" => merge(&mut policy.invariants.strict, to_bool(value)?),
        "benchmark.rank_scale" => merge(&mut policy.benchmark.rank_scale, to_rank_scale(value)?),
        "diagnostics.state_center_capacity" => merge(
            &mut policy.diagnostics.state_center_capacity,
            to_positive_usize(value)?,
        ),
        "diagnostics.bus_capacity" => merge(
            &mut policy.diagnostics.bus_capacity,
            to_positive_usize(value)?,
        ),
        path => return Err(PolicyError::UnsupportedPath(path.to_string())),
    };
    if changed {
        policy.set_provenance(path, source);
    }
    Ok(())
}

fn merge<T: PartialEq>(target: &mut T, candidate: T) -> bool {
    if *target == candidate {
        return false;
    }
    *target = candidate;
    true
}

fn to_u64(value: &Value) -> Result<u64, PolicyError> {
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|raw| raw.trim().parse().ok()))
        .ok_or_else(|| PolicyError::InvalidValue(format!("expected integer, got {value}")))
}

fn to_positive_usize(value: &Value) -> Result<usize, PolicyError> {
    let raw = to_u64(value)?;
    if raw == 0 {
        return Err(PolicyError::InvalidValue("expected a positive integer".into()));
    }
    usize::try_from(raw).map_err(|_| PolicyError::InvalidValue(format!("value {raw} too large")))
}

fn to_bool(value: &Value) -> Result<bool, PolicyError> {
    value
        .as_bool()
        .ok_or_else(|| PolicyError::InvalidValue(format!("expected bool, got {value}")))
}

fn to_rank_scale(value: &Value) -> Result<RankScale, PolicyError> {
    let normalised = match value.as_str() {
        Some(raw) => Value::String(raw.trim().to_ascii_lowercase()),
        None => value.clone(),
    };
    serde_json::from_value(normalised).map_err(|_| {
        PolicyError::InvalidValue(format!(
            "expected \"standard\" or \"conservative\", got {value}"
        ))
    })
}
