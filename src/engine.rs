use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use flockview_core_types::{FaultSignal, FlockError, OperationalEvent, OwnerId};
use flockview_event_bus::{EventBus, InMemoryBus};
use flockview_performance::{BenchmarkKey, BenchmarkSet};
use flockview_policy_center::{InMemoryPolicyCenter, PolicyCenter};
use flockview_registry::{
    DetachReport, MergedView, OwnerSession, RegistryError, SessionConfig, SessionDeps, Store,
    TopologySnapshot,
};
use flockview_state_center::{InMemoryStateCenter, StateCenter};

use crate::benchmark::BenchmarkStore;
use crate::insights::{InsightsSnapshot, InsightsWorker};

/// External collaborators of an engine.
#[derive(Clone)]
pub struct EngineDeps {
    pub store: Arc<dyn Store>,
    pub benchmarks: Arc<dyn BenchmarkStore>,
    pub policy: Arc<InMemoryPolicyCenter>,
}

/// One owner's live view plus the performance insights derived from it.
pub struct FlockEngine {
    owner: OwnerId,
    session: Option<OwnerSession<OperationalEvent>>,
    insights: watch::Receiver<Arc<InsightsSnapshot>>,
    benchmarks: Arc<dyn BenchmarkStore>,
    bus: Arc<InMemoryBus<FaultSignal>>,
    state_center: Arc<InMemoryStateCenter>,
    cancel: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl FlockEngine {
    /// Starts the session and the insights worker. Must run inside a tokio runtime.
    pub fn attach(owner: OwnerId, deps: EngineDeps) -> Self {
        let policy = deps.policy.current();
        let state_center = Arc::new(InMemoryStateCenter::new(
            policy.diagnostics.state_center_capacity,
        ));
        let bus = InMemoryBus::new(policy.diagnostics.bus_capacity);
        let shared_center: Arc<dyn StateCenter> = state_center.clone();

        let session_deps = SessionDeps::new(Arc::clone(&deps.store))
            .with_bus(Arc::clone(&bus))
            .with_state_center(Arc::clone(&shared_center))
            .with_policy_updates(deps.policy.subscribe());
        let session = OwnerSession::attach(
            owner.clone(),
            session_deps,
            SessionConfig::from_policy(&policy),
        );

        let cancel = CancellationToken::new();
        let (worker, insights) = InsightsWorker::new(
            owner.clone(),
            Arc::clone(&deps.benchmarks),
            policy.benchmark.rank_scale,
            Arc::clone(&bus),
            shared_center,
            cancel.clone(),
        );
        let worker = tokio::spawn(worker.run(session.view(), deps.policy.subscribe()));
        info!(target: "insights", owner = %owner, rev = policy.rev, "engine attached");

        Self {
            owner,
            session: Some(session),
            insights,
            benchmarks: deps.benchmarks,
            bus,
            state_center,
            cancel,
            worker: Some(worker),
        }
    }

    pub fn owner(&self) -> &OwnerId {
        &self.owner
    }

    fn session(&self) -> Result<&OwnerSession<OperationalEvent>, RegistryError> {
        self.session.as_ref().ok_or(RegistryError::SessionClosed)
    }

    /// Receiver of the merged farms/groups/events view.
    pub fn view(&self) -> Result<watch::Receiver<Arc<MergedView<OperationalEvent>>>, RegistryError> {
        Ok(self.session()?.view())
    }

    pub fn current_view(&self) -> Result<Arc<MergedView<OperationalEvent>>, RegistryError> {
        Ok(self.session()?.current())
    }

    pub fn insights(&self) -> watch::Receiver<Arc<InsightsSnapshot>> {
        self.insights.clone()
    }

    pub fn current_insights(&self) -> Arc<InsightsSnapshot> {
        Arc::clone(&self.insights.borrow())
    }

    /// Soft faults from the session and the insights worker.
    pub fn faults(&self) -> broadcast::Receiver<FaultSignal> {
        self.bus.subscribe()
    }

    pub fn state_center(&self) -> Arc<InMemoryStateCenter> {
        Arc::clone(&self.state_center)
    }

    pub async fn topology(&self) -> Result<TopologySnapshot, RegistryError> {
        self.session()?.topology().await
    }

    pub async fn settle(&self) -> Result<TopologySnapshot, RegistryError> {
        self.session()?.settle().await
    }

    pub async fn fetch_benchmark(
        &self,
        key: &BenchmarkKey,
    ) -> Result<Option<BenchmarkSet>, FlockError> {
        self.benchmarks.fetch_by_id(&key.document_id()).await
    }

    /// Stops the insights worker, then tears the session down.
    pub async fn detach(mut self) -> Result<DetachReport, RegistryError> {
        self.cancel.cancel();
        if let Some(worker) = self.worker.take() {
            if let Err(err) = worker.await {
                warn!(target: "insights", owner = %self.owner, ?err, "insights worker ended abnormally");
            }
        }
        let session = self.session.take().ok_or(RegistryError::SessionClosed)?;
        let report = session.detach().await?;
        info!(
            target: "insights",
            owner = %self.owner,
            cancelled_nodes = report.cancelled_nodes,
            "engine detached"
        );
        Ok(report)
    }
}

impl Drop for FlockEngine {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}
