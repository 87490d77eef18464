pub mod api;
pub mod defaults;
pub mod errors;
pub mod loader;
pub mod model;
pub mod override_store;

pub use api::{InMemoryPolicyCenter, PolicyCenter, PolicyGuard};
pub use defaults::default_policy;
pub use errors::PolicyError;
pub use loader::{load_policy, load_policy_with_options, LoadOptions};
pub use model::{
    BenchmarkPolicy, DiagnosticsPolicy, EnginePolicy, InvariantPolicy, PolicySource,
    RuntimeOverrideSpec, SyncPolicy,
};
