//! Live subscription tree for one owner: farms, their groups and the groups' events,
//! flattened into debounced, signature-checked views.

pub mod errors;
pub mod metrics;
pub mod model;
pub mod session;
pub mod signature;
pub mod store;
pub mod tree;

pub use errors::RegistryError;
pub use model::{
    Collection, DetachReport, MergedView, NodeStatus, SessionStats, TopologySnapshot, ViewEvent,
};
pub use session::{OwnerSession, SessionConfig, SessionDeps};
pub use signature::{signature_of, Signature, SignatureCache};
pub use store::{CancelHandle, InMemoryStore, OnChange, Store};
pub use tree::{ChildDiff, RemovedNode, SubscriptionTree};
