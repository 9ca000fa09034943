pub mod activation;
pub mod catalog;
pub mod engine;
pub mod locks;
pub mod provision;
pub mod scope;
pub mod store;

pub use activation::{ActivationManager, ActivationReport};
pub use catalog::CatalogEntry;
pub use engine::{Advance, NodeStatus, PipelineEngine, PipelineStatus, Transition};
pub use locks::ProjectLocks;
pub use scope::{resolver_for, HubScope, LocalScope};
pub use store::GraphStore;
