pub mod config;
pub mod error;
pub mod event;
pub mod traits;
pub mod types;

pub use config::{AppConfig, EnforcerConfig, Environment, HubConfig};
pub use error::{ParseError, PipelineError, Result};
pub use event::{EventBus, PipelineEvent};
pub use traits::ScopeResolver;
pub use types::*;
