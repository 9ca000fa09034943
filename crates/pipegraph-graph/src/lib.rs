pub mod condition;
pub mod emit;
pub mod legacy;
pub mod parser;
pub mod policy;
pub mod transition;
pub mod validate;
pub mod visualize;

pub use condition::{matches_signal, signal_candidates, Signal};
pub use emit::serialize_graph;
pub use legacy::{project_legacy, LegacyView};
pub use parser::parse_graph;
pub use policy::{gate_tool, Verdict};
pub use transition::{available_edges, check_signal, effective_cap, EdgeOption, Step, VisitWarning};
pub use validate::validate;
pub use visualize::{placeholder, project, Diagram};
