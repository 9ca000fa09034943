use std::fmt;

use thiserror::Error;

/// A malformed construct in a graph definition, with its 1-based line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

impl ParseError {
    pub fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line == 0 {
            write!(f, "{}", self.message)
        } else {
            write!(f, "line {}: {}", self.line, self.message)
        }
    }
}

impl std::error::Error for ParseError {}

#[derive(Debug, Error)]
pub enum PipelineError {
    // Definition errors
    #[error("Graph definition error: {0}")]
    Parse(#[from] ParseError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid graph name '{0}': must be a plain catalog file name")]
    InvalidGraphName(String),

    #[error("Graph has no nodes, so it has no start node")]
    NoStartNode,

    // Transition errors
    #[error("Node '{node}' has reached max visits ({visits}/{max})")]
    VisitCapReached { node: String, visits: u32, max: u32 },

    #[error("Edge '{edge}' starts at '{from}', not at current node '{current}'")]
    InvalidTransition {
        edge: String,
        from: String,
        current: String,
    },

    #[error("Edge not found: {0}")]
    UnknownEdge(String),

    #[error("Node not found: {0}")]
    UnknownNode(String),

    #[error("No active node; reset or activate a graph first")]
    NoCurrentNode,

    // Storage errors
    #[error("Failed to persist pipeline state: {0}")]
    Persistence(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    /// Whether this error describes a normal "nothing there yet" condition.
    pub fn is_not_found(&self) -> bool {
        matches!(self, PipelineError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_names_line() {
        let err = PipelineError::from(ParseError::new(7, "unknown node field 'colour'"));
        assert_eq!(
            err.to_string(),
            "Graph definition error: line 7: unknown node field 'colour'"
        );
    }

    #[test]
    fn parse_error_without_line() {
        let err = ParseError::new(0, "empty definition");
        assert_eq!(err.to_string(), "empty definition");
    }

    #[test]
    fn visit_cap_message() {
        let err = PipelineError::VisitCapReached {
            node: "review".into(),
            visits: 3,
            max: 3,
        };
        assert_eq!(err.to_string(), "Node 'review' has reached max visits (3/3)");
        assert!(!err.is_not_found());
        assert!(PipelineError::NotFound("graph.yaml".into()).is_not_found());
    }
}
