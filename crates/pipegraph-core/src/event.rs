use std::path::PathBuf;

use crate::types::PathEntry;

/// Something that changed a project's pipeline.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    Activated {
        project: PathBuf,
        graph: String,
        start_node: String,
    },
    Transitioned {
        project: PathBuf,
        entry: PathEntry,
    },
    Reset {
        project: PathBuf,
        start_node: String,
    },
    Deactivated {
        project: PathBuf,
    },
    EnforcerToggled {
        project: PathBuf,
        enabled: bool,
    },
}

impl PipelineEvent {
    pub fn project(&self) -> &PathBuf {
        match self {
            PipelineEvent::Activated { project, .. }
            | PipelineEvent::Transitioned { project, .. }
            | PipelineEvent::Reset { project, .. }
            | PipelineEvent::Deactivated { project }
            | PipelineEvent::EnforcerToggled { project, .. } => project,
        }
    }
}

/// Fan-out of pipeline events to every live subscriber.
pub struct EventBus {
    tx: tokio::sync::broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(capacity);
        Self { tx }
    }

    /// Number of subscribers reached; zero when nobody listens.
    pub fn publish(&self, event: PipelineEvent) -> usize {
        let project = event.project().clone();
        match self.tx.send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                tracing::trace!(project = %project.display(), "No event subscribers");
                0
            }
        }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
