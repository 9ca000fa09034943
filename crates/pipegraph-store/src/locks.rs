use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per project, so read-modify-write cycles on a project's
/// state never interleave inside this process.
#[derive(Default)]
pub struct ProjectLocks {
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl ProjectLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `project`.
    pub async fn lock(&self, project: &Path) -> OwnedMutexGuard<()> {
        let key = tokio::fs::canonicalize(project)
            .await
            .unwrap_or_else(|_| project.to_path_buf());
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.entry(key).or_default().clone()
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_project_is_serialized() {
        let locks = Arc::new(ProjectLocks::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        let guard = locks.lock(Path::new("/tmp/p")).await;
        let task = {
            let locks = locks.clone();
            let order = order.clone();
            tokio::spawn(async move {
                let _guard = locks.lock(Path::new("/tmp/p")).await;
                order.lock().await.push("second");
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        order.lock().await.push("first");
        drop(guard);
        task.await.unwrap();

        assert_eq!(*order.lock().await, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn different_projects_do_not_block() {
        let locks = ProjectLocks::new();
        let _a = locks.lock(Path::new("/tmp/a")).await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock(Path::new("/tmp/b"))).await;
        assert!(b.is_ok());
    }
}
