use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
    flow::{FlowDocument, is_flow_file},
    watcher::{DirectoryWatcher, WatchedType},
};

/// Read-only access to published flows.
#[async_trait]
pub trait FlowStore: Send + Sync {
    async fn find_one_by_flow_id(&self, flow_id: &str) -> Result<Option<FlowDocument>, StoreError>;

    /// One batched lookup; ids without a published flow are simply absent
    /// from the result.
    async fn find_many_by_flow_ids(&self, flow_ids: &[String]) -> Result<Vec<FlowDocument>, StoreError>;

    fn name(&self) -> &'static str;
}

impl fmt::Debug for dyn FlowStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowStore")
            .field("impl", &self.name())
            .finish()
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    #[error("flow store unavailable: {0}")]
    Unavailable(String),
    #[error("flow store query failed: {0}")]
    Query(String),
}

#[derive(Debug, Default)]
pub struct InMemoryFlowStore {
    flows: DashMap<String, FlowDocument>,
}

impl InMemoryFlowStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn publish(&self, flow: FlowDocument) -> Option<FlowDocument> {
        info!(flow_id = %flow.flow_id, "Published flow");
        self.flows.insert(flow.flow_id.clone(), flow)
    }

    pub fn unpublish(&self, flow_id: &str) -> Option<FlowDocument> {
        let removed = self.flows.remove(flow_id).map(|(_, flow)| flow);
        if removed.is_some() {
            info!(%flow_id, "Unpublished flow");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }
}

#[async_trait]
impl FlowStore for InMemoryFlowStore {
    async fn find_one_by_flow_id(&self, flow_id: &str) -> Result<Option<FlowDocument>, StoreError> {
        Ok(self.flows.get(flow_id).map(|entry| entry.value().clone()))
    }

    async fn find_many_by_flow_ids(&self, flow_ids: &[String]) -> Result<Vec<FlowDocument>, StoreError> {
        let mut found: Vec<FlowDocument> = Vec::new();
        for flow_id in flow_ids {
            if found.iter().any(|f| &f.flow_id == flow_id) {
                continue;
            }
            if let Some(entry) = self.flows.get(flow_id) {
                found.push(entry.value().clone());
            }
        }
        Ok(found)
    }

    fn name(&self) -> &'static str {
        "InMemoryFlowStore"
    }
}

/// Keeps an [`InMemoryFlowStore`] in sync with a directory of flow files.
pub struct FlowDirectory {
    store: Arc<InMemoryFlowStore>,
    /// file path → flow id it published
    files: DashMap<PathBuf, String>,
}

impl FlowDirectory {
    pub fn new(store: Arc<InMemoryFlowStore>) -> Arc<Self> {
        Arc::new(Self {
            store,
            files: DashMap::new(),
        })
    }

    pub fn store(&self) -> Arc<InMemoryFlowStore> {
        self.store.clone()
    }

    /// Publishes every valid flow file in `dir`; broken files are logged and skipped.
    pub fn load_all(&self, dir: &Path) -> anyhow::Result<usize> {
        if !dir.exists() {
            std::fs::create_dir_all(dir)?;
        }
        let mut loaded = 0;
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if !is_flow_file(&path) {
                continue;
            }
            match self.load_file(&path) {
                Ok(()) => loaded += 1,
                Err(e) => error!("Failed to load {}: {}", path.display(), e),
            }
        }
        info!("Loaded {} published flows from {}", loaded, dir.display());
        Ok(loaded)
    }

    fn load_file(&self, path: &Path) -> anyhow::Result<()> {
        let flow = FlowDocument::load_from_file(path)?;
        if let Some(previous) = self.files.insert(path.to_path_buf(), flow.flow_id.clone()) {
            if previous != flow.flow_id {
                self.store.unpublish(&previous);
            }
        }
        self.store.publish(flow);
        Ok(())
    }

    /// Initial scan plus hot reload of `dir`.
    pub async fn watch(self: Arc<Self>, dir: PathBuf) -> anyhow::Result<DirectoryWatcher> {
        if !dir.exists() {
            std::fs::create_dir_all(&dir)?;
        }
        DirectoryWatcher::new(dir, self, &["json", "yaml", "yml"], true, true).await
    }
}

#[async_trait]
impl WatchedType for FlowDirectory {
    fn is_relevant(&self, path: &Path) -> bool {
        is_flow_file(path)
    }

    async fn on_create_or_modify(&self, path: &Path) -> anyhow::Result<()> {
        self.load_file(path)
    }

    async fn on_remove(&self, path: &Path) -> anyhow::Result<()> {
        match self.files.remove(path) {
            Some((_, flow_id)) => {
                self.store.unpublish(&flow_id);
            }
            None => warn!("Removed file {} was never published", path.display()),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{Block, FileInputBlock, FileInputOptions, Group};
    use std::time::Duration;
    use tempfile::tempdir;

    fn flow(id: &str) -> FlowDocument {
        FlowDocument::new(
            id,
            vec![Group {
                id: "g".into(),
                title: String::new(),
                blocks: vec![Block::FileInput(FileInputBlock {
                    id: format!("{id}-upload"),
                    outgoing_edge_id: None,
                    options: FileInputOptions::default(),
                })],
            }],
        )
    }

    #[tokio::test]
    async fn test_in_memory_find_one() {
        let store = InMemoryFlowStore::new();
        store.publish(flow("a"));

        assert_eq!(store.find_one_by_flow_id("a").await.unwrap(), Some(flow("a")));
        assert_eq!(store.find_one_by_flow_id("b").await.unwrap(), None);
        assert_eq!(store.name(), "InMemoryFlowStore");
    }

    #[tokio::test]
    async fn test_in_memory_find_many_skips_missing_and_duplicates() {
        let store = InMemoryFlowStore::new();
        store.publish(flow("a"));
        store.publish(flow("b"));

        let ids = vec!["b".to_string(), "ghost".to_string(), "a".to_string(), "b".to_string()];
        let found = store.find_many_by_flow_ids(&ids).await.unwrap();
        let found_ids: Vec<&str> = found.iter().map(|f| f.flow_id.as_str()).collect();
        assert_eq!(found_ids, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_unpublish() {
        let store = InMemoryFlowStore::new();
        store.publish(flow("a"));
        assert_eq!(store.len(), 1);
        assert!(store.unpublish("a").is_some());
        assert!(store.is_empty());
        assert!(store.unpublish("a").is_none());
    }

    #[tokio::test]
    async fn test_directory_load_skips_invalid_files() {
        let dir = tempdir().unwrap();
        flow("a").save_to_file(&dir.path().join("a.json")).unwrap();
        std::fs::write(dir.path().join("broken.json"), "{ not json").unwrap();
        std::fs::write(dir.path().join("readme.md"), "# flows").unwrap();

        let directory = FlowDirectory::new(InMemoryFlowStore::new());
        let loaded = directory.load_all(dir.path()).unwrap();

        assert_eq!(loaded, 1);
        assert!(directory.store().find_one_by_flow_id("a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_directory_remove_unpublishes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.json");
        flow("a").save_to_file(&path).unwrap();

        let directory = FlowDirectory::new(InMemoryFlowStore::new());
        directory.on_create_or_modify(&path).await.unwrap();
        assert_eq!(directory.store().len(), 1);

        directory.on_remove(&path).await.unwrap();
        assert!(directory.store().is_empty());
    }

    #[tokio::test]
    async fn test_directory_rewrite_with_new_id_replaces_old_flow() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("main.json");
        flow("old").save_to_file(&path).unwrap();

        let directory = FlowDirectory::new(InMemoryFlowStore::new());
        directory.on_create_or_modify(&path).await.unwrap();

        flow("new").save_to_file(&path).unwrap();
        directory.on_create_or_modify(&path).await.unwrap();

        let store = directory.store();
        assert!(store.find_one_by_flow_id("old").await.unwrap().is_none());
        assert!(store.find_one_by_flow_id("new").await.unwrap().is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_watch_reloads_edited_flow_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.json");
        flow("a").save_to_file(&path).unwrap();

        let store = InMemoryFlowStore::new();
        let watcher = FlowDirectory::new(store.clone())
            .watch(dir.path().to_path_buf())
            .await
            .unwrap();
        assert!(store.find_one_by_flow_id("a").await.unwrap().unwrap().find_block("a-upload").is_some());

        // let the poll watcher take its first snapshot before editing
        tokio::time::sleep(Duration::from_millis(500)).await;
        let mut edited = flow("a");
        edited.groups[0].blocks = vec![Block::FileInput(FileInputBlock {
            id: "new-block".into(),
            outgoing_edge_id: None,
            options: FileInputOptions::default(),
        })];
        edited.save_to_file(&path).unwrap();
        flow("b").save_to_file(&dir.path().join("b.json")).unwrap();

        let mut reloaded = false;
        for _ in 0..40 {
            tokio::time::sleep(Duration::from_millis(250)).await;
            let a = store.find_one_by_flow_id("a").await.unwrap().unwrap();
            if a.find_block("new-block").is_some() && store.find_one_by_flow_id("b").await.unwrap().is_some() {
                reloaded = true;
                break;
            }
        }
        watcher.shutdown();

        assert!(reloaded, "edited and created flow files were not picked up");
    }
}
