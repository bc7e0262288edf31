use anyhow::{Result, bail};
use async_trait::async_trait;
use notify::{Config, Event, EventKind, PollWatcher, RecursiveMode, Watcher};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    sync::mpsc::UnboundedReceiver,
    task::JoinHandle,
    time::{Duration, sleep},
};
use tracing::{error, warn};

pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Something that is kept in sync with files on disk.
#[async_trait]
pub trait WatchedType: Send + Sync + 'static {
    fn is_relevant(&self, path: &Path) -> bool;
    async fn on_create_or_modify(&self, path: &Path) -> Result<()>;

    async fn on_remove(&self, path: &Path) -> Result<()>;

    async fn reload(&self, path: &Path) -> Result<()> {
        self.on_create_or_modify(path).await
    }
}

/// The background tasks watching one directory.
/// Dropping it leaves them running; call `shutdown()` to stop them.
pub struct DirectoryWatcher {
    handles: Vec<JoinHandle<()>>,
}

impl DirectoryWatcher {
    /// Start watching `dir` for files whose extension is in `exts` or that the
    /// watched type reports as relevant. With `initial_scan` every existing
    /// match is loaded first; with `enable_retry` a failed initial load is
    /// retried a few times.
    pub async fn new(
        dir: PathBuf,
        watcher_impl: Arc<dyn WatchedType>,
        exts: &[&str],
        initial_scan: bool,
        enable_retry: bool,
    ) -> Result<DirectoryWatcher> {
        if !dir.exists() {
            let msg = format!("Directory {} does not exist", dir.to_string_lossy());
            warn!(%msg);
            bail!(msg);
        }

        if initial_scan {
            for entry in std::fs::read_dir(&dir)? {
                let path = entry?.path();
                if watcher_impl.is_relevant(&path) || is_valid_extension(&path, exts) {
                    try_reload(&watcher_impl, &path, enable_retry).await;
                }
            }
        }

        let (tx, mut rx): (_, UnboundedReceiver<notify::Result<Event>>) =
            tokio::sync::mpsc::unbounded_channel();

        // The poll watcher lives inside this task and pushes FS events into `tx`.
        let dir_clone = dir.clone();
        let handle_watcher = tokio::spawn(async move {
            let watcher = PollWatcher::new(
                move |res| {
                    let _ = tx.send(res);
                },
                Config::default()
                    .with_poll_interval(POLL_INTERVAL)
                    .with_compare_contents(true),
            );
            let mut watcher = match watcher {
                Ok(w) => w,
                Err(e) => {
                    error!(?e, "Failed to create poll watcher");
                    return;
                }
            };
            if let Err(e) = watcher.watch(&dir_clone, RecursiveMode::Recursive) {
                error!(?e, "Failed to watch {}", dir_clone.display());
                return;
            }
            futures::future::pending::<()>().await;
        });

        let watcher_clone = watcher_impl.clone();
        let exts_owned: Vec<String> = exts.iter().map(|s| s.to_string()).collect();
        let handle_dispatch = tokio::spawn(async move {
            let relevant = |path: &Path| {
                watcher_clone.is_relevant(path)
                    || path
                        .extension()
                        .and_then(|e| e.to_str())
                        .is_some_and(|e| exts_owned.iter().any(|x| x == e))
            };
            while let Some(res) = rx.recv().await {
                match res {
                    Ok(Event {
                        // edits arrive as metadata or data modifications
                        kind: EventKind::Create(_) | EventKind::Modify(_),
                        paths,
                        ..
                    }) => {
                        for path in paths.into_iter().filter(|p| relevant(p.as_path())) {
                            if let Err(e) = watcher_clone.on_create_or_modify(&path).await {
                                warn!(?path, ?e, "Failed to handle create/modify");
                            }
                        }
                    }
                    Ok(Event {
                        kind: EventKind::Remove(_),
                        paths,
                        ..
                    }) => {
                        for path in paths.into_iter().filter(|p| relevant(p.as_path())) {
                            if let Err(e) = watcher_clone.on_remove(&path).await {
                                warn!(?path, ?e, "Failed to handle removal");
                            }
                        }
                    }
                    Err(e) => {
                        warn!(?e, "Watcher error");
                    }
                    _ => {}
                }
            }
        });

        Ok(DirectoryWatcher {
            handles: vec![handle_dispatch, handle_watcher],
        })
    }

    pub fn shutdown(self) {
        for handle in self.handles {
            handle.abort();
        }
    }
}

fn is_valid_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.contains(&ext))
}

async fn try_reload(watched: &Arc<dyn WatchedType>, path: &Path, retry: bool) {
    const MAX_RETRIES: usize = 10;

    for attempt in 0..MAX_RETRIES {
        match watched.reload(path).await {
            Ok(_) => return,
            Err(e) => {
                if !retry || attempt == MAX_RETRIES - 1 {
                    error!("Failed to reload {:?}: {e:?}", path);
                    return;
                }
                warn!(
                    "Retrying reload {:?} (attempt {}): {e:?}",
                    path,
                    attempt + 1
                );
                sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    struct CountingWatcher {
        loaded: AtomicUsize,
    }

    #[async_trait]
    impl WatchedType for CountingWatcher {
        fn is_relevant(&self, _path: &Path) -> bool {
            false
        }

        async fn on_create_or_modify(&self, _path: &Path) -> Result<()> {
            self.loaded.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn on_remove(&self, _path: &Path) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_initial_scan_filters_by_extension() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.json"), "{}").unwrap();
        std::fs::write(dir.path().join("b.yaml"), "x: 1").unwrap();
        std::fs::write(dir.path().join("c.txt"), "skip").unwrap();

        let counting = Arc::new(CountingWatcher {
            loaded: AtomicUsize::new(0),
        });
        let watched: Arc<dyn WatchedType> = counting.clone();
        let watcher = DirectoryWatcher::new(dir.path().to_path_buf(), watched, &["json", "yaml"], true, false)
            .await
            .unwrap();

        assert_eq!(counting.loaded.load(Ordering::SeqCst), 2);
        watcher.shutdown();
    }

    #[tokio::test]
    async fn test_missing_directory_is_an_error() {
        let watched: Arc<dyn WatchedType> = Arc::new(CountingWatcher {
            loaded: AtomicUsize::new(0),
        });
        let result = DirectoryWatcher::new(PathBuf::from("./does/not/exist"), watched, &["json"], true, false).await;
        assert!(result.is_err());
    }
}
