//! Change-driven re-sync loop
//!
//! A polling watcher reports changes to the desired-state document. Polling
//! is used because event-based watches lose track of files on bind mounts
//! and network filesystems. Notifications are debounced and each accepted
//! one triggers a full pass; passes never overlap.

use notify::{Event, EventKind, PollWatcher, RecursiveMode, Watcher};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::error::{Result, SyncError};
use crate::hosts::DIRECTORY_CANDIDATES;
use crate::reconcile::PassReport;

/// Pending notifications beyond this are coalesced
const EVENT_QUEUE_CAPACITY: usize = 16;

/// Drops notifications that arrive within `interval` of the last accepted one
#[derive(Debug, Clone)]
pub struct Debouncer {
    interval: Duration,
    last_accepted: Option<Instant>,
}

impl Debouncer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_accepted: None,
        }
    }

    /// Record a notification at `now`, returning whether it should trigger
    pub fn accept(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_accepted {
            if now.saturating_duration_since(last) < self.interval {
                return false;
            }
        }
        self.last_accepted = Some(now);
        true
    }
}

/// What the watcher is looking at
#[derive(Debug, Clone, PartialEq, Eq)]
enum WatchTarget {
    /// A directory holding one of the candidate documents
    Directory(PathBuf),
    /// A single document, watched through its parent directory so that
    /// replace-on-save editors keep being tracked
    File { dir: PathBuf, name: std::ffi::OsString },
}

impl WatchTarget {
    /// An existing path is classified by what it is. A path that does not
    /// exist yet is a document if it has an extension, a directory otherwise.
    fn for_source(source: &Path) -> Self {
        let is_dir = if source.exists() {
            source.is_dir()
        } else {
            source.extension().is_none()
        };
        if is_dir {
            return WatchTarget::Directory(source.to_path_buf());
        }

        let dir = match source.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let name = source.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        WatchTarget::File { dir, name }
    }

    fn dir(&self) -> &Path {
        match self {
            WatchTarget::Directory(dir) | WatchTarget::File { dir, .. } => dir,
        }
    }

    fn is_relevant(&self, event: &Event) -> bool {
        if matches!(event.kind, EventKind::Access(_)) {
            return false;
        }

        event.paths.iter().any(|path| {
            let Some(file_name) = path.file_name() else {
                return false;
            };
            match self {
                WatchTarget::Directory(_) => DIRECTORY_CANDIDATES.iter().any(|c| file_name == *c),
                WatchTarget::File { name, .. } => file_name == name.as_os_str(),
            }
        })
    }
}

/// Polls the desired-state source and queues change notifications.
///
/// Dropping it stops the polling thread.
pub struct ConfigWatcher {
    _watcher: PollWatcher,
    events: mpsc::Receiver<()>,
}

impl ConfigWatcher {
    pub fn start(source: &Path, poll_interval: Duration) -> Result<Self> {
        let target = WatchTarget::for_source(source);
        if let WatchTarget::Directory(dir) = &target {
            if !dir.is_dir() {
                return Err(SyncError::InvalidSetting {
                    name: "NPM_CONFIG_FILE",
                    message: format!("directory {} does not exist", dir.display()),
                });
            }
        }
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);

        let filter = target.clone();
        let handler = move |res: notify::Result<Event>| match res {
            Ok(event) if filter.is_relevant(&event) => {
                debug!(kind = ?event.kind, paths = ?event.paths, "Change detected");
                match tx.try_send(()) {
                    Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => {}
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        debug!("Sync loop gone, dropping change notification");
                    }
                }
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "File watcher error"),
        };

        let config = notify::Config::default()
            .with_poll_interval(poll_interval)
            .with_compare_contents(true);
        let mut watcher = PollWatcher::new(handler, config)?;
        watcher.watch(target.dir(), RecursiveMode::NonRecursive)?;

        info!(
            path = %target.dir().display(),
            poll_interval_ms = poll_interval.as_millis() as u64,
            "Watching for desired-state changes"
        );

        Ok(Self {
            _watcher: watcher,
            events: rx,
        })
    }

    pub fn events(&mut self) -> &mut mpsc::Receiver<()> {
        &mut self.events
    }
}

/// Runs reconciliation passes on start-up and on every accepted change
pub struct SyncLoop {
    debouncer: Debouncer,
    passes: u64,
}

impl SyncLoop {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debouncer: Debouncer::new(debounce),
            passes: 0,
        }
    }

    /// Number of passes started so far
    pub fn passes(&self) -> u64 {
        self.passes
    }

    async fn pass<F, Fut>(&mut self, run: &mut F) -> Result<Option<PassReport>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<PassReport>>>,
    {
        self.passes += 1;
        let span = info_span!("pass", pass = self.passes);
        run().instrument(span).await
    }

    /// The start-up pass. Any failure is returned to the caller.
    pub async fn initial_pass<F, Fut>(&mut self, run: &mut F) -> Result<Option<PassReport>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<PassReport>>>,
    {
        self.pass(run).await
    }

    /// Wait for change notifications until `shutdown` flips to true or the
    /// notification source goes away.
    ///
    /// Pass failures are logged; the next accepted change retries. A pass in
    /// progress when shutdown is requested runs to completion.
    pub async fn run<F, Fut>(
        &mut self,
        events: &mut mpsc::Receiver<()>,
        mut shutdown: watch::Receiver<bool>,
        mut run: F,
    ) where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<PassReport>>>,
    {
        if *shutdown.borrow() {
            return;
        }

        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Shutdown requested, leaving sync loop");
                        break;
                    }
                }
                event = events.recv() => {
                    let Some(()) = event else {
                        warn!("Change notifications stopped, leaving sync loop");
                        break;
                    };

                    if !self.debouncer.accept(Instant::now()) {
                        debug!("Change notification debounced");
                        continue;
                    }

                    info!("Desired state changed, re-syncing");
                    if let Err(e) = self.pass(&mut run).await {
                        error!(
                            pass = self.passes,
                            kind = e.kind().as_str(),
                            error = %e,
                            "Sync pass failed, waiting for next change"
                        );
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, ModifyKind};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_pass(
        count: Arc<AtomicUsize>,
    ) -> impl FnMut() -> std::future::Ready<Result<Option<PassReport>>> {
        move || {
            count.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Ok(None))
        }
    }

    #[test]
    fn test_debouncer_drops_within_interval() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_secs(1));

        assert!(debouncer.accept(start));
        assert!(!debouncer.accept(start + Duration::from_millis(200)));
        assert!(!debouncer.accept(start + Duration::from_millis(999)));
        assert!(debouncer.accept(start + Duration::from_millis(1000)));
        assert!(!debouncer.accept(start + Duration::from_millis(1500)));
        assert!(debouncer.accept(start + Duration::from_millis(2100)));
    }

    #[test]
    fn test_debouncer_zero_interval_accepts_all() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(Duration::ZERO);
        assert!(debouncer.accept(start));
        assert!(debouncer.accept(start));
    }

    #[test]
    fn test_watch_target_directory_filter() {
        let target = WatchTarget::Directory(PathBuf::from("/srv/hosts"));

        let json = Event::new(EventKind::Modify(ModifyKind::Any))
            .add_path(PathBuf::from("/srv/hosts/config.json"));
        let yaml = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/srv/hosts/config.yaml"));
        let other = Event::new(EventKind::Modify(ModifyKind::Any))
            .add_path(PathBuf::from("/srv/hosts/notes.txt"));
        let access = Event::new(EventKind::Access(AccessKind::Any))
            .add_path(PathBuf::from("/srv/hosts/config.json"));

        assert!(target.is_relevant(&json));
        assert!(target.is_relevant(&yaml));
        assert!(!target.is_relevant(&other));
        assert!(!target.is_relevant(&access));
    }

    #[test]
    fn test_watch_target_file_filter() {
        let target = WatchTarget::for_source(Path::new("/nonexistent/npm/hosts.yml"));
        assert_eq!(target.dir(), Path::new("/nonexistent/npm"));

        let hit = Event::new(EventKind::Modify(ModifyKind::Any))
            .add_path(PathBuf::from("/nonexistent/npm/hosts.yml"));
        let miss = Event::new(EventKind::Modify(ModifyKind::Any))
            .add_path(PathBuf::from("/nonexistent/npm/config.json"));

        assert!(target.is_relevant(&hit));
        assert!(!target.is_relevant(&miss));
    }

    #[test]
    fn test_watch_target_relative_file() {
        let target = WatchTarget::for_source(Path::new("hosts.json"));
        assert_eq!(target.dir(), Path::new("."));
    }

    #[test]
    fn test_watch_target_missing_path_without_extension_is_directory() {
        let target = WatchTarget::for_source(Path::new("/nonexistent/npm/hosts"));
        assert_eq!(target, WatchTarget::Directory(PathBuf::from("/nonexistent/npm/hosts")));
    }

    #[test]
    fn test_config_watcher_rejects_missing_directory() {
        let tmp = tempfile::TempDir::new().unwrap();
        let err = ConfigWatcher::start(&tmp.path().join("missing"), Duration::from_millis(50))
            .err()
            .unwrap();
        assert_eq!(err.kind(), crate::error::ErrorKind::Config);
        assert!(err.to_string().contains("does not exist"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_of_notifications_triggers_one_pass() {
        let count = Arc::new(AtomicUsize::new(0));
        let (tx, mut rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut sync = SyncLoop::new(Duration::from_secs(1));
        let pass = counting_pass(Arc::clone(&count));

        tx.send(()).await.unwrap();
        tx.send(()).await.unwrap();

        let handle = tokio::spawn(async move {
            sync.run(&mut rx, shutdown_rx, pass).await;
            sync
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(true).unwrap();
        let sync = handle.await.unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(sync.passes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spaced_notifications_trigger_separate_passes() {
        let count = Arc::new(AtomicUsize::new(0));
        let (tx, mut rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut sync = SyncLoop::new(Duration::from_secs(1));
        let pass = counting_pass(Arc::clone(&count));

        let handle = tokio::spawn(async move {
            sync.run(&mut rx, shutdown_rx, pass).await;
        });

        tx.send(()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        tx.send(()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_pass_keeps_loop_running() {
        let count = Arc::new(AtomicUsize::new(0));
        let (tx, mut rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let counter = Arc::clone(&count);
        let pass = move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(if n == 0 {
                Err(SyncError::Auth {
                    status: 401,
                    body: "invalid credentials".to_string(),
                })
            } else {
                Ok(None)
            })
        };

        let handle = tokio::spawn(async move {
            let mut sync = SyncLoop::new(Duration::ZERO);
            sync.run(&mut rx, shutdown_rx, pass).await;
        });

        tx.send(()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        tx.send(()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_initial_pass_propagates_error() {
        let mut sync = SyncLoop::new(Duration::from_secs(1));
        let mut pass = || {
            std::future::ready(Err(SyncError::Auth {
                status: 403,
                body: String::new(),
            }))
        };

        let err = sync.initial_pass(&mut pass).await.unwrap_err();
        assert!(matches!(err, SyncError::Auth { status: 403, .. }));
        assert_eq!(sync.passes(), 1);
    }

    #[tokio::test]
    async fn test_loop_exits_when_notifications_stop() {
        let (tx, mut rx) = mpsc::channel::<()>(1);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        drop(tx);

        let mut sync = SyncLoop::new(Duration::from_secs(1));
        sync.run(&mut rx, shutdown_rx, || std::future::ready(Ok(None)))
            .await;
        assert_eq!(sync.passes(), 0);
    }

    #[tokio::test]
    async fn test_loop_exits_on_shutdown_already_requested() {
        let (_tx, mut rx) = mpsc::channel::<()>(1);
        let (_shutdown_tx, shutdown_rx) = watch::channel(true);

        let mut sync = SyncLoop::new(Duration::from_secs(1));
        sync.run(&mut rx, shutdown_rx, || std::future::ready(Ok(None)))
            .await;
        assert_eq!(sync.passes(), 0);
    }

    #[tokio::test]
    async fn test_config_watcher_reports_document_change() {
        let tmp = tempfile::TempDir::new().unwrap();
        let file = tmp.path().join("config.json");
        std::fs::write(&file, "[]").unwrap();

        let mut watcher = ConfigWatcher::start(tmp.path(), Duration::from_millis(50)).unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        std::fs::write(&file, r#"[{"domain_names": ["svc.example.com"]}]"#).unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), watcher.events().recv()).await;
        assert!(matches!(event, Ok(Some(()))));
    }
}
