// Copyright 2025 Tomoki Hayashi
// MIT License (https://opensource.org/licenses/MIT)

//! Batch tag scheduler.
//!
//! A batch run snapshots the queueable images in scope into an immutable
//! work list and starts a fixed pool of worker tasks. Each worker claims the
//! next index from a shared cursor, awaits the caption backend, writes the
//! result back through the store, and claims again until the list is
//! exhausted or the run is cancelled.
//!
//! Cancellation is cooperative: every run carries an epoch, and `pause()`
//! advances it. In-flight backend calls always finish and write their result;
//! workers only check the epoch before claiming.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::broadcast;
use tokio::task::{JoinHandle, JoinSet};

use crate::backend::CaptionBackend;
use crate::caption::BlockedWords;
use crate::config::Config;
use crate::model::{ImageId, ImageStatus, ProjectId, Scope};
use crate::store::{StoreHandle, WorkItem};

const EVENT_CAPACITY: usize = 256;

/// Epoch-based cancellation token.
/// A worker keeps claiming only while the epoch equals its run id.
struct RunEpoch(AtomicU64);

impl RunEpoch {
    fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    fn advance(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Close `run` if it is still current. Only one caller wins.
    fn close(&self, run: u64) -> bool {
        self.0
            .compare_exchange(run, run + 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

/// Why a run stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunEnd {
    Exhausted,
    Paused,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SchedulerEvent {
    RunStarted {
        run: u64,
        queued: usize,
    },
    ItemStarted {
        project_id: ProjectId,
        image_id: ImageId,
    },
    ItemFinished {
        project_id: ProjectId,
        image_id: ImageId,
        status: ImageStatus,
    },
    RunFinished {
        run: u64,
        reason: RunEnd,
    },
}

struct Shared {
    store: StoreHandle,
    backend: Arc<dyn CaptionBackend>,
    settings: RwLock<Config>,
    epoch: RunEpoch,
    processing: AtomicBool,
    in_flight: AtomicUsize,
    events: broadcast::Sender<SchedulerEvent>,
}

/// Decrements the in-flight counter when a backend call ends.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Shared {
    fn emit(&self, event: SchedulerEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn settings(&self) -> Config {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn end_run(&self, run: u64, reason: RunEnd) -> bool {
        if !self.epoch.close(run) {
            return false;
        }
        self.processing.store(false, Ordering::SeqCst);
        tracing::info!(run, ?reason, "batch run finished");
        self.emit(SchedulerEvent::RunFinished { run, reason });
        true
    }

    /// Caption one image and write the outcome back. Returns the final status,
    /// or `None` if the image no longer exists.
    async fn process(&self, item: WorkItem) -> Option<ImageStatus> {
        let WorkItem {
            project_id,
            image_id,
        } = item;
        let payload = self.store.update(|s| {
            let payload = s.image(project_id, image_id)?.payload.clone();
            s.update_status(project_id, image_id, ImageStatus::Loading, None, None);
            Some(payload)
        })?;
        self.emit(SchedulerEvent::ItemStarted {
            project_id,
            image_id,
        });

        let settings = self.settings();
        let result = {
            let _guard = InFlight::enter(&self.in_flight);
            self.backend.generate_caption(&payload, &settings).await
        };

        let status = match result {
            Ok(text) => {
                let caption = BlockedWords::new(&settings.blocked_words).apply(&text);
                self.store.update(|s| {
                    s.update_status(project_id, image_id, ImageStatus::Success, None, Some(caption))
                });
                ImageStatus::Success
            }
            Err(err) => {
                tracing::warn!(image = %payload.name, error = %err, "caption failed");
                self.store.update(|s| {
                    s.update_status(
                        project_id,
                        image_id,
                        ImageStatus::Error,
                        Some(err.to_string()),
                        None,
                    )
                });
                ImageStatus::Error
            }
        };
        self.emit(SchedulerEvent::ItemFinished {
            project_id,
            image_id,
            status,
        });
        Some(status)
    }
}

async fn worker_loop(
    shared: Arc<Shared>,
    queue: Arc<[WorkItem]>,
    cursor: Arc<AtomicUsize>,
    remaining: Arc<AtomicUsize>,
    run: u64,
) {
    while shared.epoch.current() == run {
        let idx = cursor.fetch_add(1, Ordering::SeqCst);
        let Some(item) = queue.get(idx).copied() else {
            break;
        };
        tracing::debug!(run, idx, image = %item.image_id, "claimed");
        shared.process(item).await;
    }
    if remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
        shared.end_run(run, RunEnd::Exhausted);
    }
}

/// Handle to a started run. Dropping it detaches the workers; they keep
/// running until the run ends.
pub struct BatchRun {
    run: u64,
    queued: usize,
    cursor: Arc<AtomicUsize>,
    tasks: JoinSet<()>,
}

impl BatchRun {
    pub fn run(&self) -> u64 {
        self.run
    }

    pub fn queued(&self) -> usize {
        self.queued
    }

    /// Wait for every worker of this run to exit.
    pub async fn wait(mut self) -> RunEnd {
        while self.tasks.join_next().await.is_some() {}
        if self.cursor.load(Ordering::SeqCst) >= self.queued {
            RunEnd::Exhausted
        } else {
            RunEnd::Paused
        }
    }
}

impl Drop for BatchRun {
    fn drop(&mut self) {
        self.tasks.detach_all();
    }
}

#[derive(Clone)]
pub struct TagScheduler {
    shared: Arc<Shared>,
}

impl TagScheduler {
    pub fn new(store: StoreHandle, backend: Arc<dyn CaptionBackend>, settings: Config) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                store,
                backend,
                settings: RwLock::new(settings),
                epoch: RunEpoch::new(),
                processing: AtomicBool::new(false),
                in_flight: AtomicUsize::new(0),
                events,
            }),
        }
    }

    pub fn store(&self) -> &StoreHandle {
        &self.shared.store
    }

    pub fn settings(&self) -> Config {
        self.shared.settings()
    }

    /// Edit settings in place. Values are clamped afterwards; running workers
    /// see the change on their next claim.
    pub fn update_settings(&self, f: impl FnOnce(&mut Config)) {
        let mut settings = self
            .shared
            .settings
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut settings);
        settings.clamp_values();
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.shared.events.subscribe()
    }

    pub fn is_processing(&self) -> bool {
        self.shared.processing.load(Ordering::SeqCst)
    }

    /// Backend calls currently awaiting a response.
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::SeqCst)
    }

    /// Caption a single image, independently of any batch run.
    pub async fn process_single(&self, project_id: ProjectId, image_id: ImageId) -> Option<ImageStatus> {
        self.shared
            .process(WorkItem {
                project_id,
                image_id,
            })
            .await
    }

    /// [`Self::process_single`] on a background task.
    pub fn spawn_single(&self, project_id: ProjectId, image_id: ImageId) -> JoinHandle<Option<ImageStatus>> {
        let scheduler = self.clone();
        tokio::spawn(async move { scheduler.process_single(project_id, image_id).await })
    }

    /// Start a batch run over the idle and errored images in `scope`.
    ///
    /// Without credentials, `on_missing_credentials` is called and nothing
    /// else happens. A run already in progress is closed first. Must be
    /// called from within a tokio runtime.
    pub fn start_batch(&self, scope: Scope, on_missing_credentials: impl FnOnce()) -> Option<BatchRun> {
        let settings = self.settings();
        if !settings.has_credentials() {
            on_missing_credentials();
            return None;
        }
        let shared = &self.shared;
        if shared.processing.load(Ordering::SeqCst) {
            shared.end_run(shared.epoch.current(), RunEnd::Paused);
        }

        let queue: Arc<[WorkItem]> = shared.store.read(|s| s.pending_queue(scope)).into();
        let run = shared.epoch.advance();
        let cursor = Arc::new(AtomicUsize::new(0));
        let mut tasks = JoinSet::new();
        tracing::info!(run, queued = queue.len(), "batch run started");
        shared.emit(SchedulerEvent::RunStarted {
            run,
            queued: queue.len(),
        });

        if queue.is_empty() {
            shared.end_run(run, RunEnd::Exhausted);
        } else {
            shared.processing.store(true, Ordering::SeqCst);
            let workers = settings.worker_count().min(queue.len());
            let remaining = Arc::new(AtomicUsize::new(workers));
            for _ in 0..workers {
                tasks.spawn(worker_loop(
                    Arc::clone(shared),
                    Arc::clone(&queue),
                    Arc::clone(&cursor),
                    Arc::clone(&remaining),
                    run,
                ));
            }
        }

        Some(BatchRun {
            run,
            queued: queue.len(),
            cursor,
            tasks,
        })
    }

    /// Stop claiming new work. In-flight calls finish and write their result.
    /// Returns false if no run was active.
    pub fn pause(&self) -> bool {
        let shared = &self.shared;
        if !shared.processing.load(Ordering::SeqCst) {
            return false;
        }
        shared.end_run(shared.epoch.current(), RunEnd::Paused)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Semaphore;

    use super::*;
    use crate::backend::CaptionError;
    use crate::model::ImagePayload;
    use crate::store::{ImportTarget, ProjectStore};

    fn settings(concurrency: usize) -> Config {
        Config {
            api_key: "test-key".into(),
            concurrency,
            ..Default::default()
        }
    }

    async fn store_with(count: usize) -> StoreHandle {
        let store = StoreHandle::new(ProjectStore::new());
        let files = (0..count)
            .map(|i| ImagePayload::new(format!("img{i}.png"), "image/png", vec![0u8; 4]))
            .collect();
        store
            .add_files(files, ImportTarget::Create { name: None }, 50)
            .await
            .unwrap();
        store
    }

    fn count(store: &StoreHandle, status: ImageStatus) -> usize {
        store.read(|s| s.projects().iter().map(|p| p.count(status)).sum())
    }

    async fn count_started(events: &mut broadcast::Receiver<SchedulerEvent>, n: usize) {
        let mut seen = 0;
        while seen < n {
            match events.recv().await {
                Ok(SchedulerEvent::ItemStarted { .. }) => seen += 1,
                Ok(_) => {}
                Err(err) => panic!("event stream broke: {err}"),
            }
        }
    }

    /// Wait until `n` more items have been claimed.
    async fn wait_started(events: &mut broadcast::Receiver<SchedulerEvent>, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), count_started(events, n))
            .await
            .expect("items were not claimed in time");
    }

    /// Succeeds after a short delay and records peak `loading` count.
    struct SlowBackend {
        store: StoreHandle,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl CaptionBackend for SlowBackend {
        async fn generate_caption(&self, payload: &ImagePayload, _: &Config) -> Result<String, CaptionError> {
            let loading = count(&self.store, ImageStatus::Loading);
            self.peak.fetch_max(loading, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            if payload.name.contains("img3") {
                return Err(CaptionError::Truncated);
            }
            Ok("a username, red hair, watermark".to_string())
        }
    }

    struct PendingBackend;

    #[async_trait]
    impl CaptionBackend for PendingBackend {
        async fn generate_caption(&self, _: &ImagePayload, _: &Config) -> Result<String, CaptionError> {
            std::future::pending().await
        }
    }

    struct GatedBackend(Arc<Semaphore>);

    #[async_trait]
    impl CaptionBackend for GatedBackend {
        async fn generate_caption(&self, payload: &ImagePayload, _: &Config) -> Result<String, CaptionError> {
            let _permit = self
                .0
                .acquire()
                .await
                .map_err(|e| CaptionError::Other(e.to_string()))?;
            Ok(format!("tags for {}", payload.name))
        }
    }

    #[tokio::test]
    async fn test_full_run_respects_concurrency() {
        let store = store_with(10).await;
        let backend = Arc::new(SlowBackend {
            store: store.clone(),
            peak: AtomicUsize::new(0),
        });
        let scheduler = TagScheduler::new(store.clone(), backend.clone(), settings(3));
        let mut events = scheduler.subscribe();

        let run = scheduler.start_batch(Scope::All, || panic!("credentials set")).unwrap();
        assert_eq!(run.queued(), 10);
        assert!(scheduler.is_processing());
        assert_eq!(run.wait().await, RunEnd::Exhausted);

        assert!(!scheduler.is_processing());
        assert_eq!(count(&store, ImageStatus::Success), 9);
        assert_eq!(count(&store, ImageStatus::Error), 1);
        let peak = backend.peak.load(Ordering::SeqCst);
        assert!((1..=3).contains(&peak), "peak loading was {peak}");

        let snapshot = store.snapshot();
        let failed = snapshot[0].images.iter().find(|i| i.name() == "img3.png").unwrap();
        assert_eq!(
            failed.error_msg.as_deref(),
            Some("Response Truncated (Max Tokens). Try increasing the limit or shortening the prompt.")
        );
        let ok = snapshot[0].images.iter().find(|i| i.name() == "img0.png").unwrap();
        assert_eq!(ok.caption, "red hair");

        let mut finished = None;
        while let Ok(event) = events.try_recv() {
            if let SchedulerEvent::RunFinished { reason, .. } = event {
                finished = Some(reason);
            }
        }
        assert_eq!(finished, Some(RunEnd::Exhausted));
    }

    #[tokio::test]
    async fn test_pause_leaves_unclaimed_idle() {
        let store = store_with(10).await;
        let scheduler = TagScheduler::new(store.clone(), Arc::new(PendingBackend), settings(2));

        let mut events = scheduler.subscribe();
        let _run = scheduler.start_batch(Scope::All, || {}).unwrap();
        wait_started(&mut events, 2).await;
        assert!(scheduler.pause());
        assert!(!scheduler.is_processing());
        let more = tokio::time::timeout(Duration::from_millis(50), count_started(&mut events, 1)).await;
        assert!(more.is_err(), "an item was claimed after pause");

        assert_eq!(count(&store, ImageStatus::Loading), 2);
        assert_eq!(count(&store, ImageStatus::Idle), 8);

        let resumed = scheduler.start_batch(Scope::All, || {}).unwrap();
        assert_eq!(resumed.queued(), 8);
    }

    #[tokio::test]
    async fn test_pause_lets_in_flight_finish() {
        let store = store_with(10).await;
        let gate = Arc::new(Semaphore::new(0));
        let scheduler = TagScheduler::new(store.clone(), Arc::new(GatedBackend(gate.clone())), settings(2));

        let mut events = scheduler.subscribe();
        let run = scheduler.start_batch(Scope::All, || {}).unwrap();
        wait_started(&mut events, 2).await;
        assert!(scheduler.pause());
        gate.add_permits(10);

        assert_eq!(run.wait().await, RunEnd::Paused);
        assert_eq!(count(&store, ImageStatus::Success), 2);
        assert_eq!(count(&store, ImageStatus::Idle), 8);
        assert!(!scheduler.pause());
    }

    #[tokio::test]
    async fn test_missing_credentials_changes_nothing() {
        let store = store_with(3).await;
        let scheduler = TagScheduler::new(store.clone(), Arc::new(PendingBackend), Config::default());
        let revision = store.revision();

        let mut called = false;
        assert!(scheduler.start_batch(Scope::All, || called = true).is_none());
        assert!(called);
        assert!(!scheduler.is_processing());
        assert_eq!(store.revision(), revision);
    }

    #[tokio::test]
    async fn test_empty_queue_finishes_immediately() {
        let store = StoreHandle::new(ProjectStore::new());
        let scheduler = TagScheduler::new(store, Arc::new(PendingBackend), settings(3));
        let run = scheduler.start_batch(Scope::All, || {}).unwrap();
        assert_eq!(run.queued(), 0);
        assert!(!scheduler.is_processing());
        assert_eq!(run.wait().await, RunEnd::Exhausted);
    }

    #[tokio::test]
    async fn test_process_single_and_missing_image() {
        let store = store_with(1).await;
        let gate = Arc::new(Semaphore::new(1));
        let scheduler = TagScheduler::new(store.clone(), Arc::new(GatedBackend(gate)), settings(1));
        let (pid, iid) = store.read(|s| (s.projects()[0].id, s.projects()[0].images[0].id));

        assert_eq!(scheduler.process_single(pid, iid).await, Some(ImageStatus::Success));
        assert_eq!(store.read(|s| s.image(pid, iid).unwrap().caption.clone()), "tags for img0.png");
        assert_eq!(scheduler.process_single(pid, ImageId::new()).await, None);
    }

    #[tokio::test]
    async fn test_update_settings_clamps() {
        let store = StoreHandle::new(ProjectStore::new());
        let scheduler = TagScheduler::new(store, Arc::new(PendingBackend), settings(3));
        scheduler.update_settings(|s| s.concurrency = 99);
        assert_eq!(scheduler.settings().concurrency, 10);
    }
}
