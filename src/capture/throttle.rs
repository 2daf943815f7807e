use crate::capture::frame_source::FrameSource;
use crate::detector::DetectionBackend;
use crate::error::Error;
use crate::messaging::AlertEvents;
use crate::models::{DetectionRecord, ModelSelection};
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Receives the normalized records of each completed detection cycle
#[async_trait]
pub trait DetectionSink: Send + Sync {
    async fn handle_detections(&self, records: Vec<DetectionRecord>);
}

/// What a single tick did
#[derive(Debug)]
pub enum TickOutcome {
    /// A capture-and-detect cycle was started
    Dispatched(JoinHandle<()>),
    /// A request was already outstanding; the tick was dropped
    Skipped,
    /// The session has been stopped
    Inactive,
}

#[derive(Debug, Default)]
struct CaptureCounters {
    dispatched: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    discarded: AtomicU64,
}

/// Point-in-time copy of a session's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub dispatched: u64,
    pub skipped: u64,
    pub failed: u64,
    /// Results that arrived after the session was stopped
    pub discarded: u64,
}

/// Starts capture sessions against one detection backend and sink
#[derive(Clone)]
pub struct CaptureThrottle {
    backend: Arc<dyn DetectionBackend>,
    sink: Arc<dyn DetectionSink>,
    events: Option<AlertEvents>,
    camera_name: String,
}

impl CaptureThrottle {
    pub fn new(
        backend: Arc<dyn DetectionBackend>,
        sink: Arc<dyn DetectionSink>,
        camera_name: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            sink,
            events: None,
            camera_name: camera_name.into(),
        }
    }

    /// Publish capture lifecycle events through this helper
    pub fn with_events(mut self, events: AlertEvents) -> Self {
        self.events = Some(events);
        self
    }

    /// Open the frame source and begin ticking every `period`.
    ///
    /// A zero period or a media error is returned to the caller and no
    /// session is created.
    pub async fn start(
        &self,
        period: Duration,
        mut source: Box<dyn FrameSource>,
        model_selection: ModelSelection,
    ) -> Result<Arc<CaptureSession>> {
        if period.is_zero() {
            return Err(Error::Config("Capture period must be greater than zero".to_string()).into());
        }
        source.open().await?;

        let session = Arc::new(CaptureSession {
            id: Uuid::new_v4(),
            model_selection,
            camera_name: self.camera_name.clone(),
            source: Mutex::new(source),
            backend: self.backend.clone(),
            sink: self.sink.clone(),
            events: self.events.clone(),
            in_flight: Arc::new(Semaphore::new(1)),
            cancel: CancellationToken::new(),
            stopped: AtomicBool::new(false),
            counters: CaptureCounters::default(),
        });

        spawn_timer(Arc::downgrade(&session), session.cancel.clone(), period);

        info!(
            "Capture session {} started ({}, every {:?})",
            session.id, session.model_selection, period
        );
        if let Some(events) = &session.events {
            if let Err(e) = events.capture_started(session.id, &session.model_selection).await {
                warn!("Failed to publish capture start: {}", e);
            }
        }

        Ok(session)
    }
}

fn spawn_timer(session: Weak<CaptureSession>, cancel: CancellationToken, period: Duration) {
    tokio::spawn(async move {
        // First tick after one full period
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let Some(session) = session.upgrade() else { break };
                    if let TickOutcome::Skipped = session.tick() {
                        debug!("Capture session {}: request in flight, tick dropped", session.id);
                    }
                }
            }
        }
    });
}

/// One active camera-to-detector binding
pub struct CaptureSession {
    id: Uuid,
    model_selection: ModelSelection,
    camera_name: String,
    source: Mutex<Box<dyn FrameSource>>,
    backend: Arc<dyn DetectionBackend>,
    sink: Arc<dyn DetectionSink>,
    events: Option<AlertEvents>,
    /// Single-flight guard: one permit, held for the whole cycle
    in_flight: Arc<Semaphore>,
    cancel: CancellationToken,
    stopped: AtomicBool,
    counters: CaptureCounters,
}

impl CaptureSession {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    pub fn model_selection(&self) -> &ModelSelection {
        &self.model_selection
    }

    pub fn in_flight(&self) -> bool {
        self.is_active() && self.in_flight.available_permits() == 0
    }

    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            dispatched: self.counters.dispatched.load(Ordering::Relaxed),
            skipped: self.counters.skipped.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            discarded: self.counters.discarded.load(Ordering::Relaxed),
        }
    }

    /// Run one scheduler tick. Never queues: a busy session drops the tick.
    pub fn tick(self: &Arc<Self>) -> TickOutcome {
        if !self.is_active() {
            return TickOutcome::Inactive;
        }

        let permit = match self.in_flight.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                self.counters.skipped.fetch_add(1, Ordering::Relaxed);
                return TickOutcome::Skipped;
            }
        };

        self.counters.dispatched.fetch_add(1, Ordering::Relaxed);
        let session = self.clone();
        TickOutcome::Dispatched(tokio::spawn(async move {
            // Released on every exit path, including a panic in the cycle
            let _permit = permit;
            session.run_cycle().await;
        }))
    }

    async fn run_cycle(&self) {
        let records = match self.capture_and_detect().await {
            Ok(records) => records,
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                error!("Capture session {}: detection failed: {}", self.id, e);
                if let Some(events) = &self.events {
                    if let Err(e) = events.detection_failed(self.id, &e.to_string()).await {
                        warn!("Failed to publish detection failure: {}", e);
                    }
                }
                Vec::new()
            }
        };

        if !self.is_active() {
            self.counters.discarded.fetch_add(1, Ordering::Relaxed);
            debug!(
                "Capture session {} stopped, discarding {} records",
                self.id,
                records.len()
            );
            return;
        }

        if !records.is_empty() {
            self.sink.handle_detections(records).await;
        }
    }

    async fn capture_and_detect(&self) -> Result<Vec<DetectionRecord>> {
        // Give up the source as soon as stop() fires so it can be released
        let frame = {
            let mut source = self.source.lock().await;
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!("Capture session {}: frame grab cancelled", self.id);
                    return Ok(Vec::new());
                }
                frame = source.capture() => frame?,
            }
        };

        let response = self
            .backend
            .detect(&frame, &self.model_selection, &self.camera_name)
            .await?;

        Ok(response.into_records(&self.camera_name, Utc::now()))
    }

    /// Cancel the timer and release the media. Safe to call more than once.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        self.cancel.cancel();
        self.source.lock().await.release().await;

        info!("Capture session {} stopped", self.id);
        if let Some(events) = &self.events {
            if let Err(e) = events.capture_stopped(self.id).await {
                warn!("Failed to publish capture stop: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::EncodedFrame;
    use crate::detector::{DetectionResponse, ModelCatalog, RawDetection, SingleModelResponse};
    use crate::error::Error;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    struct FakeSource {
        fail_open: bool,
        released: Arc<AtomicBool>,
    }

    #[async_trait]
    impl FrameSource for FakeSource {
        fn name(&self) -> &str {
            "fake"
        }

        async fn open(&mut self) -> Result<()> {
            if self.fail_open {
                return Err(Error::Media("camera permission denied".into()).into());
            }
            Ok(())
        }

        async fn capture(&mut self) -> Result<EncodedFrame> {
            Ok(EncodedFrame::jpeg(vec![0xff, 0xd8]))
        }

        async fn release(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    /// Backend that blocks each call until the test lets it through
    struct GatedBackend {
        gate: Semaphore,
        started: Notify,
        calls: AtomicUsize,
        fail: AtomicBool,
    }

    impl GatedBackend {
        fn new(open: bool) -> Arc<Self> {
            Arc::new(Self {
                gate: Semaphore::new(if open { Semaphore::MAX_PERMITS } else { 0 }),
                started: Notify::new(),
                calls: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
            })
        }

        fn release_one(&self) {
            self.gate.add_permits(1);
        }
    }

    #[async_trait]
    impl DetectionBackend for GatedBackend {
        async fn detect(
            &self,
            _frame: &EncodedFrame,
            _selection: &ModelSelection,
            _camera_id: &str,
        ) -> Result<DetectionResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.started.notify_one();
            self.gate.acquire().await?.forget();

            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::Transport("connection reset".into()).into());
            }
            Ok(DetectionResponse::Single(SingleModelResponse {
                detections: vec![RawDetection {
                    class_name: "gun".into(),
                    confidence: 0.9,
                    bounding_box: None,
                }],
                image: None,
                model_used: Some("weapon".into()),
            }))
        }

        async fn history(&self, _limit: usize) -> Result<Vec<DetectionRecord>> {
            Ok(Vec::new())
        }

        async fn models(&self) -> Result<ModelCatalog> {
            Ok(ModelCatalog { models: vec![], current_model: None })
        }

        async fn switch_model(&self, model_name: &str) -> Result<String> {
            Ok(model_name.to_string())
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        batches: std::sync::Mutex<Vec<Vec<DetectionRecord>>>,
    }

    impl RecordingSink {
        fn total(&self) -> usize {
            self.batches.lock().unwrap().iter().map(Vec::len).sum()
        }
    }

    #[async_trait]
    impl DetectionSink for RecordingSink {
        async fn handle_detections(&self, records: Vec<DetectionRecord>) {
            self.batches.lock().unwrap().push(records);
        }
    }

    /// Source whose frame grab hangs until the session gives up on it
    struct StalledSource {
        grabbing: Arc<Notify>,
        released: Arc<AtomicBool>,
    }

    #[async_trait]
    impl FrameSource for StalledSource {
        fn name(&self) -> &str {
            "stalled"
        }

        async fn open(&mut self) -> Result<()> {
            Ok(())
        }

        async fn capture(&mut self) -> Result<EncodedFrame> {
            self.grabbing.notify_one();
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(EncodedFrame::jpeg(vec![0xff, 0xd8]))
        }

        async fn release(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    const IDLE_PERIOD: Duration = Duration::from_secs(3600);

    async fn start_session(
        backend: Arc<GatedBackend>,
        sink: Arc<RecordingSink>,
        period: Duration,
    ) -> (Arc<CaptureSession>, Arc<AtomicBool>) {
        let released = Arc::new(AtomicBool::new(false));
        let source = Box::new(FakeSource {
            fail_open: false,
            released: released.clone(),
        });
        let throttle = CaptureThrottle::new(backend, sink, "Lobby");
        let session = throttle
            .start(period, source, ModelSelection::default())
            .await
            .unwrap();
        (session, released)
    }

    #[tokio::test]
    async fn second_tick_is_dropped_while_request_outstanding() -> Result<()> {
        let backend = GatedBackend::new(false);
        let sink = Arc::new(RecordingSink::default());
        let (session, _) = start_session(backend.clone(), sink.clone(), IDLE_PERIOD).await;

        let TickOutcome::Dispatched(first) = session.tick() else {
            panic!("first tick should dispatch");
        };
        backend.started.notified().await;
        assert!(session.in_flight());

        assert!(matches!(session.tick(), TickOutcome::Skipped));
        assert!(matches!(session.tick(), TickOutcome::Skipped));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);

        backend.release_one();
        first.await?;
        assert!(!session.in_flight());
        assert_eq!(sink.total(), 1);

        let TickOutcome::Dispatched(next) = session.tick() else {
            panic!("tick after completion should dispatch");
        };
        backend.release_one();
        next.await?;
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
        assert_eq!(session.stats().skipped, 2);
        assert_eq!(session.stats().dispatched, 2);
        Ok(())
    }

    #[tokio::test]
    async fn failed_request_releases_the_guard() -> Result<()> {
        let backend = GatedBackend::new(true);
        backend.fail.store(true, Ordering::SeqCst);
        let sink = Arc::new(RecordingSink::default());
        let (session, _) = start_session(backend.clone(), sink.clone(), IDLE_PERIOD).await;

        let TickOutcome::Dispatched(handle) = session.tick() else {
            panic!("tick should dispatch");
        };
        handle.await?;
        assert_eq!(session.stats().failed, 1);
        assert_eq!(sink.total(), 0);

        backend.fail.store(false, Ordering::SeqCst);
        let TickOutcome::Dispatched(handle) = session.tick() else {
            panic!("guard should be free after a failure");
        };
        handle.await?;
        assert_eq!(sink.total(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn result_after_stop_is_discarded() -> Result<()> {
        let backend = GatedBackend::new(false);
        let sink = Arc::new(RecordingSink::default());
        let (session, released) = start_session(backend.clone(), sink.clone(), IDLE_PERIOD).await;

        let TickOutcome::Dispatched(handle) = session.tick() else {
            panic!("tick should dispatch");
        };
        backend.started.notified().await;

        session.stop().await;
        assert!(!session.is_active());
        assert!(!session.in_flight());
        assert!(released.load(Ordering::SeqCst));

        backend.release_one();
        handle.await?;
        assert_eq!(sink.total(), 0);
        assert_eq!(session.stats().discarded, 1);

        assert!(matches!(session.tick(), TickOutcome::Inactive));
        session.stop().await;
        Ok(())
    }

    #[tokio::test]
    async fn media_error_prevents_start() {
        let backend = GatedBackend::new(true);
        let sink = Arc::new(RecordingSink::default());
        let throttle = CaptureThrottle::new(backend.clone(), sink, "Lobby");
        let source = Box::new(FakeSource {
            fail_open: true,
            released: Arc::new(AtomicBool::new(false)),
        });

        let err = throttle
            .start(IDLE_PERIOD, source, ModelSelection::Fight)
            .await
            .err()
            .unwrap();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::Media(_))));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn timer_drives_ticks_until_stopped() {
        let backend = GatedBackend::new(true);
        let sink = Arc::new(RecordingSink::default());
        let (session, _) = start_session(backend.clone(), sink.clone(), Duration::from_millis(10)).await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        session.stop().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        let calls = backend.calls.load(Ordering::SeqCst);
        assert!(calls >= 1);
        assert!(sink.total() >= 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(backend.calls.load(Ordering::SeqCst), calls);
    }

    #[tokio::test]
    async fn zero_period_is_rejected_before_opening() {
        let backend = GatedBackend::new(true);
        let sink = Arc::new(RecordingSink::default());
        let throttle = CaptureThrottle::new(backend.clone(), sink, "Lobby");
        let source = Box::new(FakeSource {
            fail_open: true,
            released: Arc::new(AtomicBool::new(false)),
        });

        let err = throttle
            .start(Duration::ZERO, source, ModelSelection::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::Config(_))));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stop_releases_source_during_slow_frame_grab() -> Result<()> {
        let backend = GatedBackend::new(true);
        let sink = Arc::new(RecordingSink::default());
        let grabbing = Arc::new(Notify::new());
        let released = Arc::new(AtomicBool::new(false));
        let source = Box::new(StalledSource {
            grabbing: grabbing.clone(),
            released: released.clone(),
        });
        let throttle = CaptureThrottle::new(backend.clone(), sink.clone(), "Lobby");
        let session = throttle.start(IDLE_PERIOD, source, ModelSelection::Dual).await?;

        let TickOutcome::Dispatched(handle) = session.tick() else {
            panic!("tick should dispatch");
        };
        grabbing.notified().await;

        tokio::time::timeout(Duration::from_millis(500), session.stop()).await?;
        assert!(released.load(Ordering::SeqCst));

        handle.await?;
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
        assert_eq!(session.stats().failed, 0);
        assert_eq!(session.stats().discarded, 1);
        assert_eq!(sink.total(), 0);
        Ok(())
    }
}
