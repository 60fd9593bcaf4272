//! Recording session state machine
//!
//! The public-facing controller over one microphone capture lifecycle:
//! `start` acquires the microphone, wires up the analyzer and a capture
//! strategy, and begins metering; `stop` releases everything. In between,
//! the session self-heals: the recognition engine is recreated whenever it
//! errors recoverably or ends on its own, and after enough consecutive
//! restarts the whole resource set is rebuilt from scratch, microphone
//! reacquisition included, so repeated quick restarts cannot accumulate
//! leaked handles. The caller sees `is_recording == true` throughout.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use super::analyzer::AudioAnalyzer;
use super::capture::Microphone;
use super::recognition::{
    translate_results, EngineErrorKind, EngineEvent, EngineOptions, EngineProvider, ErrorInfo,
    TranscriptResult, UnsupportedEngineProvider,
};
use super::recorder::{ChunkRecorder, ChunkTranscriber, PhraseRotation};
use super::resources::ResourceSet;
use crate::config::Tuning;
use crate::{Error, Result};

/// Level-meter tick cadence (~60Hz)
const METER_INTERVAL: Duration = Duration::from_millis(16);

/// Lifecycle states of a recording session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Starting,
    Active,
    Restarting,
    Stopping,
    Error,
}

/// Builds a [`RecordingSession`]
pub struct SessionBuilder {
    mic: Arc<dyn Microphone>,
    provider: Arc<dyn EngineProvider>,
    transcriber: Arc<dyn ChunkTranscriber>,
    options: EngineOptions,
    tuning: Tuning,
}

impl SessionBuilder {
    #[must_use]
    pub fn new(mic: Arc<dyn Microphone>) -> Self {
        Self {
            mic,
            provider: Arc::new(UnsupportedEngineProvider),
            transcriber: Arc::new(PhraseRotation),
            options: EngineOptions::default(),
            tuning: Tuning::default(),
        }
    }

    /// Continuous recognition capability for this host
    #[must_use]
    pub fn engine_provider(mut self, provider: Arc<dyn EngineProvider>) -> Self {
        self.provider = provider;
        self
    }

    /// Transcriber used by the chunked fallback
    #[must_use]
    pub fn chunk_transcriber(mut self, transcriber: Arc<dyn ChunkTranscriber>) -> Self {
        self.transcriber = transcriber;
        self
    }

    /// Engine options
    #[must_use]
    pub fn options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    /// Restart-policy tunables
    #[must_use]
    pub fn tuning(mut self, tuning: Tuning) -> Self {
        self.tuning = tuning;
        self
    }

    /// Build the session; transcripts flow to `transcripts`
    #[must_use]
    pub fn build(self, transcripts: UnboundedSender<TranscriptResult>) -> RecordingSession {
        RecordingSession {
            ctx: Arc::new(SessionContext {
                mic: self.mic,
                provider: self.provider,
                transcriber: self.transcriber,
                options: self.options,
                tuning: self.tuning,
                transcripts,
                resources: Mutex::new(ResourceSet::new()),
                analyzer: Mutex::new(None),
                state: Mutex::new(SessionState::Idle),
                is_recording: AtomicBool::new(false),
                audio_level: Mutex::new(0.0),
                last_error: Mutex::new(None),
                cycle_count: AtomicU32::new(0),
                generation: AtomicU64::new(0),
            }),
        }
    }
}

/// Shared state read by every spawned task
///
/// The single source of truth across asynchronous boundaries; callbacks
/// never rely on captured copies of these flags.
struct SessionContext {
    mic: Arc<dyn Microphone>,
    provider: Arc<dyn EngineProvider>,
    transcriber: Arc<dyn ChunkTranscriber>,
    options: EngineOptions,
    tuning: Tuning,
    transcripts: UnboundedSender<TranscriptResult>,

    resources: Mutex<ResourceSet>,
    analyzer: Mutex<Option<AudioAnalyzer>>,
    state: Mutex<SessionState>,
    is_recording: AtomicBool,
    audio_level: Mutex<f32>,
    last_error: Mutex<Option<ErrorInfo>>,
    cycle_count: AtomicU32,
    generation: AtomicU64,
}

/// A microphone recording session
pub struct RecordingSession {
    ctx: Arc<SessionContext>,
}

impl RecordingSession {
    /// Whether the session is recording (stays true through auto-recovery)
    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.ctx.is_recording.load(Ordering::SeqCst)
    }

    /// Current audio level in `[0, 1]`
    #[must_use]
    pub fn audio_level(&self) -> f32 {
        self.ctx.audio_level.lock().map(|l| *l).unwrap_or(0.0)
    }

    /// Most recent surfaced error
    #[must_use]
    pub fn last_error(&self) -> Option<ErrorInfo> {
        self.ctx.last_error.lock().ok().and_then(|e| e.clone())
    }

    /// Consecutive engine restarts since the last fresh start or rebuild
    #[must_use]
    pub fn cycle_count(&self) -> u32 {
        self.ctx.cycle_count.load(Ordering::SeqCst)
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.ctx
            .state
            .lock()
            .map_or(SessionState::Idle, |s| *s)
    }

    /// Inspect the resource set (held under lock for the duration of `f`)
    pub fn with_resources<R>(&self, f: impl FnOnce(&ResourceSet) -> R) -> R {
        let res = self
            .ctx
            .resources
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&res)
    }

    /// Begin recording; no-op when already recording
    ///
    /// # Errors
    ///
    /// Returns error when the microphone is denied or the capture path
    /// cannot start; all partially-acquired resources are released first
    pub async fn start(&self) -> Result<()> {
        let ctx = &self.ctx;

        if ctx.is_recording.load(Ordering::SeqCst) {
            return Ok(());
        }

        set_state(ctx, SessionState::Starting);
        set_last_error(ctx, None);

        // A fresh start tears down the analyzer graph too; a start issued
        // mid-recovery keeps it (and the cycle accounting) alive.
        if ctx.cycle_count.load(Ordering::SeqCst) == 0 {
            teardown(ctx, true);
        } else {
            teardown(ctx, false);
        }

        let stream = match ctx.mic.open().await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(error = %e, "microphone access failed");
                set_last_error(
                    ctx,
                    Some(ErrorInfo {
                        kind: EngineErrorKind::NotAllowed,
                        message: "Microphone access denied or not available".to_string(),
                    }),
                );
                teardown(ctx, true);
                set_state(ctx, SessionState::Error);
                return Err(e);
            }
        };

        if let Ok(mut res) = ctx.resources.lock() {
            res.stream = Some(Arc::clone(&stream));
        }

        if let Ok(mut analyzer) = ctx.analyzer.lock() {
            let reusable = analyzer.as_ref().is_some_and(|a| !a.is_closed());
            if !reusable {
                *analyzer = Some(AudioAnalyzer::setup(&stream));
            }
        }

        if let Err(e) = spawn_capture(ctx) {
            tracing::error!(error = %e, "capture path failed to start");
            set_last_error(
                ctx,
                Some(ErrorInfo {
                    kind: EngineErrorKind::Other("start-failed".to_string()),
                    message: e.to_string(),
                }),
            );
            teardown(ctx, true);
            set_state(ctx, SessionState::Error);
            return Err(e);
        }

        spawn_meter(ctx);

        ctx.is_recording.store(true, Ordering::SeqCst);
        set_state(ctx, SessionState::Active);
        tracing::info!("recording started");
        Ok(())
    }

    /// Stop recording and release every resource
    ///
    /// Safe to call from any state, including before any `start`.
    pub fn stop(&self) {
        let ctx = &self.ctx;

        set_state(ctx, SessionState::Stopping);
        ctx.generation.fetch_add(1, Ordering::SeqCst);

        teardown(ctx, true);

        ctx.is_recording.store(false, Ordering::SeqCst);
        if let Ok(mut level) = ctx.audio_level.lock() {
            *level = 0.0;
        }
        set_state(ctx, SessionState::Idle);
        tracing::info!("recording stopped");
    }
}

impl Drop for RecordingSession {
    fn drop(&mut self) {
        self.stop();
    }
}

fn set_state(ctx: &SessionContext, state: SessionState) {
    if let Ok(mut s) = ctx.state.lock() {
        *s = state;
    }
}

fn set_last_error(ctx: &SessionContext, error: Option<ErrorInfo>) {
    if let Ok(mut e) = ctx.last_error.lock() {
        *e = error;
    }
}

/// Release the resource set; `close_analyzer` also tears the graph down
fn teardown(ctx: &SessionContext, close_analyzer: bool) {
    let mut res = ctx
        .resources
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);

    res.reset(|| {
        if !close_analyzer {
            return;
        }
        if let Ok(mut analyzer) = ctx.analyzer.lock() {
            if let Some(a) = analyzer.as_mut() {
                a.cleanup();
            }
            *analyzer = None;
        }
    });
}

/// Build and start a capture strategy, plus its event pump
///
/// Exactly one of the engine and the fallback recorder ends up live.
fn spawn_capture(ctx: &Arc<SessionContext>) -> Result<()> {
    let generation = ctx.generation.fetch_add(1, Ordering::SeqCst) + 1;
    let (events_tx, events_rx) = unbounded_channel();

    {
        let mut res = ctx
            .resources
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let stream = res
            .stream
            .as_ref()
            .map(Arc::clone)
            .ok_or_else(|| Error::Recognition("no microphone stream".to_string()))?;

        match ctx
            .provider
            .create(Arc::clone(&stream), &ctx.options, events_tx.clone())
        {
            Some(mut engine) => {
                engine.start()?;
                res.engine = Some(engine);
                res.recorder = None;
                tracing::debug!("continuous recognition engine selected");
            }
            None => {
                let mut recorder =
                    ChunkRecorder::new(stream, Arc::clone(&ctx.transcriber), events_tx);
                recorder.start();
                res.recorder = Some(recorder);
                res.engine = None;
                tracing::info!("continuous recognition unsupported, using chunked recorder");
            }
        }

        let pump_ctx = Arc::clone(ctx);
        res.event_pump = Some(tokio::spawn(async move {
            pump_events(pump_ctx, events_rx, generation).await;
        }));
    }

    Ok(())
}

/// Spawn the level-meter loop
fn spawn_meter(ctx: &Arc<SessionContext>) {
    let meter_ctx = Arc::clone(ctx);
    let handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(METER_INTERVAL);
        loop {
            interval.tick().await;

            if !meter_ctx.is_recording.load(Ordering::SeqCst) {
                continue;
            }

            let Some(stream) = meter_ctx
                .resources
                .lock()
                .ok()
                .and_then(|res| res.stream.as_ref().map(Arc::clone))
            else {
                continue;
            };

            let level = {
                let Ok(mut analyzer) = meter_ctx.analyzer.lock() else {
                    continue;
                };
                let Some(a) = analyzer.as_mut() else {
                    continue;
                };
                a.update(stream.as_ref())
            };

            if let Ok(mut current) = meter_ctx.audio_level.lock() {
                *current = level;
            }
        }
    });

    if let Ok(mut res) = ctx.resources.lock() {
        res.meter_task = Some(handle);
    }
}

/// Consume native engine events for one engine generation
///
/// Events from a superseded engine are discarded so a stray late event is
/// never attributed to the new one.
async fn pump_events(
    ctx: Arc<SessionContext>,
    mut events: UnboundedReceiver<EngineEvent>,
    generation: u64,
) {
    while let Some(event) = events.recv().await {
        if ctx.generation.load(Ordering::SeqCst) != generation {
            break;
        }

        match event {
            EngineEvent::Started => {
                tracing::debug!("recognition started");
            }
            EngineEvent::Result {
                start_index,
                segments,
            } => {
                translate_results(start_index, &segments, |result| {
                    let _ = ctx.transcripts.send(result);
                });
            }
            EngineEvent::Error { kind, message } => {
                handle_engine_error(&ctx, kind, message);
            }
            EngineEvent::End => {
                handle_engine_end(&ctx);
            }
        }
    }
}

fn handle_engine_error(ctx: &Arc<SessionContext>, kind: EngineErrorKind, message: String) {
    tracing::warn!(kind = %kind, message = %message, "recognition error");

    let recoverable = kind.is_recoverable();
    set_last_error(ctx, Some(ErrorInfo { kind, message }));

    if recoverable && ctx.is_recording.load(Ordering::SeqCst) {
        set_state(ctx, SessionState::Restarting);
        schedule_restart(ctx, ctx.tuning.error_restart(), RestartKind::Recreate);
    }
}

/// The engine stopped on its own while recording is still wanted
fn handle_engine_end(ctx: &Arc<SessionContext>) {
    if !ctx.is_recording.load(Ordering::SeqCst) {
        return;
    }

    let cycles = ctx.cycle_count.fetch_add(1, Ordering::SeqCst) + 1;
    tracing::debug!(cycles, "recognition ended while recording");

    {
        let mut res = ctx
            .resources
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(mut engine) = res.engine.take() {
            engine.abort();
        }
        if let Some(mut recorder) = res.recorder.take() {
            recorder.stop();
        }
    }

    let full_rebuild = cycles >= ctx.tuning.cycle_reset_threshold;
    let (delay, kind) = if full_rebuild {
        (ctx.tuning.full_reset_restart(), RestartKind::FullRebuild)
    } else {
        (ctx.tuning.end_restart(), RestartKind::Recreate)
    };

    set_state(ctx, SessionState::Restarting);
    schedule_restart(ctx, delay, kind);
}

#[derive(Debug, Clone, Copy)]
enum RestartKind {
    /// Abort and recreate the engine only
    Recreate,
    /// Tear the whole resource set down and rebuild it, microphone included
    FullRebuild,
}

/// Schedule a delayed restart, replacing any pending one
fn schedule_restart(ctx: &Arc<SessionContext>, delay: Duration, kind: RestartKind) {
    let restart_ctx = Arc::clone(ctx);

    let mut res = ctx
        .resources
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    res.cancel_restart_timer();

    res.restart_timer = Some(tokio::spawn(async move {
        tokio::time::sleep(delay).await;

        if !restart_ctx.is_recording.load(Ordering::SeqCst) {
            return;
        }

        // Drop our own handle first so a rebuild's reset does not abort us
        if let Ok(mut res) = restart_ctx.resources.lock() {
            let _ = res.restart_timer.take();
        }

        let outcome = match kind {
            RestartKind::Recreate => restart_engine(&restart_ctx),
            RestartKind::FullRebuild => full_rebuild(&restart_ctx).await,
        };

        match outcome {
            Ok(()) => set_state(&restart_ctx, SessionState::Active),
            Err(e) => {
                tracing::error!(error = %e, "recognition restart failed");
                set_last_error(
                    &restart_ctx,
                    Some(ErrorInfo {
                        kind: EngineErrorKind::Other("restart-failed".to_string()),
                        message: e.to_string(),
                    }),
                );
                set_state(&restart_ctx, SessionState::Error);
            }
        }
    }));
}

/// Abort whatever capture strategy is live and spawn a new one
fn restart_engine(ctx: &Arc<SessionContext>) -> Result<()> {
    {
        let mut res = ctx
            .resources
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(mut engine) = res.engine.take() {
            engine.abort();
        }
        if let Some(mut recorder) = res.recorder.take() {
            recorder.stop();
        }
        if let Some(pump) = res.event_pump.take() {
            pump.abort();
        }
    }

    spawn_capture(ctx)
}

/// Full resource rebuild: teardown, microphone reacquisition, fresh engine
///
/// Bounds resource accumulation from repeated quick restarts; resets the
/// cycle counter.
async fn full_rebuild(ctx: &Arc<SessionContext>) -> Result<()> {
    tracing::info!("restart threshold reached, rebuilding capture resources");

    teardown(ctx, true);
    ctx.cycle_count.store(0, Ordering::SeqCst);

    let stream = ctx.mic.open().await?;

    if let Ok(mut res) = ctx.resources.lock() {
        res.stream = Some(Arc::clone(&stream));
    }
    if let Ok(mut analyzer) = ctx.analyzer.lock() {
        *analyzer = Some(AudioAnalyzer::setup(&stream));
    }

    spawn_capture(ctx)?;
    spawn_meter(ctx);
    Ok(())
}
