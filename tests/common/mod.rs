//! Shared test doubles
//!
//! Scripted stand-ins for the external collaborators: microphone,
//! recognition engine, synthesizer, and conversation backend.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;

use voxlet::speech::Synthesizer;
use voxlet::voice::capture::{MicStream, Microphone};
use voxlet::voice::recognition::{
    EngineEvent, EngineOptions, EngineProvider, RecognitionEngine,
};
use voxlet::webhook::{Backend, ChatTurn};
use voxlet::{Error, Result};

/// Microphone double: grants or denies access, counts opens
pub struct TestMicrophone {
    deny: bool,
    amplitude: f32,
    opens: Arc<AtomicUsize>,
}

impl TestMicrophone {
    pub fn granting(amplitude: f32) -> Self {
        Self {
            deny: false,
            amplitude,
            opens: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn denying() -> Self {
        Self {
            deny: true,
            amplitude: 0.0,
            opens: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn open_count(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.opens)
    }
}

#[async_trait]
impl Microphone for TestMicrophone {
    async fn open(&self) -> Result<Arc<dyn MicStream>> {
        if self.deny {
            return Err(Error::Microphone("permission denied".to_string()));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(TestMicStream {
            amplitude: self.amplitude,
            stopped: AtomicBool::new(false),
        }))
    }
}

/// Stream double producing a constant-amplitude signal
pub struct TestMicStream {
    amplitude: f32,
    stopped: AtomicBool,
}

impl MicStream for TestMicStream {
    fn sample_rate(&self) -> u32 {
        16000
    }

    fn take_samples(&self) -> Vec<f32> {
        if self.is_stopped() {
            return Vec::new();
        }
        vec![self.amplitude; 1600]
    }

    fn latest_window(&self, len: usize) -> Vec<f32> {
        if self.is_stopped() {
            return Vec::new();
        }
        vec![self.amplitude; len]
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Control handle shared by scripted engines and their provider
#[derive(Default)]
pub struct EngineControl {
    created: AtomicUsize,
    aborted: AtomicUsize,
    senders: Mutex<Vec<UnboundedSender<EngineEvent>>>,
}

impl EngineControl {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn aborted(&self) -> usize {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Inject a native event into the most recently created engine
    pub fn send(&self, event: EngineEvent) {
        let senders = self.senders.lock().unwrap();
        let sender = senders.last().expect("no engine created yet");
        let _ = sender.send(event);
    }
}

/// Provider double handing out scripted engines
pub struct ScriptedEngineProvider {
    control: Arc<EngineControl>,
    supported: bool,
}

impl ScriptedEngineProvider {
    pub fn supported() -> (Arc<Self>, Arc<EngineControl>) {
        let control = Arc::new(EngineControl::default());
        (
            Arc::new(Self {
                control: Arc::clone(&control),
                supported: true,
            }),
            control,
        )
    }

    pub fn unsupported() -> Arc<Self> {
        Arc::new(Self {
            control: Arc::new(EngineControl::default()),
            supported: false,
        })
    }
}

impl EngineProvider for ScriptedEngineProvider {
    fn create(
        &self,
        _stream: Arc<dyn MicStream>,
        _options: &EngineOptions,
        events: UnboundedSender<EngineEvent>,
    ) -> Option<Box<dyn RecognitionEngine>> {
        if !self.supported {
            return None;
        }
        self.control.created.fetch_add(1, Ordering::SeqCst);
        self.control.senders.lock().unwrap().push(events);
        Some(Box::new(ScriptedEngine {
            control: Arc::clone(&self.control),
        }))
    }
}

/// Engine double; events are injected through [`EngineControl`]
pub struct ScriptedEngine {
    control: Arc<EngineControl>,
}

impl RecognitionEngine for ScriptedEngine {
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn abort(&mut self) {
        self.control.aborted.fetch_add(1, Ordering::SeqCst);
    }
}

/// Synthesizer double counting speak/cancel calls
pub struct CountingSynthesizer {
    speaks: AtomicUsize,
    cancels: AtomicUsize,
    last_text: Mutex<Option<String>>,
    /// When true, `speak` never completes until cancelled
    block: bool,
}

impl CountingSynthesizer {
    pub fn completing() -> Arc<Self> {
        Arc::new(Self {
            speaks: AtomicUsize::new(0),
            cancels: AtomicUsize::new(0),
            last_text: Mutex::new(None),
            block: false,
        })
    }

    pub fn blocking() -> Arc<Self> {
        Arc::new(Self {
            speaks: AtomicUsize::new(0),
            cancels: AtomicUsize::new(0),
            last_text: Mutex::new(None),
            block: true,
        })
    }

    pub fn speak_count(&self) -> usize {
        self.speaks.load(Ordering::SeqCst)
    }

    pub fn cancel_count(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    pub fn last_text(&self) -> Option<String> {
        self.last_text.lock().unwrap().clone()
    }
}

#[async_trait]
impl Synthesizer for CountingSynthesizer {
    async fn speak(&self, text: &str, _rate: f32) -> Result<()> {
        self.speaks.fetch_add(1, Ordering::SeqCst);
        *self.last_text.lock().unwrap() = Some(text.to_string());
        if self.block {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }
}

/// Backend double answering instantly
pub struct MockBackend {
    reply: String,
    calls: AtomicUsize,
}

impl MockBackend {
    pub fn replying(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.to_string(),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn send(&self, _transcript: &str, _history: &[ChatTurn]) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.reply.clone())
    }
}

/// Backend double answering after a delay
pub struct DelayedBackend {
    reply: String,
    delay: Duration,
}

impl DelayedBackend {
    pub fn replying(reply: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.to_string(),
            delay,
        })
    }
}

#[async_trait]
impl Backend for DelayedBackend {
    async fn send(&self, _transcript: &str, _history: &[ChatTurn]) -> Result<String> {
        tokio::time::sleep(self.delay).await;
        Ok(self.reply.clone())
    }
}

/// Backend double failing every call
pub struct FailingBackend {
    message: String,
}

impl FailingBackend {
    pub fn with_status(status: u16) -> Arc<Self> {
        Arc::new(Self {
            message: format!("webhook returned {status}"),
        })
    }
}

#[async_trait]
impl Backend for FailingBackend {
    async fn send(&self, _transcript: &str, _history: &[ChatTurn]) -> Result<String> {
        Err(Error::Webhook(self.message.clone()))
    }
}
