//! Conversation orchestrator
//!
//! Sequences each finalized utterance: append the user message, append a
//! pending placeholder, call the backend, resolve the placeholder with the
//! reply or the apology, then speak and animate the reply. Interim
//! fragments only matter for barge-in: the user talking over the
//! assistant cancels its speech immediately.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::avatar::AvatarClient;
use crate::speech::SpeechOutput;
use crate::voice::recognition::TranscriptResult;
use crate::webhook::{Backend, ChatTurn};

/// Placeholder text while a backend call is in flight
pub const PENDING_TEXT: &str = "Thinking...";

/// Reply shown when the backend fails
pub const APOLOGY_TEXT: &str = "I'm sorry, I couldn't process that request. Please try again.";

/// How long an interruption keeps overriding the processing guard
const INTERRUPT_GRACE: Duration = Duration::from_millis(300);

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Assistant,
}

/// One entry in the conversation log
#[derive(Debug, Clone, serde::Serialize)]
pub struct Message {
    pub id: Uuid,
    pub text: String,
    pub sender: Sender,
    pub timestamp: DateTime<Utc>,
    pub pending: bool,
}

impl Message {
    fn new(text: impl Into<String>, sender: Sender, pending: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            sender,
            timestamp: Utc::now(),
            pending,
        }
    }
}

/// Orchestrates transcripts, the backend, speech output, and the avatar
pub struct Conversation {
    backend: Arc<dyn Backend>,
    speech: SpeechOutput,
    avatar: Option<Arc<AvatarClient>>,
    interrupt_debounce: Duration,

    messages: Vec<Message>,
    current_ai_text: Option<String>,
    current_video_url: Option<String>,
    last_user_speech: Option<tokio::time::Instant>,
    interrupted_at: Option<tokio::time::Instant>,
    processing: bool,
}

impl Conversation {
    #[must_use]
    pub fn new(
        backend: Arc<dyn Backend>,
        speech: SpeechOutput,
        avatar: Option<Arc<AvatarClient>>,
        interrupt_debounce: Duration,
    ) -> Self {
        Self {
            backend,
            speech,
            avatar,
            interrupt_debounce,
            messages: Vec::new(),
            current_ai_text: None,
            current_video_url: None,
            last_user_speech: None,
            interrupted_at: None,
            processing: false,
        }
    }

    /// Conversation log so far
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Text currently driving the avatar display
    #[must_use]
    pub fn current_ai_text(&self) -> Option<&str> {
        self.current_ai_text.as_deref()
    }

    /// Video currently playing on the avatar, if any
    #[must_use]
    pub fn current_video_url(&self) -> Option<&str> {
        self.current_video_url.as_deref()
    }

    /// Whether a backend call is in flight
    #[must_use]
    pub const fn is_processing(&self) -> bool {
        self.processing
    }

    /// Append the greeting and speak it
    pub fn greet(&mut self, text: &str) {
        if text.trim().is_empty() {
            return;
        }

        self.messages
            .push(Message::new(text, Sender::Assistant, false));
        self.current_ai_text = Some(text.to_string());

        if !self.speech.is_speaking() {
            self.speech.speak(text);
        }
    }

    /// The avatar finished playing its video
    pub fn handle_video_end(&mut self) {
        self.current_ai_text = None;
        self.current_video_url = None;
    }

    /// Process one transcript event from the recording session
    pub async fn handle_transcript(&mut self, result: &TranscriptResult) {
        self.last_user_speech = Some(tokio::time::Instant::now());

        // Barge-in: the user talking over the assistant cancels its speech
        // in the same tick and blanks whatever the avatar was saying.
        if self.speech.is_speaking() && !result.text.trim().is_empty() {
            tracing::debug!("user interrupted assistant speech");
            self.speech.stop();
            self.interrupted_at = Some(tokio::time::Instant::now());
            self.current_ai_text = None;
            self.current_video_url = None;
        }

        if !result.is_final || result.text.trim().is_empty() {
            return;
        }

        let interrupting = self
            .interrupted_at
            .is_some_and(|t| t.elapsed() < INTERRUPT_GRACE);

        if self.processing && !interrupting {
            tracing::debug!("still processing previous message, ignoring transcript");
            return;
        }

        self.speech.stop();
        self.current_ai_text = None;
        self.current_video_url = None;

        let history = self.history();

        self.messages
            .push(Message::new(result.text.clone(), Sender::User, false));

        let pending = Message::new(PENDING_TEXT, Sender::Assistant, true);
        let pending_id = pending.id;
        self.messages.push(pending);

        self.processing = true;
        let outcome = self.backend.send(&result.text, &history).await;
        self.processing = false;

        match outcome {
            Ok(reply) => {
                self.resolve_pending(pending_id, &reply);
                self.current_ai_text = Some(reply.clone());

                let spoke_recently = self
                    .last_user_speech
                    .is_some_and(|t| t.elapsed() <= self.interrupt_debounce);

                if spoke_recently || self.is_interrupting() {
                    tracing::debug!("user spoke recently, not voicing reply");
                } else {
                    self.speech.speak(&reply);
                    self.animate_reply(&reply).await;
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "backend call failed");
                self.resolve_pending(pending_id, APOLOGY_TEXT);
                self.current_ai_text = Some(APOLOGY_TEXT.to_string());
            }
        }
    }

    fn is_interrupting(&self) -> bool {
        self.interrupted_at
            .is_some_and(|t| t.elapsed() < INTERRUPT_GRACE)
    }

    /// History sent to the backend: every settled message so far
    fn history(&self) -> Vec<ChatTurn> {
        self.messages
            .iter()
            .filter(|m| !m.pending)
            .map(|m| ChatTurn {
                role: match m.sender {
                    Sender::User => "user",
                    Sender::Assistant => "assistant",
                },
                content: m.text.clone(),
            })
            .collect()
    }

    fn resolve_pending(&mut self, id: Uuid, text: &str) {
        if let Some(message) = self.messages.iter_mut().find(|m| m.id == id) {
            message.text = text.to_string();
            message.pending = false;
        }
    }

    async fn animate_reply(&mut self, reply: &str) {
        let Some(avatar) = &self.avatar else {
            return;
        };

        match avatar.create_talk(reply).await {
            Ok(url) => self.current_video_url = Some(url),
            Err(e) => {
                tracing::warn!(error = %e, "avatar video failed, showing static image");
                self.current_video_url = None;
            }
        }
    }
}
