//! Seam between the engine and the chat platform.
//!
//! The engine only ever asks the platform to throw an animated emoji, send or delete a
//! message, or post to a channel. [DevTransport] stands in for the platform when the node
//! runs locally: throws draw from a seeded generator and every send is logged.

use arbuz_types::{ChatId, Emoji, MessageId};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde::Serialize;
use std::{
    future::Future,
    sync::{
        atomic::{AtomicI64, Ordering},
        Mutex,
    },
};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport unavailable: {0}")]
    Unavailable(String),
    #[error("message {0} not found")]
    MissingMessage(MessageId),
}

/// Inline keyboard button opening a URL.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Button {
    pub text: String,
    pub url: String,
}

impl Button {
    pub fn new(text: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            url: url.into(),
        }
    }
}

/// Rows of buttons.
pub type Keyboard = Vec<Vec<Button>>;

/// Reply to a throw request. The platform resolves the value before the animation ends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DiceMessage {
    pub message_id: MessageId,
    pub value: u8,
}

pub trait Transport: Send + Sync + 'static {
    fn send_dice(
        &self,
        chat: ChatId,
        emoji: Emoji,
        reply_to: Option<MessageId>,
    ) -> impl Future<Output = Result<DiceMessage, TransportError>> + Send;

    /// Sends an HTML-formatted message.
    fn send_text(
        &self,
        chat: ChatId,
        html: &str,
        keyboard: Option<Keyboard>,
        reply_to: Option<MessageId>,
    ) -> impl Future<Output = Result<MessageId, TransportError>> + Send;

    fn send_sticker(
        &self,
        chat: ChatId,
        sticker_id: &str,
        reply_to: Option<MessageId>,
    ) -> impl Future<Output = Result<MessageId, TransportError>> + Send;

    fn delete_message(
        &self,
        chat: ChatId,
        message_id: MessageId,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// Local stand-in for the chat platform.
pub struct DevTransport {
    rng: Mutex<ChaCha20Rng>,
    next_message: AtomicI64,
}

impl DevTransport {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => ChaCha20Rng::seed_from_u64(seed),
            None => ChaCha20Rng::from_entropy(),
        };
        Self {
            rng: Mutex::new(rng),
            next_message: AtomicI64::new(1),
        }
    }

    fn message_id(&self) -> MessageId {
        self.next_message.fetch_add(1, Ordering::Relaxed)
    }
}

impl Transport for DevTransport {
    async fn send_dice(
        &self,
        chat: ChatId,
        emoji: Emoji,
        reply_to: Option<MessageId>,
    ) -> Result<DiceMessage, TransportError> {
        let (min, max) = emoji.value_range();
        let value = self
            .rng
            .lock()
            .map_err(|_| TransportError::Unavailable("rng poisoned".into()))?
            .gen_range(min..=max);
        let message_id = self.message_id();
        info!(chat, message_id, ?reply_to, emoji = emoji.as_str(), value, "throw");
        Ok(DiceMessage { message_id, value })
    }

    async fn send_text(
        &self,
        chat: ChatId,
        html: &str,
        keyboard: Option<Keyboard>,
        reply_to: Option<MessageId>,
    ) -> Result<MessageId, TransportError> {
        let message_id = self.message_id();
        let buttons = keyboard.map(|rows| rows.iter().map(Vec::len).sum::<usize>());
        info!(chat, message_id, ?reply_to, ?buttons, "{html}");
        Ok(message_id)
    }

    async fn send_sticker(
        &self,
        chat: ChatId,
        sticker_id: &str,
        reply_to: Option<MessageId>,
    ) -> Result<MessageId, TransportError> {
        let message_id = self.message_id();
        debug!(chat, message_id, ?reply_to, sticker_id, "sticker");
        Ok(message_id)
    }

    async fn delete_message(
        &self,
        chat: ChatId,
        message_id: MessageId,
    ) -> Result<(), TransportError> {
        debug!(chat, message_id, "delete");
        Ok(())
    }
}
