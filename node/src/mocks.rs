//! Scripted transport and a wired-up controller harness for tests.

use crate::{
    engine::{Engine, GameConfig},
    metrics::Metrics,
    pvp::{PvpConfig, PvpController},
    randomness::Randomness,
    render::Renderer,
    transport::{DiceMessage, Keyboard, Transport, TransportError},
};
use arbuz_execution::{ledger, Memory};
use arbuz_types::{Amount, ChatId, Currency, Emoji, MessageId, UserId};
use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
    time::Duration,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Sent {
    Dice {
        chat: ChatId,
        emoji: Emoji,
        reply_to: Option<MessageId>,
        message_id: MessageId,
        value: u8,
    },
    Text {
        chat: ChatId,
        html: String,
        keyboard: Option<Keyboard>,
        reply_to: Option<MessageId>,
    },
    Sticker {
        chat: ChatId,
        sticker_id: String,
        reply_to: Option<MessageId>,
    },
    Deleted {
        chat: ChatId,
        message_id: MessageId,
    },
}

#[derive(Default)]
struct Script {
    next_message: MessageId,
    values: VecDeque<u8>,
    fail_dice: usize,
    sent: Vec<Sent>,
}

/// Hands out queued throw values in order and records everything sent.
///
/// Throws fail once the queue is empty or while injected failures remain.
#[derive(Default)]
pub struct MockTransport {
    script: Mutex<Script>,
}

impl MockTransport {
    pub fn with_values(values: &[u8]) -> Self {
        let transport = Self::default();
        transport.push_values(values);
        transport
    }

    pub fn push_values(&self, values: &[u8]) {
        self.script.lock().unwrap().values.extend(values);
    }

    /// Fails the next `count` throws.
    pub fn fail_next_dice(&self, count: usize) {
        self.script.lock().unwrap().fail_dice = count;
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.script.lock().unwrap().sent.clone()
    }

    pub fn dice(&self) -> Vec<(ChatId, Option<MessageId>, u8)> {
        self.sent()
            .into_iter()
            .filter_map(|sent| match sent {
                Sent::Dice {
                    chat,
                    reply_to,
                    value,
                    ..
                } => Some((chat, reply_to, value)),
                _ => None,
            })
            .collect()
    }

    pub fn texts_to(&self, target: ChatId) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|sent| match sent {
                Sent::Text { chat, html, .. } if chat == target => Some(html),
                _ => None,
            })
            .collect()
    }

    pub fn deleted(&self) -> Vec<MessageId> {
        self.sent()
            .into_iter()
            .filter_map(|sent| match sent {
                Sent::Deleted { message_id, .. } => Some(message_id),
                _ => None,
            })
            .collect()
    }

    fn next_id(script: &mut Script) -> MessageId {
        script.next_message += 1;
        script.next_message
    }
}

impl Transport for MockTransport {
    async fn send_dice(
        &self,
        chat: ChatId,
        emoji: Emoji,
        reply_to: Option<MessageId>,
    ) -> Result<DiceMessage, TransportError> {
        let mut script = self.script.lock().unwrap();
        if script.fail_dice > 0 {
            script.fail_dice -= 1;
            return Err(TransportError::Unavailable("injected failure".into()));
        }
        let value = script
            .values
            .pop_front()
            .ok_or_else(|| TransportError::Unavailable("script exhausted".into()))?;
        let message_id = Self::next_id(&mut script);
        script.sent.push(Sent::Dice {
            chat,
            emoji,
            reply_to,
            message_id,
            value,
        });
        Ok(DiceMessage { message_id, value })
    }

    async fn send_text(
        &self,
        chat: ChatId,
        html: &str,
        keyboard: Option<Keyboard>,
        reply_to: Option<MessageId>,
    ) -> Result<MessageId, TransportError> {
        let mut script = self.script.lock().unwrap();
        let message_id = Self::next_id(&mut script);
        script.sent.push(Sent::Text {
            chat,
            html: html.to_string(),
            keyboard,
            reply_to,
        });
        Ok(message_id)
    }

    async fn send_sticker(
        &self,
        chat: ChatId,
        sticker_id: &str,
        reply_to: Option<MessageId>,
    ) -> Result<MessageId, TransportError> {
        let mut script = self.script.lock().unwrap();
        let message_id = Self::next_id(&mut script);
        script.sent.push(Sent::Sticker {
            chat,
            sticker_id: sticker_id.to_string(),
            reply_to,
        });
        Ok(message_id)
    }

    async fn delete_message(
        &self,
        chat: ChatId,
        message_id: MessageId,
    ) -> Result<(), TransportError> {
        self.script
            .lock()
            .unwrap()
            .sent
            .push(Sent::Deleted { chat, message_id });
        Ok(())
    }
}

/// Public PvP channel used by [harness].
pub const CHANNEL: ChatId = -1_001;

pub struct Harness {
    pub store: Arc<tokio::sync::Mutex<Memory>>,
    pub transport: Arc<MockTransport>,
    pub randomness: Arc<Randomness<MockTransport>>,
    pub renderer: Arc<Renderer>,
    pub metrics: Metrics,
    pub engine: Arc<Engine<Memory, MockTransport>>,
    pub pvp: Arc<PvpController<Memory, MockTransport>>,
    pub channel: ChatId,
}

/// Engine and PvP controller over an in-memory store, throwing `values` in order.
pub async fn harness(values: &[u8]) -> Harness {
    let store = Arc::new(tokio::sync::Mutex::new(Memory::default()));
    let transport = Arc::new(MockTransport::with_values(values));
    let randomness = Arc::new(Randomness::new(transport.clone(), Duration::from_secs(3)));
    let stickers = HashMap::from([("dice_4".to_string(), "STICKER_D4".to_string())]);
    let renderer = Arc::new(Renderer::new("arbuz_pvp".into(), stickers));
    let metrics = Metrics::default();
    let game = GameConfig::default();
    let engine = Arc::new(Engine::new(
        store.clone(),
        transport.clone(),
        randomness.clone(),
        renderer.clone(),
        metrics.clone(),
        game.clone(),
    ));
    engine.bootstrap().await.unwrap();
    let pvp = Arc::new(PvpController::new(
        store.clone(),
        transport.clone(),
        randomness.clone(),
        renderer.clone(),
        metrics.clone(),
        PvpConfig {
            channel_id: CHANNEL,
            announce_channel_id: CHANNEL,
            throw_pacing: game.throw_pacing,
            await_timeout: game.await_timeout,
            commission_bps: crate::defaults::DEFAULT_COMMISSION_BPS,
        },
    ));
    Harness {
        store,
        transport,
        randomness,
        renderer,
        metrics,
        engine,
        pvp,
        channel: CHANNEL,
    }
}

/// Registers `user` if needed and credits both balances.
pub async fn fund(store: &tokio::sync::Mutex<Memory>, user: UserId, main: Amount, demo: Amount) {
    let mut store = store.lock().await;
    ledger::register(&mut *store, user, &format!("user{user}"), None)
        .await
        .unwrap();
    ledger::update(&mut *store, user, |account| {
        ledger::credit(account, main, Currency::Main)?;
        ledger::credit(account, demo, Currency::Demo)
    })
    .await
    .unwrap();
}
