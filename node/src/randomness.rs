//! Animated throws as the engine's only source of randomness.
//!
//! The platform returns the throw value with the submit reply, but clients keep animating
//! for a few seconds. [Randomness::await_final] paces callers to that animation. The
//! platform may also report the value again through an event; [Randomness::on_value_event]
//! routes such events to the owner of the throw and drops duplicates.

use crate::transport::{Transport, TransportError};
use arbuz_types::{ChatId, Emoji, MessageId};
use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
    time::Duration,
};
use thiserror::Error;
use tokio::{sync::oneshot, time::Instant};
use tracing::{debug, warn};

/// Finalized throws remembered for duplicate detection.
const RECENT_CAPACITY: usize = 1_024;

#[derive(Debug, Error)]
pub enum RandomnessError {
    #[error("throw submit failed: {0}")]
    Submit(#[from] TransportError),
    #[error("{emoji} throw returned out-of-range value {value}")]
    OutOfRange { emoji: &'static str, value: u8 },
}

/// Who a pending throw belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Owner {
    Session(u64),
    Match(u64),
}

#[derive(Debug, PartialEq, Eq)]
pub enum Delivery {
    /// First event for a pending throw.
    Delivered(Owner),
    Duplicate,
    Unknown,
}

#[derive(Debug)]
pub struct ThrowHandle {
    pub message_id: MessageId,
    pub chat: ChatId,
    pub value: u8,
    submitted_at: Instant,
    event: oneshot::Receiver<u8>,
}

struct Pending {
    owner: Owner,
    notify: Option<oneshot::Sender<u8>>,
}

#[derive(Default)]
struct Routes {
    pending: HashMap<MessageId, Pending>,
    recent: VecDeque<MessageId>,
}

impl Routes {
    fn finalize(&mut self, message_id: MessageId) {
        if self.pending.remove(&message_id).is_some() {
            if self.recent.len() == RECENT_CAPACITY {
                self.recent.pop_front();
            }
            self.recent.push_back(message_id);
        }
    }
}

pub struct Randomness<T: Transport> {
    transport: Arc<T>,
    animation: Duration,
    routes: Mutex<Routes>,
}

impl<T: Transport> Randomness<T> {
    pub fn new(transport: Arc<T>, animation: Duration) -> Self {
        Self {
            transport,
            animation,
            routes: Mutex::new(Routes::default()),
        }
    }

    fn routes(&self) -> std::sync::MutexGuard<'_, Routes> {
        self.routes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Starts a throw. On error nothing is pending and the caller must undo its debit.
    pub async fn submit(
        &self,
        chat: ChatId,
        emoji: Emoji,
        reply_to: Option<MessageId>,
        owner: Owner,
    ) -> Result<ThrowHandle, RandomnessError> {
        let reply = self.transport.send_dice(chat, emoji, reply_to).await?;
        if !emoji.accepts(reply.value) {
            return Err(RandomnessError::OutOfRange {
                emoji: emoji.as_str(),
                value: reply.value,
            });
        }
        let (notify, event) = oneshot::channel();
        self.routes().pending.insert(
            reply.message_id,
            Pending {
                owner,
                notify: Some(notify),
            },
        );
        debug!(message_id = reply.message_id, value = reply.value, ?owner, "throw submitted");
        Ok(ThrowHandle {
            message_id: reply.message_id,
            chat,
            value: reply.value,
            submitted_at: Instant::now(),
            event,
        })
    }

    /// Waits until the animation has played (or the platform reported the value) and returns
    /// the value from the submit reply.
    pub async fn await_final(&self, handle: ThrowHandle, timeout: Duration) -> u8 {
        let ThrowHandle {
            message_id,
            value,
            submitted_at,
            mut event,
            ..
        } = handle;
        let animation = tokio::time::sleep_until(submitted_at + self.animation);
        let settled = async move {
            tokio::select! {
                _ = animation => None,
                reported = &mut event => reported.ok(),
            }
        };
        match tokio::time::timeout(timeout, settled).await {
            Ok(Some(reported)) if reported != value => {
                warn!(message_id, value, reported, "event disagrees with submit reply");
            }
            Ok(_) => {}
            Err(_) => warn!(message_id, value, ?timeout, "throw await timed out"),
        }
        self.routes().finalize(message_id);
        value
    }

    /// Drops a pending throw whose owner went away.
    pub fn forget(&self, message_id: MessageId) {
        self.routes().finalize(message_id);
    }

    /// Routes a value reported out of band to the throw's owner.
    pub fn on_value_event(&self, message_id: MessageId, value: u8) -> Delivery {
        let mut routes = self.routes();
        if let Some(pending) = routes.pending.get_mut(&message_id) {
            return match pending.notify.take() {
                Some(notify) => {
                    let _ = notify.send(value);
                    Delivery::Delivered(pending.owner)
                }
                None => Delivery::Duplicate,
            };
        }
        if routes.recent.contains(&message_id) {
            Delivery::Duplicate
        } else {
            Delivery::Unknown
        }
    }

    pub fn pending(&self) -> usize {
        self.routes().pending.len()
    }
}
