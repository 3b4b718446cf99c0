//! Outbound message pipeline: placeholder ids, fallback timers and the
//! bookkeeping that keeps the realtime and durable paths mutually exclusive.

use crate::models::{OutgoingMessage, PLACEHOLDER_PREFIX};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingState {
    /// Sent over the realtime channel; falls back once `deadline` passes.
    AwaitingEcho { deadline: Instant },
    /// Durable request issued. Never goes back to `AwaitingEcho`.
    FallbackInFlight,
}

#[derive(Debug, Clone)]
pub struct PendingSend {
    pub chat_room_id: String,
    pub message: OutgoingMessage,
    pub state: PendingState,
}

/// A send that could not be delivered by either path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendFailure {
    pub chat_room_id: String,
    pub placeholder_id: String,
    /// Original body, so the caller can offer a retry.
    pub message: OutgoingMessage,
    pub reason: String,
}

#[derive(Debug)]
pub struct OutboundPipeline {
    fallback_timeout: Duration,
    seq: u64,
    pending: HashMap<String, PendingSend>,
}

impl OutboundPipeline {
    pub fn new(fallback_timeout: Duration) -> Self {
        Self {
            fallback_timeout,
            seq: 0,
            pending: HashMap::new(),
        }
    }

    /// Locally unique id that can never collide with a server id.
    pub fn next_placeholder_id(&mut self) -> String {
        self.seq += 1;
        format!(
            "{}{}-{}",
            PLACEHOLDER_PREFIX,
            self.seq,
            uuid::Uuid::new_v4().simple()
        )
    }

    /// Tracks a send that went out over the realtime channel.
    pub fn await_echo(&mut self, placeholder_id: &str, chat_room_id: &str, message: OutgoingMessage, now: Instant) {
        self.pending.insert(
            placeholder_id.to_string(),
            PendingSend {
                chat_room_id: chat_room_id.to_string(),
                message,
                state: PendingState::AwaitingEcho {
                    deadline: now + self.fallback_timeout,
                },
            },
        );
    }

    /// Tracks a send that goes straight to the durable path.
    pub fn start_fallback(&mut self, placeholder_id: &str, chat_room_id: &str, message: OutgoingMessage) {
        self.pending.insert(
            placeholder_id.to_string(),
            PendingSend {
                chat_room_id: chat_room_id.to_string(),
                message,
                state: PendingState::FallbackInFlight,
            },
        );
    }

    /// Moves an awaiting send onto the durable path and returns it.
    ///
    /// Returns `None` when the send is unknown or already in fallback, which
    /// guarantees a single durable request per message.
    pub fn escalate(&mut self, placeholder_id: &str) -> Option<&PendingSend> {
        let send = self.pending.get_mut(placeholder_id)?;
        match send.state {
            PendingState::AwaitingEcho { .. } => {
                send.state = PendingState::FallbackInFlight;
                Some(send)
            }
            PendingState::FallbackInFlight => None,
        }
    }

    /// Sends whose fallback timer has expired, oldest deadline first.
    pub fn due(&self, now: Instant) -> Vec<String> {
        let mut due: Vec<(Instant, &String)> = self
            .pending
            .iter()
            .filter_map(|(id, send)| match send.state {
                PendingState::AwaitingEcho { deadline } if deadline <= now => Some((deadline, id)),
                _ => None,
            })
            .collect();
        due.sort();
        due.into_iter().map(|(_, id)| id.clone()).collect()
    }

    /// Finishes a send, cancelling its timer.
    pub fn complete(&mut self, placeholder_id: &str) -> Option<PendingSend> {
        self.pending.remove(placeholder_id)
    }

    pub fn get(&self, placeholder_id: &str) -> Option<&PendingSend> {
        self.pending.get(placeholder_id)
    }

    /// Forgets every send for a room. Late results for them become no-ops.
    pub fn cancel_room(&mut self, chat_room_id: &str) -> usize {
        let before = self.pending.len();
        self.pending.retain(|_, send| send.chat_room_id != chat_room_id);
        before - self.pending.len()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending
            .values()
            .filter_map(|send| match send.state {
                PendingState::AwaitingEcho { deadline } => Some(deadline),
                PendingState::FallbackInFlight => None,
            })
            .min()
    }
}
