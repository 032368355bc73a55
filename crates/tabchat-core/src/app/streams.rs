//! Per-session cancellation handles for in-flight streams.

use std::collections::HashMap;

use tokio_util::sync::CancellationToken;

use crate::session::SessionId;

/// Cancellation handle for one stream. The generation distinguishes it from
/// later streams of the same session.
#[derive(Debug, Clone)]
pub struct StreamHandle {
    generation: u64,
    token: CancellationToken,
}

impl StreamHandle {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

#[derive(Debug, Default)]
pub struct StreamRegistry {
    next_generation: u64,
    streams: HashMap<SessionId, StreamHandle>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fresh handle, or returns `None` if the session already
    /// has a stream running.
    pub fn acquire(&mut self, session_id: SessionId) -> Option<StreamHandle> {
        if self.streams.contains_key(&session_id) {
            return None;
        }
        self.next_generation += 1;
        let handle = StreamHandle {
            generation: self.next_generation,
            token: CancellationToken::new(),
        };
        self.streams.insert(session_id, handle.clone());
        Some(handle)
    }

    /// Drops the registration if it still belongs to `handle`. Releasing a
    /// handle that was already cancelled or replaced does nothing.
    pub fn release(&mut self, session_id: SessionId, handle: &StreamHandle) -> bool {
        match self.streams.get(&session_id) {
            Some(current) if current.generation == handle.generation => {
                self.streams.remove(&session_id);
                true
            }
            _ => false,
        }
    }

    /// Fires and removes the session's handle.
    pub fn cancel(&mut self, session_id: SessionId) -> bool {
        match self.streams.remove(&session_id) {
            Some(handle) => {
                handle.token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, handle) in self.streams.drain() {
            handle.token.cancel();
        }
    }

    pub fn is_streaming(&self, session_id: SessionId) -> bool {
        self.streams.contains_key(&session_id)
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}
