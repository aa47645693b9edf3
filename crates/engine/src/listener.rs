//! Token-keyed per-coordinate listener registries.
//!
//! The transport layer registers one listener per (connection, chunk) pair
//! and receives updates over an unbounded channel; the world side only ever
//! calls [`ListenerRegistry::dispatch`]. Registrations are identified by
//! opaque tokens so a connection can drop a single subscription without
//! knowing about the others.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::world::coord::Coord;
use crate::world::position::ChunkedPosition;

/// Opaque handle identifying one registration.
pub type ListenerToken = u64;

/// A player's click, fanned out to everyone watching the clicked chunk.
#[derive(Debug, Clone)]
pub struct ClickUpdate {
    pub position: ChunkedPosition,
    pub player: String,
}

/// Per-coordinate pub-sub map: `register` hands out a token and a channel,
/// `dispatch` fans one value out to every listener of a coordinate.
pub struct ListenerRegistry<T> {
    listeners: DashMap<Coord, HashMap<ListenerToken, mpsc::UnboundedSender<T>>>,
    token_index: DashMap<ListenerToken, Coord>,
    next_token: AtomicU64,
}

impl<T: Clone + Send + 'static> ListenerRegistry<T> {
    pub fn new() -> Self {
        Self {
            listeners: DashMap::new(),
            token_index: DashMap::new(),
            next_token: AtomicU64::new(1),
        }
    }

    /// Register a listener for one chunk coordinate. The receiver yields
    /// every update dispatched for that coordinate until [`Self::unregister`]
    /// is called or the receiver is dropped.
    pub fn register(&self, chunk: Coord) -> (ListenerToken, mpsc::UnboundedReceiver<T>) {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.token_index.insert(token, chunk);
        self.listeners.entry(chunk).or_default().insert(token, tx);
        (token, rx)
    }

    /// Drop a registration. Unknown tokens are ignored.
    pub fn unregister(&self, token: ListenerToken) {
        let Some((_, chunk)) = self.token_index.remove(&token) else {
            return;
        };
        if let Some(mut entry) = self.listeners.get_mut(&chunk) {
            entry.remove(&token);
        }
        self.listeners.remove_if(&chunk, |_, map| map.is_empty());
    }

    /// Deliver one update to every listener of `chunk`. Listeners whose
    /// receiver is gone are dropped from the registry. Returns how many
    /// listeners received the update.
    pub fn dispatch(&self, chunk: Coord, update: &T) -> usize {
        let Some(mut entry) = self.listeners.get_mut(&chunk) else {
            return 0;
        };
        let mut delivered = 0;
        entry.retain(|token, tx| match tx.send(update.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(_) => {
                self.token_index.remove(token);
                false
            }
        });
        delivered
    }

    /// Total registrations across all coordinates.
    pub fn listener_count(&self) -> usize {
        self.listeners.iter().map(|entry| entry.len()).sum()
    }
}

impl<T: Clone + Send + 'static> Default for ListenerRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}
