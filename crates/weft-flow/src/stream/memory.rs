//! In-memory stream transport for testing.
//!
//! Channels are append-only vectors; cursors track their own offset and are
//! woken through a `watch` channel carrying the published-message count, so
//! a publish between a cursor's length check and its wait cannot be missed.
//!
//! ## Limitations
//!
//! - **NOT suitable for production**: No durability, unbounded retention
//! - **Single-process only**: Channels are not visible across processes

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;

use super::{ChannelKey, StreamCursor, StreamTransport};
use crate::error::{Error, Result};

#[derive(Debug)]
struct ChannelState {
    messages: RwLock<Vec<Value>>,
    published: watch::Sender<usize>,
}

impl ChannelState {
    fn new() -> Self {
        let (published, _) = watch::channel(0);
        Self {
            messages: RwLock::new(Vec::new()),
            published,
        }
    }
}

/// In-memory stream transport for testing.
///
/// ## Example
///
/// ```rust
/// use weft_flow::stream::memory::InMemoryTransport;
///
/// let transport = InMemoryTransport::new();
/// // Publish and subscribe in tests...
/// ```
#[derive(Debug, Default)]
pub struct InMemoryTransport {
    channels: RwLock<HashMap<String, Arc<ChannelState>>>,
}

/// Converts a lock poison error to a transport error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::Transport {
        message: "stream transport lock poisoned".to_string(),
    }
}

impl InMemoryTransport {
    /// Creates a new transport with no channels.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of messages published to `key`'s channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn message_count(&self, key: &ChannelKey) -> Result<usize> {
        let channels = self.channels.read().map_err(poison_err)?;
        match channels.get(&key.to_string()) {
            Some(state) => {
                let messages = state.messages.read().map_err(poison_err)?;
                Ok(messages.len())
            }
            None => Ok(0),
        }
    }

    fn channel(&self, key: &ChannelKey) -> Result<Arc<ChannelState>> {
        let name = key.to_string();
        {
            let channels = self.channels.read().map_err(poison_err)?;
            if let Some(state) = channels.get(&name) {
                return Ok(Arc::clone(state));
            }
        }
        let mut channels = self.channels.write().map_err(poison_err)?;
        let state = channels
            .entry(name)
            .or_insert_with(|| Arc::new(ChannelState::new()));
        Ok(Arc::clone(state))
    }
}

#[async_trait]
impl StreamTransport for InMemoryTransport {
    async fn publish(&self, key: &ChannelKey, message: Value) -> Result<()> {
        let state = self.channel(key)?;
        let published = {
            let mut messages = state.messages.write().map_err(poison_err)?;
            messages.push(message);
            messages.len()
        };
        state.published.send_replace(published);
        Ok(())
    }

    async fn subscribe(&self, key: &ChannelKey) -> Result<Box<dyn StreamCursor>> {
        let state = self.channel(key)?;
        let receiver = state.published.subscribe();
        Ok(Box::new(MemoryCursor {
            state,
            receiver,
            offset: 0,
        }))
    }
}

struct MemoryCursor {
    state: Arc<ChannelState>,
    receiver: watch::Receiver<usize>,
    offset: usize,
}

#[async_trait]
impl StreamCursor for MemoryCursor {
    async fn next(&mut self) -> Result<Value> {
        loop {
            let published = *self.receiver.borrow_and_update();
            if self.offset < published {
                let message = {
                    let messages = self.state.messages.read().map_err(poison_err)?;
                    messages[self.offset].clone()
                };
                self.offset += 1;
                return Ok(message);
            }
            self.receiver
                .changed()
                .await
                .map_err(|_| Error::Transport {
                    message: "stream channel closed".to_string(),
                })?;
        }
    }
}
