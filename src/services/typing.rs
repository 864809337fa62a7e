//! Debounced typing indicators
//!
//! One entry per (sender, recipient) pair while the sender is typing. Each
//! entry owns a timer task tagged with a generation number; a replaced or
//! cancelled timer finds a different generation (or no entry) and stays
//! silent. Broadcasts happen while the table lock is held so a stop can not
//! overtake the start that preceded it.

use crate::websocket::message_types::WsOutboundEvent;
use crate::websocket::ConnectionRegistry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

type TypingKey = (Uuid, Uuid);

struct TypingEntry {
    generation: u64,
    timer: JoinHandle<()>,
    last_signal: Instant,
}

#[derive(Default)]
struct TypingTable {
    entries: HashMap<TypingKey, TypingEntry>,
    next_generation: u64,
}

pub struct TypingDebouncer {
    connections: ConnectionRegistry,
    timeout: Duration,
    table: Arc<Mutex<TypingTable>>,
}

impl TypingDebouncer {
    pub fn new(connections: ConnectionRegistry, timeout: Duration) -> Self {
        Self {
            connections,
            timeout,
            table: Arc::new(Mutex::new(TypingTable::default())),
        }
    }

    pub async fn set_typing(&self, sender_id: Uuid, recipient_id: Uuid, is_typing: bool) {
        let key = (sender_id, recipient_id);
        let mut table = self.table.lock().await;

        if let Some(previous) = table.entries.remove(&key) {
            previous.timer.abort();
        }

        if is_typing {
            table.next_generation += 1;
            let generation = table.next_generation;
            let timer = self.spawn_expiry(key, generation);
            table.entries.insert(
                key,
                TypingEntry {
                    generation,
                    timer,
                    last_signal: Instant::now(),
                },
            );
        }

        self.connections
            .send_to_account(
                recipient_id,
                &WsOutboundEvent::UserTyping {
                    sender_id,
                    is_typing,
                },
            )
            .await;
    }

    fn spawn_expiry(&self, key: TypingKey, generation: u64) -> JoinHandle<()> {
        let table = Arc::clone(&self.table);
        let connections = self.connections.clone();
        let timeout = self.timeout;

        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;

            let mut table = table.lock().await;
            let current = table.entries.get(&key).map(|e| e.generation);
            if current != Some(generation) {
                return;
            }
            if let Some(entry) = table.entries.remove(&key) {
                tracing::trace!(
                    sender_id = %key.0,
                    recipient_id = %key.1,
                    idle_ms = entry.last_signal.elapsed().as_millis() as u64,
                    "typing indicator expired"
                );
            }

            connections
                .send_to_account(
                    key.1,
                    &WsOutboundEvent::UserTyping {
                        sender_id: key.0,
                        is_typing: false,
                    },
                )
                .await;
        })
    }

    pub async fn is_typing(&self, sender_id: Uuid, recipient_id: Uuid) -> bool {
        self.table
            .lock()
            .await
            .entries
            .contains_key(&(sender_id, recipient_id))
    }

    pub async fn active_count(&self) -> usize {
        self.table.lock().await.entries.len()
    }

    /// Abort every timer without broadcasting
    pub async fn shutdown(&self) {
        let mut table = self.table.lock().await;
        let count = table.entries.len();
        for (_, entry) in table.entries.drain() {
            entry.timer.abort();
        }
        if count > 0 {
            tracing::info!(count, "typing timers cancelled");
        }
    }
}
