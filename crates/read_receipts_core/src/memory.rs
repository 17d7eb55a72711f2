//! crates/read_receipts_core/src/memory.rs
//!
//! Process-local implementations of the core ports. No lock is held across an
//! `.await`.
//!
//! Receipts live behind a table-wide `RwLock`, each row behind its own mutex.
//! Single-receipt writes share the table lock and take one row lock, so they
//! only contend on the same receipt. Creation, bulk and batch marking and
//! deletes take the table lock exclusively and observe one consistent snapshot.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::{Conversation, ReadReceipt};
use crate::ports::{
    AuthSessionService, ConversationDirectory, PortError, PortResult, ReceiptStore, ReceiptStream,
};

//=========================================================================================
// Receipt Store
//=========================================================================================

type Row = Arc<Mutex<ReadReceipt>>;

/// A row mutex is only held for plain field updates, so a poisoned one still
/// holds a valid receipt.
fn lock(row: &Row) -> MutexGuard<'_, ReadReceipt> {
    row.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct ReceiptTable {
    rows: HashMap<Uuid, Row>,
    /// A message has exactly one recipient, so it owns at most one receipt.
    by_message: HashMap<Uuid, Uuid>,
}

impl ReceiptTable {
    fn row(&self, receipt_id: Uuid) -> PortResult<&Row> {
        self.rows
            .get(&receipt_id)
            .ok_or_else(|| PortError::NotFound(format!("Receipt {} not found", receipt_id)))
    }

    fn sorted(&self, filter: impl Fn(&ReadReceipt) -> bool) -> Vec<ReadReceipt> {
        let mut receipts: Vec<ReadReceipt> = self
            .rows
            .values()
            .map(|row| lock(row).clone())
            .filter(|r| filter(r))
            .collect();
        receipts.sort_by_key(|r| (r.created_at, r.id));
        receipts
    }

    fn remove_where(&mut self, filter: impl Fn(&ReadReceipt) -> bool) -> u64 {
        let doomed: Vec<(Uuid, Uuid)> = self
            .rows
            .values()
            .map(|row| lock(row))
            .filter(|r| filter(&**r))
            .map(|r| (r.id, r.message_id))
            .collect();
        for (id, message_id) in &doomed {
            self.rows.remove(id);
            self.by_message.remove(message_id);
        }
        doomed.len() as u64
    }
}

/// Flips a receipt to read. Returns whether it changed.
fn transition(receipt: &mut ReadReceipt, now: DateTime<Utc>) -> bool {
    if receipt.has_been_read {
        return false;
    }
    receipt.has_been_read = true;
    receipt.updated_at = now.max(receipt.updated_at);
    true
}

/// A `ReceiptStore` kept in process memory.
#[derive(Default)]
pub struct InMemoryReceiptStore {
    table: RwLock<ReceiptTable>,
}

impl InMemoryReceiptStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReceiptStore for InMemoryReceiptStore {
    async fn create_receipt(
        &self,
        message_id: Uuid,
        conversation_id: Uuid,
        recipient_id: Uuid,
    ) -> PortResult<ReadReceipt> {
        let mut table = self.table.write().await;
        if let Some(existing_id) = table.by_message.get(&message_id) {
            let existing = lock(table.row(*existing_id)?).clone();
            if existing.conversation_id != conversation_id {
                return Err(PortError::Inconsistent(format!(
                    "message {} already tracked in conversation {}",
                    message_id, existing.conversation_id
                )));
            }
            if existing.recipient_id != recipient_id {
                return Err(PortError::Inconsistent(format!(
                    "message {} is already addressed to user {}",
                    message_id, existing.recipient_id
                )));
            }
            return Err(PortError::DuplicateReceipt { message_id, recipient_id });
        }

        let now = Utc::now();
        let receipt = ReadReceipt {
            id: Uuid::new_v4(),
            message_id,
            conversation_id,
            recipient_id,
            has_been_read: false,
            created_at: now,
            updated_at: now,
        };
        table.by_message.insert(message_id, receipt.id);
        table
            .rows
            .insert(receipt.id, Arc::new(Mutex::new(receipt.clone())));
        Ok(receipt)
    }

    async fn get_receipt(&self, receipt_id: Uuid) -> PortResult<ReadReceipt> {
        let table = self.table.read().await;
        let receipt = lock(table.row(receipt_id)?).clone();
        Ok(receipt)
    }

    async fn get_unread(&self, conversation_id: Uuid, recipient_id: Uuid) -> PortResult<ReceiptStream> {
        let snapshot = self.table.read().await.sorted(|r| {
            r.conversation_id == conversation_id && r.recipient_id == recipient_id && !r.has_been_read
        });
        Ok(Box::pin(stream::iter(snapshot.into_iter().map(Ok))))
    }

    async fn count_unread(&self, conversation_id: Uuid, recipient_id: Uuid) -> PortResult<u64> {
        let table = self.table.read().await;
        let count = table
            .rows
            .values()
            .filter(|row| {
                let r = lock(row);
                r.conversation_id == conversation_id && r.recipient_id == recipient_id && !r.has_been_read
            })
            .count();
        Ok(count as u64)
    }

    async fn list_for_conversation(&self, conversation_id: Uuid) -> PortResult<Vec<ReadReceipt>> {
        Ok(self
            .table
            .read()
            .await
            .sorted(|r| r.conversation_id == conversation_id))
    }

    async fn mark_read(&self, receipt_id: Uuid) -> PortResult<ReadReceipt> {
        let table = self.table.read().await;
        let mut receipt = lock(table.row(receipt_id)?);
        transition(&mut receipt, Utc::now());
        Ok(receipt.clone())
    }

    async fn mark_read_bulk(&self, conversation_id: Uuid, recipient_id: Uuid) -> PortResult<u64> {
        let table = self.table.write().await;
        let now = Utc::now();
        let updated = table
            .rows
            .values()
            .map(|row| lock(row))
            .filter(|r| r.conversation_id == conversation_id && r.recipient_id == recipient_id)
            .fold(0u64, |n, mut r| n + transition(&mut r, now) as u64);
        Ok(updated)
    }

    async fn mark_read_batch(&self, receipt_ids: &[Uuid], recipient_id: Uuid) -> PortResult<u64> {
        let table = self.table.write().await;

        // Validate everything before touching anything.
        for id in receipt_ids {
            if lock(table.row(*id)?).recipient_id != recipient_id {
                return Err(PortError::NotOwned(*id));
            }
        }

        let now = Utc::now();
        let unique: HashSet<&Uuid> = receipt_ids.iter().collect();
        let mut updated = 0;
        for id in unique {
            updated += transition(&mut lock(table.row(*id)?), now) as u64;
        }
        Ok(updated)
    }

    async fn delete_for_message(&self, message_id: Uuid) -> PortResult<u64> {
        Ok(self
            .table
            .write()
            .await
            .remove_where(|r| r.message_id == message_id))
    }

    async fn delete_for_conversation(&self, conversation_id: Uuid) -> PortResult<u64> {
        Ok(self
            .table
            .write()
            .await
            .remove_where(|r| r.conversation_id == conversation_id))
    }
}

//=========================================================================================
// Conversation Directory
//=========================================================================================

/// A `ConversationDirectory` backed by a map, for embedding and tests.
#[derive(Default)]
pub struct InMemoryConversations {
    conversations: RwLock<HashMap<Uuid, Conversation>>,
}

impl InMemoryConversations {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, conversation: Conversation) {
        self.conversations
            .write()
            .await
            .insert(conversation.id, conversation);
    }

    pub async fn remove(&self, conversation_id: Uuid) -> Option<Conversation> {
        self.conversations.write().await.remove(&conversation_id)
    }
}

#[async_trait]
impl ConversationDirectory for InMemoryConversations {
    async fn get_conversation(&self, conversation_id: Uuid) -> PortResult<Conversation> {
        self.conversations
            .read()
            .await
            .get(&conversation_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Conversation {} not found", conversation_id)))
    }
}

//=========================================================================================
// Auth Sessions
//=========================================================================================

/// An `AuthSessionService` holding session ids issued elsewhere.
#[derive(Default)]
pub struct InMemoryAuthSessions {
    sessions: RwLock<HashMap<String, Uuid>>,
}

impl InMemoryAuthSessions {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, session_id: impl Into<String>, user_id: Uuid) {
        self.sessions.write().await.insert(session_id.into(), user_id);
    }
}

#[async_trait]
impl AuthSessionService for InMemoryAuthSessions {
    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Option<Uuid>> {
        Ok(self.sessions.read().await.get(session_id).copied())
    }
}
