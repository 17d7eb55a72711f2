//! crates/read_receipts_core/src/service.rs
//!
//! The access-controlled operations on read receipts. The service decides who
//! may touch which receipts and hands the actual state transitions to the
//! `ReceiptStore` port.

use futures::TryStreamExt;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::{Caller, Conversation, MessageRef, ReadReceipt};
use crate::ports::{ConversationDirectory, PortError, ReceiptStore};

//=========================================================================================
// Service Error Type
//=========================================================================================

/// Outcomes a caller of the service can observe. Every variant except
/// `StorageFailure` is final.
#[derive(Debug, thiserror::Error)]
pub enum ReceiptError {
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Forbidden")]
    Forbidden,
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("A receipt already exists for message {message_id} and recipient {recipient_id}")]
    DuplicateReceipt { message_id: Uuid, recipient_id: Uuid },
    #[error("Inconsistent data: {0}")]
    Inconsistent(String),
    #[error("Storage failure: {0}")]
    StorageFailure(String),
}

impl ReceiptError {
    pub fn is_retriable(&self) -> bool {
        matches!(self, ReceiptError::StorageFailure(_))
    }
}

impl From<PortError> for ReceiptError {
    fn from(e: PortError) -> Self {
        match e {
            PortError::NotFound(what) => ReceiptError::NotFound(what),
            PortError::DuplicateReceipt { message_id, recipient_id } => {
                ReceiptError::DuplicateReceipt { message_id, recipient_id }
            }
            PortError::NotOwned(_) => ReceiptError::Forbidden,
            PortError::Inconsistent(detail) => ReceiptError::Inconsistent(detail),
            PortError::Storage(detail) => ReceiptError::StorageFailure(detail),
        }
    }
}

pub type ReceiptResult<T> = Result<T, ReceiptError>;

/// Runs `op`, and runs it a second time if the first attempt hit a storage
/// failure. Any other outcome is returned as is.
pub async fn retry_storage_once<T, F, Fut>(mut op: F) -> ReceiptResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ReceiptResult<T>>,
{
    match op().await {
        Err(e) if e.is_retriable() => {
            warn!("Storage failure, retrying once: {}", e);
            op().await
        }
        other => other,
    }
}

//=========================================================================================
// The Service
//=========================================================================================

#[derive(Clone)]
pub struct ReadReceiptService {
    store: Arc<dyn ReceiptStore>,
    conversations: Arc<dyn ConversationDirectory>,
}

impl ReadReceiptService {
    pub fn new(store: Arc<dyn ReceiptStore>, conversations: Arc<dyn ConversationDirectory>) -> Self {
        Self { store, conversations }
    }

    fn authenticated(caller: Caller) -> ReceiptResult<Uuid> {
        caller.user_id().ok_or(ReceiptError::Unauthorized)
    }

    /// Loads the conversation and checks that `user_id` takes part in it.
    async fn participant_conversation(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> ReceiptResult<Conversation> {
        let conversation = self.conversations.get_conversation(conversation_id).await?;
        if !conversation.is_participant(user_id) {
            warn!(
                "User {} is not a participant of conversation {}",
                user_id, conversation_id
            );
            return Err(ReceiptError::Forbidden);
        }
        Ok(conversation)
    }

    /// Creates the receipt for a newly sent message, addressed to the
    /// participant who did not send it.
    ///
    /// The message-creation collaborator must call this exactly once per
    /// message, inside the same transaction as the message insert.
    pub async fn record_message(&self, message: MessageRef) -> ReceiptResult<ReadReceipt> {
        let conversation = self.conversations.get_conversation(message.conversation_id).await?;
        let recipient_id = conversation
            .other_participant(message.sender_id)
            .ok_or_else(|| {
                warn!(
                    "Sender {} is not a participant of conversation {}",
                    message.sender_id, message.conversation_id
                );
                ReceiptError::Forbidden
            })?;

        let receipt = self
            .store
            .create_receipt(message.id, message.conversation_id, recipient_id)
            .await
            .map_err(|e| {
                if let PortError::DuplicateReceipt { .. } = e {
                    error!("Receipt for message {} created twice", message.id);
                }
                ReceiptError::from(e)
            })?;
        debug!("Created receipt {} for message {}", receipt.id, message.id);
        Ok(receipt)
    }

    /// Marks every unread receipt addressed to the caller in the conversation
    /// as read.
    pub async fn mark_conversation_read(&self, caller: Caller, conversation_id: Uuid) -> ReceiptResult<()> {
        let user_id = Self::authenticated(caller)?;
        self.participant_conversation(user_id, conversation_id).await?;

        let updated = self.store.mark_read_bulk(conversation_id, user_id).await?;
        info!(
            "Marked {} receipts read in conversation {} for user {}",
            updated, conversation_id, user_id
        );
        Ok(())
    }

    /// Marks specific receipts as read. The caller must be the recipient of
    /// every one of them, otherwise nothing changes.
    pub async fn mark_messages_read(&self, caller: Caller, receipt_ids: &[Uuid]) -> ReceiptResult<u64> {
        let user_id = Self::authenticated(caller)?;

        let mut seen = HashSet::new();
        let ids: Vec<Uuid> = receipt_ids.iter().copied().filter(|id| seen.insert(*id)).collect();
        if ids.is_empty() {
            return Ok(0);
        }

        for id in &ids {
            let receipt = self.store.get_receipt(*id).await?;
            if receipt.recipient_id != user_id {
                warn!("User {} tried to mark receipt {} owned by another user", user_id, id);
                return Err(ReceiptError::Forbidden);
            }
        }

        // The store re-checks ownership under lock, so a receipt deleted in
        // between fails the whole batch instead of half-applying it.
        let updated = self.store.mark_read_batch(&ids, user_id).await?;
        info!("Marked {} of {} receipts read for user {}", updated, ids.len(), user_id);
        Ok(updated)
    }

    pub async fn unread_count(&self, caller: Caller, conversation_id: Uuid) -> ReceiptResult<u64> {
        let user_id = Self::authenticated(caller)?;
        self.participant_conversation(user_id, conversation_id).await?;
        Ok(self.store.count_unread(conversation_id, user_id).await?)
    }

    pub async fn unread_receipts(&self, caller: Caller, conversation_id: Uuid) -> ReceiptResult<Vec<ReadReceipt>> {
        let user_id = Self::authenticated(caller)?;
        self.participant_conversation(user_id, conversation_id).await?;
        let receipts: Vec<ReadReceipt> = self
            .store
            .get_unread(conversation_id, user_id)
            .await?
            .try_collect()
            .await?;
        Ok(receipts)
    }

    /// All receipts of a conversation, in both directions.
    pub async fn conversation_receipts(
        &self,
        caller: Caller,
        conversation_id: Uuid,
    ) -> ReceiptResult<Vec<ReadReceipt>> {
        let user_id = Self::authenticated(caller)?;
        self.participant_conversation(user_id, conversation_id).await?;
        Ok(self.store.list_for_conversation(conversation_id).await?)
    }
}
