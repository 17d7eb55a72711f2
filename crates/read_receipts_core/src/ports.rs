//! crates/read_receipts_core/src/ports.rs
//!
//! Defines the service contracts (traits) the read-receipt core depends on.
//! These traits form the boundary of the hexagonal architecture, so the core
//! stays independent of the concrete database and authentication backends.

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use uuid::Uuid;

use crate::domain::{Conversation, ReadReceipt};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("A receipt already exists for message {message_id} and recipient {recipient_id}")]
    DuplicateReceipt { message_id: Uuid, recipient_id: Uuid },
    #[error("Receipt {0} belongs to another recipient")]
    NotOwned(Uuid),
    #[error("Inconsistent data: {0}")]
    Inconsistent(String),
    #[error("Storage failure: {0}")]
    Storage(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

/// A finite, lazily evaluated sequence of receipts. Calling the producing
/// operation again yields a fresh sequence.
pub type ReceiptStream = Pin<Box<dyn Stream<Item = PortResult<ReadReceipt>> + Send>>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait ReceiptStore: Send + Sync {
    // --- Creation ---
    async fn create_receipt(
        &self,
        message_id: Uuid,
        conversation_id: Uuid,
        recipient_id: Uuid,
    ) -> PortResult<ReadReceipt>;

    // --- Queries ---
    async fn get_receipt(&self, receipt_id: Uuid) -> PortResult<ReadReceipt>;

    async fn get_unread(&self, conversation_id: Uuid, recipient_id: Uuid) -> PortResult<ReceiptStream>;

    async fn count_unread(&self, conversation_id: Uuid, recipient_id: Uuid) -> PortResult<u64>;

    async fn list_for_conversation(&self, conversation_id: Uuid) -> PortResult<Vec<ReadReceipt>>;

    // --- State Transitions ---
    /// Moves one receipt to read. Already-read receipts are returned untouched.
    async fn mark_read(&self, receipt_id: Uuid) -> PortResult<ReadReceipt>;

    /// Moves every unread receipt of `recipient_id` in the conversation to read
    /// in a single commit and returns how many changed.
    async fn mark_read_bulk(&self, conversation_id: Uuid, recipient_id: Uuid) -> PortResult<u64>;

    /// Moves the listed receipts to read in a single commit. Fails without
    /// changing anything if one is missing or addressed to someone else.
    async fn mark_read_batch(&self, receipt_ids: &[Uuid], recipient_id: Uuid) -> PortResult<u64>;

    // --- Cleanup ---
    async fn delete_for_message(&self, message_id: Uuid) -> PortResult<u64>;

    async fn delete_for_conversation(&self, conversation_id: Uuid) -> PortResult<u64>;
}

#[async_trait]
pub trait ConversationDirectory: Send + Sync {
    async fn get_conversation(&self, conversation_id: Uuid) -> PortResult<Conversation>;
}

#[async_trait]
pub trait AuthSessionService: Send + Sync {
    /// Resolves an auth session id to its user, or `None` when the session is
    /// unknown or expired.
    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Option<Uuid>>;
}
