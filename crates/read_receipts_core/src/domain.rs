//! crates/read_receipts_core/src/domain.rs
//!
//! Defines the pure, core data structures for read-state tracking.
//! These structs are independent of any database or transport format.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// The identity attached to an inbound request by the authentication layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Caller {
    Anonymous,
    User(Uuid),
}

impl Caller {
    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            Caller::Anonymous => None,
            Caller::User(id) => Some(*id),
        }
    }
}

/// A two-party conversation, owned by the conversation collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub id: Uuid,
    pub user_a: Uuid,
    pub user_b: Uuid,
}

impl Conversation {
    pub fn is_participant(&self, user_id: Uuid) -> bool {
        self.user_a == user_id || self.user_b == user_id
    }

    /// Returns the participant who is not `user_id`, or `None` when `user_id`
    /// does not belong to the conversation.
    pub fn other_participant(&self, user_id: Uuid) -> Option<Uuid> {
        if self.user_a == user_id {
            Some(self.user_b)
        } else if self.user_b == user_id {
            Some(self.user_a)
        } else {
            None
        }
    }
}

/// The slice of a freshly created message that receipt tracking needs.
#[derive(Debug, Clone, Copy)]
pub struct MessageRef {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
}

/// The two states of a receipt. `Read` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadState {
    Unread,
    Read,
}

/// Read state of one message for its single intended recipient.
///
/// `conversation_id` is copied from the message when the receipt is created
/// and never rewritten. `has_been_read` only ever moves from `false` to `true`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadReceipt {
    pub id: Uuid,
    pub message_id: Uuid,
    pub conversation_id: Uuid,
    pub recipient_id: Uuid,
    pub has_been_read: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReadReceipt {
    pub fn state(&self) -> ReadState {
        if self.has_been_read {
            ReadState::Read
        } else {
            ReadState::Unread
        }
    }
}
