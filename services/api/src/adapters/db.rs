//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, the concrete implementation of
//! the `ReceiptStore`, `ConversationDirectory` and `AuthSessionService` ports
//! from the core crate. It handles all interactions with PostgreSQL using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use read_receipts_core::domain::{Conversation, ReadReceipt};
use read_receipts_core::ports::{
    AuthSessionService, ConversationDirectory, PortError, PortResult, ReceiptStore, ReceiptStream,
};
use sqlx::{FromRow, PgConnection, PgPool};
use tracing::debug;
use uuid::Uuid;

const RECEIPT_COLUMNS: &str =
    "id, message_id, conversation_id, recipient_id, has_been_read, created_at, updated_at";

fn storage(e: sqlx::Error) -> PortError {
    PortError::Storage(e.to_string())
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the storage-backed ports.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Inserts a receipt on an existing connection, so the messaging
    /// collaborator can create it inside its own message transaction.
    ///
    /// The message row must already be visible on `conn`, must belong to
    /// `conversation_id`, and `recipient_id` must be the participant who did
    /// not send it.
    pub async fn create_receipt_in(
        conn: &mut PgConnection,
        message_id: Uuid,
        conversation_id: Uuid,
        recipient_id: Uuid,
    ) -> PortResult<ReadReceipt> {
        let message = sqlx::query_as::<_, MessageOwnerRecord>(
            "SELECT m.conversation_id, m.sender_id, c.user_a, c.user_b \
             FROM messages m JOIN conversations c ON c.id = m.conversation_id \
             WHERE m.id = $1 FOR SHARE OF m",
        )
        .bind(message_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(storage)?
        .ok_or_else(|| PortError::NotFound(format!("Message {} not found", message_id)))?;

        if message.conversation_id != conversation_id {
            return Err(PortError::Inconsistent(format!(
                "message {} belongs to conversation {}, not {}",
                message_id, message.conversation_id, conversation_id
            )));
        }
        if message.intended_recipient() != Some(recipient_id) {
            return Err(PortError::Inconsistent(format!(
                "user {} is not the recipient of message {}",
                recipient_id, message_id
            )));
        }

        let record = sqlx::query_as::<_, ReceiptRecord>(&format!(
            "INSERT INTO read_receipts (id, message_id, conversation_id, recipient_id) \
             VALUES ($1, $2, $3, $4) RETURNING {}",
            RECEIPT_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(message_id)
        .bind(conversation_id)
        .bind(recipient_id)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                PortError::DuplicateReceipt { message_id, recipient_id }
            }
            _ => storage(e),
        })?;
        Ok(record.to_domain())
    }
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct ReceiptRecord {
    id: Uuid,
    message_id: Uuid,
    conversation_id: Uuid,
    recipient_id: Uuid,
    has_been_read: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}
impl ReceiptRecord {
    fn to_domain(self) -> ReadReceipt {
        ReadReceipt {
            id: self.id,
            message_id: self.message_id,
            conversation_id: self.conversation_id,
            recipient_id: self.recipient_id,
            has_been_read: self.has_been_read,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(FromRow)]
struct ConversationRecord {
    id: Uuid,
    user_a: Uuid,
    user_b: Uuid,
}
impl ConversationRecord {
    fn to_domain(self) -> Conversation {
        Conversation {
            id: self.id,
            user_a: self.user_a,
            user_b: self.user_b,
        }
    }
}

#[derive(FromRow)]
struct MessageOwnerRecord {
    conversation_id: Uuid,
    sender_id: Uuid,
    user_a: Uuid,
    user_b: Uuid,
}
impl MessageOwnerRecord {
    fn intended_recipient(&self) -> Option<Uuid> {
        Conversation {
            id: self.conversation_id,
            user_a: self.user_a,
            user_b: self.user_b,
        }
        .other_participant(self.sender_id)
    }
}

#[derive(FromRow)]
struct OwnerRecord {
    id: Uuid,
    recipient_id: Uuid,
}

//=========================================================================================
// `ReceiptStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl ReceiptStore for DbAdapter {
    async fn create_receipt(
        &self,
        message_id: Uuid,
        conversation_id: Uuid,
        recipient_id: Uuid,
    ) -> PortResult<ReadReceipt> {
        let mut tx = self.pool.begin().await.map_err(storage)?;
        let receipt =
            Self::create_receipt_in(&mut *tx, message_id, conversation_id, recipient_id).await?;
        tx.commit().await.map_err(storage)?;
        Ok(receipt)
    }

    async fn get_receipt(&self, receipt_id: Uuid) -> PortResult<ReadReceipt> {
        let record = sqlx::query_as::<_, ReceiptRecord>(&format!(
            "SELECT {} FROM read_receipts WHERE id = $1",
            RECEIPT_COLUMNS
        ))
        .bind(receipt_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => PortError::NotFound(format!("Receipt {} not found", receipt_id)),
            _ => storage(e),
        })?;
        Ok(record.to_domain())
    }

    async fn get_unread(&self, conversation_id: Uuid, recipient_id: Uuid) -> PortResult<ReceiptStream> {
        let pool = self.pool.clone();
        let sql = format!(
            "SELECT {} FROM read_receipts \
             WHERE conversation_id = $1 AND recipient_id = $2 AND has_been_read = FALSE \
             ORDER BY created_at ASC, id ASC",
            RECEIPT_COLUMNS
        );
        let stream = async_stream::try_stream! {
            let mut rows = sqlx::query_as::<_, ReceiptRecord>(&sql)
                .bind(conversation_id)
                .bind(recipient_id)
                .fetch(&pool);
            while let Some(record) = rows.try_next().await.map_err(storage)? {
                yield record.to_domain();
            }
        };
        Ok(Box::pin(stream))
    }

    async fn count_unread(&self, conversation_id: Uuid, recipient_id: Uuid) -> PortResult<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM read_receipts \
             WHERE conversation_id = $1 AND recipient_id = $2 AND has_been_read = FALSE",
        )
        .bind(conversation_id)
        .bind(recipient_id)
        .fetch_one(&self.pool)
        .await
        .map_err(storage)?;
        Ok(count as u64)
    }

    async fn list_for_conversation(&self, conversation_id: Uuid) -> PortResult<Vec<ReadReceipt>> {
        let records = sqlx::query_as::<_, ReceiptRecord>(&format!(
            "SELECT {} FROM read_receipts WHERE conversation_id = $1 ORDER BY created_at ASC, id ASC",
            RECEIPT_COLUMNS
        ))
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn mark_read(&self, receipt_id: Uuid) -> PortResult<ReadReceipt> {
        let flipped = sqlx::query_as::<_, ReceiptRecord>(&format!(
            "UPDATE read_receipts SET has_been_read = TRUE, updated_at = GREATEST(updated_at, NOW()) \
             WHERE id = $1 AND has_been_read = FALSE RETURNING {}",
            RECEIPT_COLUMNS
        ))
        .bind(receipt_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        match flipped {
            Some(record) => Ok(record.to_domain()),
            // Already read, or missing. A fresh statement sees the committed row.
            None => self.get_receipt(receipt_id).await,
        }
    }

    async fn mark_read_bulk(&self, conversation_id: Uuid, recipient_id: Uuid) -> PortResult<u64> {
        let mut tx = self.pool.begin().await.map_err(storage)?;
        let result = sqlx::query(
            "UPDATE read_receipts SET has_been_read = TRUE, updated_at = GREATEST(updated_at, NOW()) \
             WHERE conversation_id = $1 AND recipient_id = $2 AND has_been_read = FALSE",
        )
        .bind(conversation_id)
        .bind(recipient_id)
        .execute(&mut *tx)
        .await
        .map_err(storage)?;
        tx.commit().await.map_err(storage)?;

        debug!(
            "Bulk marked {} receipts in conversation {}",
            result.rows_affected(),
            conversation_id
        );
        Ok(result.rows_affected())
    }

    async fn mark_read_batch(&self, receipt_ids: &[Uuid], recipient_id: Uuid) -> PortResult<u64> {
        let mut tx = self.pool.begin().await.map_err(storage)?;

        let owners = sqlx::query_as::<_, OwnerRecord>(
            "SELECT id, recipient_id FROM read_receipts WHERE id = ANY($1) ORDER BY id FOR UPDATE",
        )
        .bind(receipt_ids)
        .fetch_all(&mut *tx)
        .await
        .map_err(storage)?;

        for id in receipt_ids {
            match owners.iter().find(|o| o.id == *id) {
                None => return Err(PortError::NotFound(format!("Receipt {} not found", id))),
                Some(owner) if owner.recipient_id != recipient_id => {
                    return Err(PortError::NotOwned(*id))
                }
                Some(_) => {}
            }
        }

        let result = sqlx::query(
            "UPDATE read_receipts SET has_been_read = TRUE, updated_at = GREATEST(updated_at, NOW()) \
             WHERE id = ANY($1) AND has_been_read = FALSE",
        )
        .bind(receipt_ids)
        .execute(&mut *tx)
        .await
        .map_err(storage)?;
        tx.commit().await.map_err(storage)?;

        Ok(result.rows_affected())
    }

    async fn delete_for_message(&self, message_id: Uuid) -> PortResult<u64> {
        let result = sqlx::query("DELETE FROM read_receipts WHERE message_id = $1")
            .bind(message_id)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(result.rows_affected())
    }

    async fn delete_for_conversation(&self, conversation_id: Uuid) -> PortResult<u64> {
        let result = sqlx::query("DELETE FROM read_receipts WHERE conversation_id = $1")
            .bind(conversation_id)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(result.rows_affected())
    }
}

//=========================================================================================
// Collaborator Port Implementations
//=========================================================================================

#[async_trait]
impl ConversationDirectory for DbAdapter {
    async fn get_conversation(&self, conversation_id: Uuid) -> PortResult<Conversation> {
        let record = sqlx::query_as::<_, ConversationRecord>(
            "SELECT id, user_a, user_b FROM conversations WHERE id = $1",
        )
        .bind(conversation_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => {
                PortError::NotFound(format!("Conversation {} not found", conversation_id))
            }
            _ => storage(e),
        })?;
        Ok(record.to_domain())
    }
}

#[async_trait]
impl AuthSessionService for DbAdapter {
    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Option<Uuid>> {
        sqlx::query_scalar("SELECT user_id FROM auth_sessions WHERE id = $1 AND expires_at > NOW()")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)
    }
}
