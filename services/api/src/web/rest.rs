//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use crate::error::ApiError;
use crate::web::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use chrono::{DateTime, Utc};
use read_receipts_core::domain::{Caller, ReadReceipt};
use read_receipts_core::service::retry_storage_once;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        mark_conversation_read_handler,
        mark_messages_read_handler,
        conversation_receipts_handler,
    ),
    components(
        schemas(
            MarkConversationReadRequest,
            MarkMessagesReadRequest,
            MarkMessagesReadResponse,
            ReceiptView,
            ConversationReceiptsResponse,
        )
    ),
    tags(
        (name = "Read Receipts API", description = "Read state of direct messages.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Request, Response and Payload Structs
//=========================================================================================

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MarkConversationReadRequest {
    pub conversation_id: Uuid,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MarkMessagesReadRequest {
    pub receipt_ids: Vec<Uuid>,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct MarkMessagesReadResponse {
    /// Receipts that moved from unread to read.
    pub updated: u64,
}

/// A read receipt as seen by clients.
#[derive(Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptView {
    pub id: Uuid,
    pub message_id: Uuid,
    pub conversation_id: Uuid,
    pub recipient_id: Uuid,
    pub has_been_read: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ReadReceipt> for ReceiptView {
    fn from(r: ReadReceipt) -> Self {
        Self {
            id: r.id,
            message_id: r.message_id,
            conversation_id: r.conversation_id,
            recipient_id: r.recipient_id,
            has_been_read: r.has_been_read,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConversationReceiptsResponse {
    pub conversation_id: Uuid,
    /// Unread receipts addressed to the caller.
    pub num_unread: u64,
    pub messages_read: Vec<ReceiptView>,
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

pub async fn health_handler() -> &'static str {
    "OK"
}

/// Mark every message the caller received in a conversation as read.
#[utoipa::path(
    put,
    path = "/api/messages_read",
    request_body = MarkConversationReadRequest,
    responses(
        (status = 204, description = "Conversation marked read"),
        (status = 401, description = "No authenticated caller"),
        (status = 403, description = "Caller is not a participant"),
        (status = 404, description = "Conversation not found"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn mark_conversation_read_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<MarkConversationReadRequest>,
) -> Result<StatusCode, ApiError> {
    let receipts = &app_state.receipts;
    let conversation_id = req.conversation_id;
    retry_storage_once(move || receipts.mark_conversation_read(caller, conversation_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Mark specific receipts as read. Every receipt must be addressed to the caller.
#[utoipa::path(
    put,
    path = "/api/messages_read/receipts",
    request_body = MarkMessagesReadRequest,
    responses(
        (status = 200, description = "Receipts marked read", body = MarkMessagesReadResponse),
        (status = 401, description = "No authenticated caller"),
        (status = 403, description = "A receipt belongs to another recipient"),
        (status = 404, description = "A receipt does not exist"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn mark_messages_read_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<MarkMessagesReadRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let receipts = &app_state.receipts;
    let ids = req.receipt_ids.as_slice();
    let updated = retry_storage_once(move || receipts.mark_messages_read(caller, ids)).await?;
    Ok(Json(MarkMessagesReadResponse { updated }))
}

/// List a conversation's receipts along with the caller's unread count.
#[utoipa::path(
    get,
    path = "/api/conversations/{conversation_id}/receipts",
    responses(
        (status = 200, description = "Receipts of the conversation", body = ConversationReceiptsResponse),
        (status = 401, description = "No authenticated caller"),
        (status = 403, description = "Caller is not a participant"),
        (status = 404, description = "Conversation not found"),
        (status = 500, description = "Internal server error")
    ),
    params(
        ("conversation_id" = Uuid, Path, description = "The conversation to inspect.")
    )
)]
pub async fn conversation_receipts_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(conversation_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let service = &app_state.receipts;
    let receipts =
        retry_storage_once(move || service.conversation_receipts(caller, conversation_id)).await?;
    // Counted from the listed snapshot.
    let num_unread = receipts
        .iter()
        .filter(|r| Some(r.recipient_id) == caller.user_id() && !r.has_been_read)
        .count() as u64;

    Ok(Json(ConversationReceiptsResponse {
        conversation_id,
        num_unread,
        messages_read: receipts.into_iter().map(ReceiptView::from).collect(),
    }))
}
