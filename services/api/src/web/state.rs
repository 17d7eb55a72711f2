//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use read_receipts_core::ports::{AuthSessionService, ConversationDirectory, ReceiptStore};
use read_receipts_core::service::ReadReceiptService;
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub receipts: ReadReceiptService,
    pub auth: Arc<dyn AuthSessionService>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn ReceiptStore>,
        conversations: Arc<dyn ConversationDirectory>,
        auth: Arc<dyn AuthSessionService>,
    ) -> Self {
        Self {
            receipts: ReadReceiptService::new(store, conversations),
            auth,
        }
    }
}
