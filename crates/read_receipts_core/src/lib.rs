pub mod domain;
pub mod memory;
pub mod ports;
pub mod service;

pub use domain::{Caller, Conversation, MessageRef, ReadReceipt, ReadState};
pub use ports::{
    AuthSessionService, ConversationDirectory, PortError, PortResult, ReceiptStore, ReceiptStream,
};
pub use service::{retry_storage_once, ReadReceiptService, ReceiptError, ReceiptResult};
