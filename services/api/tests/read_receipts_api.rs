//! End-to-end tests of the HTTP surface over the in-memory adapters.

use api_lib::web::{
    self,
    rest::{ConversationReceiptsResponse, MarkMessagesReadResponse},
    state::AppState,
};
use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    response::Response,
    Router,
};
use read_receipts_core::domain::{Conversation, MessageRef, ReadReceipt};
use read_receipts_core::memory::{InMemoryAuthSessions, InMemoryConversations, InMemoryReceiptStore};
use read_receipts_core::ports::ReceiptStore;
use serde_json::json;
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

struct TestApp {
    router: Router,
    state: Arc<AppState>,
    store: Arc<InMemoryReceiptStore>,
    conversation: Conversation,
    outsider: Uuid,
}

impl TestApp {
    async fn spawn() -> Self {
        let store = Arc::new(InMemoryReceiptStore::new());
        let conversations = Arc::new(InMemoryConversations::new());
        let sessions = Arc::new(InMemoryAuthSessions::new());

        let conversation = Conversation {
            id: Uuid::new_v4(),
            user_a: Uuid::new_v4(),
            user_b: Uuid::new_v4(),
        };
        let outsider = Uuid::new_v4();
        conversations.insert(conversation.clone()).await;
        sessions.insert("token-a", conversation.user_a).await;
        sessions.insert("token-b", conversation.user_b).await;
        sessions.insert("token-outsider", outsider).await;

        let state = Arc::new(AppState::new(store.clone(), conversations, sessions));
        Self {
            router: web::router(state.clone()),
            state,
            store,
            conversation,
            outsider,
        }
    }

    async fn send_from(&self, sender_id: Uuid) -> ReadReceipt {
        self.state
            .receipts
            .record_message(MessageRef {
                id: Uuid::new_v4(),
                conversation_id: self.conversation.id,
                sender_id,
            })
            .await
            .unwrap()
    }

    async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<serde_json::Value>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::COOKIE, format!("session={}", token));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        self.router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap()
    }

    async fn mark_conversation(&self, token: Option<&str>, conversation_id: Uuid) -> Response {
        self.request(
            Method::PUT,
            "/api/messages_read",
            token,
            Some(json!({ "conversationId": conversation_id })),
        )
        .await
    }

    async fn mark_receipts(&self, token: Option<&str>, ids: &[Uuid]) -> Response {
        self.request(
            Method::PUT,
            "/api/messages_read/receipts",
            token,
            Some(json!({ "receiptIds": ids })),
        )
        .await
    }

    async fn is_read(&self, receipt_id: Uuid) -> bool {
        self.store.get_receipt(receipt_id).await.unwrap().has_been_read
    }
}

async fn json_body<T: serde::de::DeserializeOwned>(response: Response) -> T {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_is_public() {
    let app = TestApp::spawn().await;
    let response = app.request(Method::GET, "/health", None, None).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn recipient_marks_conversation_read() {
    let app = TestApp::spawn().await;
    let r1 = app.send_from(app.conversation.user_a).await;

    let response = app.mark_conversation(Some("token-b"), app.conversation.id).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(app.is_read(r1.id).await);
}

#[tokio::test]
async fn outsider_gets_forbidden_and_nothing_changes() {
    let app = TestApp::spawn().await;
    let r1 = app.send_from(app.conversation.user_a).await;

    let response = app
        .mark_conversation(Some("token-outsider"), app.conversation.id)
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(!app.is_read(r1.id).await);
    assert_ne!(app.outsider, app.conversation.user_a);
}

#[tokio::test]
async fn anonymous_and_unknown_sessions_are_unauthorized() {
    let app = TestApp::spawn().await;
    let r1 = app.send_from(app.conversation.user_a).await;

    let response = app.mark_conversation(None, app.conversation.id).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app.mark_receipts(Some("expired-token"), &[r1.id]).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(!app.is_read(r1.id).await);
}

#[tokio::test]
async fn access_token_header_is_accepted() {
    let app = TestApp::spawn().await;
    let r1 = app.send_from(app.conversation.user_a).await;

    let request = Request::builder()
        .method(Method::PUT)
        .uri("/api/messages_read")
        .header("x-access-token", "token-b")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({ "conversationId": app.conversation.id }).to_string()))
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(app.is_read(r1.id).await);
}

#[tokio::test]
async fn unknown_conversation_is_not_found() {
    let app = TestApp::spawn().await;
    let response = app.mark_conversation(Some("token-a"), Uuid::new_v4()).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn marking_own_receipts_returns_count() {
    let app = TestApp::spawn().await;
    let first = app.send_from(app.conversation.user_a).await;
    let second = app.send_from(app.conversation.user_a).await;

    let response = app.mark_receipts(Some("token-b"), &[first.id, second.id]).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: MarkMessagesReadResponse = json_body(response).await;
    assert_eq!(body.updated, 2);

    // Repeating the call is harmless.
    let response = app.mark_receipts(Some("token-b"), &[first.id]).await;
    let body: MarkMessagesReadResponse = json_body(response).await;
    assert_eq!(body.updated, 0);
    assert!(app.is_read(first.id).await);
}

#[tokio::test]
async fn marking_foreign_receipt_fails_entire_call() {
    let app = TestApp::spawn().await;
    let for_b = app.send_from(app.conversation.user_a).await;
    let for_a = app.send_from(app.conversation.user_b).await;

    let response = app.mark_receipts(Some("token-b"), &[for_b.id, for_a.id]).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(!app.is_read(for_b.id).await);
    assert!(!app.is_read(for_a.id).await);
}

#[tokio::test]
async fn missing_receipt_is_not_found() {
    let app = TestApp::spawn().await;
    let response = app.mark_receipts(Some("token-b"), &[Uuid::new_v4()]).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn conversation_receipts_report_unread_for_caller() {
    let app = TestApp::spawn().await;
    app.send_from(app.conversation.user_a).await;
    app.send_from(app.conversation.user_a).await;
    app.send_from(app.conversation.user_b).await;

    let uri = format!("/api/conversations/{}/receipts", app.conversation.id);
    let response = app.request(Method::GET, &uri, Some("token-b"), None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: ConversationReceiptsResponse = json_body(response).await;
    assert_eq!(body.conversation_id, app.conversation.id);
    assert_eq!(body.num_unread, 2);
    assert_eq!(body.messages_read.len(), 3);

    app.mark_conversation(Some("token-b"), app.conversation.id).await;
    let response = app.request(Method::GET, &uri, Some("token-b"), None).await;
    let body: ConversationReceiptsResponse = json_body(response).await;
    assert_eq!(body.num_unread, 0);

    let response = app.request(Method::GET, &uri, Some("token-outsider"), None).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn unread_count_agrees_with_listed_receipts() {
    let app = TestApp::spawn().await;
    let first = app.send_from(app.conversation.user_a).await;
    app.send_from(app.conversation.user_a).await;
    app.send_from(app.conversation.user_b).await;
    app.mark_receipts(Some("token-b"), &[first.id]).await;

    let uri = format!("/api/conversations/{}/receipts", app.conversation.id);
    for (token, user) in [("token-a", app.conversation.user_a), ("token-b", app.conversation.user_b)] {
        let response = app.request(Method::GET, &uri, Some(token), None).await;
        let body: ConversationReceiptsResponse = json_body(response).await;
        let listed_unread = body
            .messages_read
            .iter()
            .filter(|r| r.recipient_id == user && !r.has_been_read)
            .count() as u64;
        assert_eq!(body.num_unread, listed_unread);
        assert_eq!(body.num_unread, 1);
    }
}

#[tokio::test]
async fn stale_cookie_falls_back_to_access_token_header() {
    let app = TestApp::spawn().await;
    let r1 = app.send_from(app.conversation.user_a).await;

    let request = Request::builder()
        .method(Method::PUT)
        .uri("/api/messages_read")
        .header(header::COOKIE, "session=expired-token")
        .header("x-access-token", "token-b")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({ "conversationId": app.conversation.id }).to_string()))
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(app.is_read(r1.id).await);
}
