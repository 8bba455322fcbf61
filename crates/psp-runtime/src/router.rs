//! Single entry point for inbound protocol messages.

use psp_core::protocol::{parse_request, MessageSender};
use psp_core::Response;
use serde_json::Value;

use crate::coordinator::Coordinator;

/// Decode `message` and dispatch it. Malformed or unknown messages get an
/// error response; nothing is dropped silently.
pub async fn route(coordinator: &Coordinator, sender: &MessageSender, message: &Value) -> Response {
    match parse_request(message) {
        Ok(request) => coordinator.handle(sender, request).await,
        Err(e) => {
            log::warn!("rejecting message from tab {:?}: {}", sender.tab_id, e);
            e.into_response()
        }
    }
}
