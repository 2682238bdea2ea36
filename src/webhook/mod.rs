//! # Webhook
//!
//! The mutating admission webhook and the push receiver (§4.5) share one
//! process (`stoker-webhook`) and one axum `Router`, since both are
//! stateless/request-parallel HTTP handlers over the same Kubernetes
//! client and configuration.

pub mod admission;
pub mod push_receiver;

use axum::routing::post;
use axum::Router;
use kube::Client;
use std::sync::Arc;

use crate::config::WebhookConfig;

pub struct WebhookState {
    pub client: Client,
    pub config: WebhookConfig,
}

/// Builds the webhook router: `POST /mutate` for the admission webhook,
/// `POST /webhook/{namespace}/{name}` for the push receiver.
#[must_use]
pub fn router(client: Client, config: WebhookConfig) -> Router {
    let state = Arc::new(WebhookState { client, config });
    Router::new()
        .route("/mutate", post(admission::handle))
        .route("/webhook/{namespace}/{name}", post(push_receiver::handle))
        .with_state(state)
}
