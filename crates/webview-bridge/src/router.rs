//! Inbound query routing.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use futures::FutureExt;
use serde_json::Value;
use tokio::runtime::Handle;
use tracing::{debug, trace, warn};

use crate::codec::{self, Rejection};
use crate::error::BridgeResult;
use crate::executor::HostExecutor;
use crate::lifecycle::RequestLifecycle;
use crate::metrics;
use crate::protocol::{codes, status, Envelope, EMPTY_RESPONSE};
use crate::registry::{panic_message, HandlerRegistry, RequestHandler};
use crate::renderer::QueryCallback;

pub type ReadyHook = Arc<dyn Fn() + Send + Sync>;

pub struct InboundRouter {
    registry: Arc<HandlerRegistry>,
    lifecycle: Arc<RequestLifecycle>,
    executor: Arc<dyn HostExecutor>,
    runtime: Handle,
    on_ready: ReadyHook,
}

impl InboundRouter {
    pub fn new(
        registry: Arc<HandlerRegistry>,
        lifecycle: Arc<RequestLifecycle>,
        executor: Arc<dyn HostExecutor>,
        runtime: Handle,
        on_ready: ReadyHook,
    ) -> Self {
        Self {
            registry,
            lifecycle,
            executor,
            runtime,
            on_ready,
        }
    }

    /// Routes one renderer query. Returns false when the text is not a bridge message, in
    /// which case `callback` is left untouched for other consumers of the transport.
    pub fn route(&self, text: &str, callback: Arc<dyn QueryCallback>) -> bool {
        let Some(packet) = codec::parse(text) else {
            trace!(target: "bridge-router", size = text.len(), "ignored non-bridge query");
            metrics::record_query(false);
            return false;
        };
        metrics::record_query(true);

        debug!(
            target: "bridge-router",
            kind = ?packet.kind,
            id = ?packet.id,
            channel = ?packet.channel,
            version = ?packet.version,
            "routing inbound packet"
        );

        let envelope = match packet.classify() {
            Ok(envelope) => envelope,
            Err(rejection) => {
                reject(callback.as_ref(), &rejection);
                return true;
            }
        };

        match envelope {
            Envelope::Ready => {
                callback.success(EMPTY_RESPONSE.to_string());
                let on_ready = self.on_ready.clone();
                self.executor.execute(Box::new(move || on_ready()));
            }
            Envelope::Event { channel, payload } => self.route_event(channel, &payload, callback.as_ref()),
            Envelope::Request { id, channel, payload } => self.route_request(id, channel, &payload, callback),
            Envelope::Response {
                id,
                channel,
                ok,
                payload,
                error,
            } => {
                callback.success(EMPTY_RESPONSE.to_string());
                self.lifecycle
                    .handle_response(id.as_deref(), channel.as_deref(), ok, &payload, error.as_ref());
            }
        }
        true
    }

    fn route_event(&self, channel: Option<String>, payload: &Value, callback: &dyn QueryCallback) {
        let Some(channel) = channel else {
            callback.failure(status::BAD_REQUEST, "Bridge event is missing channel".to_string());
            return;
        };

        callback.success(EMPTY_RESPONSE.to_string());
        let payload_json = codec::payload_to_json(payload);
        let registry = self.registry.clone();
        self.executor
            .execute(Box::new(move || registry.dispatch_event(&channel, &payload_json)));
    }

    fn route_request(
        &self,
        id: Option<String>,
        channel: Option<String>,
        payload: &Value,
        callback: Arc<dyn QueryCallback>,
    ) {
        let Some(id) = id else {
            reply_error(
                callback.as_ref(),
                None,
                channel.as_deref(),
                codes::INVALID_REQUEST,
                "Bridge request is missing id",
            );
            return;
        };
        let Some(channel) = channel else {
            reply_error(
                callback.as_ref(),
                Some(&id),
                None,
                codes::INVALID_REQUEST,
                "Bridge request is missing channel",
            );
            return;
        };
        let Some(handler) = self.registry.request_handler(&channel) else {
            let message = format!("No host bridge handler for channel '{channel}'");
            reply_error(
                callback.as_ref(),
                Some(&id),
                Some(&channel),
                codes::HANDLER_NOT_FOUND,
                &message,
            );
            return;
        };

        let payload_json = codec::payload_to_json(payload);
        debug!(
            target: "bridge-router",
            %id,
            %channel,
            payload_size = payload_json.len(),
            "dispatching inbound request"
        );
        let runtime = self.runtime.clone();
        self.executor.execute(Box::new(move || {
            invoke_handler(handler, id, channel, payload_json, callback, runtime)
        }));
    }
}

fn invoke_handler(
    handler: RequestHandler,
    id: String,
    channel: String,
    payload_json: String,
    callback: Arc<dyn QueryCallback>,
    runtime: Handle,
) {
    let future = match panic::catch_unwind(AssertUnwindSafe(|| handler(&channel, &payload_json))) {
        Ok(future) => future,
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            warn!(target: "bridge-router", %id, %channel, error = %message, "request handler panicked");
            reply_error(callback.as_ref(), Some(&id), Some(&channel), codes::HOST_HANDLER_ERROR, &message);
            return;
        }
    };

    runtime.spawn(async move {
        let outcome = AssertUnwindSafe(future).catch_unwind().await;
        let reply = match outcome {
            Ok(Ok(result)) => encode_result(&id, &channel, result),
            Ok(Err(err)) => {
                let message = err.root_cause().to_string();
                debug!(target: "bridge-router", %id, %channel, error = %message, "request handler failed");
                codec::build_error(Some(&id), Some(&channel), Some(codes::HOST_HANDLER_ERROR), Some(&message))
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                warn!(target: "bridge-router", %id, %channel, error = %message, "request handler panicked");
                codec::build_error(Some(&id), Some(&channel), Some(codes::HOST_HANDLER_ERROR), Some(&message))
            }
        };
        send_reply(callback.as_ref(), reply);
    });
}

fn encode_result(id: &str, channel: &str, result: Option<String>) -> BridgeResult<String> {
    let payload = match result {
        None => Value::Null,
        Some(json) => match codec::parse_payload(&json) {
            Ok(payload) => payload,
            Err(err) => {
                return codec::build_error(
                    Some(id),
                    Some(channel),
                    Some(codes::INVALID_RESPONSE),
                    Some(&err.to_string()),
                )
            }
        },
    };
    debug!(target: "bridge-router", id, channel, "request handler completed");
    codec::build_success(Some(id), Some(channel), &payload)
}

fn reply_error(
    callback: &dyn QueryCallback,
    id: Option<&str>,
    channel: Option<&str>,
    code: &str,
    message: &str,
) {
    send_reply(callback, codec::build_error(id, channel, Some(code), Some(message)));
}

fn send_reply(callback: &dyn QueryCallback, reply: BridgeResult<String>) {
    match reply {
        Ok(text) => callback.success(text),
        Err(err) => {
            warn!(target: "bridge-router", error = %err, "failed to encode bridge response");
            callback.failure(status::BAD_REQUEST, err.to_string());
        }
    }
}

fn reject(callback: &dyn QueryCallback, rejection: &Rejection) {
    debug!(target: "bridge-router", ?rejection, "rejected inbound packet");
    callback.failure(rejection.status(), rejection.message());
}
