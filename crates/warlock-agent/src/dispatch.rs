//! Inbound request dispatch.
//!
//! Each inbound envelope is handled on its own task. Handlers never fail:
//! every error becomes a `{success: false, error}` reply, queued as an
//! `ack` when the request carried an id.

use std::path::Path;
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use warlock_protocol::reply::{self, failure, success, success_with};
use warlock_protocol::{Envelope, Pong, Request, event};

use crate::context::AgentContext;
use crate::executor::CommandDescriptor;
use crate::files::{self, Encoding};
use crate::service;

/// Pause between acknowledging an update and restarting, so the reply
/// reaches the panel first.
const RESTART_DELAY: Duration = Duration::from_secs(1);

/// Handle `envelope`, received on `connection`, on a new task.
pub fn spawn(ctx: AgentContext, connection: u64, envelope: Envelope) -> JoinHandle<()> {
    tokio::spawn(async move { handle_envelope(&ctx, connection, envelope).await })
}

/// Decode, handle and reply to one envelope received on `connection`.
pub async fn handle_envelope(ctx: &AgentContext, connection: u64, envelope: Envelope) {
    let id = envelope.id;
    let reply = match Request::from_envelope(&envelope) {
        Ok(request) => {
            debug!(event = request.event_name(), id = ?id, "Handling request");
            handle(ctx, request).await
        },
        Err(e) => {
            warn!(event = %envelope.event, id = ?id, error = %e, "Rejected inbound message");
            Some(failure(e))
        },
    };

    if let (Some(id), Some(data)) = (id, reply) {
        ctx.outbound.reply(connection, id, data);
    }
}

/// Run one request, returning its reply payload. Stream requests have no
/// reply; their output travels as `stream:*` events.
pub async fn handle(ctx: &AgentContext, request: Request) -> Option<Value> {
    let reply = match request {
        Request::Exec(req) => match ctx.executor.execute(&CommandDescriptor::from(req)).await {
            Ok(output) => success(&output),
            Err(e) => failure(e),
        },
        Request::Stream(req) => {
            ctx.streams.start(req);
            return None;
        },
        Request::CollectMetrics => collect_metrics(ctx).await,
        Request::ReadFile(req) => {
            let result = match Encoding::parse(req.encoding.as_deref()) {
                Ok(encoding) => files::read_file(Path::new(&req.path), encoding).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(content) => success_with("content", &content),
                Err(e) => failure(e),
            }
        },
        Request::WriteFile(req) => {
            let result = match Encoding::parse(req.encoding.as_deref()) {
                Ok(encoding) => {
                    files::write_file(Path::new(&req.path), &req.content, encoding).await
                },
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => reply::ok(),
                Err(e) => failure(e),
            }
        },
        Request::ListDir(req) => match files::list_dir(Path::new(&req.path)).await {
            Ok(entries) => success_with("entries", &entries),
            Err(e) => failure(e),
        },
        Request::ServiceControl(req) => match service::control(&ctx.executor, &req).await {
            Ok(output) => {
                info!(
                    service = %req.service,
                    action = %req.action,
                    exit_code = output.exit_code,
                    "Service control finished"
                );
                success(&output)
            },
            Err(e) => failure(e),
        },
        Request::Update(req) => match ctx.updater.install(&req).await {
            Ok(_) => {
                schedule_restart(ctx.clone());
                reply::ok()
            },
            Err(e) => {
                error!(version = %req.version, error = %e, "Agent update failed");
                failure(e)
            },
        },
        Request::Ping => pong(),
    };
    Some(reply)
}

/// `{success, metrics}` or the collection failure.
async fn collect_metrics(ctx: &AgentContext) -> Value {
    match ctx.metrics.collect().await {
        Ok(snapshot) => success_with("metrics", &snapshot),
        Err(e) => failure(format!("Metrics collection failed: {e}")),
    }
}

fn pong() -> Value {
    let pong = Pong::at(chrono::Utc::now().timestamp_millis());
    serde_json::to_value(pong).unwrap_or_else(failure)
}

fn schedule_restart(ctx: AgentContext) {
    tokio::spawn(async move {
        tokio::time::sleep(RESTART_DELAY).await;
        if let Err(e) = ctx.updater.restart(&ctx.executor).await {
            error!(error = %e, "Agent restart after update failed");
        }
    });
}

/// Collect a snapshot and queue it as `metrics:push`. Failures skip the
/// cycle.
pub fn spawn_metrics_push(ctx: &AgentContext) -> JoinHandle<()> {
    let ctx = ctx.clone();
    tokio::spawn(async move {
        match ctx.metrics.collect().await {
            Ok(snapshot) => match serde_json::to_value(&snapshot) {
                Ok(data) => ctx.outbound.emit(event::METRICS_PUSH, data),
                Err(e) => warn!(error = %e, "Failed to encode metrics snapshot"),
            },
            Err(e) => warn!(error = %e, "Metrics push skipped"),
        }
    })
}
