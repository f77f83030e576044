//! `flowrun/test.Server`: a loopback HTTP echo server for exercising
//! `tool/http.Do` in documents and tests.
//!
//! Every request, whatever its path or method, is answered with
//! `{"data": <request body>, "when": "now"}`. The server stops when the run
//! ends.

use axum::Router;
use axum::response::Json;
use flowrun_core::{RunContext, Runner, RunnerError};
use flowrun_types::Value;
use serde_json::json;
use tokio::net::TcpListener;

pub struct Server;

async fn echo(body: String) -> Json<serde_json::Value> {
    Json(json!({ "data": body, "when": "now" }))
}

impl Runner for Server {
    async fn run(&self, ctx: &RunContext) -> Result<Option<Value>, RunnerError> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let router = Router::new().fallback(echo);

        let shutdown = ctx.cancel.clone().cancelled_owned();
        let task = ctx.task.clone();
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown)
                .await
            {
                tracing::warn!(%task, "test server stopped: {e}");
            }
        });

        tracing::info!(task = %ctx.task, %addr, "test server listening");
        Ok(Some(Value::structure([(
            "url",
            Value::String(format!("http://{addr}")),
        )])))
    }
}
