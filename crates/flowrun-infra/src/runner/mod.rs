//! Built-in runner kinds.
//!
//! | Kind | Module |
//! |---|---|
//! | `tool/cli.Print`, `tool/cli.Ask` | [`cli`] |
//! | `tool/exec.Run` | [`exec`] |
//! | `tool/file.Read`, `tool/file.Create`, `tool/file.Append` | [`file`] |
//! | `tool/http.Do` | [`http`] |
//! | `tool/os.Getenv` | [`os`] |
//! | `flowrun/test.Server` | [`testserver`] |

pub mod cli;
pub mod exec;
pub mod file;
pub mod http;
pub mod os;
pub mod testserver;

use flowrun_core::registry::TEST_SERVER_KIND;
use flowrun_core::Registry;
use flowrun_types::{Kind, Value};

fn slot(kind: Kind) -> Value {
    Value::Incomplete(kind)
}

/// Register every built-in kind.
pub fn register_builtins(registry: &Registry) {
    registry.register_runner(
        cli::PRINT,
        Value::structure([("text", slot(Kind::String))]),
        |_| Ok(cli::Print),
    );
    registry.register_runner(
        cli::ASK,
        Value::structure([("prompt", slot(Kind::String)), ("response", slot(Kind::Top))]),
        |_| Ok(cli::Ask),
    );
    registry.register_runner(
        exec::RUN,
        Value::structure([("cmd", slot(Kind::Top)), ("success", slot(Kind::Bool))]),
        exec::Run::new,
    );
    registry.register_runner(
        file::READ,
        Value::structure([("filename", slot(Kind::String)), ("contents", slot(Kind::Top))]),
        |_| Ok(file::Read),
    );
    registry.register_runner(
        file::CREATE,
        Value::structure([("filename", slot(Kind::String)), ("contents", slot(Kind::String))]),
        |_| Ok(file::Create),
    );
    registry.register_runner(
        file::APPEND,
        Value::structure([("filename", slot(Kind::String)), ("contents", slot(Kind::String))]),
        |_| Ok(file::Append),
    );
    registry.register_runner(
        http::DO,
        Value::structure([("url", slot(Kind::String)), ("response", slot(Kind::Top))]),
        http::Do::new,
    );
    registry.register_runner(os::GETENV, Value::empty_struct(), |_| Ok(os::Getenv));
    registry.register_runner(
        TEST_SERVER_KIND,
        Value::structure([("url", slot(Kind::String))]),
        |_| Ok(testserver::Server),
    );
    tracing::debug!(kinds = registry.len(), "registered built-in runner kinds");
}

#[cfg(test)]
pub(crate) mod testutil {
    use flowrun_core::runner::CaptureBuffer;
    use flowrun_core::{RunContext, Stdio};
    use flowrun_types::{Path, Value};
    use tokio_util::sync::CancellationToken;

    /// A context for `value` whose stdin serves `input`.
    pub fn context(kind: &str, value: Value, input: &str) -> (RunContext, CaptureBuffer) {
        let (stdio, out, _) = Stdio::capture(input);
        let ctx = RunContext {
            run_id: uuid::Uuid::now_v7(),
            task: Path::parse("tasks.t").unwrap(),
            kind: kind.to_string(),
            value,
            cancel: CancellationToken::new(),
            stdio,
        };
        (ctx, out)
    }

    pub fn json(value: serde_json::Value) -> Value {
        Value::from_json(value).unwrap()
    }
}
