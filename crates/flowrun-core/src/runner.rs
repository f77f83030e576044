//! The `Runner` trait, its object-safe wrapper, and the execution context.
//!
//! Runners use native async fn in traits (RPITIT). Because that makes the
//! trait not object-safe, the registry stores runners as [`BoxRunner`]:
//! 1. `RunnerDyn` is the object-safe twin with a boxed future
//! 2. every `T: Runner` gets `RunnerDyn` through a blanket impl
//! 3. `BoxRunner` wraps `Box<dyn RunnerDyn>` and delegates

use std::future::Future;
use std::io::{self, BufRead, Write};
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use flowrun_types::{Kind, Path, Value};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Errors a runner (or its constructor) can return.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("{0}")]
    Failed(String),

    #[error("could not find field '{0}'")]
    MissingField(String),

    #[error("field '{field}': expected {expected}, found {got}")]
    InvalidField {
        field: String,
        expected: Kind,
        got: Kind,
    },

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// Stop the whole run without reporting an error.
    #[error("aborted")]
    Abort,
}

impl RunnerError {
    pub fn failed(message: impl Into<String>) -> Self {
        RunnerError::Failed(message.into())
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Executes one task.
///
/// `Ok(Some(value))` is unified into the document at the task's path;
/// `Ok(None)` contributes nothing. Returning [`RunnerError::Abort`] stops the
/// run as a success.
pub trait Runner: Send + Sync {
    fn run(
        &self,
        ctx: &RunContext,
    ) -> impl Future<Output = Result<Option<Value>, RunnerError>> + Send;
}

/// Object-safe version of [`Runner`] with a boxed future.
pub trait RunnerDyn: Send + Sync {
    fn run_boxed<'a>(
        &'a self,
        ctx: &'a RunContext,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Value>, RunnerError>> + Send + 'a>>;
}

impl<T: Runner> RunnerDyn for T {
    fn run_boxed<'a>(
        &'a self,
        ctx: &'a RunContext,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Value>, RunnerError>> + Send + 'a>> {
        Box::pin(self.run(ctx))
    }
}

/// Type-erased runner, produced by a kind's constructor.
pub struct BoxRunner {
    inner: Box<dyn RunnerDyn>,
}

impl BoxRunner {
    pub fn new<T: Runner + 'static>(runner: T) -> Self {
        Self {
            inner: Box::new(runner),
        }
    }

    pub async fn run(&self, ctx: &RunContext) -> Result<Option<Value>, RunnerError> {
        self.inner.run_boxed(ctx).await
    }
}

impl std::fmt::Debug for BoxRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxRunner").finish_non_exhaustive()
    }
}

/// A runner built from a synchronous closure.
pub struct RunnerFn<F>(pub F);

impl<F> Runner for RunnerFn<F>
where
    F: Fn(&RunContext) -> Result<Option<Value>, RunnerError> + Send + Sync,
{
    fn run(
        &self,
        ctx: &RunContext,
    ) -> impl Future<Output = Result<Option<Value>, RunnerError>> + Send {
        std::future::ready((self.0)(ctx))
    }
}

// ---------------------------------------------------------------------------
// Stdio
// ---------------------------------------------------------------------------

type SharedReader = Arc<Mutex<Box<dyn BufRead + Send>>>;
type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

/// Standard streams handed to runners. Cloning shares the streams.
#[derive(Clone)]
pub struct Stdio {
    stdin: SharedReader,
    stdout: SharedWriter,
    stderr: SharedWriter,
}

impl Stdio {
    pub fn new(
        stdin: Box<dyn BufRead + Send>,
        stdout: Box<dyn Write + Send>,
        stderr: Box<dyn Write + Send>,
    ) -> Self {
        Self {
            stdin: Arc::new(Mutex::new(stdin)),
            stdout: Arc::new(Mutex::new(stdout)),
            stderr: Arc::new(Mutex::new(stderr)),
        }
    }

    /// The process's own streams.
    pub fn inherit() -> Self {
        Self::new(
            Box::new(io::BufReader::new(io::stdin())),
            Box::new(io::stdout()),
            Box::new(io::stderr()),
        )
    }

    /// Streams backed by memory: `input` is served on stdin and everything
    /// written is collected in the returned buffers.
    pub fn capture(input: &str) -> (Self, CaptureBuffer, CaptureBuffer) {
        let out = CaptureBuffer::default();
        let err = CaptureBuffer::default();
        let stdio = Self::new(
            Box::new(io::Cursor::new(input.as_bytes().to_vec())),
            Box::new(out.clone()),
            Box::new(err.clone()),
        );
        (stdio, out, err)
    }

    /// Write `text` followed by a newline to stdout.
    pub fn println(&self, text: &str) -> io::Result<()> {
        let mut out = self.stdout.lock().unwrap_or_else(|p| p.into_inner());
        writeln!(out, "{text}")?;
        out.flush()
    }

    /// Write raw bytes to stdout.
    pub fn write_stdout(&self, bytes: &[u8]) -> io::Result<()> {
        let mut out = self.stdout.lock().unwrap_or_else(|p| p.into_inner());
        out.write_all(bytes)?;
        out.flush()
    }

    /// Write raw bytes to stderr.
    pub fn write_stderr(&self, bytes: &[u8]) -> io::Result<()> {
        let mut err = self.stderr.lock().unwrap_or_else(|p| p.into_inner());
        err.write_all(bytes)?;
        err.flush()
    }

    /// Write `prompt` to stdout and read one line from stdin, without the
    /// trailing newline. Blocks; call from a blocking context.
    pub fn prompt_line(&self, prompt: &str) -> io::Result<String> {
        {
            let mut out = self.stdout.lock().unwrap_or_else(|p| p.into_inner());
            write!(out, "{prompt}")?;
            out.flush()?;
        }
        let mut line = String::new();
        let mut input = self.stdin.lock().unwrap_or_else(|p| p.into_inner());
        input.read_line(&mut line)?;
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }
}

impl Default for Stdio {
    fn default() -> Self {
        Self::inherit()
    }
}

impl std::fmt::Debug for Stdio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stdio").finish_non_exhaustive()
    }
}

/// In-memory writer whose contents can be read back.
#[derive(Debug, Clone, Default)]
pub struct CaptureBuffer(Arc<Mutex<Vec<u8>>>);

impl CaptureBuffer {
    pub fn contents(&self) -> String {
        let bytes = self.0.lock().unwrap_or_else(|p| p.into_inner());
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl Write for CaptureBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut bytes = self.0.lock().unwrap_or_else(|p| p.into_inner());
        bytes.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RunContext
// ---------------------------------------------------------------------------

/// Everything a runner sees while it executes.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    /// Absolute path of the task.
    pub task: Path,
    pub kind: String,
    /// The task value with references substituted.
    pub value: Value,
    /// Cancelled when the run stops early.
    pub cancel: CancellationToken,
    pub stdio: Stdio,
}

impl RunContext {
    /// A required field of the task value.
    pub fn field(&self, name: &str) -> Result<&Value, RunnerError> {
        self.value
            .get(name)
            .ok_or_else(|| RunnerError::MissingField(name.to_string()))
    }

    /// A required string field.
    pub fn string(&self, name: &str) -> Result<&str, RunnerError> {
        let value = self.field(name)?;
        value.as_str().ok_or_else(|| invalid(name, Kind::String, value))
    }

    /// An optional string field. Present-but-incomplete counts as absent.
    pub fn opt_string(&self, name: &str) -> Result<Option<&str>, RunnerError> {
        match self.value.get(name) {
            None | Some(Value::Incomplete(_)) => Ok(None),
            Some(v) => v
                .as_str()
                .map(Some)
                .ok_or_else(|| invalid(name, Kind::String, v)),
        }
    }

    pub fn int(&self, name: &str) -> Result<i64, RunnerError> {
        let value = self.field(name)?;
        value.as_i64().ok_or_else(|| invalid(name, Kind::Int, value))
    }

    /// An optional bool field, `default` when absent or incomplete.
    pub fn bool_or(&self, name: &str, default: bool) -> Result<bool, RunnerError> {
        match self.value.get(name) {
            None | Some(Value::Incomplete(_)) => Ok(default),
            Some(v) => v.as_bool().ok_or_else(|| invalid(name, Kind::Bool, v)),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

fn invalid(field: &str, expected: Kind, got: &Value) -> RunnerError {
    RunnerError::InvalidField {
        field: field.to_string(),
        expected,
        got: got.kind(),
    }
}
