//! File kinds: `tool/file.Read`, `tool/file.Create`, `tool/file.Append`.

use flowrun_core::{RunContext, Runner, RunnerError};
use flowrun_types::{Kind, Value};
use tokio::io::AsyncWriteExt;

pub const READ: &str = "tool/file.Read";
pub const CREATE: &str = "tool/file.Create";
pub const APPEND: &str = "tool/file.Append";

/// Reads `filename` into `contents`, decoded as UTF-8 with invalid
/// sequences replaced.
pub struct Read;

impl Runner for Read {
    async fn run(&self, ctx: &RunContext) -> Result<Option<Value>, RunnerError> {
        let filename = ctx.string("filename")?;
        let bytes = tokio::fs::read(filename)
            .await
            .map_err(|e| RunnerError::failed(format!("read {filename}: {e}")))?;
        let contents = String::from_utf8_lossy(&bytes).into_owned();
        tracing::debug!(task = %ctx.task, filename, bytes = bytes.len(), "read file");
        Ok(Some(Value::structure([("contents", Value::String(contents))])))
    }
}

/// Writes `contents` to `filename`, replacing what was there.
///
/// An optional integer `permissions` sets the file mode on unix.
pub struct Create;

impl Runner for Create {
    async fn run(&self, ctx: &RunContext) -> Result<Option<Value>, RunnerError> {
        let filename = ctx.string("filename")?;
        let contents = ctx.string("contents")?;
        tokio::fs::write(filename, contents)
            .await
            .map_err(|e| RunnerError::failed(format!("create {filename}: {e}")))?;
        if let Some(mode) = permissions(ctx)? {
            set_permissions(filename, mode).await?;
        }
        Ok(None)
    }
}

/// Appends `contents` to `filename`, creating it when missing.
pub struct Append;

impl Runner for Append {
    async fn run(&self, ctx: &RunContext) -> Result<Option<Value>, RunnerError> {
        let filename = ctx.string("filename")?;
        let contents = ctx.string("contents")?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(filename)
            .await
            .map_err(|e| RunnerError::failed(format!("append {filename}: {e}")))?;
        file.write_all(contents.as_bytes()).await?;
        file.flush().await?;
        Ok(None)
    }
}

fn permissions(ctx: &RunContext) -> Result<Option<u32>, RunnerError> {
    match ctx.value.get("permissions") {
        None | Some(Value::Incomplete(_)) => Ok(None),
        Some(Value::Int(mode)) => u32::try_from(*mode)
            .map(Some)
            .map_err(|_| RunnerError::failed(format!("invalid permissions {mode}"))),
        Some(other) => Err(RunnerError::InvalidField {
            field: "permissions".to_string(),
            expected: Kind::Int,
            got: other.kind(),
        }),
    }
}

#[cfg(unix)]
async fn set_permissions(filename: &str, mode: u32) -> Result<(), RunnerError> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(filename, std::fs::Permissions::from_mode(mode)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn set_permissions(filename: &str, _mode: u32) -> Result<(), RunnerError> {
    tracing::debug!(filename, "file permissions are ignored on this platform");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::testutil::{context, json};
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn create_append_read() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out.txt");
        let filename = path.to_str().unwrap();

        let (ctx, _) = context(
            CREATE,
            json(json!({ "filename": filename, "contents": "one\n" })),
            "",
        );
        assert!(Create.run(&ctx).await.unwrap().is_none());

        let (ctx, _) = context(
            APPEND,
            json(json!({ "filename": filename, "contents": "two\n" })),
            "",
        );
        Append.run(&ctx).await.unwrap();

        let (ctx, _) = context(
            READ,
            json(json!({ "filename": filename, "contents": { "$incomplete": "string" } })),
            "",
        );
        let out = Read.run(&ctx).await.unwrap().unwrap();
        assert_eq!(out.get("contents"), Some(&Value::string("one\ntwo\n")));
    }

    #[tokio::test]
    async fn append_creates_missing_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("new.log");
        let (ctx, _) = context(
            APPEND,
            json(json!({ "filename": path.to_str().unwrap(), "contents": "x" })),
            "",
        );
        Append.run(&ctx).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "x");
    }

    #[tokio::test]
    async fn read_missing_file_fails() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("absent");
        let (ctx, _) = context(READ, json(json!({ "filename": path.to_str().unwrap() })), "");
        let err = Read.run(&ctx).await.unwrap_err();
        assert!(err.to_string().starts_with("read "), "{err}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn create_sets_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("script.sh");
        let (ctx, _) = context(
            CREATE,
            json(json!({
                "filename": path.to_str().unwrap(),
                "contents": "#!/bin/sh\n",
                "permissions": 0o700
            })),
            "",
        );
        Create.run(&ctx).await.unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }
}
