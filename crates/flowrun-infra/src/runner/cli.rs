//! Console kinds: `tool/cli.Print` and `tool/cli.Ask`.

use flowrun_core::{RunContext, Runner, RunnerError};
use flowrun_types::{Kind, Value};

pub const PRINT: &str = "tool/cli.Print";
pub const ASK: &str = "tool/cli.Ask";

/// Writes `text` and a newline to stdout.
pub struct Print;

impl Runner for Print {
    async fn run(&self, ctx: &RunContext) -> Result<Option<Value>, RunnerError> {
        let text = ctx.string("text")?;
        ctx.stdio.println(text)?;
        Ok(None)
    }
}

/// Shows `prompt` and reads one line into `response`.
///
/// When `response` is declared as a bool, `yes`, `y` and `true` (any case)
/// answer true and anything else false.
pub struct Ask;

impl Runner for Ask {
    async fn run(&self, ctx: &RunContext) -> Result<Option<Value>, RunnerError> {
        let prompt = format!("{} ", ctx.string("prompt")?);
        let wants_bool = matches!(
            ctx.value.get("response"),
            Some(Value::Incomplete(Kind::Bool) | Value::Bool(_))
        );

        // stdin reads block, keep them off the runtime threads
        let stdio = ctx.stdio.clone();
        let line = tokio::task::spawn_blocking(move || stdio.prompt_line(&prompt))
            .await
            .map_err(|e| RunnerError::failed(format!("prompt interrupted: {e}")))??;

        let response = if wants_bool {
            let answer = line.trim().to_ascii_lowercase();
            Value::Bool(matches!(answer.as_str(), "yes" | "y" | "true"))
        } else {
            Value::String(line)
        };
        Ok(Some(Value::structure([("response", response)])))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::testutil::{context, json};
    use serde_json::json;

    #[tokio::test]
    async fn print_writes_line() {
        let (ctx, out) = context(PRINT, json(json!({ "text": "hello" })), "");
        assert!(Print.run(&ctx).await.unwrap().is_none());
        assert_eq!(out.contents(), "hello\n");
    }

    #[tokio::test]
    async fn print_requires_text() {
        let (ctx, _) = context(PRINT, json(json!({})), "");
        let err = Print.run(&ctx).await.unwrap_err();
        assert_eq!(err.to_string(), "could not find field 'text'");
    }

    #[tokio::test]
    async fn ask_reads_a_string() {
        let (ctx, out) = context(
            ASK,
            json(json!({ "prompt": "name?", "response": { "$incomplete": "string" } })),
            "alice\n",
        );
        let result = Ask.run(&ctx).await.unwrap().unwrap();
        assert_eq!(result.get("response"), Some(&Value::string("alice")));
        assert_eq!(out.contents(), "name? ");
    }

    #[tokio::test]
    async fn ask_reads_a_bool() {
        let (ctx, _) = context(
            ASK,
            json(json!({ "prompt": "sure?", "response": { "$incomplete": "bool" } })),
            "Yes\n",
        );
        let result = Ask.run(&ctx).await.unwrap().unwrap();
        assert_eq!(result.get("response"), Some(&Value::Bool(true)));

        let (ctx, _) = context(
            ASK,
            json(json!({ "prompt": "sure?", "response": { "$incomplete": "bool" } })),
            "nope\n",
        );
        let result = Ask.run(&ctx).await.unwrap().unwrap();
        assert_eq!(result.get("response"), Some(&Value::Bool(false)));
    }
}
