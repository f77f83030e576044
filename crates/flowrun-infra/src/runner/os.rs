//! `tool/os.Getenv`: read environment variables.
//!
//! Every field not starting with `$` names a variable. The result holds the
//! variable's value, or `null` when it is not set. A field declared as
//! `int`, `float`, `number` or `bool` has the value parsed accordingly.
//! A variable that may be unset should be declared `_` so that `null` can
//! merge into it.

use flowrun_core::{RunContext, Runner, RunnerError};
use flowrun_types::{Kind, Value};

pub const GETENV: &str = "tool/os.Getenv";

pub struct Getenv;

impl Runner for Getenv {
    async fn run(&self, ctx: &RunContext) -> Result<Option<Value>, RunnerError> {
        let Some(fields) = ctx.value.as_struct() else {
            return Ok(None);
        };

        let mut out = Vec::new();
        for (name, declared) in fields {
            if name.starts_with('$') {
                continue;
            }
            let value = match std::env::var(name) {
                Ok(raw) => parse(name, &raw, declared.kind())?,
                Err(std::env::VarError::NotPresent) => Value::Null,
                Err(e) => return Err(RunnerError::failed(format!("{name}: {e}"))),
            };
            out.push((name.clone(), value));
        }
        Ok(Some(Value::structure(out)))
    }
}

fn parse(name: &str, raw: &str, declared: Kind) -> Result<Value, RunnerError> {
    let bad = |what: &str| RunnerError::failed(format!("invalid {what} value {raw:?} for {name}"));
    let value = match declared {
        Kind::Int => Value::Int(raw.trim().parse().map_err(|_| bad("int"))?),
        Kind::Float => Value::Float(raw.trim().parse().map_err(|_| bad("float"))?),
        Kind::Number => match raw.trim().parse::<i64>() {
            Ok(i) => Value::Int(i),
            Err(_) => Value::Float(raw.trim().parse().map_err(|_| bad("number"))?),
        },
        Kind::Bool => match raw.trim() {
            "1" | "t" | "T" | "true" | "TRUE" | "True" => Value::Bool(true),
            "0" | "f" | "F" | "false" | "FALSE" | "False" => Value::Bool(false),
            _ => return Err(bad("bool")),
        },
        _ => Value::String(raw.to_string()),
    };
    Ok(value)
}
