//! `tool/http.Do`: perform an HTTP request.
//!
//! Input: `method` (default `GET`), `url`, optional `request.body` and
//! `request.header` (values are a string or a list of strings).
//!
//! Output: `response.status`, `response.statusCode`, `response.body` and
//! `response.header` (repeated values joined with `", "`).

use std::collections::BTreeMap;
use std::time::Duration;

use flowrun_core::{RunContext, Runner, RunnerError};
use flowrun_types::{Kind, Value};
use reqwest::{Client, Method};

pub const DO: &str = "tool/http.Do";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct Do {
    client: Client,
}

impl Do {
    pub fn new(_value: &Value) -> Result<Do, RunnerError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("flowrun/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RunnerError::failed(format!("failed to build HTTP client: {e}")))?;
        Ok(Do { client })
    }
}

fn method(ctx: &RunContext) -> Result<Method, RunnerError> {
    let name = ctx.opt_string("method")?.unwrap_or("GET");
    Method::from_bytes(name.to_ascii_uppercase().as_bytes())
        .map_err(|_| RunnerError::failed(format!("invalid HTTP method {name:?}")))
}

fn headers(request: Option<&Value>) -> Result<Vec<(String, String)>, RunnerError> {
    let Some(header) = request.and_then(|r| r.get("header")) else {
        return Ok(Vec::new());
    };
    let fields = match header {
        Value::Incomplete(_) => return Ok(Vec::new()),
        Value::Struct(fields) => fields,
        other => {
            return Err(RunnerError::InvalidField {
                field: "request.header".to_string(),
                expected: Kind::Struct,
                got: other.kind(),
            });
        }
    };

    let mut pairs = Vec::new();
    for (name, value) in fields {
        match value {
            Value::String(s) => pairs.push((name.clone(), s.clone())),
            Value::List(items) => {
                for item in items {
                    let s = item.as_str().ok_or_else(|| RunnerError::InvalidField {
                        field: format!("request.header.{name}"),
                        expected: Kind::String,
                        got: item.kind(),
                    })?;
                    pairs.push((name.clone(), s.to_string()));
                }
            }
            other => {
                return Err(RunnerError::InvalidField {
                    field: format!("request.header.{name}"),
                    expected: Kind::List,
                    got: other.kind(),
                });
            }
        }
    }
    Ok(pairs)
}

impl Runner for Do {
    async fn run(&self, ctx: &RunContext) -> Result<Option<Value>, RunnerError> {
        let url = ctx.string("url")?;
        let method = method(ctx)?;
        let request = ctx.value.get("request");

        let mut builder = self.client.request(method.clone(), url);
        for (name, value) in headers(request)? {
            builder = builder.header(name, value);
        }
        match request.and_then(|r| r.get("body")) {
            None | Some(Value::Incomplete(_)) => {}
            Some(Value::String(body)) => builder = builder.body(body.clone()),
            Some(other) => {
                return Err(RunnerError::InvalidField {
                    field: "request.body".to_string(),
                    expected: Kind::String,
                    got: other.kind(),
                });
            }
        }

        tracing::debug!(task = %ctx.task, %method, url, "sending HTTP request");
        let exchange = async {
            let response = builder.send().await?;
            let status = response.status();
            let mut header: BTreeMap<String, Vec<String>> = BTreeMap::new();
            for (name, value) in response.headers() {
                header
                    .entry(name.as_str().to_string())
                    .or_default()
                    .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
            }
            let body = response.text().await?;
            Ok::<_, reqwest::Error>((status, header, body))
        };

        let (status, header, body) = tokio::select! {
            result = exchange => result.map_err(|e| RunnerError::failed(format!("{method} {url}: {e}")))?,
            _ = ctx.cancel.cancelled() => return Err(RunnerError::failed("cancelled")),
        };

        let header = Value::structure(
            header
                .into_iter()
                .map(|(name, values)| (name, Value::String(values.join(", ")))),
        );
        let response = Value::structure([
            ("status", Value::String(status.to_string())),
            ("statusCode", Value::Int(i64::from(status.as_u16()))),
            ("body", Value::String(body)),
            ("header", header),
        ]);
        Ok(Some(Value::structure([("response", response)])))
    }
}
