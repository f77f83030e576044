//! `flowrun run`: execute a document's tasks.

use anyhow::Result;
use console::style;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use flowrun_core::{Engine, RunReport, TreeDocument};
use flowrun_types::event::{TaskEvent, TaskState};

use super::DocumentArgs;
use crate::state::AppState;

pub struct RunOptions {
    pub allow_incomplete: bool,
    pub print_document: bool,
    pub verbose: u8,
    pub quiet: bool,
    pub json: bool,
}

pub async fn run(
    state: &AppState,
    document: &DocumentArgs,
    options: &RunOptions,
    shutdown: &CancellationToken,
) -> Result<()> {
    let doc = document.load().await?;
    let mut config = document.engine_config(&state.config.engine)?;
    config.allow_incomplete |= options.allow_incomplete;

    let engine = Engine::new(state.registry.clone(), config);
    let printer = (options.verbose > 0 && !options.quiet).then(|| spawn_event_printer(&engine, options.json));

    let report = engine.run_until(doc, shutdown).await;

    // Closing the bus ends the printer once it has drained.
    drop(engine);
    if let Some(printer) = printer {
        if let Err(e) = printer.await {
            tracing::warn!("event printer failed: {e}");
        }
    }

    if options.json {
        println!("{}", serde_json::to_string_pretty(&report_json(&report, options.print_document))?);
    } else {
        print_summary(&report, options);
    }

    report.outcome?;
    Ok(())
}

fn spawn_event_printer(engine: &Engine, json: bool) -> JoinHandle<()> {
    let mut events = engine.events().subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) if json => match serde_json::to_string(&event) {
                    Ok(line) => eprintln!("{line}"),
                    Err(e) => tracing::warn!("failed to encode event: {e}"),
                },
                Ok(event) => eprintln!("{}", describe(&event)),
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "event printer fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn describe(event: &TaskEvent) -> String {
    match event {
        TaskEvent::Waiting {
            task, dependencies, ..
        } => {
            let deps: Vec<String> = dependencies.iter().map(ToString::to_string).collect();
            format!(
                "  {} {} waiting on {}",
                style("…").dim(),
                style(task).cyan(),
                deps.join(", ")
            )
        }
        TaskEvent::Started { task, kind, .. } => format!(
            "  {} {} {}",
            style("▸").bold(),
            style(task).cyan(),
            style(kind).dim()
        ),
        TaskEvent::Completed {
            task, duration_ms, ..
        } => format!(
            "  {} {} {}",
            style("✓").green(),
            style(task).cyan(),
            style(format!("{duration_ms}ms")).dim()
        ),
        TaskEvent::Failed { task, error, .. } => format!(
            "  {} {} {}",
            style("✗").red(),
            style(task).cyan(),
            style(error).red()
        ),
        TaskEvent::Cancelled { task, .. } => format!(
            "  {} {} cancelled",
            style("-").yellow(),
            style(task).cyan()
        ),
    }
}

fn report_json(report: &RunReport<TreeDocument>, with_document: bool) -> serde_json::Value {
    let tasks: Vec<_> = report
        .states
        .iter()
        .map(|(task, state)| serde_json::json!({ "task": task.to_string(), "state": state }))
        .collect();
    let mut out = serde_json::json!({
        "run_id": report.run_id.to_string(),
        "success": report.is_success(),
        "aborted": report.aborted,
        "error": report.outcome.as_ref().err().map(ToString::to_string),
        "tasks": tasks,
    });
    if with_document && report.is_success() {
        out["document"] = report.document.root().to_json();
    }
    out
}

fn print_summary(report: &RunReport<TreeDocument>, options: &RunOptions) {
    if options.print_document && report.is_success() {
        match serde_json::to_string_pretty(&report.document.root().to_json()) {
            Ok(text) => println!("{text}"),
            Err(e) => tracing::warn!("failed to encode document: {e}"),
        }
    }
    if options.quiet || options.verbose == 0 {
        return;
    }

    let count = |wanted: TaskState| report.states.iter().filter(|(_, s)| *s == wanted).count();
    let run_id = report.run_id.to_string();
    let short_id = &run_id[..8.min(run_id.len())];
    eprintln!();
    if report.aborted {
        eprintln!(
            "  {} Run {} aborted by a task ({} done)",
            style("*").yellow().bold(),
            style(short_id).cyan(),
            count(TaskState::Done)
        );
    } else if report.is_success() {
        eprintln!(
            "  {} Run {} finished: {} tasks done",
            style("*").green().bold(),
            style(short_id).cyan(),
            count(TaskState::Done)
        );
    } else {
        eprintln!(
            "  {} Run {} failed: {} done, {} failed, {} cancelled",
            style("*").red().bold(),
            style(short_id).cyan(),
            count(TaskState::Done),
            count(TaskState::Failed),
            count(TaskState::Cancelled)
        );
    }
    eprintln!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowrun_types::Path;
    use flowrun_types::config::FlowConfig;
    use std::path::PathBuf;

    fn options() -> RunOptions {
        RunOptions {
            allow_incomplete: false,
            print_document: false,
            verbose: 0,
            quiet: true,
            json: false,
        }
    }

    async fn write(dir: &tempfile::TempDir, name: &str, text: &str) -> PathBuf {
        let path = dir.path().join(name);
        tokio::fs::write(&path, text).await.unwrap();
        path
    }

    #[tokio::test]
    async fn runs_a_document_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let file = write(
            &tmp,
            "flow.json",
            r#"{ "env": { "$id": "tool/os.Getenv", "FLOWRUN_TEST_UNSET_VAR": { "$incomplete": "_" } } }"#,
        )
        .await;
        let state = AppState::new(FlowConfig::default());
        let args = DocumentArgs {
            file,
            root: None,
            infer_tasks: false,
        };
        run(&state, &args, &options(), &CancellationToken::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn failing_task_is_an_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let missing = tmp.path().join("missing.txt");
        let file = write(
            &tmp,
            "flow.json",
            &serde_json::json!({
                "read": { "$id": "tool/file.Read", "filename": missing.to_str().unwrap() }
            })
            .to_string(),
        )
        .await;
        let state = AppState::new(FlowConfig::default());
        let args = DocumentArgs {
            file,
            root: None,
            infer_tasks: false,
        };
        let err = run(&state, &args, &options(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("task read: "), "{err}");
    }

    #[tokio::test]
    async fn verbose_run_waits_for_the_event_printer() {
        let tmp = tempfile::TempDir::new().unwrap();
        let file = write(
            &tmp,
            "flow.json",
            r#"{ "env": { "$id": "tool/os.Getenv", "FLOWRUN_TEST_UNSET_VAR": { "$incomplete": "_" } } }"#,
        )
        .await;
        let state = AppState::new(FlowConfig::default());
        let args = DocumentArgs {
            file,
            root: None,
            infer_tasks: false,
        };
        let options = RunOptions {
            verbose: 1,
            quiet: false,
            json: true,
            ..options()
        };
        let finished = tokio::time::timeout(
            std::time::Duration::from_secs(10),
            run(&state, &args, &options, &CancellationToken::new()),
        )
        .await
        .expect("printer should end once the engine is dropped");
        finished.unwrap();
    }

    #[tokio::test]
    async fn event_printer_ends_when_the_engine_is_dropped() {
        let state = AppState::new(FlowConfig::default());
        let engine = Engine::new(state.registry.clone(), Default::default());
        let printer = spawn_event_printer(&engine, false);
        drop(engine);
        tokio::time::timeout(std::time::Duration::from_secs(5), printer)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn json_report_includes_states() {
        let report = RunReport {
            run_id: uuid::Uuid::nil(),
            document: TreeDocument::new(flowrun_types::Value::empty_struct()),
            outcome: Ok(()),
            states: vec![(Path::parse("a").unwrap(), TaskState::Done)],
            aborted: false,
        };
        let json = report_json(&report, true);
        assert_eq!(json["success"], true);
        assert_eq!(json["tasks"][0]["task"], "a");
        assert_eq!(json["tasks"][0]["state"], "done");
        assert_eq!(json["document"], serde_json::json!({}));
        assert!(json["error"].is_null());
    }
}
