//! `flowrun plan`: show discovered tasks and their dependencies without
//! running anything.

use anyhow::{Context, Result};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use flowrun_core::{Engine, Plan};

use super::DocumentArgs;
use crate::state::AppState;

pub async fn plan(state: &AppState, document: &DocumentArgs, json: bool) -> Result<()> {
    let mut doc = document.load().await?;
    let config = document.engine_config(&state.config.engine)?;
    let engine = Engine::new(state.registry.clone(), config);
    let plan = engine
        .plan(&mut doc)
        .with_context(|| format!("cannot plan {}", document.file.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan_json(&plan))?);
        return Ok(());
    }

    if plan.tasks.is_empty() {
        println!();
        println!("  No tasks found under '{}'.", engine.config().root);
        println!(
            "  Try {} to search below the root.",
            style("--infer-tasks").dim()
        );
        println!();
        return Ok(());
    }

    println!();
    println!("{}", plan_table(&plan));
    println!();
    Ok(())
}

fn plan_table(plan: &Plan) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("#"),
            Cell::new("Task").fg(Color::Cyan),
            Cell::new("Kind"),
            Cell::new("Depends on"),
        ]);

    for (position, index) in plan.order().into_iter().enumerate() {
        let task = &plan.tasks[index];
        let deps: Vec<String> = plan
            .dependencies(index)
            .into_iter()
            .map(ToString::to_string)
            .collect();
        let kind = if task.legacy {
            format!("{} (legacy)", task.kind)
        } else {
            task.kind.clone()
        };
        table.add_row(vec![
            Cell::new(position + 1),
            Cell::new(&task.path),
            Cell::new(kind),
            Cell::new(if deps.is_empty() {
                "-".to_string()
            } else {
                deps.join(", ")
            }),
        ]);
    }
    table
}

fn plan_json(plan: &Plan) -> serde_json::Value {
    let tasks: Vec<_> = plan
        .tasks
        .iter()
        .map(|task| {
            serde_json::json!({
                "task": task.path.to_string(),
                "kind": task.kind,
                "legacy": task.legacy,
                "dependencies": plan
                    .dependencies(task.index)
                    .into_iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>(),
            })
        })
        .collect();
    let order: Vec<String> = plan
        .order()
        .into_iter()
        .map(|i| plan.tasks[i].path.to_string())
        .collect();
    serde_json::json!({ "tasks": tasks, "order": order })
}
