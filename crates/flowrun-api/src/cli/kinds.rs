//! `flowrun kinds`: list registered task kinds.

use anyhow::Result;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};

use flowrun_core::registry::LEGACY_KINDS;

use crate::state::AppState;

/// Legacy short names that resolve to `kind`.
fn aliases(kind: &str) -> Vec<&'static str> {
    LEGACY_KINDS
        .iter()
        .filter(|(_, canonical)| *canonical == kind)
        .map(|(alias, _)| *alias)
        .collect()
}

pub fn kinds(state: &AppState, json: bool) -> Result<()> {
    let kinds = state.registry.kinds();

    if json {
        let out: Vec<_> = kinds
            .iter()
            .map(|kind| serde_json::json!({ "kind": kind, "aliases": aliases(kind) }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Kind").fg(Color::Cyan),
            Cell::new("Legacy alias"),
        ]);
    for kind in &kinds {
        table.add_row(vec![Cell::new(kind), Cell::new(aliases(kind).join(", "))]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_map_back_to_kinds() {
        assert_eq!(aliases("tool/exec.Run"), vec!["exec"]);
        assert_eq!(aliases("flowrun/test.Server"), vec!["testserver"]);
        assert!(aliases("tool/file.Read").is_empty());
    }
}
