//! Terminal output helpers: tables and styled status lines.

use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, Table};
use console::style;
use serde_json::Value;

/// Render a list of JSON objects as a table over the given columns.
pub fn table(columns: &[&str], rows: &[Value]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(columns.iter().map(|c| Cell::new(c)));
    for row in rows {
        table.add_row(columns.iter().map(|col| {
            let value = row.get(*col).cloned().unwrap_or(Value::Null);
            Cell::new(render_cell(&value))
        }));
    }
    table
}

fn render_cell(value: &Value) -> String {
    match value {
        Value::Null => "-".into(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn success(message: &str) {
    println!("{} {}", style("ok").green().bold(), message);
}

pub fn print_json(value: &Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn table_renders_missing_columns_as_dash() {
        let rows = vec![json!({"id": "a", "status": "running"}), json!({"id": "b"})];
        let rendered = table(&["id", "status"], &rows).to_string();
        assert!(rendered.contains("running"));
        assert!(rendered.contains('-'));
    }
}
