//! Rendering of detached result sets for the command line.

use serde_json::Value as JsonValue;
use unicode_width::UnicodeWidthStr;

use crate::config::OutputFormat;
use crate::models::RowSet;

/// Render a row set in the requested format.
pub fn format_row_set(rows: &RowSet, format: OutputFormat) -> String {
    match format {
        OutputFormat::Table => format_as_table(rows),
        OutputFormat::Markdown => format_as_markdown(rows),
        OutputFormat::Json => format_as_json(rows),
    }
}

pub fn format_value(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => "NULL".to_string(),
        JsonValue::Bool(b) => b.to_string(),
        JsonValue::Number(n) => n.to_string(),
        JsonValue::String(s) => s.clone(),
        JsonValue::Array(arr) => serde_json::to_string(arr).unwrap_or_default(),
        JsonValue::Object(obj) => serde_json::to_string(obj).unwrap_or_default(),
    }
}

/// ASCII table in the style of the MySQL client.
pub fn format_as_table(rows: &RowSet) -> String {
    let columns = rows.column_names();
    if columns.is_empty() {
        return format!(
            "Empty set ({:.2} sec)\n",
            rows.execution_time_ms as f64 / 1000.0
        );
    }

    let mut widths: Vec<usize> = columns.iter().map(|c| c.width()).collect();
    for row in &rows.rows {
        for (i, col) in columns.iter().enumerate() {
            if let Some(value) = row.get(*col) {
                widths[i] = widths[i].max(format_value(value).width());
            }
        }
    }

    let separator: String = widths
        .iter()
        .map(|w| format!("+{}", "-".repeat(w + 2)))
        .collect::<String>()
        + "+\n";

    let mut output = separator.clone();
    output.push_str(
        &(columns
            .iter()
            .zip(&widths)
            .map(|(col, w)| format!("| {} ", pad_center(col, *w)))
            .collect::<String>()
            + "|\n"),
    );
    output.push_str(&separator);

    for row in &rows.rows {
        let line: String = columns
            .iter()
            .zip(&widths)
            .map(|(col, w)| {
                let value = row.get(*col).unwrap_or(&JsonValue::Null);
                let formatted = format_value(value);
                if matches!(value, JsonValue::Number(_)) {
                    format!("| {} ", pad_left(&formatted, *w))
                } else {
                    format!("| {} ", pad_right(&formatted, *w))
                }
            })
            .collect::<String>()
            + "|\n";
        output.push_str(&line);
    }

    output.push_str(&separator);

    let count = rows.row_count();
    let row_text = if count == 1 { "row" } else { "rows" };
    output.push_str(&format!(
        "{} {} in set ({:.2} sec)\n",
        count,
        row_text,
        rows.execution_time_ms as f64 / 1000.0
    ));

    output
}

pub fn format_as_markdown(rows: &RowSet) -> String {
    let columns = rows.column_names();
    if columns.is_empty() {
        return "*Empty set*\n".to_string();
    }

    let mut output: String = columns.iter().map(|c| format!("| {} ", c)).collect::<String>() + "|\n";
    output.push_str(&(columns.iter().map(|_| "|---").collect::<String>() + "|\n"));

    for row in &rows.rows {
        let line: String = columns
            .iter()
            .map(|col| {
                let value = row.get(*col).unwrap_or(&JsonValue::Null);
                format!("| {} ", format_value(value).replace('|', "\\|"))
            })
            .collect::<String>()
            + "|\n";
        output.push_str(&line);
    }

    output.push_str(&format!("\n*{} rows*\n", rows.row_count()));
    output
}

pub fn format_as_json(rows: &RowSet) -> String {
    serde_json::to_string_pretty(rows).unwrap_or_default()
}

// `{:<width$}` pads by char count, which misaligns wide characters.
fn pad_right(s: &str, width: usize) -> String {
    format!("{}{}", s, " ".repeat(width.saturating_sub(s.width())))
}

fn pad_left(s: &str, width: usize) -> String {
    format!("{}{}", " ".repeat(width.saturating_sub(s.width())), s)
}

fn pad_center(s: &str, width: usize) -> String {
    let gap = width.saturating_sub(s.width());
    let left = gap / 2;
    format!("{}{}{}", " ".repeat(left), s, " ".repeat(gap - left))
}
