//! Aligned console tables.

use std::fmt::Write as _;

use crate::{relational, schema::Schema};

/// Renders a header row, a dashed separator, then the rows, with columns
/// padded to their widest cell. Trailing padding is trimmed.
pub fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut output = String::new();
    let header: Vec<String> = headers.iter().map(|h| h.to_string()).collect();
    let _ = writeln!(output, "{}", format_row(&header, &widths));
    let separator: Vec<String> = widths.iter().map(|w| "-".repeat((*w).max(3))).collect();
    let _ = writeln!(output, "{}", format_row(&separator, &widths));
    for row in rows {
        let _ = writeln!(output, "{}", format_row(row, &widths));
    }
    output
}

fn format_row(cells: &[String], widths: &[usize]) -> String {
    let line = cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| {
            let cell = cell.replace(['\n', '\r', '\t'], " ");
            let padding = width.saturating_sub(cell.chars().count());
            format!("{cell}{}", " ".repeat(padding))
        })
        .collect::<Vec<_>>()
        .join("  ");
    line.trim_end().to_string()
}

/// One row per field: position, name, kind, format, default, bound,
/// whether it is required, SQL type, and key membership.
pub fn render_schema(schema: &Schema) -> String {
    let headers = [
        "#", "name", "kind", "format", "default", "bound", "required", "sql type", "key",
    ];
    let rows: Vec<Vec<String>> = schema
        .field_ids()
        .zip(schema.fields())
        .map(|(id, field)| {
            let bound = match (field.max_magnitude, field.max_length) {
                (Some(magnitude), _) => format!("< {magnitude}"),
                (None, Some(length)) => format!("len <= {length}"),
                (None, None) => String::new(),
            };
            let mut keys = Vec::new();
            if schema.primary_key().contains(&id) {
                keys.push("pk");
            }
            if schema.unique_key().contains(&id) {
                keys.push("uk");
            }
            vec![
                (id.index() + 1).to_string(),
                field.name.clone(),
                field.kind.to_string(),
                field.render_format().to_string(),
                field.na_value().to_string(),
                bound,
                if field.required { "yes" } else { "no" }.to_string(),
                relational::sql_type(field),
                keys.join(","),
            ]
        })
        .collect();
    render_table(&headers, &rows)
}
