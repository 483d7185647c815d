//! Plain-text rendering of an [`ExecutionResult`] for the terminal.

use std::{borrow::Cow, fmt::Write as _};

use crate::execute::{ExecutionResult, TableState};

const HEADERS: [&str; 7] = [
    "table",
    "state",
    "rows",
    "mappings",
    "dropped",
    "reconciliation",
    "error",
];
// Columns holding counts are right-aligned.
const NUMERIC_COLUMNS: [usize; 3] = [2, 3, 4];

pub fn render_summary(result: &ExecutionResult) -> String {
    let rows = result
        .tables
        .iter()
        .map(|outcome| {
            let reconciliation = result
                .reconciliation
                .get(&outcome.table)
                .map(|record| {
                    format!(
                        "{} ({}/{})",
                        record.status, record.target_count, record.source_count
                    )
                })
                .unwrap_or_else(|| "-".to_string());
            vec![
                outcome.table.clone(),
                state_label(outcome.state).to_string(),
                outcome.rows_affected.to_string(),
                outcome.mappings_applied.to_string(),
                outcome.dropped.len().to_string(),
                reconciliation,
                outcome.error.clone().unwrap_or_default(),
            ]
        })
        .collect::<Vec<_>>();

    let mut output = if result.validate_only {
        format!(
            "Validation {} ({} mode): {}\n",
            result.execution_id,
            result.mode,
            result.status()
        )
    } else {
        format!(
            "Execution {} for document {} ({} mode): {}\n",
            result.execution_id,
            result.document_id,
            result.mode,
            result.status()
        )
    };
    output.push_str(&render_table(&HEADERS, &rows));
    let _ = writeln!(
        output,
        "{} table(s) processed, {} succeeded, {} failed, {} skipped, {} row(s) affected",
        result.tables_processed,
        result.successful_tables.len(),
        result.failed_tables.len(),
        result.skipped_tables.len(),
        result.rows_affected_total
    );
    output
}

fn state_label(state: TableState) -> &'static str {
    match state {
        TableState::Pending => "pending",
        TableState::Generating => "generating",
        TableState::Executing => "executing",
        TableState::Success => "success",
        TableState::Failed => "failed",
        TableState::Skipped => "skipped",
    }
}

fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths = headers.iter().map(|h| h.chars().count()).collect::<Vec<_>>();
    for row in rows {
        for (idx, cell) in row.iter().enumerate().take(widths.len()) {
            widths[idx] = widths[idx].max(sanitize_cell(cell).chars().count());
        }
    }

    let mut output = String::new();
    let header_cells = headers.iter().map(|h| h.to_string()).collect::<Vec<_>>();
    let _ = writeln!(output, "{}", format_row(&header_cells, &widths, false));
    let separator = widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>();
    let _ = writeln!(output, "{}", format_row(&separator, &widths, false));
    for row in rows {
        let _ = writeln!(output, "{}", format_row(row, &widths, true));
    }
    output
}

fn format_row(values: &[String], widths: &[usize], align_numbers: bool) -> String {
    let cells = values
        .iter()
        .zip(widths)
        .enumerate()
        .map(|(idx, (value, &width))| {
            let cell = sanitize_cell(value);
            if align_numbers && NUMERIC_COLUMNS.contains(&idx) {
                format!("{cell:>width$}")
            } else {
                format!("{cell:<width$}")
            }
        })
        .collect::<Vec<_>>();
    cells.join("  ").trim_end().to_string()
}

fn sanitize_cell(value: &str) -> Cow<'_, str> {
    if value.contains(['\n', '\r', '\t']) {
        Cow::Owned(value.replace(['\n', '\r', '\t'], " "))
    } else {
        Cow::Borrowed(value)
    }
}
