use comfy_table::Cell;
use console::style;
use std::fmt::Write;

use crate::runner::{all_succeeded, ServiceOutcome};

use super::verdict;
use super::tables::{create_table, error_cell, header, result_cell};

/// Prints one row per triggered pipeline, plus a row for every service
/// that stopped on an error, followed by the overall verdict.
pub fn print_summary(outcomes: &[ServiceOutcome]) {
    println!("{}", render_summary(outcomes));
}

fn render_summary(outcomes: &[ServiceOutcome]) -> String {
    let mut output = String::new();
    let _ = writeln!(
        output,
        "{} {}",
        style("📋").bright(),
        style("Pipeline results").bright().underlined()
    );

    let mut table = create_table();
    table.set_header(header(&["Service", "Pipeline", "Id", "Result"]));

    for outcome in outcomes {
        for report in &outcome.reports {
            table.add_row(vec![
                Cell::new(&report.service),
                Cell::new(report.kind.to_string()),
                Cell::new(report.pipeline_id),
                result_cell(report.result),
            ]);
        }
        if let Some(error) = &outcome.error {
            table.add_row(vec![
                Cell::new(&outcome.service),
                Cell::new("-"),
                Cell::new("-"),
                error_cell(error),
            ]);
        }
    }

    let _ = writeln!(output, "{table}");

    let succeeded = all_succeeded(outcomes);
    let verdict_line = if succeeded {
        "All pipelines succeeded ✓"
    } else {
        "A job failed"
    };
    let _ = writeln!(output, "{}", verdict(succeeded, verdict_line));

    output
}
