use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color as TableColor, ContentArrangement, Table};

use crate::providers::RunResult;

/// Table and cell creation helpers
pub fn create_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

pub fn header(labels: &[&str]) -> Vec<Cell> {
    labels
        .iter()
        .map(|label| Cell::new(*label).fg(TableColor::Cyan))
        .collect()
}

pub fn result_cell(result: RunResult) -> Cell {
    let color = match result {
        RunResult::Succeeded => TableColor::Green,
        RunResult::Canceled => TableColor::Yellow,
        RunResult::Failed | RunResult::Unknown => TableColor::Red,
    };
    Cell::new(result.to_string()).fg(color)
}

pub fn error_cell(message: &str) -> Cell {
    Cell::new(message).fg(TableColor::Red)
}
