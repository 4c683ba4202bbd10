use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color as TableColor, ContentArrangement, Table};

use crate::api::Status;

pub fn create_table(header: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(
            header
                .iter()
                .map(|label| Cell::new(*label).fg(TableColor::Cyan)),
        );
    table
}

pub fn status_cell(status: Status) -> Cell {
    let cell = Cell::new(status);
    match status {
        Status::Running => cell.fg(TableColor::Yellow),
        Status::Success => cell.fg(TableColor::Green),
        Status::Failed => cell.fg(TableColor::Red),
        Status::Idle => cell.fg(TableColor::DarkGrey),
    }
}

pub fn success_rate_cell(rate: u32) -> Cell {
    let text = format!("{rate}%");
    if rate >= 80 {
        Cell::new(text).fg(TableColor::Green)
    } else if rate >= 50 {
        Cell::new(text).fg(TableColor::Yellow)
    } else {
        Cell::new(text).fg(TableColor::Red)
    }
}

pub fn failure_rate_cell(rate: u32) -> Cell {
    let text = format!("{rate}%");
    if rate >= 50 {
        Cell::new(text).fg(TableColor::Red)
    } else if rate >= 25 {
        Cell::new(text).fg(TableColor::Yellow)
    } else {
        Cell::new(text).fg(TableColor::Green)
    }
}

pub fn optional_cell(value: Option<impl ToString>) -> Cell {
    match value {
        Some(value) => Cell::new(value.to_string()),
        None => Cell::new("—").fg(TableColor::DarkGrey),
    }
}
