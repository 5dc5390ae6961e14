//! 🍽️ Tables for `list-indicators`.
//!
//! Markdown-flavoured so the output pastes cleanly into a ticket or a war-room chat.

use comfy_table::{Cell, ContentArrangement, Table, presets::ASCII_MARKDOWN};
use serde_json::Value;

use crate::common::{EnrichmentGroup, IndicatorRecord};

/// 📋 Columns shown for every enrichment entry.
pub const ENRICHMENT_COLUMNS: [&str; 3] = ["value", "sourceBrand", "score"];

fn titled(title: &str, table: Table) -> String {
    format!("### {title}\n{table}\n")
}

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table.load_preset(ASCII_MARKDOWN);
    table.set_content_arrangement(ContentArrangement::Disabled);
    table.set_header(header);
    table
}

fn cell_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// 🏷️ One column of indicator values under `header`. With `unique`, repeats are
/// shown once, in first-seen order.
pub fn indicators_table(indicators: &[IndicatorRecord], header: &str, unique: bool) -> String {
    let mut table = new_table(vec![header]);
    let mut shown: Vec<&str> = Vec::new();
    for record in indicators {
        if unique {
            if shown.contains(&record.value.as_str()) {
                continue;
            }
            shown.push(&record.value);
        }
        table.add_row(vec![Cell::new(&record.value)]);
    }
    titled("Indicators", table)
}

/// 🧩 One table per hit's enrichment group.
pub fn enrichment_tables(groups: &[EnrichmentGroup]) -> String {
    groups
        .iter()
        .map(|group| {
            let mut table = new_table(ENRICHMENT_COLUMNS.to_vec());
            for entry in group {
                table.add_row(
                    ENRICHMENT_COLUMNS
                        .iter()
                        .map(|column| Cell::new(cell_text(entry.get(column))))
                        .collect::<Vec<_>>(),
                );
            }
            titled("Enrichment", table)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
