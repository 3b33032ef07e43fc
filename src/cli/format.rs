//! Output formatting for CLI display.

use crate::analysis::report::{GroupBy, GroupRow};

/// Column heading for a grouped target report.
pub(super) fn group_heading(by: GroupBy) -> &'static str {
    match by {
        GroupBy::Survey => "survey",
        GroupBy::Priority => "priority",
        GroupBy::Progtemp => "progtemp",
        GroupBy::Targprog => "targprog",
    }
}

/// Formats an assignment table as aligned text, one group per line.
pub(super) fn format_assignment_table(heading: &str, rows: &[GroupRow]) -> String {
    let width = rows
        .iter()
        .map(|r| r.key.len())
        .chain([heading.len()])
        .max()
        .unwrap_or(0);

    let mut lines = vec![format!(
        "{heading:<width$}  {:>8}  {:>8}  {:>7}",
        "total", "assigned", "rate"
    )];
    for row in rows {
        lines.push(format!(
            "{:<width$}  {:>8}  {:>8}  {:>6.1}%",
            row.key,
            row.total,
            row.assigned,
            row.fraction() * 100.0
        ));
    }
    lines.join("\n")
}
