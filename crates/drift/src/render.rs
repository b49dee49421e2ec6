//! Human-readable plans.

use crate::Operation;

/// One line per operation, in plan order.
///
/// Lines start with `+` for creations, `-` for drops and `~` for alters.
pub fn render_plan(operations: &[Operation]) -> String {
    let mut out = String::new();
    for op in operations {
        out.push_str(&op.to_string());
        out.push('\n');
    }
    out
}

/// A short count of what a plan does, e.g. `3 changes (1 drop, 2 creates/alters)`.
pub fn summarize(operations: &[Operation]) -> String {
    let drops = operations.iter().filter(|op| op.kind().is_drop()).count();
    let others = operations.len() - drops;
    let noun = if operations.len() == 1 {
        "change"
    } else {
        "changes"
    };
    format!(
        "{} {} ({} drop{}, {} create{}/alter{})",
        operations.len(),
        noun,
        drops,
        plural(drops),
        others,
        plural(others),
        plural(others)
    )
}

fn plural(n: usize) -> &'static str {
    if n == 1 { "" } else { "s" }
}
