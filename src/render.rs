//! Human-readable report rendering.

use crate::analysis::Report;
use crate::patterns::PatternKind;

/// ANSI colour codes.
pub mod colors {
    pub const HEADER: &str = "\x1b[95m";
    pub const WARNING: &str = "\x1b[93m";
    pub const FAIL: &str = "\x1b[91m";
    pub const OKGREEN: &str = "\x1b[92m";
    pub const GRAY: &str = "\x1b[38;5;8m";
    pub const BOLD: &str = "\x1b[1m";
    pub const ENDC: &str = "\x1b[0m";

    /// Wrap `text` in ANSI colour escape codes (no-op when `add_color` is false).
    pub fn colorize(text: &str, color: &str, add_color: bool) -> String {
        if add_color && !text.is_empty() {
            format!("{color}{text}{ENDC}")
        } else {
            text.to_string()
        }
    }
}

use colors::colorize;

fn kind_color(kind: PatternKind) -> &'static str {
    match kind {
        PatternKind::RedundantCode | PatternKind::OpaquePredicate => colors::FAIL,
        _ => colors::WARNING,
    }
}

pub fn render_text(report: &Report, color: bool) -> String {
    let mut lines = Vec::new();

    let problems = report.problems();
    if !problems.is_empty() {
        lines.push("# Problems".to_string());
        for (name, msg) in &problems {
            lines.push(format!("#   {name}: {msg}"));
        }
        lines.push(String::new());
    }

    for f in &report.functions {
        if f.error.is_some() {
            continue;
        }
        let title = colorize(&format!("{}.{}", f.contract, f.function), colors::BOLD, color);
        let stats = colorize(
            &format!("({} blocks, {} paths)", f.blocks, f.paths),
            colors::GRAY,
            color,
        );
        lines.push(format!("{title} {stats}"));
        if f.findings.is_empty() {
            lines.push(format!("    {}", colorize("no patterns", colors::OKGREEN, color)));
        }
        for finding in &f.findings {
            let tag = colorize(
                &format!("P{} {}", finding.pattern, finding.kind),
                kind_color(finding.kind),
                color,
            );
            let rest = finding.to_string();
            let rest = rest
                .split_once(" at ")
                .map_or(rest.as_str(), |(_, tail)| tail);
            lines.push(format!("    {tag} at {rest}"));
            if let Some(cond) = &finding.condition {
                lines.push(format!("        {}", colorize(&format!("condition: {cond}"), colors::GRAY, color)));
            }
        }
        lines.push(String::new());
    }

    let summary = format!(
        "{} finding(s) in {} function(s)",
        report.finding_count(),
        report.functions.len()
    );
    lines.push(colorize(&summary, colors::HEADER, color));
    lines.join("\n")
}
