//! Rendering of scenario results.
//!
//! Captured device text goes to stdout so it can be piped or diffed; progress
//! and the final summary go to stderr.

use {
    blackbox::{Capture, ScenarioResult, SessionOutcome, StepResult, normalize_newlines},
    console::style,
    serde_json::json,
    std::io::{self, Write},
};

/// Short outcome label used in text and JSON output.
pub(crate) fn outcome_label(outcome: &SessionOutcome) -> &'static str {
    match outcome {
        SessionOutcome::Completed => "completed",
        SessionOutcome::Interrupted => "interrupted",
        SessionOutcome::Failed(_) => "failed",
    }
}

fn write_text(out: &mut impl Write, capture: &Capture) -> io::Result<()> {
    if capture.is_empty() {
        writeln!(out, "{}", style("(no response)").dim())?;
        return Ok(());
    }

    let text = normalize_newlines(&capture.text);
    write!(out, "{text}")?;
    if !text.ends_with('\n') {
        writeln!(out)?;
    }
    Ok(())
}

/// Write the boot banner drained after opening the port.
pub(crate) fn write_boot_log(out: &mut impl Write, capture: &Capture) -> io::Result<()> {
    writeln!(out, "{}", style("=== Boot log ===").bold())?;
    write_text(out, capture)
}

/// Write one finished step: header, captured text, stats line.
pub(crate) fn write_step(
    out: &mut impl Write,
    index: usize,
    total: usize,
    result: &StepResult,
) -> io::Result<()> {
    let step = &result.step;
    writeln!(
        out,
        "{}",
        style(format!(
            "=== [{}/{}] {} (sent '{}') ===",
            index + 1,
            total,
            step.label,
            step.command.wire_byte() as char
        ))
        .bold()
    )?;

    write_text(out, &result.capture)?;

    let capture = &result.capture;
    let marker = match (&step.expect, result.marker_found) {
        (Some(marker), Some(true)) => format!("; {} '{marker}'", style("found").green()),
        (Some(marker), Some(false)) => format!("; {} '{marker}'", style("missing").yellow()),
        _ => String::new(),
    };
    writeln!(
        out,
        "{}",
        style(format!(
            "--- {} bytes, {} polls, {:.2}s{marker}",
            capture.bytes_read,
            capture.polls,
            capture
                .elapsed
                .as_secs_f64()
        ))
        .dim()
    )
}

/// Print the closing summary to stderr.
pub(crate) fn print_summary(result: &ScenarioResult) {
    let missing = result.missing_markers();
    match &result.outcome {
        SessionOutcome::Completed if missing == 0 => eprintln!(
            "{} {} steps completed",
            style("✓").green().bold(),
            result.steps.len()
        ),
        SessionOutcome::Completed => eprintln!(
            "{} {} steps completed, {missing} expected marker(s) not seen",
            style("!").yellow().bold(),
            result.steps.len()
        ),
        SessionOutcome::Interrupted => eprintln!(
            "{} Interrupted after {} step(s); port closed",
            style("!").yellow().bold(),
            result.steps.len()
        ),
        SessionOutcome::Failed(e) => eprintln!(
            "{} Session failed after {} step(s): {e}",
            style("✗").red().bold(),
            result.steps.len()
        ),
    }
}

/// Machine-readable report of a session.
pub(crate) fn json_report(port: &str, result: &ScenarioResult) -> serde_json::Value {
    let error = match &result.outcome {
        SessionOutcome::Failed(e) => Some(e.to_string()),
        _ => None,
    };

    json!({
        "port": port,
        "passed": result.passed(),
        "outcome": outcome_label(&result.outcome),
        "error": error,
        "missing_markers": result.missing_markers(),
        "boot_log": result.boot_log,
        "steps": result.steps,
    })
}
