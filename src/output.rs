use std::io::{self, Write};
use std::time::Duration;

use riddle_eval::{EvalReport, MatchMethod, Resolution, Result, SweepRun};
use serde::Serialize;

use crate::cli::OutputFormat;
use crate::runner::Outcome;

pub fn print_outcome(format: OutputFormat, embedder: &str, outcome: &Outcome) -> Result<()> {
    let mut out = io::stdout().lock();
    match (format, outcome) {
        (OutputFormat::Text, Outcome::Resolved(r)) => print_resolution_text(&mut out, r),
        (OutputFormat::Text, Outcome::Evaluated { report, results }) => {
            print_report_text(&mut out, embedder, report, results.as_deref())
        }
        (OutputFormat::Text, Outcome::Swept(runs)) => print_sweep_text(&mut out, runs),
        (OutputFormat::Json, Outcome::Resolved(r)) => print_json(&mut out, r),
        (OutputFormat::Json, Outcome::Evaluated { report, results }) => print_json(
            &mut out,
            &JsonReport {
                embedder,
                results: results.as_deref(),
                report,
            },
        ),
        (OutputFormat::Json, Outcome::Swept(runs)) => print_json(&mut out, runs),
    }
}

fn print_resolution_text<W: Write>(out: &mut W, r: &Resolution) -> Result<()> {
    let method = match r.method {
        MatchMethod::Exact => "exact",
        MatchMethod::Similarity => "similarity",
    };
    writeln!(out, "Answer: {}", r.answer)?;
    writeln!(out, "Index: {}", r.index)?;
    match r.score {
        Some(score) => writeln!(out, "Method: {method} (score {score:.4})")?,
        None => writeln!(out, "Method: {method}")?,
    }
    Ok(())
}

fn print_report_text<W: Write>(
    out: &mut W,
    embedder: &str,
    report: &EvalReport,
    results: Option<&str>,
) -> Result<()> {
    writeln!(out, "Embedder: {embedder}")?;
    writeln!(out, "Questions: {}", report.records.len())?;
    writeln!(out, "Elapsed: {}", format_elapsed(report.elapsed_ms))?;
    writeln!(out)?;

    for s in &report.summaries {
        writeln!(
            out,
            "{:<10} accuracy {:>6.2}% ({}/{}), failed {}",
            s.mode.label(),
            s.accuracy * 100.0,
            s.correct,
            s.total,
            s.failed
        )?;
    }

    if let Some(path) = results {
        writeln!(out)?;
        writeln!(out, "Results: {path}")?;
    }
    Ok(())
}

fn print_sweep_text<W: Write>(out: &mut W, runs: &[SweepRun]) -> Result<()> {
    for run in runs {
        let mut parts = vec![
            format!("run={}", run.run_id),
            format!("status={:?}", run.status),
        ];
        parts.extend(
            run.summaries
                .iter()
                .map(|s| format!("{}={:.2}%", s.mode, s.accuracy * 100.0)),
        );
        if let Some(error) = &run.error {
            parts.push(format!("error={error}"));
        }
        writeln!(out, "{}", parts.join(" "))?;
    }
    Ok(())
}

#[derive(Serialize)]
struct JsonReport<'a> {
    embedder: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    results: Option<&'a str>,
    #[serde(flatten)]
    report: &'a EvalReport,
}

fn print_json<W: Write, T: Serialize + ?Sized>(out: &mut W, value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    writeln!(out, "{text}")?;
    Ok(())
}

fn format_elapsed(ms: f64) -> String {
    let rounded = Duration::from_millis(ms.max(0.0).round() as u64);
    humantime::format_duration(rounded).to_string()
}
