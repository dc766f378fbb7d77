//! Tabular result sink: one CSV row per question.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use crate::error::Result;
use crate::eval::{EvalReport, ModeOutcome};
use crate::prompt::PromptMode;

pub fn header(modes: &[PromptMode]) -> Vec<String> {
    let mut columns = vec![
        "Question ID".to_string(),
        "Question".to_string(),
        "Answer".to_string(),
        "Choices".to_string(),
    ];
    for mode in modes {
        let label = mode.label();
        columns.push(format!("Generated {label}"));
        columns.push(format!("Refined {label}"));
        columns.push(format!("Refined {label} Correct"));
        columns.push(format!("{label} Error"));
    }
    columns
}

pub fn write_csv<W: Write>(writer: W, report: &EvalReport) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(header(&report.modes))?;

    for record in &report.records {
        let mut row = vec![
            record.id.to_string(),
            record.question.clone(),
            record.answer.clone(),
            record.choices.join(", "),
        ];
        for mode in &report.modes {
            push_outcome(&mut row, record.outcome(*mode));
        }
        csv.write_record(&row)?;
    }

    csv.flush()?;
    Ok(())
}

/// Writes the table to `path`, creating parent directories.
pub fn save_csv(path: &Path, report: &EvalReport) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    write_csv(File::create(path)?, report)
}

fn push_outcome(row: &mut Vec<String>, outcome: Option<&ModeOutcome>) {
    let Some(outcome) = outcome else {
        row.extend(std::iter::repeat_n(String::new(), 4));
        return;
    };
    row.push(outcome.generated.clone().unwrap_or_default());
    row.push(
        outcome
            .resolution
            .as_ref()
            .map(|r| r.answer.clone())
            .unwrap_or_default(),
    );
    // Failed items leave the correctness cell empty rather than "false".
    row.push(if outcome.failed() {
        String::new()
    } else {
        outcome.correct.to_string()
    });
    row.push(outcome.error.clone().unwrap_or_default());
}
