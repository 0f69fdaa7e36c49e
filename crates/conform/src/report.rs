//! Line-oriented console report.

use std::collections::BTreeMap;
use std::io::Write;

use anyhow::{Context, Result};

use crate::exec::Invocation;
use crate::gate::GateFailure;
use crate::outcome::{CaseOutcome, OutcomeKind};

const CASES_PER_LINE: usize = 5;

pub struct Reporter<W: Write> {
    out: W,
}

impl<W: Write> Reporter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    pub fn gate_started(&mut self, invocation: &Invocation) -> Result<()> {
        self.line(format_args!("Running '{invocation}'..."))
    }

    pub fn gate_failed(&mut self, failure: &GateFailure) -> Result<()> {
        self.line(format_args!("ABORT {failure}"))?;
        if !failure.stdout.is_empty() {
            self.block(&failure.stdout)?;
        }
        if !failure.stderr.is_empty() {
            self.block(&failure.stderr)?;
        }
        if failure.stdout.is_empty() && failure.stderr.is_empty() {
            match failure.exit_status {
                Some(code) => self.line(format_args!("(no output; exit status {code})"))?,
                None => self.line(format_args!("(no output; terminated by signal)"))?,
            }
        }
        Ok(())
    }

    pub fn cases_declared(&mut self, cases: &[String]) -> Result<()> {
        self.line(format_args!("Running tests for:"))?;
        for chunk in cases.chunks(CASES_PER_LINE) {
            self.line(format_args!("    {}", chunk.join(" ")))?;
        }
        self.line(format_args!(""))
    }

    pub fn case_started(&mut self, name: &str) -> Result<()> {
        self.line(format_args!("--- Testing {name} ---"))
    }

    pub fn case_finished(&mut self, name: &str, outcome: &CaseOutcome) -> Result<()> {
        match outcome {
            CaseOutcome::Passed => self.line(format_args!("PASS {name}")),
            CaseOutcome::MissingSource(path) => self.line(format_args!(
                "FAIL {name}: source example not found: {}",
                path.display()
            )),
            CaseOutcome::StageFailed(stage, diagnostic) => {
                self.line(format_args!("FAIL {name}: {stage} stage failed"))?;
                self.block(diagnostic)
            }
            CaseOutcome::ExecutionErrored(stderr) => {
                self.line(format_args!("FAIL {name}: executable reported errors"))?;
                self.block(stderr)
            }
            CaseOutcome::FirstRun(rec) => self.line(format_args!(
                "NEW  {name}: no golden answer; recorded {} ({} bytes, sha256 {}). Review it before trusting this case.",
                rec.path.display(),
                rec.bytes,
                rec.sha256
            )),
            CaseOutcome::Mismatch { expected, actual } => {
                self.line(format_args!(
                    "FAIL {name}: output is inconsistent with the golden answer"
                ))?;
                self.line(format_args!("--- expected ---"))?;
                self.block(expected)?;
                self.line(format_args!("--- actual ---"))?;
                self.block(actual)
            }
            CaseOutcome::HarnessFault(message) => {
                self.line(format_args!("FAIL {name}: harness error"))?;
                self.block(message)
            }
        }
    }

    pub fn summary(&mut self, counts: &BTreeMap<OutcomeKind, usize>) -> Result<()> {
        let total: usize = counts.values().sum();
        let parts = OutcomeKind::ALL
            .iter()
            .map(|k| format!("{} {}", counts.get(k).copied().unwrap_or(0), k.as_str()))
            .collect::<Vec<_>>()
            .join(", ");
        self.line(format_args!("summary: {total} cases: {parts}"))
    }

    /// Writes `text` verbatim, terminating it with a newline if it lacks one.
    fn block(&mut self, text: &str) -> Result<()> {
        self.out.write_all(text.as_bytes()).context("write report")?;
        if !text.ends_with('\n') {
            self.out.write_all(b"\n").context("write report")?;
        }
        Ok(())
    }

    fn line(&mut self, args: std::fmt::Arguments<'_>) -> Result<()> {
        writeln!(self.out, "{args}").context("write report")?;
        self.out.flush().context("flush report")
    }
}
