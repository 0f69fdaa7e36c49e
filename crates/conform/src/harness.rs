use std::collections::BTreeMap;
use std::io::Write;

use anyhow::{Context, Result};
use tracing::{debug, info_span, warn};

use crate::case::{CaseLayout, ScratchContext, TestCase};
use crate::config::HarnessConfig;
use crate::exec::CommandRunner;
use crate::gate::{GateFailure, GateRunner};
use crate::outcome::{CaseOutcome, OutcomeKind};
use crate::pipeline::{PipelineExecutor, PipelineOutcome};
use crate::report::Reporter;
use crate::verify::verify_outcome;

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Cases to run, in the order they run.
    pub cases: Vec<String>,
    pub skip_gates: bool,
    pub scratch: ScratchContext,
}

impl RunOptions {
    pub fn for_config(config: &HarnessConfig) -> Self {
        Self {
            cases: config.cases.clone(),
            skip_gates: false,
            scratch: ScratchContext::new(&config.scratch_dir),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseReport {
    pub name: String,
    pub outcome: CaseOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunReport {
    GateFailed(GateFailure),
    Completed(Vec<CaseReport>),
}

impl RunReport {
    pub fn cases(&self) -> &[CaseReport] {
        match self {
            RunReport::GateFailed(_) => &[],
            RunReport::Completed(cases) => cases,
        }
    }

    pub fn counts(&self) -> BTreeMap<OutcomeKind, usize> {
        let mut counts = BTreeMap::new();
        for c in self.cases() {
            *counts.entry(c.outcome.kind()).or_insert(0) += 1;
        }
        counts
    }

    /// True when every case passed. A freshly recorded golden only counts as passing
    /// when the operator accepts new goldens.
    pub fn all_passed(&self, accept_new: bool) -> bool {
        match self {
            RunReport::GateFailed(_) => false,
            RunReport::Completed(cases) => cases.iter().all(|c| match c.outcome {
                CaseOutcome::Passed => true,
                CaseOutcome::FirstRun(_) => accept_new,
                _ => false,
            }),
        }
    }
}

/// Gates, then every selected case in order. Case failures, including IO faults while
/// handling one case, are reported and never stop the run; only a failed gate (or a
/// fault outside any case, as `Err`) ends it early.
pub fn run_harness<R: CommandRunner, W: Write>(
    config: &HarnessConfig,
    options: &RunOptions,
    runner: &mut R,
    report: &mut Reporter<W>,
) -> Result<RunReport> {
    if options.skip_gates {
        debug!("gates skipped");
    } else {
        let gates = GateRunner::new(
            &config.commands,
            &config.unit_test_pass_marker,
            config.detection,
        );
        if let Some(failure) = gates.run(runner, report)? {
            report.gate_failed(&failure)?;
            return Ok(RunReport::GateFailed(failure));
        }
    }

    report.cases_declared(&options.cases)?;
    std::fs::create_dir_all(&options.scratch.dir).with_context(|| {
        format!("create scratch dir: {}", options.scratch.dir.display())
    })?;

    let layout = config.layout();
    let executor = PipelineExecutor::new(&config.commands, &config.runtime, config.detection);
    let mut cases = Vec::with_capacity(options.cases.len());
    for name in &options.cases {
        let _span = info_span!("case", name = %name).entered();
        report.case_started(name)?;
        let outcome = run_case(
            &TestCase::new(name.as_str()),
            &layout,
            &options.scratch,
            &executor,
            runner,
        )
        .unwrap_or_else(|err| {
            warn!(error = %format!("{err:#}"), "case aborted by harness fault");
            CaseOutcome::HarnessFault(format!("{err:#}"))
        });
        debug!(outcome = outcome.kind().as_str(), "case finished");
        report.case_finished(name, &outcome)?;
        cases.push(CaseReport {
            name: name.clone(),
            outcome,
        });
    }

    let run = RunReport::Completed(cases);
    report.summary(&run.counts())?;
    Ok(run)
}

pub fn run_case<R: CommandRunner>(
    case: &TestCase,
    layout: &CaseLayout,
    scratch: &ScratchContext,
    executor: &PipelineExecutor<'_>,
    runner: &mut R,
) -> Result<CaseOutcome> {
    let paths = match case.resolve(layout, scratch) {
        Ok(paths) => paths,
        Err(outcome) => return Ok(outcome),
    };
    match executor.run(runner, &paths)? {
        PipelineOutcome::Completed(observed) => verify_outcome(&paths.golden, &observed),
        PipelineOutcome::Stopped(outcome) => Ok(outcome),
    }
}
