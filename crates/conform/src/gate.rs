use std::fmt;
use std::io::Write;

use anyhow::Result;
use tracing::{debug, info_span};

use crate::config::{Commands, TemplateVars};
use crate::detect::DetectionPolicy;
use crate::exec::{CommandRunner, StageResult};
use crate::outcome::Stage;
use crate::report::Reporter;

/// A whole-project gate failed; no per-case work may run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateFailure {
    pub stage: Stage,
    pub exit_status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl GateFailure {
    fn from_result(stage: Stage, result: &StageResult) -> Self {
        Self {
            stage,
            exit_status: result.exit_status,
            stdout: result.stdout_text().into_owned(),
            stderr: result.stderr_text().into_owned(),
        }
    }

    pub fn headline(&self) -> &'static str {
        match self.stage {
            Stage::StaticCheck => "project does not pass static analysis",
            _ => "project unit tests did not pass",
        }
    }
}

impl fmt::Display for GateFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} gate failed: {}", self.stage, self.headline())
    }
}

pub struct GateRunner<'a> {
    commands: &'a Commands,
    pass_marker: &'a str,
    detection: DetectionPolicy,
}

impl<'a> GateRunner<'a> {
    pub fn new(commands: &'a Commands, pass_marker: &'a str, detection: DetectionPolicy) -> Self {
        Self {
            commands,
            pass_marker,
            detection,
        }
    }

    /// Runs static analysis, then unit tests. Returns the first gate that failed; the
    /// unit-test gate is never started when static analysis fails.
    pub fn run<R: CommandRunner, W: Write>(
        &self,
        runner: &mut R,
        report: &mut Reporter<W>,
    ) -> Result<Option<GateFailure>> {
        for stage in Stage::GATES {
            let template = match stage {
                Stage::StaticCheck => &self.commands.check,
                _ => &self.commands.test,
            };
            let invocation = template.expand(&TemplateVars::default())?;
            let _span = info_span!("gate", stage = %stage).entered();
            report.gate_started(&invocation)?;

            let result = match runner.run(&invocation) {
                Ok(r) => r,
                Err(err) => {
                    return Ok(Some(GateFailure {
                        stage,
                        exit_status: None,
                        stdout: String::new(),
                        stderr: format!("{err:#}"),
                    }))
                }
            };
            let failed = match stage {
                Stage::StaticCheck => self.detection.stage_failed(&result),
                _ => self.detection.unit_tests_failed(&result, self.pass_marker),
            };
            if failed {
                return Ok(Some(GateFailure::from_result(stage, &result)));
            }
            debug!("gate passed");
        }
        Ok(None)
    }
}
