use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info_span};

use crate::case::CasePaths;
use crate::config::{Commands, TemplateVars};
use crate::detect::DetectionPolicy;
use crate::exec::{CommandRunner, Invocation, StageResult};
use crate::outcome::{CaseOutcome, Stage};
use crate::scratch::ScratchFile;

/// How far a case got through compile, native-build, execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// The executable ran cleanly; carries its full stdout.
    Completed(Vec<u8>),
    /// The case stopped at a stage; this is its final outcome.
    Stopped(CaseOutcome),
}

pub struct PipelineExecutor<'a> {
    commands: &'a Commands,
    runtime: &'a Path,
    detection: DetectionPolicy,
}

impl<'a> PipelineExecutor<'a> {
    pub fn new(commands: &'a Commands, runtime: &'a Path, detection: DetectionPolicy) -> Self {
        Self {
            commands,
            runtime,
            detection,
        }
    }

    /// Runs the per-case stages in order and stops at the first failure. Both scratch
    /// artifacts are gone when this returns, whatever the result.
    ///
    /// `Err` is reserved for harness faults (a scratch file that cannot be written or
    /// removed); toolchain failures are reported through `PipelineOutcome::Stopped`.
    pub fn run<R: CommandRunner>(
        &self,
        runner: &mut R,
        paths: &CasePaths,
    ) -> Result<PipelineOutcome> {
        let ir = ScratchFile::claim(&paths.ir)?;
        let exe = ScratchFile::claim(&paths.exe)?;

        let compile = self.commands.compile.expand(&TemplateVars {
            source: Some(&paths.source),
            ..Default::default()
        })?;
        let compiled = match run_stage(runner, Stage::Compile, &compile) {
            Ok(r) => r,
            Err(stopped) => return Ok(stopped),
        };
        std::fs::write(ir.path(), &compiled.stdout)
            .with_context(|| format!("write IR: {}", ir.path().display()))?;
        if self.detection.stage_failed(&compiled) {
            return Ok(stop(Stage::Compile, compiled.stderr_or_status()));
        }

        let build = self.commands.native_build.expand(&TemplateVars {
            ir: Some(ir.path()),
            exe: Some(exe.path()),
            runtime: Some(self.runtime),
            ..Default::default()
        })?;
        let built = run_stage(runner, Stage::NativeBuild, &build);
        drop(ir);
        let built = match built {
            Ok(r) => r,
            Err(stopped) => return Ok(stopped),
        };
        if self.detection.stage_failed(&built) {
            return Ok(stop(Stage::NativeBuild, built.diagnostic()));
        }

        let ran = run_stage(runner, Stage::Execute, &Invocation::for_path(exe.path()));
        drop(exe);
        let ran = match ran {
            Ok(r) => r,
            Err(stopped) => return Ok(stopped),
        };
        if self.detection.execution_failed(&ran) {
            return Ok(PipelineOutcome::Stopped(CaseOutcome::ExecutionErrored(
                ran.stderr_or_status(),
            )));
        }

        Ok(PipelineOutcome::Completed(ran.stdout))
    }
}

fn run_stage<R: CommandRunner>(
    runner: &mut R,
    stage: Stage,
    invocation: &Invocation,
) -> std::result::Result<StageResult, PipelineOutcome> {
    let _span = info_span!("stage", stage = %stage).entered();
    debug!(command = %invocation, "running stage");
    runner
        .run(invocation)
        .map_err(|err| stop(stage, format!("{err:#}")))
}

fn stop(stage: Stage, diagnostic: String) -> PipelineOutcome {
    PipelineOutcome::Stopped(CaseOutcome::StageFailed(stage, diagnostic))
}
