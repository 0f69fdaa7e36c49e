use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    StaticCheck,
    UnitTest,
    Compile,
    NativeBuild,
    Execute,
}

impl Stage {
    /// Whole-project gates, in the order they run.
    pub const GATES: [Stage; 2] = [Stage::StaticCheck, Stage::UnitTest];
    /// Per-case stages, in the order they run.
    pub const PER_CASE: [Stage; 3] = [Stage::Compile, Stage::NativeBuild, Stage::Execute];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::StaticCheck => "static-check",
            Stage::UnitTest => "unit-test",
            Stage::Compile => "compile",
            Stage::NativeBuild => "native-build",
            Stage::Execute => "execute",
        }
    }

    pub fn is_gate(self) -> bool {
        matches!(self, Stage::StaticCheck | Stage::UnitTest)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal result of one test case. Exactly one is produced per case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaseOutcome {
    MissingSource(PathBuf),
    StageFailed(Stage, String),
    ExecutionErrored(String),
    /// No golden file existed; one was recorded from this run's output.
    FirstRun(RecordedGolden),
    Mismatch {
        expected: String,
        actual: String,
    },
    Passed,
    /// The harness itself failed on this case, e.g. the golden file was unreadable.
    HarnessFault(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedGolden {
    pub path: PathBuf,
    pub bytes: usize,
    pub sha256: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OutcomeKind {
    Passed,
    FirstRun,
    Mismatch,
    ExecutionErrored,
    StageFailed,
    MissingSource,
    HarnessFault,
}

impl OutcomeKind {
    pub const ALL: [OutcomeKind; 7] = [
        OutcomeKind::Passed,
        OutcomeKind::FirstRun,
        OutcomeKind::Mismatch,
        OutcomeKind::ExecutionErrored,
        OutcomeKind::StageFailed,
        OutcomeKind::MissingSource,
        OutcomeKind::HarnessFault,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OutcomeKind::Passed => "passed",
            OutcomeKind::FirstRun => "first-run",
            OutcomeKind::Mismatch => "mismatch",
            OutcomeKind::ExecutionErrored => "execution-errored",
            OutcomeKind::StageFailed => "stage-failed",
            OutcomeKind::MissingSource => "missing-source",
            OutcomeKind::HarnessFault => "harness-fault",
        }
    }
}

impl CaseOutcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            CaseOutcome::MissingSource(_) => OutcomeKind::MissingSource,
            CaseOutcome::StageFailed(..) => OutcomeKind::StageFailed,
            CaseOutcome::ExecutionErrored(_) => OutcomeKind::ExecutionErrored,
            CaseOutcome::FirstRun(_) => OutcomeKind::FirstRun,
            CaseOutcome::Mismatch { .. } => OutcomeKind::Mismatch,
            CaseOutcome::Passed => OutcomeKind::Passed,
            CaseOutcome::HarnessFault(_) => OutcomeKind::HarnessFault,
        }
    }

    pub fn failed_stage(&self) -> Option<Stage> {
        match self {
            CaseOutcome::StageFailed(stage, _) => Some(*stage),
            _ => None,
        }
    }
}
