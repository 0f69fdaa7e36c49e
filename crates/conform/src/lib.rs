pub mod case;
pub mod config;
pub mod detect;
pub mod exec;
pub mod gate;
pub mod harness;
pub mod outcome;
pub mod pipeline;
pub mod report;
pub mod scratch;
pub mod verify;

pub use case::{CaseLayout, CasePaths, ScratchContext, TestCase};
pub use config::{load_config, CommandTemplate, Commands, HarnessConfig};
pub use detect::DetectionPolicy;
pub use exec::{CommandRunner, Invocation, ProcessRunner, StageResult};
pub use gate::{GateFailure, GateRunner};
pub use harness::{run_harness, CaseReport, RunOptions, RunReport};
pub use outcome::{CaseOutcome, OutcomeKind, RecordedGolden, Stage};
pub use pipeline::{PipelineExecutor, PipelineOutcome};
pub use report::Reporter;
