use std::path::{Path, PathBuf};

use crate::outcome::CaseOutcome;

/// Where case inputs and golden answers live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseLayout {
    pub examples_dir: PathBuf,
    pub ans_dir: PathBuf,
    pub source_ext: String,
    pub ir_ext: String,
    pub ans_ext: String,
}

/// Directory and optional run token for scratch artifacts. Two harness runs sharing a
/// scratch directory concurrently must use distinct tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScratchContext {
    pub dir: PathBuf,
    pub run_id: Option<String>,
}

impl ScratchContext {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            run_id: None,
        }
    }

    pub fn with_run_id(mut self, run_id: Option<String>) -> Self {
        self.run_id = run_id.filter(|r| !r.is_empty());
        self
    }

    fn stem(&self, case: &str) -> String {
        match &self.run_id {
            Some(id) => format!("{case}-{id}"),
            None => case.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCase {
    name: String,
}

impl TestCase {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pure path derivation; touches no files.
    pub fn paths(&self, layout: &CaseLayout, scratch: &ScratchContext) -> CasePaths {
        let stem = scratch.stem(&self.name);
        let exe = if cfg!(windows) {
            scratch.dir.join(format!("{stem}.exe"))
        } else {
            scratch.dir.join(&stem)
        };
        CasePaths {
            source: layout
                .examples_dir
                .join(format!("{}.{}", self.name, layout.source_ext)),
            golden: layout
                .ans_dir
                .join(format!("{}.{}", self.name, layout.ans_ext)),
            ir: scratch.dir.join(format!("{stem}.{}", layout.ir_ext)),
            exe,
        }
    }

    /// Derives the case's paths and checks that its source example exists.
    pub fn resolve(
        &self,
        layout: &CaseLayout,
        scratch: &ScratchContext,
    ) -> Result<CasePaths, CaseOutcome> {
        let paths = self.paths(layout, scratch);
        if !paths.source.is_file() {
            return Err(CaseOutcome::MissingSource(paths.source));
        }
        Ok(paths)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CasePaths {
    pub source: PathBuf,
    pub golden: PathBuf,
    pub ir: PathBuf,
    pub exe: PathBuf,
}

impl CasePaths {
    pub fn scratch(&self) -> [&Path; 2] {
        [&self.ir, &self.exe]
    }
}
