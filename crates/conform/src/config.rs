use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::case::CaseLayout;
use crate::detect::{DetectionPolicy, DEFAULT_UNIT_TEST_PASS_MARKER};
use crate::exec::Invocation;

pub const CONFIG_SCHEMA_VERSION: &str = "conform.config@0.1.0";
pub const DEFAULT_CONFIG_FILE: &str = "conform.json";

pub const DEFAULT_CASES: &[&str] = &["fib", "gcd", "sum", "spill", "caltz", "binary", "ack"];

/// Values substituted into `{name}` placeholders of a command template.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateVars<'a> {
    pub source: Option<&'a Path>,
    pub ir: Option<&'a Path>,
    pub exe: Option<&'a Path>,
    pub runtime: Option<&'a Path>,
}

impl TemplateVars<'_> {
    fn get(&self, name: &str) -> Option<String> {
        let p = match name {
            "source" => self.source,
            "ir" => self.ir,
            "exe" => self.exe,
            "runtime" => self.runtime,
            _ => None,
        };
        p.map(|p| p.display().to_string())
    }
}

/// An argv template such as `["clang", "{ir}", "{runtime}", "-o", "{exe}"]`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct CommandTemplate(Vec<String>);

impl CommandTemplate {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(argv.into_iter().map(Into::into).collect())
    }

    pub fn argv(&self) -> &[String] {
        &self.0
    }

    pub fn expand(&self, vars: &TemplateVars<'_>) -> Result<Invocation> {
        let mut argv = self.0.iter();
        let Some(program) = argv.next() else {
            anyhow::bail!("command template is empty");
        };
        let mut inv = Invocation::new(expand_arg(program, vars)?);
        for a in argv {
            inv.args.push(expand_arg(a, vars)?);
        }
        Ok(inv)
    }

    fn validate(&self, field: &str, allowed: &[&str], required: &[&str]) -> Result<()> {
        if self.0.is_empty() || self.0[0].trim().is_empty() {
            anyhow::bail!("{field} must name a program");
        }
        let mut seen: HashSet<&str> = HashSet::new();
        for a in &self.0 {
            for name in placeholders(a) {
                if !allowed.contains(&name) {
                    anyhow::bail!(
                        "{field} uses placeholder {{{name}}}; allowed here: {}",
                        describe_placeholders(allowed)
                    );
                }
                seen.insert(name);
            }
        }
        for name in required {
            if !seen.contains(name) {
                anyhow::bail!("{field} must reference {{{name}}}");
            }
        }
        Ok(())
    }
}

fn describe_placeholders(names: &[&str]) -> String {
    if names.is_empty() {
        return "none".to_string();
    }
    names
        .iter()
        .map(|n| format!("{{{n}}}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Names of well-formed `{name}` placeholders appearing in `arg`.
fn placeholders(arg: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut rest = arg;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else { break };
        let name = &after[..close];
        if is_placeholder_name(name) {
            out.push(name);
            rest = &after[close + 1..];
        } else {
            rest = after;
        }
    }
    out
}

fn is_placeholder_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
}

fn expand_arg(arg: &str, vars: &TemplateVars<'_>) -> Result<String> {
    let mut out = String::with_capacity(arg.len());
    let mut rest = arg;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let name_end = after.find('}');
        match name_end.map(|close| (&after[..close], close)) {
            Some((name, close)) if is_placeholder_name(name) => {
                let value = vars
                    .get(name)
                    .with_context(|| format!("no value for placeholder {{{name}}} in {arg:?}"))?;
                out.push_str(&value);
                rest = &after[close + 1..];
            }
            _ => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    Ok(out)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commands {
    pub check: CommandTemplate,
    pub test: CommandTemplate,
    pub compile: CommandTemplate,
    pub native_build: CommandTemplate,
}

impl Default for Commands {
    fn default() -> Self {
        Self {
            check: CommandTemplate::new(["moon", "check"]),
            test: CommandTemplate::new(["moon", "test"]),
            compile: CommandTemplate::new(["moon", "run", "main", "--", "--file", "{source}"]),
            native_build: CommandTemplate::new(["clang", "{ir}", "{runtime}", "-o", "{exe}"]),
        }
    }
}

impl Commands {
    fn validate(&self) -> Result<()> {
        self.check.validate("commands.check", &[], &[])?;
        self.test.validate("commands.test", &[], &[])?;
        self.compile
            .validate("commands.compile", &["source"], &["source"])?;
        self.native_build.validate(
            "commands.native_build",
            &["ir", "exe", "runtime"],
            &["ir", "exe"],
        )?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigManifest {
    schema_version: Option<String>,
    cases: Option<Vec<String>>,
    examples_dir: Option<String>,
    ans_dir: Option<String>,
    source_ext: Option<String>,
    ir_ext: Option<String>,
    ans_ext: Option<String>,
    scratch_dir: Option<String>,
    runtime: Option<String>,
    commands: CommandsManifest,
    unit_test_pass_marker: Option<String>,
    detection: Option<DetectionPolicy>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct CommandsManifest {
    check: Option<CommandTemplate>,
    test: Option<CommandTemplate>,
    compile: Option<CommandTemplate>,
    native_build: Option<CommandTemplate>,
}

/// Resolved harness configuration. All paths are absolute.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub root: PathBuf,
    pub cases: Vec<String>,
    pub examples_dir: PathBuf,
    pub ans_dir: PathBuf,
    pub source_ext: String,
    pub ir_ext: String,
    pub ans_ext: String,
    pub scratch_dir: PathBuf,
    pub runtime: PathBuf,
    pub commands: Commands,
    pub unit_test_pass_marker: String,
    pub detection: DetectionPolicy,
}

impl HarnessConfig {
    pub fn defaults(root: &Path) -> Result<Self> {
        Self::from_manifest(ConfigManifest::default(), root)
    }

    fn from_manifest(m: ConfigManifest, root: &Path) -> Result<Self> {
        // Every derived path is handed to external commands as a string argument.
        if root.to_str().is_none() {
            anyhow::bail!(
                "[CONFORM_CONFIG_PATH] project root is not valid UTF-8: {}",
                root.display()
            );
        }
        if let Some(v) = &m.schema_version {
            if v.trim() != CONFIG_SCHEMA_VERSION {
                anyhow::bail!(
                    "schema_version must be {CONFIG_SCHEMA_VERSION:?}, got {:?}",
                    v.trim()
                );
            }
        }

        let cases: Vec<String> = match m.cases {
            Some(cases) => cases.into_iter().map(|c| c.trim().to_string()).collect(),
            None => DEFAULT_CASES.iter().map(|c| c.to_string()).collect(),
        };
        validate_cases(&cases)?;

        let examples_rel = m.examples_dir.unwrap_or_else(|| "examples".to_string());
        validate_rel_path("examples_dir", &examples_rel)?;
        let examples_dir = root.join(examples_rel.trim());
        let ans_dir = match m.ans_dir {
            Some(raw) => {
                validate_rel_path("ans_dir", &raw)?;
                root.join(raw.trim())
            }
            None => examples_dir.join("ans"),
        };
        let scratch_dir = match m.scratch_dir {
            Some(raw) if raw.trim() != "." => {
                validate_rel_path("scratch_dir", &raw)?;
                root.join(raw.trim())
            }
            _ => root.to_path_buf(),
        };
        let runtime_rel = m.runtime.unwrap_or_else(|| "runtime.c".to_string());
        validate_rel_path("runtime", &runtime_rel)?;

        let source_ext = normalize_ext("source_ext", m.source_ext, "mbt")?;
        let ir_ext = normalize_ext("ir_ext", m.ir_ext, "ll")?;
        let ans_ext = normalize_ext("ans_ext", m.ans_ext, "ans")?;

        let defaults = Commands::default();
        let commands = Commands {
            check: m.commands.check.unwrap_or(defaults.check),
            test: m.commands.test.unwrap_or(defaults.test),
            compile: m.commands.compile.unwrap_or(defaults.compile),
            native_build: m.commands.native_build.unwrap_or(defaults.native_build),
        };
        commands.validate()?;

        let unit_test_pass_marker = m
            .unit_test_pass_marker
            .unwrap_or_else(|| DEFAULT_UNIT_TEST_PASS_MARKER.to_string());
        if unit_test_pass_marker.is_empty() {
            anyhow::bail!("unit_test_pass_marker must be non-empty");
        }

        Ok(Self {
            root: root.to_path_buf(),
            cases,
            examples_dir,
            ans_dir,
            source_ext,
            ir_ext,
            ans_ext,
            scratch_dir,
            runtime: root.join(runtime_rel.trim()),
            commands,
            unit_test_pass_marker,
            detection: m.detection.unwrap_or_default(),
        })
    }

    pub fn layout(&self) -> CaseLayout {
        CaseLayout {
            examples_dir: self.examples_dir.clone(),
            ans_dir: self.ans_dir.clone(),
            source_ext: self.source_ext.clone(),
            ir_ext: self.ir_ext.clone(),
            ans_ext: self.ans_ext.clone(),
        }
    }

    /// Declared cases restricted to `only`, keeping declared order. Unknown names are an
    /// error rather than silently skipped.
    pub fn select_cases(&self, only: &[String]) -> Result<Vec<String>> {
        if only.is_empty() {
            return Ok(self.cases.clone());
        }
        for name in only {
            if !self.cases.iter().any(|c| c == name) {
                anyhow::bail!(
                    "case {name:?} is not declared (declared: {})",
                    self.cases.join(", ")
                );
            }
        }
        Ok(self
            .cases
            .iter()
            .filter(|c| only.contains(c))
            .cloned()
            .collect())
    }
}

/// Loads `path`, resolving relative entries against its directory. A missing file at
/// the default location yields the built-in defaults; `required` turns that into an error.
pub fn load_config(path: &Path, required: bool) -> Result<HarnessConfig> {
    let cwd = std::env::current_dir().context("[CONFORM_CONFIG_READ] current dir")?;
    let path = cwd.join(path);
    let root = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| cwd.clone());

    if !path.exists() {
        if required {
            anyhow::bail!("[CONFORM_CONFIG_READ] config not found: {}", path.display());
        }
        return HarnessConfig::defaults(&root);
    }

    let bytes = std::fs::read(&path)
        .with_context(|| format!("[CONFORM_CONFIG_READ] read config: {}", path.display()))?;
    parse_config_bytes(&bytes, &root)
        .with_context(|| format!("[CONFORM_CONFIG_PARSE] config: {}", path.display()))
}

pub fn parse_config_bytes(bytes: &[u8], root: &Path) -> Result<HarnessConfig> {
    let m: ConfigManifest = serde_json::from_slice(bytes).context("parse config JSON")?;
    HarnessConfig::from_manifest(m, root)
}

fn validate_cases(cases: &[String]) -> Result<()> {
    if cases.is_empty() {
        anyhow::bail!("cases must be non-empty");
    }
    let mut seen: HashSet<&str> = HashSet::new();
    for c in cases {
        if c.is_empty() {
            anyhow::bail!("case name must be non-empty");
        }
        if c.bytes().any(|b| b == 0 || b == b'.' || b == b'/' || b == b'\\') {
            anyhow::bail!("case name must be a plain file stem: {c:?}");
        }
        if !seen.insert(c) {
            anyhow::bail!("case {c:?} is declared more than once");
        }
    }
    Ok(())
}

fn validate_rel_path(field: &str, raw: &str) -> Result<()> {
    let raw = raw.trim();
    if raw.is_empty() {
        anyhow::bail!("{field} must be non-empty");
    }
    let path = Path::new(raw);
    if path.is_absolute() {
        anyhow::bail!("{field} must be a relative path, got {raw:?}");
    }
    if path.components().any(|c| c == Component::ParentDir) {
        anyhow::bail!("{field} must not contain '..' segments: {raw:?}");
    }
    Ok(())
}

fn normalize_ext(field: &str, raw: Option<String>, default: &str) -> Result<String> {
    let Some(raw) = raw else {
        return Ok(default.to_string());
    };
    let ext = raw.trim().trim_start_matches('.').to_string();
    if ext.is_empty() || ext.contains(['/', '\\']) {
        anyhow::bail!("{field} must be a bare file extension, got {raw:?}");
    }
    Ok(ext)
}
