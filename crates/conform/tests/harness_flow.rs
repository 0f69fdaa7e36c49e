use std::path::Path;

use conform::{
    run_harness, CaseOutcome, DetectionPolicy, HarnessConfig, Reporter, RunOptions, RunReport,
    ScratchContext, Stage, StageResult, TestCase,
};


use fake_toolchain::{config, ok, with_stderr, write_source, FakeToolchain};

struct Run {
    report: RunReport,
    text: String,
}

fn run(cfg: &HarnessConfig, options: &RunOptions, tools: &mut FakeToolchain) -> Run {
    let mut reporter = Reporter::new(Vec::new());
    let report = run_harness(cfg, options, tools, &mut reporter).expect("harness run");
    let text = String::from_utf8(reporter.into_inner()).expect("utf8 report");
    Run { report, text }
}

fn only(cfg: &HarnessConfig, cases: &[&str]) -> RunOptions {
    RunOptions {
        cases: cases.iter().map(|c| c.to_string()).collect(),
        ..RunOptions::for_config(cfg)
    }
}

fn outcome<'a>(run: &'a Run, case: &str) -> &'a CaseOutcome {
    &run.report
        .cases()
        .iter()
        .find(|c| c.name == case)
        .unwrap_or_else(|| panic!("no report for {case}: {:?}", run.report))
        .outcome
}

fn assert_no_scratch(cfg: &HarnessConfig, options: &RunOptions, case: &str) {
    let paths = TestCase::new(case).paths(&cfg.layout(), &options.scratch);
    for p in paths.scratch() {
        assert!(!p.exists(), "scratch artifact left behind: {}", p.display());
    }
}

fn golden(cfg: &HarnessConfig, case: &str) -> std::path::PathBuf {
    cfg.ans_dir.join(format!("{case}.{}", cfg.ans_ext))
}

#[test]
fn static_analysis_failure_stops_everything() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    write_source(&cfg, "fib");
    let mut tools = FakeToolchain {
        check: Some(with_stderr("src/lib.mbt:1:5 Error: unbound identifier\n")),
        ..Default::default()
    };

    let r = run(&cfg, &RunOptions::for_config(&cfg), &mut tools);

    let RunReport::GateFailed(failure) = &r.report else {
        panic!("expected gate failure, got {:?}", r.report);
    };
    assert_eq!(failure.stage, Stage::StaticCheck);
    assert!(failure.stderr.contains("unbound identifier"));
    assert_eq!(tools.programs(), ["check"]);
    assert!(r.text.contains("ABORT static-check gate failed"));
    assert!(!r.text.contains("--- Testing"));
}

#[test]
fn unit_test_gate_requires_zero_failures_marker() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    write_source(&cfg, "fib");
    let mut tools = FakeToolchain {
        test: Some(ok("Total tests: 4, passed: 3, failed: 1.\n")),
        ..Default::default()
    };

    let r = run(&cfg, &RunOptions::for_config(&cfg), &mut tools);

    let RunReport::GateFailed(failure) = &r.report else {
        panic!("expected gate failure, got {:?}", r.report);
    };
    assert_eq!(failure.stage, Stage::UnitTest);
    assert_eq!(tools.programs(), ["check", "test"]);
    assert!(r.text.contains("failed: 1"));
}

#[test]
fn unspawnable_gate_aborts_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let mut tools = FakeToolchain {
        unspawnable: vec!["check".to_string()],
        ..Default::default()
    };

    let r = run(&cfg, &RunOptions::for_config(&cfg), &mut tools);

    assert!(matches!(r.report, RunReport::GateFailed(ref f) if f.stage == Stage::StaticCheck));
    assert_eq!(tools.programs(), ["check"]);
}

#[test]
fn compile_failure_short_circuits_the_case() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    write_source(&cfg, "fib");
    let mut tools = FakeToolchain::default();
    tools.compile.insert(
        "fib".to_string(),
        StageResult {
            exit_status: Some(0),
            stdout: b"; partial".to_vec(),
            stderr: b"examples/fib.mbt:2:1 Error: unexpected token\n".to_vec(),
        },
    );
    let options = only(&cfg, &["fib"]);

    let r = run(&cfg, &options, &mut tools);

    assert_eq!(
        outcome(&r, "fib"),
        &CaseOutcome::StageFailed(
            Stage::Compile,
            "examples/fib.mbt:2:1 Error: unexpected token\n".to_string()
        )
    );
    assert_eq!(tools.programs(), ["check", "test", "compile"]);
    assert_no_scratch(&cfg, &options, "fib");
    assert!(!golden(&cfg, "fib").exists());
}

#[test]
fn native_build_failure_still_removes_ir() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    write_source(&cfg, "fib");
    let mut tools = FakeToolchain::default();
    tools.build.insert(
        "fib".to_string(),
        with_stderr("fib.ll:3:1: error: expected top-level entity\n"),
    );
    let options = only(&cfg, &["fib"]);

    let r = run(&cfg, &options, &mut tools);

    assert_eq!(outcome(&r, "fib").failed_stage(), Some(Stage::NativeBuild));
    assert_eq!(tools.ir_present_at_build.get("fib"), Some(&true));
    assert_eq!(tools.programs(), ["check", "test", "compile", "build"]);
    assert_no_scratch(&cfg, &options, "fib");
}

#[test]
fn build_warnings_do_not_fail_the_stage() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    write_source(&cfg, "fib");
    let mut tools = FakeToolchain::default().outputs(&[("fib", "55\n")]);
    tools.build.insert(
        "fib".to_string(),
        with_stderr("warning: overriding the module target triple\n"),
    );
    let options = only(&cfg, &["fib"]);

    let r = run(&cfg, &options, &mut tools);

    assert!(matches!(outcome(&r, "fib"), CaseOutcome::FirstRun(_)));
}

#[test]
fn executable_stderr_skips_comparison() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    write_source(&cfg, "gcd");
    let mut tools = FakeToolchain::default();
    tools.run.insert(
        "gcd".to_string(),
        StageResult {
            exit_status: Some(0),
            stdout: b"6\n".to_vec(),
            stderr: b"runtime: division by zero\n".to_vec(),
        },
    );
    let options = only(&cfg, &["gcd"]);

    let r = run(&cfg, &options, &mut tools);

    assert_eq!(
        outcome(&r, "gcd"),
        &CaseOutcome::ExecutionErrored("runtime: division by zero\n".to_string())
    );
    assert!(!golden(&cfg, "gcd").exists());
    assert_no_scratch(&cfg, &options, "gcd");
}

#[test]
fn golden_is_recorded_once_then_compared() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    write_source(&cfg, "sum");
    let options = only(&cfg, &["sum"]);

    let mut tools = FakeToolchain::default().outputs(&[("sum", "55\n")]);
    let first = run(&cfg, &options, &mut tools);
    let CaseOutcome::FirstRun(rec) = outcome(&first, "sum") else {
        panic!("expected FirstRun, got {:?}", first.report);
    };
    assert_eq!(rec.path, golden(&cfg, "sum"));
    assert_eq!(std::fs::read(golden(&cfg, "sum")).unwrap(), b"55\n");
    assert!(first.text.contains("NEW  sum"));

    let mut tools = FakeToolchain::default().outputs(&[("sum", "55\n")]);
    let second = run(&cfg, &options, &mut tools);
    assert_eq!(outcome(&second, "sum"), &CaseOutcome::Passed);
    assert!(second.text.contains("PASS sum"));
    assert_eq!(std::fs::read(golden(&cfg, "sum")).unwrap(), b"55\n");
}

#[test]
fn missing_trailing_newline_is_a_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    write_source(&cfg, "fib");
    std::fs::create_dir_all(&cfg.ans_dir).unwrap();
    std::fs::write(golden(&cfg, "fib"), "3\n").unwrap();
    let mut tools = FakeToolchain::default().outputs(&[("fib", "3")]);

    let r = run(&cfg, &only(&cfg, &["fib"]), &mut tools);

    assert_eq!(
        outcome(&r, "fib"),
        &CaseOutcome::Mismatch {
            expected: "3\n".to_string(),
            actual: "3".to_string(),
        }
    );
    assert_eq!(std::fs::read(golden(&cfg, "fib")).unwrap(), b"3\n");
}

#[test]
fn unreadable_golden_is_reported_and_later_cases_still_run() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    for case in ["fib", "gcd", "sum"] {
        write_source(&cfg, case);
    }
    std::fs::create_dir_all(golden(&cfg, "fib")).unwrap();
    let mut tools =
        FakeToolchain::default().outputs(&[("fib", "3\n"), ("gcd", "6\n"), ("sum", "55\n")]);
    let options = RunOptions::for_config(&cfg);

    let r = run(&cfg, &options, &mut tools);

    let CaseOutcome::HarnessFault(message) = outcome(&r, "fib") else {
        panic!("expected HarnessFault, got {:?}", outcome(&r, "fib"));
    };
    assert!(message.contains("[CONFORM_GOLDEN_READ]"), "{message}");
    assert!(r.text.contains("FAIL fib: harness error\n"), "{}", r.text);
    assert!(matches!(outcome(&r, "gcd"), CaseOutcome::FirstRun(_)));
    assert!(matches!(outcome(&r, "sum"), CaseOutcome::FirstRun(_)));
    assert_eq!(std::fs::read(golden(&cfg, "gcd")).unwrap(), b"6\n");
    assert!(r.text.contains("1 harness-fault"), "{}", r.text);
    assert!(!r.report.all_passed(true));
    assert_no_scratch(&cfg, &options, "fib");
}

#[test]
fn missing_source_does_not_affect_other_cases() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    write_source(&cfg, "gcd");
    write_source(&cfg, "sum");
    let mut tools = FakeToolchain::default().outputs(&[("gcd", "6\n"), ("sum", "55\n")]);
    let options = RunOptions::for_config(&cfg);

    let r = run(&cfg, &options, &mut tools);

    assert_eq!(
        outcome(&r, "fib"),
        &CaseOutcome::MissingSource(cfg.examples_dir.join("fib.mbt"))
    );
    assert!(matches!(outcome(&r, "gcd"), CaseOutcome::FirstRun(_)));
    assert!(matches!(outcome(&r, "sum"), CaseOutcome::FirstRun(_)));
    assert!(tools
        .calls
        .iter()
        .all(|c| !c.args.iter().any(|a| a.ends_with("fib.mbt") || a.ends_with("fib.ll"))));
    let names: Vec<&str> = r.report.cases().iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, ["fib", "gcd", "sum"]);
}

#[test]
fn no_scratch_survives_any_outcome() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    for case in ["fib", "gcd", "sum"] {
        write_source(&cfg, case);
    }
    let mut tools = FakeToolchain::default().outputs(&[("sum", "55\n")]);
    tools
        .compile
        .insert("fib".to_string(), with_stderr("error[E1]: nope"));
    tools
        .build
        .insert("gcd".to_string(), with_stderr("clang: error: linker failed"));
    let options = RunOptions::for_config(&cfg);

    let r = run(&cfg, &options, &mut tools);

    assert_eq!(outcome(&r, "fib").failed_stage(), Some(Stage::Compile));
    assert_eq!(outcome(&r, "gcd").failed_stage(), Some(Stage::NativeBuild));
    assert!(matches!(outcome(&r, "sum"), CaseOutcome::FirstRun(_)));
    for case in ["fib", "gcd", "sum"] {
        assert_no_scratch(&cfg, &options, case);
    }
    assert!(r.text.contains("summary: 3 cases: 0 passed, 1 first-run"));
}

#[test]
fn unspawnable_stage_is_a_stage_failure() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    write_source(&cfg, "fib");
    write_source(&cfg, "gcd");
    let mut tools = FakeToolchain {
        unspawnable: vec!["build".to_string()],
        ..Default::default()
    };
    let options = only(&cfg, &["fib", "gcd"]);

    let r = run(&cfg, &options, &mut tools);

    for case in ["fib", "gcd"] {
        let CaseOutcome::StageFailed(stage, diag) = outcome(&r, case) else {
            panic!("expected stage failure for {case}");
        };
        assert_eq!(*stage, Stage::NativeBuild);
        assert!(diag.contains("No such file"));
        assert_no_scratch(&cfg, &options, case);
    }
}

#[test]
fn exit_status_policy_catches_quiet_failures() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path());
    write_source(&cfg, "fib");
    let quiet_failure = StageResult {
        exit_status: Some(1),
        stdout: Vec::new(),
        stderr: Vec::new(),
    };
    let options = only(&cfg, &["fib"]);

    let mut tools = FakeToolchain::default();
    tools.compile.insert("fib".to_string(), quiet_failure.clone());
    let r = run(&cfg, &options, &mut tools);
    assert!(matches!(outcome(&r, "fib"), CaseOutcome::FirstRun(_)));
    std::fs::remove_file(golden(&cfg, "fib")).unwrap();

    cfg.detection = DetectionPolicy::ExitStatus;
    let mut tools = FakeToolchain::default();
    tools.compile.insert("fib".to_string(), quiet_failure);
    let r = run(&cfg, &options, &mut tools);
    assert_eq!(
        outcome(&r, "fib"),
        &CaseOutcome::StageFailed(Stage::Compile, "exited with status 1".to_string())
    );
}

#[test]
fn run_id_keeps_scratch_names_apart() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    write_source(&cfg, "fib");
    let options = RunOptions {
        scratch: ScratchContext::new(&cfg.scratch_dir).with_run_id(Some("r1".to_string())),
        ..only(&cfg, &["fib"])
    };
    let mut tools = FakeToolchain::default();

    let r = run(&cfg, &options, &mut tools);

    let build = tools
        .calls
        .iter()
        .find(|c| c.program == "build")
        .expect("build invoked");
    assert!(Path::new(&build.args[0]).ends_with("fib-r1.ll"));
    assert!(matches!(outcome(&r, "fib"), CaseOutcome::FirstRun(_)));
    assert_no_scratch(&cfg, &options, "fib");
}

#[test]
fn stale_executable_is_never_run() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    write_source(&cfg, "fib");
    let options = only(&cfg, &["fib"]);
    let paths = TestCase::new("fib").paths(&cfg.layout(), &options.scratch);
    std::fs::write(&paths.exe, "stale").unwrap();
    let mut tools = FakeToolchain::default();
    tools
        .compile
        .insert("fib".to_string(), with_stderr("Error: nope"));

    run(&cfg, &options, &mut tools);

    assert!(!paths.exe.exists());
    assert!(!tools.programs().contains(&"exe".to_string()));
}

#[test]
fn skip_gates_goes_straight_to_cases() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    write_source(&cfg, "fib");
    let options = RunOptions {
        skip_gates: true,
        ..only(&cfg, &["fib"])
    };
    let mut tools = FakeToolchain {
        check: Some(with_stderr("error: would abort")),
        ..Default::default()
    };

    let r = run(&cfg, &options, &mut tools);

    assert_eq!(tools.programs(), ["compile", "build", "exe"]);
    assert!(r.report.all_passed(true));
    assert!(!r.report.all_passed(false));
}
