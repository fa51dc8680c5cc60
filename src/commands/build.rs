use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

use crate::config::{CompileSpec, ResolvedConfig};
use crate::paths::resolve_in;
use crate::tool::{ToolExit, ToolInvocation, ToolRunner};

// --- Types ---

#[derive(Debug, Clone, Serialize)]
pub struct BuildPlan {
    pub invocation: ToolInvocation,
    /// Expected executable, relative to the workdir.
    pub artifact: PathBuf,
    pub missing_inputs: Vec<PathBuf>,
}

#[derive(Debug, Serialize)]
pub struct BuildResult {
    pub command: String,
    pub artifact: PathBuf,
    pub dry_run: bool,
    pub exit: Option<ToolExit>,
    pub missing_inputs: Vec<PathBuf>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl BuildResult {
    pub fn succeeded(&self) -> bool {
        self.dry_run || self.exit.is_some_and(|e| e.success())
    }
}

// --- Planning (read-only) ---

/// Flags for the native compiler, entry point last.
pub fn compile_args(spec: &CompileSpec) -> Vec<String> {
    let mut args = spec.program_args.clone();

    args.push(if spec.onefile { "--onefile" } else { "--standalone" }.to_string());
    args.push(format!("--windows-console-mode={}", spec.console));

    for package in &spec.include_packages {
        args.push(format!("--include-package={}", package));
    }

    if let Some(icon) = &spec.icon {
        args.push(format!("--windows-icon-from-ico={}", icon.display()));
    }
    for data in &spec.data_files {
        args.push(format!(
            "--include-data-files={}={}",
            data.source.display(),
            data.dest
        ));
    }

    args.push(format!("--output-dir={}", spec.output_dir.display()));
    args.extend(spec.extra_args.iter().cloned());
    args.push(spec.entry_point.display().to_string());
    args
}

pub fn plan_build(config: &ResolvedConfig) -> BuildPlan {
    let spec = &config.compile;

    let invocation =
        ToolInvocation::new(&spec.program, &config.workdir).args(compile_args(spec));

    let declared = std::iter::once(&spec.entry_point)
        .chain(spec.icon.iter())
        .chain(spec.data_files.iter().map(|d| &d.source));
    let mut missing_inputs = Vec::new();
    for input in declared {
        if !resolve_in(&config.workdir, input).exists() && !missing_inputs.contains(input) {
            missing_inputs.push(input.clone());
        }
    }

    BuildPlan {
        invocation,
        artifact: spec.output_dir.join(&spec.artifact_name),
        missing_inputs,
    }
}

// --- Execution (impure) ---

pub fn execute_build(plan: &BuildPlan, runner: &mut dyn ToolRunner) -> Result<BuildResult> {
    for missing in &plan.missing_inputs {
        log::warn!("build input not found: {}", missing.display());
    }

    let started_at = Utc::now();
    let exit = runner.run(&plan.invocation)?;
    let finished_at = Utc::now();

    if exit.success() {
        log::info!("build finished in {}", format_elapsed(started_at, finished_at));
    } else {
        log::warn!("build failed with {}", exit);
    }

    Ok(BuildResult {
        command: plan.invocation.command_line(),
        artifact: plan.artifact.clone(),
        dry_run: false,
        exit: Some(exit),
        missing_inputs: plan.missing_inputs.clone(),
        started_at,
        finished_at,
    })
}

pub fn cmd_build(
    config: &ResolvedConfig,
    runner: &mut dyn ToolRunner,
    dry_run: bool,
) -> Result<BuildResult> {
    let plan = plan_build(config);
    if dry_run {
        let now = Utc::now();
        return Ok(BuildResult {
            command: plan.invocation.command_line(),
            artifact: plan.artifact,
            dry_run: true,
            exit: None,
            missing_inputs: plan.missing_inputs,
            started_at: now,
            finished_at: now,
        });
    }
    execute_build(&plan, runner)
}

pub fn format_elapsed(started: DateTime<Utc>, finished: DateTime<Utc>) -> String {
    let seconds = (finished - started).num_seconds().max(0);
    let minutes = seconds / 60;
    if minutes > 0 {
        format!("{}m {}s", minutes, seconds % 60)
    } else {
        format!("{}s", seconds)
    }
}

pub fn format_build_human(result: &BuildResult) -> String {
    let mut lines = Vec::new();

    for missing in &result.missing_inputs {
        lines.push(format!("  warning: input not found: {}", missing.display()));
    }

    if result.dry_run {
        lines.push(format!("Would run: {}", result.command));
        lines.push(format!("Expected output: {}", result.artifact.display()));
        return lines.join("\n");
    }

    match result.exit {
        Some(ToolExit::Success) => lines.push(format!(
            "SUCCESS: Executable created at {}",
            result.artifact.display()
        )),
        Some(ToolExit::Failed { code }) => {
            lines.push(format!("ERROR: Build failed with exit code {}", code))
        }
        Some(ToolExit::Killed) => {
            lines.push("ERROR: Build failed (compiler terminated by signal)".to_string())
        }
        None => {}
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, ConsoleMode};
    use crate::testutil::{FakeRunner, TestEnv};

    #[test]
    fn default_args_match_build_script() {
        let env = TestEnv::new();
        let config = env.config();
        let args = compile_args(&config.compile);
        assert_eq!(
            args,
            vec![
                "-m",
                "nuitka",
                "--onefile",
                "--windows-console-mode=force",
                "--include-package=textual",
                "--include-package=rich",
                "--include-package=tastytrade",
                "--include-package=pandas_market_calendars",
                "--include-package=tzdata",
                "--windows-icon-from-ico=spyscalp.ico",
                "--include-data-files=logo.png=logo.png",
                "--include-data-files=spyscalp.ico=spyscalp.ico",
                "--output-dir=build",
                "spyscalp.py",
            ]
        );
    }

    #[test]
    fn standalone_and_console_mode_follow_config() {
        let env = TestEnv::new();
        let mut raw = Config::default();
        raw.compile.onefile = false;
        raw.compile.console = ConsoleMode::Attach;
        raw.compile.icon = None;
        raw.compile.extra_args = vec!["--lto=no".to_string()];
        let config = env.config_from(raw);

        let args = compile_args(&config.compile);
        assert!(args.contains(&"--standalone".to_string()));
        assert!(args.contains(&"--windows-console-mode=attach".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("--windows-icon-from-ico")));
        assert_eq!(args[args.len() - 2], "--lto=no");
        assert_eq!(args.last().unwrap(), "spyscalp.py");
    }

    #[test]
    fn plan_lists_missing_inputs_once() {
        let env = TestEnv::new();
        env.touch("spyscalp.py");
        let plan = plan_build(&env.config());
        assert_eq!(
            plan.missing_inputs,
            vec![PathBuf::from("spyscalp.ico"), PathBuf::from("logo.png")]
        );
        assert_eq!(plan.artifact, PathBuf::from("build/spyscalp.exe"));
    }

    #[test]
    fn build_invokes_compiler_exactly_once() {
        let env = TestEnv::new();
        let config = env.config();
        let mut runner = FakeRunner::new();

        let result = cmd_build(&config, &mut runner, false).unwrap();

        assert_eq!(runner.calls.len(), 1);
        assert_eq!(runner.calls[0].program, PathBuf::from("python"));
        assert_eq!(runner.calls[0].args, compile_args(&config.compile));
        assert_eq!(runner.calls[0].cwd, env.path());
        assert!(result.succeeded());
    }

    #[test]
    fn build_runs_even_when_inputs_missing() {
        let env = TestEnv::new();
        let mut runner = FakeRunner::new();
        let result = cmd_build(&env.config(), &mut runner, false).unwrap();
        assert_eq!(runner.calls.len(), 1);
        assert_eq!(result.missing_inputs.len(), 3);
    }

    #[test]
    fn failed_build_reports_exact_code() {
        let env = TestEnv::new();
        env.touch_default_inputs();
        let mut runner = FakeRunner::with_exits([ToolExit::Failed { code: 42 }]);

        let result = cmd_build(&env.config(), &mut runner, false).unwrap();

        assert!(!result.succeeded());
        assert_eq!(
            format_build_human(&result),
            "ERROR: Build failed with exit code 42"
        );
    }

    #[test]
    fn killed_compiler_reports_signal() {
        let env = TestEnv::new();
        env.touch_default_inputs();
        let mut runner = FakeRunner::with_exits([ToolExit::Killed]);

        let result = cmd_build(&env.config(), &mut runner, false).unwrap();

        assert!(!result.succeeded());
        assert_eq!(
            format_build_human(&result),
            "ERROR: Build failed (compiler terminated by signal)"
        );
    }

    #[test]
    fn successful_build_names_artifact() {
        let env = TestEnv::new();
        env.touch_default_inputs();
        let mut runner = FakeRunner::new();
        let result = cmd_build(&env.config(), &mut runner, false).unwrap();
        assert_eq!(
            format_build_human(&result),
            "SUCCESS: Executable created at build/spyscalp.exe"
        );
    }

    #[test]
    fn dry_run_spawns_nothing() {
        let env = TestEnv::new();
        let mut runner = FakeRunner::new();
        let result = cmd_build(&env.config(), &mut runner, true).unwrap();
        assert!(runner.calls.is_empty());
        assert!(result.dry_run);
        assert!(format_build_human(&result).contains("Would run: python -m nuitka --onefile"));
    }

    #[test]
    fn spawn_error_propagates() {
        let env = TestEnv::new();
        let mut runner = FakeRunner::spawn_error("failed to run python");
        let err = cmd_build(&env.config(), &mut runner, false).unwrap_err();
        assert!(err.to_string().contains("failed to run python"));
    }

    #[test]
    fn format_elapsed_minutes_and_seconds() {
        let start = Utc::now();
        assert_eq!(format_elapsed(start, start + chrono::Duration::seconds(75)), "1m 15s");
        assert_eq!(format_elapsed(start, start + chrono::Duration::seconds(9)), "9s");
    }
}
