use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;

use crate::config::ResolvedConfig;
use crate::paths::{prepend_search_path, resolve_in};
use crate::tool::{resolve_program, ToolExit, ToolInvocation, ToolRunner};

// --- Types ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Compile,
    Link,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Compile => f.write_str("compile"),
            Stage::Link => f.write_str("link"),
        }
    }
}

pub struct InstallerPlan {
    pub stages: Vec<(Stage, ToolInvocation)>,
    pub objects: Vec<PathBuf>,
    pub package: PathBuf,
    pub missing_inputs: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum StageOutcome {
    Succeeded,
    Failed { exit: ToolExit },
    SpawnFailed { error: String },
    Skipped,
    Planned,
}

#[derive(Debug, Serialize)]
pub struct StageReport {
    pub stage: Stage,
    pub command: String,
    pub outcome: StageOutcome,
}

#[derive(Debug, Serialize)]
pub struct InstallerResult {
    pub package: PathBuf,
    pub dry_run: bool,
    pub succeeded: bool,
    pub stages: Vec<StageReport>,
    pub missing_inputs: Vec<PathBuf>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

// --- Planning (read-only) ---

/// `inherited_path` is the search path the children would otherwise see.
pub fn plan_installer(
    config: &ResolvedConfig,
    inherited_path: Option<OsString>,
) -> Result<InstallerPlan> {
    let spec = &config.installer;
    let workdir = &config.workdir;
    let toolset = resolve_in(workdir, &spec.toolset_dir);
    log::info!(
        "packaging {} {} with toolset {}",
        spec.product,
        spec.version,
        toolset.display()
    );
    let search_path = prepend_search_path(&toolset, inherited_path)?;

    let objects: Vec<PathBuf> = spec
        .sources
        .iter()
        .filter_map(|source| source.file_stem())
        .map(|stem| {
            let mut name = stem.to_os_string();
            name.push(".");
            name.push(&spec.object_extension);
            PathBuf::from(name)
        })
        .collect();

    let compile = ToolInvocation::new(resolve_program(&toolset, &spec.compiler), workdir)
        .args(spec.compile_args.iter().cloned())
        .args(spec.sources.iter().map(|s| s.display().to_string()))
        .with_search_path(search_path.clone());

    let mut link = ToolInvocation::new(resolve_program(&toolset, &spec.linker), workdir);
    for ext in &spec.extensions {
        link = link.arg("-ext").arg(ext.as_str());
    }
    let link = link
        .args(spec.link_args.iter().cloned())
        .args(objects.iter().map(|o| o.display().to_string()))
        .arg("-o")
        .arg(spec.package_name.as_str())
        .with_search_path(search_path);

    let mut missing_inputs = Vec::new();
    if !toolset.is_dir() {
        missing_inputs.push(spec.toolset_dir.clone());
    }
    for source in &spec.sources {
        if !resolve_in(workdir, source).exists() {
            missing_inputs.push(source.clone());
        }
    }

    Ok(InstallerPlan {
        stages: vec![(Stage::Compile, compile), (Stage::Link, link)],
        objects,
        package: PathBuf::from(&spec.package_name),
        missing_inputs,
    })
}

// --- Execution (impure) ---

/// Run stages in order; the first failure skips everything after it.
pub fn execute_installer(plan: &InstallerPlan, runner: &mut dyn ToolRunner) -> InstallerResult {
    for missing in &plan.missing_inputs {
        log::warn!("installer input not found: {}", missing.display());
    }

    log::debug!("intermediate objects: {:?}", plan.objects);

    let started_at = Utc::now();
    let mut stages = Vec::new();
    let mut failed = false;

    for (stage, invocation) in &plan.stages {
        let outcome = if failed {
            StageOutcome::Skipped
        } else {
            match runner.run(invocation) {
                Ok(exit) if exit.success() => StageOutcome::Succeeded,
                Ok(exit) => StageOutcome::Failed { exit },
                Err(e) => StageOutcome::SpawnFailed {
                    error: format!("{:#}", e),
                },
            }
        };

        if !matches!(outcome, StageOutcome::Succeeded | StageOutcome::Skipped) {
            log::warn!("{} stage failed, skipping remaining stages", stage);
            failed = true;
        }

        stages.push(StageReport {
            stage: *stage,
            command: invocation.command_line(),
            outcome,
        });
    }

    InstallerResult {
        package: plan.package.clone(),
        dry_run: false,
        succeeded: !failed,
        stages,
        missing_inputs: plan.missing_inputs.clone(),
        started_at,
        finished_at: Utc::now(),
    }
}

pub fn cmd_installer(
    config: &ResolvedConfig,
    runner: &mut dyn ToolRunner,
    inherited_path: Option<OsString>,
    dry_run: bool,
) -> Result<InstallerResult> {
    let plan = plan_installer(config, inherited_path)?;
    if dry_run {
        let now = Utc::now();
        return Ok(InstallerResult {
            package: plan.package,
            dry_run: true,
            succeeded: true,
            stages: plan
                .stages
                .iter()
                .map(|(stage, invocation)| StageReport {
                    stage: *stage,
                    command: invocation.command_line(),
                    outcome: StageOutcome::Planned,
                })
                .collect(),
            missing_inputs: plan.missing_inputs,
            started_at: now,
            finished_at: now,
        });
    }
    Ok(execute_installer(&plan, runner))
}

pub fn format_installer_human(result: &InstallerResult) -> String {
    let mut lines = Vec::new();

    for missing in &result.missing_inputs {
        lines.push(format!("  warning: input not found: {}", missing.display()));
    }

    if result.dry_run {
        lines.push("Would run:".to_string());
        for report in &result.stages {
            lines.push(format!("  {}", report.command));
        }
        lines.push(format!("Package: {}", result.package.display()));
        return lines.join("\n");
    }

    if result.succeeded {
        lines.push(format!(
            "SUCCESS: Installer created: {}",
            result.package.display()
        ));
        return lines.join("\n");
    }

    for report in &result.stages {
        let detail = match &report.outcome {
            StageOutcome::Failed { exit } => exit.to_string(),
            StageOutcome::SpawnFailed { error } => error.clone(),
            _ => continue,
        };
        lines.push(format!(
            "ERROR: Installer build failed at {} stage ({})",
            report.stage, detail
        ));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{FakeRunner, TestEnv};

    #[test]
    fn plan_compiles_sources_then_links_objects() {
        let env = TestEnv::new();
        let plan = plan_installer(&env.config(), None).unwrap();

        assert_eq!(plan.stages.len(), 2);
        let (stage, compile) = &plan.stages[0];
        assert_eq!(*stage, Stage::Compile);
        assert_eq!(compile.program, PathBuf::from("candle"));
        assert_eq!(compile.args, vec!["spyscalp.wxs", "ui.wxs"]);

        let (stage, link) = &plan.stages[1];
        assert_eq!(*stage, Stage::Link);
        assert_eq!(link.program, PathBuf::from("light"));
        assert_eq!(
            link.args,
            vec![
                "-ext",
                "WixUIExtension",
                "-ext",
                "WixUtilExtension",
                "spyscalp.wixobj",
                "ui.wixobj",
                "-o",
                "SpyScalp-0.1.6.msi",
            ]
        );
        assert_eq!(plan.package, PathBuf::from("SpyScalp-0.1.6.msi"));
    }

    #[test]
    fn plan_prepends_toolset_dir_for_children_only() {
        let env = TestEnv::new();
        let inherited = std::env::join_paths(["/usr/bin"]).unwrap();
        let plan = plan_installer(&env.config(), Some(inherited)).unwrap();

        for (_, invocation) in &plan.stages {
            let search = invocation.search_path.clone().unwrap();
            let entries: Vec<PathBuf> = std::env::split_paths(&search).collect();
            assert_eq!(entries, vec![env.path().join("wix"), PathBuf::from("/usr/bin")]);
        }
    }

    #[test]
    fn plan_uses_full_path_when_tool_is_in_toolset() {
        let env = TestEnv::new();
        let candle = env.touch("wix/candle");
        let plan = plan_installer(&env.config(), None).unwrap();
        assert_eq!(plan.stages[0].1.program, candle);
        assert_eq!(plan.stages[1].1.program, PathBuf::from("light"));
    }

    #[test]
    fn plan_reports_missing_toolset_and_sources() {
        let env = TestEnv::new();
        env.touch("spyscalp.wxs");
        let plan = plan_installer(&env.config(), None).unwrap();
        assert_eq!(
            plan.missing_inputs,
            vec![PathBuf::from("wix"), PathBuf::from("ui.wxs")]
        );
    }

    #[test]
    fn success_requires_every_stage() {
        let env = TestEnv::new();
        let mut runner = FakeRunner::new();
        let result = cmd_installer(&env.config(), &mut runner, None, false).unwrap();

        assert!(result.succeeded);
        assert_eq!(runner.calls.len(), 2);
        assert_eq!(
            format_installer_human(&result).lines().last().unwrap(),
            "SUCCESS: Installer created: SpyScalp-0.1.6.msi"
        );
    }

    #[test]
    fn compile_failure_short_circuits_link() {
        let env = TestEnv::new();
        env.touch_default_inputs();
        std::fs::create_dir_all(env.path().join("wix")).unwrap();
        let mut runner = FakeRunner::with_exits([ToolExit::Failed { code: 204 }]);

        let result = cmd_installer(&env.config(), &mut runner, None, false).unwrap();

        assert!(!result.succeeded);
        assert_eq!(runner.calls.len(), 1);
        assert_eq!(result.stages[1].outcome, StageOutcome::Skipped);
        assert_eq!(
            format_installer_human(&result),
            "ERROR: Installer build failed at compile stage (exit code 204)"
        );
    }

    #[test]
    fn link_failure_reports_error() {
        let env = TestEnv::new();
        let mut runner =
            FakeRunner::with_exits([ToolExit::Success, ToolExit::Failed { code: 1 }]);

        let result = cmd_installer(&env.config(), &mut runner, None, false).unwrap();

        assert!(!result.succeeded);
        assert_eq!(result.stages[0].outcome, StageOutcome::Succeeded);
        assert_eq!(
            result.stages[1].outcome,
            StageOutcome::Failed {
                exit: ToolExit::Failed { code: 1 }
            }
        );
    }

    #[test]
    fn spawn_failure_is_a_stage_failure() {
        let env = TestEnv::new();
        let mut runner = FakeRunner::spawn_error("failed to run candle");

        let result = cmd_installer(&env.config(), &mut runner, None, false).unwrap();

        assert!(!result.succeeded);
        assert_eq!(result.stages[1].outcome, StageOutcome::Skipped);
        assert!(format_installer_human(&result).contains("failed to run candle"));
    }

    #[test]
    fn dry_run_lists_both_commands() {
        let env = TestEnv::new();
        let mut runner = FakeRunner::new();

        let result = cmd_installer(&env.config(), &mut runner, None, true).unwrap();

        assert!(runner.calls.is_empty());
        assert!(result
            .stages
            .iter()
            .all(|s| s.outcome == StageOutcome::Planned));
        let text = format_installer_human(&result);
        assert!(text.contains("  candle spyscalp.wxs ui.wxs"));
        assert!(text.ends_with("Package: SpyScalp-0.1.6.msi"));
    }

    #[cfg(unix)]
    #[test]
    fn real_tools_in_toolset_dir_are_found() {
        let env = TestEnv::new();
        env.touch_default_inputs();
        env.write_tool("wix", "candle", 0);
        env.write_tool("wix", "light", 0);
        let mut runner = crate::tool::ProcessRunner::new(true);

        let result =
            cmd_installer(&env.config(), &mut runner, std::env::var_os("PATH"), false).unwrap();

        assert!(result.succeeded);
        assert_eq!(
            env.calls_log(),
            vec![
                "candle spyscalp.wxs ui.wxs",
                "light -ext WixUIExtension -ext WixUtilExtension spyscalp.wixobj ui.wixobj -o SpyScalp-0.1.6.msi",
            ]
        );
    }
}
