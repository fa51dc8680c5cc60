use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::config::ResolvedConfig;
use crate::paths::resolve_in;

pub struct CleanPlan {
    /// As configured, for messages.
    pub output_dir: PathBuf,
    pub target: PathBuf,
    pub exists: bool,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum CleanOutcome {
    Cleaned,
    NothingToClean,
    WouldClean,
}

#[derive(Debug, Serialize)]
pub struct CleanResult {
    pub output_dir: PathBuf,
    pub outcome: CleanOutcome,
}

pub fn plan_clean(config: &ResolvedConfig) -> Result<CleanPlan> {
    let output_dir = config.compile.output_dir.clone();
    let target = resolve_in(&config.workdir, &output_dir);
    if !target.starts_with(&config.workdir) || target == config.workdir {
        bail!(
            "{} is outside the project directory; refusing to remove it",
            target.display()
        );
    }

    let exists = match std::fs::symlink_metadata(&target) {
        Ok(meta) if meta.is_dir() => true,
        Ok(_) => bail!(
            "{} exists but is not a directory; refusing to remove it",
            target.display()
        ),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => {
            return Err(e).with_context(|| format!("failed to inspect {}", target.display()))
        }
    };

    Ok(CleanPlan {
        output_dir,
        target,
        exists,
    })
}

pub fn execute_clean(plan: &CleanPlan) -> Result<CleanResult> {
    let outcome = if plan.exists {
        remove_output_dir(&plan.target)?;
        CleanOutcome::Cleaned
    } else {
        log::info!("{} does not exist", plan.target.display());
        CleanOutcome::NothingToClean
    };

    Ok(CleanResult {
        output_dir: plan.output_dir.clone(),
        outcome,
    })
}

fn remove_output_dir(target: &Path) -> Result<()> {
    log::info!("removing {}", target.display());
    std::fs::remove_dir_all(target)
        .with_context(|| format!("failed to remove {}", target.display()))
}

pub fn cmd_clean(config: &ResolvedConfig, dry_run: bool) -> Result<CleanResult> {
    let plan = plan_clean(config)?;
    if dry_run {
        let outcome = if plan.exists {
            CleanOutcome::WouldClean
        } else {
            CleanOutcome::NothingToClean
        };
        return Ok(CleanResult {
            output_dir: plan.output_dir,
            outcome,
        });
    }
    execute_clean(&plan)
}

pub fn format_clean_human(result: &CleanResult) -> String {
    match result.outcome {
        CleanOutcome::Cleaned => "Cleaned.".to_string(),
        CleanOutcome::NothingToClean => "Nothing to clean.".to_string(),
        CleanOutcome::WouldClean => format!("Would remove {}", result.output_dir.display()),
    }
}
