mod cli;
mod commands;
mod config;
mod paths;
mod testutil;
mod tool;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Command};
use log::LevelFilter;
use simplelog::WriteLogger;
use std::io::Write;

use tool::ProcessRunner;

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    // Logs go to stderr so --json output on stdout stays parseable.
    if let Err(e) = WriteLogger::init(level, simplelog::Config::default(), std::io::stderr()) {
        eprintln!("warning: logging disabled: {}", e);
    }

    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("error: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let workdir = match &cli.workdir {
        Some(dir) => dir
            .canonicalize()
            .with_context(|| format!("project directory not found: {}", dir.display()))?,
        None => std::env::current_dir().context("could not determine current directory")?,
    };

    let command = cli.command.unwrap_or(Command::Menu);

    if let Command::Config {
        init: true, force, ..
    } = command
    {
        let result = commands::cmd_config_init(&workdir, force)?;
        output(&result, cli.json, |r| commands::format_config_human(r))?;
        return Ok(0);
    }

    let config = config::load(cli.config.as_deref(), &workdir)?;
    log::debug!("project directory: {}", workdir.display());

    match command {
        Command::Menu => {
            let mut runner = ProcessRunner::new(cli.json);
            let stdin = std::io::stdin();
            // With --json the dialogue moves to stderr and stdout carries only the summary.
            let dialogue: Box<dyn Write> = if cli.json {
                Box::new(std::io::stderr())
            } else {
                Box::new(std::io::stdout())
            };
            let summary = commands::run_menu(&config, &mut runner, stdin.lock(), dialogue)?;
            output(&summary, cli.json, |s| Ok(commands::format_menu_human(s)))?;
        }
        Command::Build { dry_run } => {
            let mut runner = ProcessRunner::new(cli.json);
            let result = commands::cmd_build(&config, &mut runner, dry_run)?;
            let failed = !result.succeeded();
            output(&result, cli.json, |r| Ok(commands::format_build_human(r)))?;
            if failed {
                return Ok(1);
            }
        }
        Command::Clean { dry_run } => {
            let result = commands::cmd_clean(&config, dry_run)?;
            output(&result, cli.json, |r| Ok(commands::format_clean_human(r)))?;
        }
        Command::Installer { dry_run, no_pause } => {
            let mut runner = ProcessRunner::new(cli.json);
            let result = commands::cmd_installer(
                &config,
                &mut runner,
                std::env::var_os("PATH"),
                dry_run,
            )?;
            output(&result, cli.json, |r| Ok(commands::format_installer_human(r)))?;
            if !no_pause && !cli.json && !dry_run {
                let stdin = std::io::stdin();
                commands::pause(
                    &mut stdin.lock(),
                    &mut std::io::stdout(),
                    "Press Enter to exit...",
                )?;
                println!();
            }
            if !result.succeeded {
                return Ok(1);
            }
        }
        Command::Config { show_path, .. } => {
            let result = if show_path {
                commands::cmd_config_path(&config)
            } else {
                commands::cmd_config_show(&config)
            };
            output(&result, cli.json, commands::format_config_human)?;
        }
    }
    Ok(0)
}

fn output<T: serde::Serialize>(
    result: &T,
    json: bool,
    human_fn: impl Fn(&T) -> Result<String>,
) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
    } else {
        let text = human_fn(result)?;
        if !text.is_empty() {
            println!("{}", text);
        }
    }
    Ok(())
}
