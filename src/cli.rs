use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "spyscalp-build",
    version,
    about = "Build menu and installer driver for the SPYSCALP trading terminal"
)]
pub struct Cli {
    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Config file (default: ./spyscalp-build.toml, then the user config dir)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Project directory the tools run in
    #[arg(short = 'C', long, global = true)]
    pub workdir: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Interactive build / clean / exit menu (default)
    Menu,
    /// Compile the application into a standalone executable
    Build {
        /// Print the compiler command without running it
        #[arg(long)]
        dry_run: bool,
    },
    /// Remove the build output directory
    Clean {
        /// Report what would be removed without removing it
        #[arg(long)]
        dry_run: bool,
    },
    /// Compile and link the installer package
    Installer {
        /// Print the toolchain commands without running them
        #[arg(long)]
        dry_run: bool,
        /// Exit without waiting for Enter
        #[arg(long)]
        no_pause: bool,
    },
    /// Show or create the configuration
    Config {
        /// Print which config file is in effect and exit
        #[arg(long, conflicts_with = "init")]
        show_path: bool,
        /// Write a default spyscalp-build.toml into the project directory
        #[arg(long)]
        init: bool,
        /// Overwrite an existing config file with --init
        #[arg(long, requires = "init")]
        force: bool,
    },
}
