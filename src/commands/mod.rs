/// Result structs for command output. Commands return these instead of printing
/// directly; main.rs formats them as human-readable or JSON based on --json.
/// The interactive menu is the exception: it owns its console dialogue.
mod build;
mod clean;
mod config;
mod installer;
mod menu;

pub use build::*;
pub use clean::*;
pub use config::*;
pub use installer::*;
pub use menu::*;
