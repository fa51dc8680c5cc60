use anyhow::{Context, Result};
use serde::Serialize;
use std::io::{BufRead, Write};

use crate::commands::build::{cmd_build, format_build_human};
use crate::commands::clean::{cmd_clean, format_clean_human};
use crate::config::ResolvedConfig;
use crate::tool::ToolRunner;

const RULE: &str = "========================================";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Build,
    Clean,
    Exit,
}

pub fn parse_selection(input: &str) -> Option<Selection> {
    match input.trim() {
        "1" => Some(Selection::Build),
        "2" => Some(Selection::Clean),
        "3" => Some(Selection::Exit),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuState {
    MenuShown,
    Building,
    Cleaning,
    Exited,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuEvent {
    Selected(Selection),
    Invalid(String),
    EndOfInput,
    ActionFinished,
}

impl MenuEvent {
    fn from_line(line: Option<&str>) -> Self {
        match line {
            None => MenuEvent::EndOfInput,
            Some(line) => match parse_selection(line) {
                Some(selection) => MenuEvent::Selected(selection),
                None => MenuEvent::Invalid(line.trim().to_string()),
            },
        }
    }
}

pub fn transition(state: MenuState, event: &MenuEvent) -> MenuState {
    match (state, event) {
        (MenuState::MenuShown, MenuEvent::Selected(Selection::Build)) => MenuState::Building,
        (MenuState::MenuShown, MenuEvent::Selected(Selection::Clean)) => MenuState::Cleaning,
        (MenuState::MenuShown, MenuEvent::Selected(Selection::Exit))
        | (MenuState::MenuShown, MenuEvent::EndOfInput) => MenuState::Exited,
        (MenuState::Building | MenuState::Cleaning, MenuEvent::ActionFinished) => {
            MenuState::MenuShown
        }
        (MenuState::Exited, _) => MenuState::Exited,
        (state, _) => state,
    }
}

#[derive(Debug, Default, Serialize, PartialEq)]
pub struct MenuSummary {
    pub builds: usize,
    pub failed_builds: usize,
    pub cleans: usize,
    pub invalid_choices: usize,
}

/// Block until the operator presses Enter (or input ends).
pub fn pause<R: BufRead, W: Write>(input: &mut R, output: &mut W, prompt: &str) -> Result<()> {
    write!(output, "{}", prompt)?;
    output.flush()?;
    let mut line = String::new();
    input.read_line(&mut line).context("failed to read from stdin")?;
    Ok(())
}

struct Menu<'a, R, W> {
    config: &'a ResolvedConfig,
    runner: &'a mut dyn ToolRunner,
    input: R,
    output: W,
    summary: MenuSummary,
}

impl<R: BufRead, W: Write> Menu<'_, R, W> {
    fn render(&mut self) -> Result<()> {
        writeln!(self.output)?;
        writeln!(self.output, "{}", RULE)?;
        writeln!(self.output, "  {}", self.config.menu.title)?;
        writeln!(self.output, "{}", RULE)?;
        writeln!(self.output, "  1. Build executable")?;
        writeln!(self.output, "  2. Clean build output")?;
        writeln!(self.output, "  3. Exit")?;
        writeln!(self.output, "{}", RULE)?;
        write!(self.output, "Enter your choice (1-3): ")?;
        self.output.flush()?;
        Ok(())
    }

    fn read_event(&mut self) -> Result<MenuEvent> {
        let mut line = String::new();
        let n = self
            .input
            .read_line(&mut line)
            .context("failed to read menu choice")?;
        Ok(MenuEvent::from_line(if n == 0 { None } else { Some(line.as_str()) }))
    }

    fn build(&mut self) -> Result<()> {
        self.summary.builds += 1;
        match cmd_build(self.config, &mut *self.runner, false) {
            Ok(result) => {
                if !result.succeeded() {
                    self.summary.failed_builds += 1;
                }
                writeln!(self.output, "{}", format_build_human(&result))?;
            }
            Err(e) => {
                self.summary.failed_builds += 1;
                log::error!("build could not start: {:#}", e);
                writeln!(self.output, "ERROR: {:#}", e)?;
            }
        }
        Ok(())
    }

    fn clean(&mut self) -> Result<()> {
        self.summary.cleans += 1;
        match cmd_clean(self.config, false) {
            Ok(result) => writeln!(self.output, "{}", format_clean_human(&result))?,
            Err(e) => writeln!(self.output, "ERROR: {:#}", e)?,
        }
        Ok(())
    }

    fn run(mut self) -> Result<MenuSummary> {
        let mut state = MenuState::MenuShown;
        loop {
            let event = match state {
                MenuState::MenuShown => {
                    self.render()?;
                    let event = self.read_event()?;
                    if let MenuEvent::Invalid(choice) = &event {
                        log::debug!("invalid menu choice {:?}", choice);
                        self.summary.invalid_choices += 1;
                        writeln!(self.output, "Invalid choice.")?;
                        std::thread::sleep(self.config.menu.invalid_choice_delay);
                    }
                    event
                }
                MenuState::Building => {
                    self.build()?;
                    pause(&mut self.input, &mut self.output, "Press Enter to continue...")?;
                    MenuEvent::ActionFinished
                }
                MenuState::Cleaning => {
                    self.clean()?;
                    pause(&mut self.input, &mut self.output, "Press Enter to continue...")?;
                    MenuEvent::ActionFinished
                }
                MenuState::Exited => break,
            };
            state = transition(state, &event);
        }
        writeln!(self.output)?;
        Ok(self.summary)
    }
}

/// Interactive build/clean/exit loop. Failed actions never end the loop.
pub fn run_menu<R: BufRead, W: Write>(
    config: &ResolvedConfig,
    runner: &mut dyn ToolRunner,
    input: R,
    output: W,
) -> Result<MenuSummary> {
    Menu {
        config,
        runner,
        input,
        output,
        summary: MenuSummary::default(),
    }
    .run()
}

pub fn format_menu_human(summary: &MenuSummary) -> String {
    if summary.builds == 0 && summary.cleans == 0 {
        return String::new();
    }
    format!(
        "Session: {} build(s), {} failed, {} clean(s)",
        summary.builds, summary.failed_builds, summary.cleans
    )
}
