#![cfg(test)]

use anyhow::{anyhow, Result};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::config::{self, Config, ConfigSource, ResolvedConfig};
use crate::tool::{ToolExit, ToolInvocation, ToolRunner};

/// Records every invocation and replays scripted outcomes (default: success).
pub struct FakeRunner {
    pub calls: Vec<ToolInvocation>,
    outcomes: VecDeque<std::result::Result<ToolExit, String>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self {
            calls: Vec::new(),
            outcomes: VecDeque::new(),
        }
    }

    pub fn with_exits(exits: impl IntoIterator<Item = ToolExit>) -> Self {
        Self {
            calls: Vec::new(),
            outcomes: exits.into_iter().map(Ok).collect(),
        }
    }

    pub fn spawn_error(message: &str) -> Self {
        Self {
            calls: Vec::new(),
            outcomes: VecDeque::from([Err(message.to_string())]),
        }
    }
}

impl ToolRunner for FakeRunner {
    fn run(&mut self, invocation: &ToolInvocation) -> Result<ToolExit> {
        self.calls.push(invocation.clone());
        match self.outcomes.pop_front() {
            Some(Ok(exit)) => Ok(exit),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Ok(ToolExit::Success),
        }
    }
}

pub struct TestEnv {
    dir: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Defaults with the invalid-choice delay removed.
    pub fn config(&self) -> ResolvedConfig {
        let mut raw = Config::default();
        raw.menu.invalid_choice_delay_ms = 0;
        self.config_from(raw)
    }

    pub fn config_from(&self, raw: Config) -> ResolvedConfig {
        config::resolve(raw, self.path(), ConfigSource::Defaults).expect("valid test config")
    }

    pub fn touch(&self, rel: &str) -> PathBuf {
        let path = self.path().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, "").unwrap();
        path
    }

    /// Create every input the default config expects.
    pub fn touch_default_inputs(&self) {
        for rel in ["spyscalp.py", "spyscalp.ico", "logo.png", "spyscalp.wxs", "ui.wxs"] {
            self.touch(rel);
        }
    }

    /// A shell script that appends its name and arguments to `calls.log` and exits with `code`.
    #[cfg(unix)]
    pub fn write_tool(&self, rel_dir: &str, name: &str, code: i32) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let dir = self.path().join(rel_dir);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let script = format!(
            "#!/bin/sh\necho \"{} $*\" >> calls.log\nexit {}\n",
            name, code
        );
        std::fs::write(&path, script).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    pub fn calls_log(&self) -> Vec<String> {
        std::fs::read_to_string(self.path().join("calls.log"))
            .unwrap_or_default()
            .lines()
            .map(|l| l.to_string())
            .collect()
    }
}
