use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::paths::{expand_tilde, is_contained_relative};

pub const PROJECT_CONFIG_FILENAME: &str = "spyscalp-build.toml";

// --- On-disk shape ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub menu: MenuConfig,
    pub compile: CompileConfig,
    pub installer: InstallerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MenuConfig {
    pub title: String,
    pub invalid_choice_delay_ms: u64,
}

impl Default for MenuConfig {
    fn default() -> Self {
        Self {
            title: "SPYSCALP Build Menu".to_string(),
            invalid_choice_delay_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleMode {
    Attach,
    #[default]
    Force,
    Disable,
    Hide,
}

impl fmt::Display for ConsoleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConsoleMode::Attach => "attach",
            ConsoleMode::Force => "force",
            ConsoleMode::Disable => "disable",
            ConsoleMode::Hide => "hide",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompileConfig {
    pub program: String,
    pub program_args: Vec<String>,
    pub entry_point: String,
    pub onefile: bool,
    pub console: ConsoleMode,
    pub include_packages: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    /// `source` or `source=dest`.
    pub data_files: Vec<String>,
    pub output_dir: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    pub extra_args: Vec<String>,
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self {
            program: "python".to_string(),
            program_args: vec!["-m".to_string(), "nuitka".to_string()],
            entry_point: "spyscalp.py".to_string(),
            onefile: true,
            console: ConsoleMode::Force,
            include_packages: [
                "textual",
                "rich",
                "tastytrade",
                "pandas_market_calendars",
                "tzdata",
            ]
            .iter()
            .map(|p| p.to_string())
            .collect(),
            icon: Some("spyscalp.ico".to_string()),
            data_files: vec!["logo.png".to_string(), "spyscalp.ico".to_string()],
            output_dir: "build".to_string(),
            artifact: None,
            extra_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InstallerConfig {
    pub toolset_dir: String,
    pub compiler: String,
    pub linker: String,
    pub sources: Vec<String>,
    pub object_extension: String,
    pub extensions: Vec<String>,
    pub compile_args: Vec<String>,
    pub link_args: Vec<String>,
    pub product: String,
    pub version: String,
    /// Must contain `{version}`; `{product}` is optional.
    pub package_template: String,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            toolset_dir: "wix".to_string(),
            compiler: "candle".to_string(),
            linker: "light".to_string(),
            sources: vec!["spyscalp.wxs".to_string(), "ui.wxs".to_string()],
            object_extension: "wixobj".to_string(),
            extensions: vec!["WixUIExtension".to_string(), "WixUtilExtension".to_string()],
            compile_args: Vec::new(),
            link_args: Vec::new(),
            product: "SpyScalp".to_string(),
            version: "0.1.6".to_string(),
            package_template: "{product}-{version}.msi".to_string(),
        }
    }
}

// --- Resolved shape ---

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "path")]
pub enum ConfigSource {
    File(PathBuf),
    Defaults,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigSource::File(path) => write!(f, "{}", path.display()),
            ConfigSource::Defaults => f.write_str("(defaults)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub workdir: PathBuf,
    pub source: ConfigSource,
    pub effective: Config,
    pub menu: MenuSettings,
    pub compile: CompileSpec,
    pub installer: InstallerSpec,
}

#[derive(Debug, Clone)]
pub struct MenuSettings {
    pub title: String,
    pub invalid_choice_delay: Duration,
}

/// Everything the native compile needs. Paths are as configured (relative to the workdir).
#[derive(Debug, Clone)]
pub struct CompileSpec {
    pub program: String,
    pub program_args: Vec<String>,
    pub entry_point: PathBuf,
    pub onefile: bool,
    pub console: ConsoleMode,
    pub include_packages: Vec<String>,
    pub icon: Option<PathBuf>,
    pub data_files: Vec<DataFile>,
    pub output_dir: PathBuf,
    pub artifact_name: String,
    pub extra_args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataFile {
    pub source: PathBuf,
    pub dest: String,
}

#[derive(Debug, Clone)]
pub struct InstallerSpec {
    pub toolset_dir: PathBuf,
    pub compiler: String,
    pub linker: String,
    pub sources: Vec<PathBuf>,
    pub object_extension: String,
    pub extensions: Vec<String>,
    pub compile_args: Vec<String>,
    pub link_args: Vec<String>,
    pub product: String,
    pub version: semver::Version,
    pub package_name: String,
}

// --- Locating and loading ---

pub fn user_config_path() -> Result<PathBuf> {
    let proj = directories::ProjectDirs::from("", "", "spyscalp-build")
        .context("could not determine config directory")?;
    Ok(proj.config_dir().join("config.toml"))
}

pub fn locate_config(explicit: Option<&Path>, workdir: &Path) -> Result<ConfigSource> {
    if let Some(path) = explicit {
        let path = crate::paths::resolve_in(workdir, path);
        if !path.is_file() {
            bail!("config not found at {}", path.display());
        }
        return Ok(ConfigSource::File(path));
    }

    let project = workdir.join(PROJECT_CONFIG_FILENAME);
    if project.is_file() {
        return Ok(ConfigSource::File(project));
    }

    match user_config_path() {
        Ok(user) if user.is_file() => return Ok(ConfigSource::File(user)),
        Ok(_) => {}
        Err(e) => log::debug!("skipping user config: {:#}", e),
    }

    Ok(ConfigSource::Defaults)
}

pub fn load(explicit: Option<&Path>, workdir: &Path) -> Result<ResolvedConfig> {
    let source = locate_config(explicit, workdir)?;
    let raw = match &source {
        ConfigSource::File(path) => {
            log::info!("loading config from {}", path.display());
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config from {}", path.display()))?;
            parse_config(&contents)
                .with_context(|| format!("invalid config at {}", path.display()))?
        }
        ConfigSource::Defaults => {
            log::info!("no config file found, using built-in defaults");
            Config::default()
        }
    };
    resolve(raw, workdir, source)
}

pub fn parse_config(contents: &str) -> Result<Config> {
    let raw: Config = toml::from_str(contents).context("failed to parse config TOML")?;
    Ok(raw)
}

pub fn resolve(raw: Config, workdir: &Path, source: ConfigSource) -> Result<ResolvedConfig> {
    let menu = MenuSettings {
        title: raw.menu.title.clone(),
        invalid_choice_delay: Duration::from_millis(raw.menu.invalid_choice_delay_ms),
    };
    let compile = resolve_compile(&raw.compile)?;
    let installer = resolve_installer(&raw.installer)?;

    let result = ResolvedConfig {
        workdir: workdir.to_path_buf(),
        source,
        effective: raw,
        menu,
        compile,
        installer,
    };

    debug_assert!(
        is_contained_relative(&result.compile.output_dir),
        "output_dir must stay inside the workdir"
    );

    Ok(result)
}

fn resolve_compile(raw: &CompileConfig) -> Result<CompileSpec> {
    if raw.program.trim().is_empty() {
        bail!("compile.program must not be empty");
    }
    if raw.entry_point.trim().is_empty() {
        bail!("compile.entry_point must not be empty");
    }

    // `clean` deletes the tilde-expanded form, so `~` is never a project subdirectory.
    let output_dir = expand_tilde(&raw.output_dir);
    if raw.output_dir.starts_with('~') || !is_contained_relative(&output_dir) {
        bail!(
            "compile.output_dir must be a relative subdirectory of the project, got {:?}",
            raw.output_dir
        );
    }

    for package in &raw.include_packages {
        if package.is_empty() || package.contains(char::is_whitespace) {
            bail!("invalid package name in compile.include_packages: {:?}", package);
        }
    }

    let entry_point = expand_tilde(&raw.entry_point);
    let data_files = raw
        .data_files
        .iter()
        .map(|spec| parse_data_file(spec))
        .collect::<Result<Vec<_>>>()?;

    let artifact_name = match &raw.artifact {
        Some(name) if !name.trim().is_empty() => name.clone(),
        Some(_) => bail!("compile.artifact must not be empty"),
        None => {
            let stem = entry_point
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            if stem.is_empty() {
                bail!("cannot derive artifact name from {:?}", raw.entry_point);
            }
            format!("{}.exe", stem)
        }
    };

    Ok(CompileSpec {
        program: raw.program.clone(),
        program_args: raw.program_args.clone(),
        entry_point,
        onefile: raw.onefile,
        console: raw.console,
        include_packages: raw.include_packages.clone(),
        icon: raw.icon.as_deref().map(expand_tilde),
        data_files,
        output_dir,
        artifact_name,
        extra_args: raw.extra_args.clone(),
    })
}

fn parse_data_file(spec: &str) -> Result<DataFile> {
    let (source, dest) = match spec.split_once('=') {
        Some((source, dest)) => (source.trim(), dest.trim().to_string()),
        None => {
            let source = spec.trim();
            let dest = Path::new(source)
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            (source, dest)
        }
    };
    if source.is_empty() || dest.is_empty() {
        bail!(
            "invalid data file {:?}\n  hint: use \"path\" or \"path=dest-in-bundle\"",
            spec
        );
    }
    Ok(DataFile {
        source: expand_tilde(source),
        dest,
    })
}

fn resolve_installer(raw: &InstallerConfig) -> Result<InstallerSpec> {
    if raw.compiler.trim().is_empty() || raw.linker.trim().is_empty() {
        bail!("installer.compiler and installer.linker must not be empty");
    }
    if raw.product.trim().is_empty() {
        bail!("installer.product must not be empty");
    }
    if raw.object_extension.trim().is_empty() {
        bail!("installer.object_extension must not be empty");
    }
    if raw.sources.is_empty() {
        bail!("installer.sources must list at least one source file");
    }
    if !raw.package_template.contains("{version}") {
        bail!("installer.package_template must contain {{version}}");
    }

    let version = semver::Version::parse(&raw.version)
        .with_context(|| format!("installer.version {:?} is not a semantic version", raw.version))?;

    let mut stems = HashSet::new();
    let mut sources = Vec::new();
    for source in &raw.sources {
        let path = expand_tilde(source);
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        if stem.is_empty() {
            bail!("installer source has no file name: {:?}", source);
        }
        if !stems.insert(stem.clone()) {
            bail!("duplicate installer source stem: {}", stem);
        }
        sources.push(path);
    }

    let package_name = raw
        .package_template
        .replace("{product}", &raw.product)
        .replace("{version}", &version.to_string());

    Ok(InstallerSpec {
        toolset_dir: expand_tilde(&raw.toolset_dir),
        compiler: raw.compiler.clone(),
        linker: raw.linker.clone(),
        sources,
        object_extension: raw.object_extension.trim_start_matches('.').to_string(),
        extensions: raw.extensions.clone(),
        compile_args: raw.compile_args.clone(),
        link_args: raw.link_args.clone(),
        product: raw.product.clone(),
        version,
        package_name,
    })
}

pub fn write_config_atomic(path: &Path, config: &Config, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "config already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create config directory {}", parent.display()))?;
    }

    let content = toml::to_string_pretty(config).context("failed to serialize config")?;

    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, &content)
        .with_context(|| format!("failed to write temp config to {}", tmp_path.display()))?;
    std::fs::rename(&tmp_path, path)
        .with_context(|| format!("failed to rename config to {}", path.display()))?;

    Ok(())
}
