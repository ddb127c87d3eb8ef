use std::{
    env, fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct Settings {
    pub shortname: String,
    pub name: String,
    pub database_url: String,
    pub log_level: String,
    pub modules: Vec<String>,
    /// The file these settings were read from, whether or not it existed.
    pub config_path: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            shortname: "waypoint".into(),
            name: "Waypoint".into(),
            database_url: "sqlite://./data/waypoint.db".into(),
            log_level: "info".into(),
            modules: vec!["base".into()],
            config_path: PathBuf::from("waypoint.toml"),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileSettings {
    shortname: Option<String>,
    name: Option<String>,
    database_url: Option<String>,
    log_level: Option<String>,
    modules: Option<Vec<String>>,
}

impl Settings {
    /// `<shortname>.flow`, the routing table of the global context.
    pub fn flow_file(&self) -> PathBuf {
        PathBuf::from(format!("{}.flow", self.shortname.to_lowercase()))
    }

    pub fn module_flow_file(module: &str) -> PathBuf {
        Path::new("modules").join(format!("{module}.flow"))
    }

    /// Where routing files are looked for: next to the executable, then next
    /// to the configuration file.
    pub fn flow_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = Vec::new();
        if let Some(install_dir) = env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
        {
            dirs.push(install_dir);
        }
        dirs.push(self.config_dir());
        dirs
    }

    pub fn config_dir(&self) -> PathBuf {
        match self.config_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    /// The about text lives beside the configuration file.
    pub fn about_file(&self) -> PathBuf {
        self.config_path.with_extension("txt")
    }
}

/// Defaults, overlaid with the TOML file at `path` (if present), overlaid
/// with `WAYPOINT__*` environment variables.
pub fn load_settings(path: &Path) -> anyhow::Result<Settings> {
    let mut settings = Settings {
        config_path: path.to_path_buf(),
        ..Settings::default()
    };

    match fs::read_to_string(path) {
        Ok(raw) => {
            let file_cfg: FileSettings = toml::from_str(&raw)
                .with_context(|| format!("malformed configuration file '{}'", path.display()))?;
            apply_file(&mut settings, file_cfg);
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no configuration file, using defaults");
        }
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read configuration file '{}'", path.display()));
        }
    }

    apply_env(&mut settings, |key| env::var(key).ok());
    Ok(settings)
}

fn apply_file(settings: &mut Settings, file_cfg: FileSettings) {
    if let Some(v) = file_cfg.shortname {
        settings.shortname = v;
    }
    if let Some(v) = file_cfg.name {
        settings.name = v;
    }
    if let Some(v) = file_cfg.database_url {
        settings.database_url = v;
    }
    if let Some(v) = file_cfg.log_level {
        settings.log_level = v;
    }
    if let Some(v) = file_cfg.modules {
        settings.modules = v;
    }
}

fn apply_env(settings: &mut Settings, var: impl Fn(&str) -> Option<String>) {
    if let Some(v) = var("WAYPOINT__SHORTNAME") {
        settings.shortname = v;
    }
    if let Some(v) = var("WAYPOINT__NAME") {
        settings.name = v;
    }
    if let Some(v) = var("WAYPOINT__DATABASE_URL") {
        settings.database_url = v;
    }
    if let Some(v) = var("WAYPOINT__LOG_LEVEL") {
        settings.log_level = v;
    }
    if let Some(v) = var("WAYPOINT__MODULES") {
        settings.modules = v
            .split(',')
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .collect();
    }
}

/// Accepts plain file paths as well as `sqlite:` urls.
pub fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite:") || raw_database_url.contains("://") {
        return raw_database_url.to_string();
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
