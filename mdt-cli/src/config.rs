use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};

use mdt_lib::session::Session;
use mdt_lib::worktree::WorkTree;

pub const DEFAULT_URL: &str = "moodle.uni-ulm.de";
pub const DEFAULT_SERVICE: &str = "moodle_mobile_app";
pub const DEFAULT_WORKERS: usize = 10;

/// Contents of a `config.toml`, global or local. Every key is optional; a
/// local file overrides the global one key by key.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ConfigFile {
    pub url: Option<String>,
    pub service: Option<String>,
    pub token: Option<String>,
    pub user_id: Option<i64>,
    pub user_name: Option<String>,
    pub workers: Option<usize>,
    pub course_ids: Option<Vec<i64>>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> anyhow::Result<Option<Self>> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        };
        toml::from_str(&content)
            .map(Some)
            .with_context(|| format!("parsing {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).with_context(|| format!("writing {}", path.display()))
    }

    /// `self` with every key set in `other` replaced.
    pub fn overlay(self, other: ConfigFile) -> Self {
        Self {
            url: other.url.or(self.url),
            service: other.service.or(self.service),
            token: other.token.or(self.token),
            user_id: other.user_id.or(self.user_id),
            user_name: other.user_name.or(self.user_name),
            workers: other.workers.or(self.workers),
            course_ids: other.course_ids.or(self.course_ids),
        }
    }
}

/// Values given on the command line or through the environment.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct Overrides {
    /// Moodle host, e.g. moodle.example.org
    #[arg(long = "url", env = "MDT_URL", global = true)]
    pub url: Option<String>,

    /// Web service token
    #[arg(long = "token", env = "MDT_TOKEN", hide_env_values = true, global = true)]
    pub token: Option<String>,

    /// Web service name used when requesting a token
    #[arg(long = "service", env = "MDT_SERVICE", global = true)]
    pub service: Option<String>,

    /// Number of parallel requests
    #[arg(short = 'w', long = "workers", env = "MDT_WORKERS", global = true)]
    pub workers: Option<usize>,
}

/// Global config locations, most specific first.
pub fn global_config_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(xdg) = env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        candidates.push(PathBuf::from(xdg).join("mdt").join("config.toml"));
    }
    if let Some(home) = env::var_os("HOME").filter(|v| !v.is_empty()) {
        let home = PathBuf::from(home);
        candidates.push(home.join(".config").join("mdt").join("config.toml"));
        candidates.push(home.join(".mdt.toml"));
    }
    candidates
}

/// The global file to write: the first existing candidate, else the first
/// whose directory exists or can be created inside an existing one.
pub fn global_config_target(candidates: &[PathBuf]) -> Option<PathBuf> {
    candidates
        .iter()
        .find(|path| path.is_file())
        .or_else(|| {
            candidates.iter().find(|path| {
                path.parent()
                    .and_then(Path::parent)
                    .is_some_and(Path::is_dir)
            })
        })
        .cloned()
}

fn load_global(candidates: &[PathBuf]) -> anyhow::Result<ConfigFile> {
    for path in candidates {
        if let Some(file) = ConfigFile::load(path)? {
            tracing::debug!(path = %path.display(), "loaded global config");
            return Ok(file);
        }
    }
    Ok(ConfigFile::default())
}

/// Resolved configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub url: String,
    pub service: String,
    pub token: Option<String>,
    pub user_id: Option<i64>,
    pub user_name: Option<String>,
    pub workers: usize,
    pub course_ids: Vec<i64>,
}

impl Config {
    /// Resolves from: command line / environment > config file > default.
    pub fn resolve(overrides: &Overrides, file: ConfigFile) -> Self {
        Self {
            url: overrides
                .url
                .clone()
                .or(file.url)
                .unwrap_or_else(|| DEFAULT_URL.to_string()),
            service: overrides
                .service
                .clone()
                .or(file.service)
                .unwrap_or_else(|| DEFAULT_SERVICE.to_string()),
            token: overrides.token.clone().or(file.token),
            user_id: file.user_id,
            user_name: file.user_name,
            workers: overrides
                .workers
                .or(file.workers)
                .filter(|w| *w > 0)
                .unwrap_or(DEFAULT_WORKERS),
            course_ids: file.course_ids.unwrap_or_default(),
        }
    }

    /// Global config overlaid with the work tree's local config, if any.
    pub fn load(overrides: &Overrides, tree: Option<&WorkTree>) -> anyhow::Result<Self> {
        let mut file = load_global(&global_config_candidates())?;
        if let Some(tree) = tree {
            if let Some(local) = ConfigFile::load(&tree.config_path())? {
                file = file.overlay(local);
            }
        }
        Ok(Self::resolve(overrides, file))
    }

    pub fn token(&self) -> anyhow::Result<&str> {
        self.token
            .as_deref()
            .ok_or_else(|| anyhow!("no token configured, run `mdt auth` first"))
    }

    pub fn user_id(&self) -> anyhow::Result<i64> {
        self.user_id
            .ok_or_else(|| anyhow!("no user id configured, run `mdt auth` first"))
    }

    pub fn session(&self) -> anyhow::Result<Session> {
        Ok(Session::new(&self.url, self.token()?))
    }
}

/// Shows only the first characters of a token.
fn mask(token: &str) -> String {
    let shown: String = token.chars().take(4).collect();
    format!("{shown}…")
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "url        = {}", self.url)?;
        writeln!(f, "service    = {}", self.service)?;
        match &self.token {
            Some(token) => writeln!(f, "token      = {}", mask(token))?,
            None => writeln!(f, "token      = (none)")?,
        }
        match (&self.user_name, self.user_id) {
            (Some(name), Some(id)) => writeln!(f, "user       = {name} ({id})")?,
            (None, Some(id)) => writeln!(f, "user       = {id}")?,
            _ => writeln!(f, "user       = (none)")?,
        }
        writeln!(f, "workers    = {}", self.workers)?;
        let courses: Vec<String> = self.course_ids.iter().map(i64::to_string).collect();
        write!(f, "course_ids = [{}]", courses.join(", "))
    }
}

/// Config files in effect, global first.
pub fn config_files(candidates: &[PathBuf], tree: Option<&WorkTree>) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = candidates
        .iter()
        .find(|path| path.is_file())
        .cloned()
        .into_iter()
        .collect();
    if let Some(local) = tree.map(WorkTree::config_path).filter(|path| path.is_file()) {
        files.push(local);
    }
    files
}

/// Prints the resolved configuration and the files it was read from.
pub fn run_config(overrides: &Overrides, tree: Option<&WorkTree>) -> anyhow::Result<()> {
    let config = Config::load(overrides, tree)?;
    println!("{config}");
    let files = config_files(&global_config_candidates(), tree);
    if files.is_empty() {
        println!("\nno config files, using defaults");
    } else {
        println!("\nread from:");
        for path in files {
            println!("  {}", path.display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::resolve(&Overrides::default(), ConfigFile::default());
        assert_eq!(config.url, DEFAULT_URL);
        assert_eq!(config.service, DEFAULT_SERVICE);
        assert_eq!(config.workers, DEFAULT_WORKERS);
        assert!(config.token().is_err());
        assert!(config.user_id().unwrap_err().to_string().contains("mdt auth"));
    }

    #[test]
    fn test_precedence() {
        let global = ConfigFile {
            url: Some("global.example.org".into()),
            token: Some("global-token".into()),
            user_id: Some(7),
            workers: Some(4),
            ..Default::default()
        };
        let local = ConfigFile {
            token: Some("local-token".into()),
            course_ids: Some(vec![5]),
            ..Default::default()
        };
        let overrides = Overrides {
            workers: Some(2),
            ..Default::default()
        };
        let config = Config::resolve(&overrides, global.overlay(local));
        assert_eq!(config.url, "global.example.org");
        assert_eq!(config.token().unwrap(), "local-token");
        assert_eq!(config.user_id().unwrap(), 7);
        assert_eq!(config.workers, 2);
        assert_eq!(config.course_ids, vec![5]);
    }

    #[test]
    fn test_zero_workers_falls_back_to_default() {
        let overrides = Overrides {
            workers: Some(0),
            ..Default::default()
        };
        let config = Config::resolve(&overrides, ConfigFile::default());
        assert_eq!(config.workers, DEFAULT_WORKERS);
    }

    #[test]
    fn test_file_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("mdt").join("config.toml");
        assert_eq!(ConfigFile::load(&path).unwrap(), None);

        let file = ConfigFile {
            url: Some("moodle.example.org".into()),
            user_id: Some(3),
            course_ids: Some(vec![1, 2]),
            ..Default::default()
        };
        file.save(&path).unwrap();
        assert_eq!(ConfigFile::load(&path).unwrap(), Some(file));
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        fs::write(&path, "workers = \"many\"").unwrap();
        assert!(ConfigFile::load(&path).is_err());
    }

    #[test]
    fn test_display_masks_token() {
        let file = ConfigFile {
            token: Some("0123456789abcdef".into()),
            user_id: Some(7),
            user_name: Some("Ada Lovelace".into()),
            course_ids: Some(vec![5, 9]),
            ..Default::default()
        };
        let shown = Config::resolve(&Overrides::default(), file).to_string();
        assert!(shown.contains("token      = 0123…"));
        assert!(!shown.contains("456789abcdef"));
        assert!(shown.contains("user       = Ada Lovelace (7)"));
        assert!(shown.ends_with("course_ids = [5, 9]"));
    }

    #[test]
    fn test_config_files_in_effect() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("xdg").join("config.toml");
        let dotfile = tmp.path().join(".mdt.toml");
        let candidates = vec![missing, dotfile.clone()];
        let tree = WorkTree::init(&tmp.path().join("course")).unwrap();
        assert!(config_files(&candidates, Some(&tree)).is_empty());

        fs::write(&dotfile, "").unwrap();
        ConfigFile::default().save(&tree.config_path()).unwrap();
        assert_eq!(
            config_files(&candidates, Some(&tree)),
            vec![dotfile.clone(), tree.config_path()]
        );
        assert_eq!(config_files(&candidates, None), vec![dotfile]);
    }

    #[test]
    fn test_global_target() {
        let tmp = tempfile::tempdir().unwrap();
        let xdg = tmp.path().join("xdg").join("mdt").join("config.toml");
        let home_config = tmp.path().join(".config").join("mdt").join("config.toml");
        let dotfile = tmp.path().join(".mdt.toml");
        let candidates = vec![xdg, home_config.clone(), dotfile.clone()];

        assert_eq!(global_config_target(&candidates), Some(dotfile.clone()));

        fs::create_dir_all(tmp.path().join(".config")).unwrap();
        assert_eq!(global_config_target(&candidates), Some(home_config));

        fs::write(&dotfile, "").unwrap();
        assert_eq!(global_config_target(&candidates), Some(dotfile));
    }
}
