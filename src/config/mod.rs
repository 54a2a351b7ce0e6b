//! Layered settings: built-in defaults, then `pigpenrc`, then the environment.

use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};

use directories::ProjectDirs;
use tracing::warn;

pub const DEFAULT_PIG_DISTRO_URL: &str = "https://s3.amazonaws.com/mortar-public-artifacts/pig.tgz";

const RECOGNISED: &[&str] = &["AWS_ACCESS_KEY", "AWS_SECRET_KEY", "JAVA_HOME", "PIG_DISTRO_URL", "REQUEST_TIMEOUT"];

#[derive(Debug, Clone)]
pub struct Config {
    values: HashMap<String, String>,
    // Tests build configs that must not see the caller's environment.
    live_env: bool,
    pub rc_path: PathBuf,
}

impl Config {
    pub fn load() -> Self {
        let rc_path = rc_path();
        let mut values = default_map();
        if let Err(e) = merge_rc_file(&rc_path, &mut values) {
            warn!(path = %rc_path.display(), error = %e, "ignoring unreadable pigpenrc");
        }
        values.extend(env::vars().filter(|(k, _)| is_config_key(k)));
        Self { values, live_env: true, rc_path }
    }

    /// Builds a config from defaults plus `overrides`, ignoring the rc file
    /// and the process environment.
    pub fn from_map<I, K, V>(overrides: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut values = default_map();
        values.extend(overrides.into_iter().map(|(k, v)| (k.into(), v.into())));
        Self { values, live_env: false, rc_path: rc_path() }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let non_empty = |v: &String| !v.is_empty();
        let from_env = if self.live_env { env::var(key).ok().filter(non_empty) } else { None };
        from_env.or_else(|| self.values.get(key).cloned().filter(non_empty))
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|v| v.parse::<u64>().ok())
    }

    pub fn get_path(&self, key: &str) -> Option<PathBuf> {
        self.get(key).map(PathBuf::from)
    }

    pub fn pig_distro_url(&self) -> String {
        self.get("PIG_DISTRO_URL")
            .unwrap_or_else(|| DEFAULT_PIG_DISTRO_URL.to_string())
    }

    /// The override flag counts as set when present at all, matching how the
    /// hosted service treats it.
    pub fn ignore_aws_keys(&self) -> bool {
        self.get("PIGPEN_IGNORE_AWS_KEYS").is_some()
    }
}

fn is_config_key(k: &str) -> bool {
    RECOGNISED.contains(&k) || k.starts_with("PIGPEN_")
}

/// `KEY=VALUE` lines; `#` starts a comment line. A missing file is fine.
fn merge_rc_file(path: &Path, values: &mut HashMap<String, String>) -> std::io::Result<()> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    let pairs = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter_map(|l| l.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()));
    values.extend(pairs);
    Ok(())
}

fn rc_path() -> PathBuf {
    ProjectDirs::from("", "", "pigpen")
        .map(|d| d.config_dir().join("pigpenrc"))
        .unwrap_or_else(|| PathBuf::from(".pigpenrc"))
}

fn default_map() -> HashMap<String, String> {
    HashMap::from([
        ("REQUEST_TIMEOUT".to_string(), "60".to_string()),
        ("PIGPEN_PREVIEW_PORT".to_string(), "4567".to_string()),
        ("PIGPEN_LOG".to_string(), "warn".to_string()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_map_overrides_defaults() {
        let cfg = Config::from_map([("REQUEST_TIMEOUT", "5")]);
        assert_eq!(cfg.get_u64("REQUEST_TIMEOUT"), Some(5));
        assert_eq!(cfg.get_u64("PIGPEN_PREVIEW_PORT"), Some(4567));
    }

    #[test]
    fn test_empty_values_are_unset() {
        let cfg = Config::from_map([("AWS_ACCESS_KEY", "")]);
        assert_eq!(cfg.get("AWS_ACCESS_KEY"), None);
    }

    #[test]
    fn test_pig_distro_url_default_and_override() {
        let cfg = Config::from_map(Vec::<(String, String)>::new());
        assert_eq!(cfg.pig_distro_url(), DEFAULT_PIG_DISTRO_URL);
        let cfg = Config::from_map([("PIG_DISTRO_URL", "http://mirror/pig.tgz")]);
        assert_eq!(cfg.pig_distro_url(), "http://mirror/pig.tgz");
    }

    #[test]
    fn test_rc_file_lines() {
        let dir = tempfile::tempdir().unwrap();
        let rc = dir.path().join("pigpenrc");
        fs::write(&rc, "# comment\nAWS_ACCESS_KEY = AK\n\nnot a pair\nPIGPEN_PREVIEW_PORT=9000\n").unwrap();
        let mut values = default_map();
        merge_rc_file(&rc, &mut values).unwrap();
        assert_eq!(values["AWS_ACCESS_KEY"], "AK");
        assert_eq!(values["PIGPEN_PREVIEW_PORT"], "9000");
        assert!(merge_rc_file(&dir.path().join("absent"), &mut values).is_ok());
    }

    #[test]
    fn test_is_config_key() {
        assert!(is_config_key("PIGPEN_IGNORE_AWS_KEYS"));
        assert!(is_config_key("JAVA_HOME"));
        assert!(!is_config_key("HOME"));
    }
}
