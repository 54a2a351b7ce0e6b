//! Project root, pig scripts and script parameters.

use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};

#[derive(Debug, Clone)]
pub struct Project {
    pub root: PathBuf,
}

impl Project {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn pigscripts_dir(&self) -> PathBuf {
        self.root.join("pigscripts")
    }
}

#[derive(Debug, Clone)]
pub struct Script {
    pub name: String,
    pub path: PathBuf,
}

impl Script {
    /// An existing file path wins; otherwise `name` is looked up as
    /// `pigscripts/<name>.pig` under the project root.
    pub fn resolve(project: &Project, name_or_path: &str) -> Result<Self> {
        let direct = PathBuf::from(name_or_path);
        let path = if direct.is_file() {
            direct
        } else {
            let candidate = project.pigscripts_dir().join(format!("{name_or_path}.pig"));
            if !candidate.is_file() {
                bail!(
                    "no such pigscript: neither {} nor {} exists",
                    direct.display(),
                    candidate.display()
                );
            }
            candidate
        };
        let path = fs::canonicalize(&path).unwrap_or(path);
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(name_or_path)
            .to_string();
        Ok(Self { name, path })
    }

    pub fn source(&self) -> Result<String> {
        fs::read_to_string(&self.path)
            .with_context(|| format!("reading pigscript {}", self.path.display()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    pub value: String,
}

pub fn parse_parameter(raw: &str) -> Result<Parameter> {
    match raw.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => Ok(Parameter {
            name: name.trim().to_string(),
            value: value.to_string(),
        }),
        _ => bail!("invalid parameter {raw:?}, expected NAME=VALUE"),
    }
}

pub fn load_param_file(path: &Path) -> Result<Vec<Parameter>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading parameter file {}", path.display()))?;
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(parse_parameter)
        .collect()
}

/// Parameters from a file first, then command-line ones; a later name replaces
/// an earlier one in place.
pub fn merge_parameters(from_file: Vec<Parameter>, from_cli: Vec<Parameter>) -> Vec<Parameter> {
    let mut merged: Vec<Parameter> = Vec::new();
    for p in from_file.into_iter().chain(from_cli) {
        match merged.iter_mut().find(|m| m.name == p.name) {
            Some(existing) => existing.value = p.value,
            None => merged.push(p),
        }
    }
    merged
}

pub fn ensure_gitignored(project: &Project, entry: &str) -> Result<()> {
    let path = project.root.join(".gitignore");
    if !path.exists() {
        return Ok(());
    }
    let current = fs::read_to_string(&path)?;
    if current.lines().any(|l| l.trim() == entry) {
        return Ok(());
    }
    let mut f = OpenOptions::new().append(true).open(&path)?;
    if !current.is_empty() && !current.ends_with('\n') {
        f.write_all(b"\n")?;
    }
    writeln!(f, "{entry}")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_parameter() {
        let p = parse_parameter("INPUT=s3://bucket/a=b").unwrap();
        assert_eq!(p.name, "INPUT");
        assert_eq!(p.value, "s3://bucket/a=b");
        assert!(parse_parameter("novalue").is_err());
        assert!(parse_parameter("=x").is_err());
    }

    #[test]
    fn test_cli_parameters_override_file() {
        let file = vec![parse_parameter("A=1").unwrap(), parse_parameter("B=2").unwrap()];
        let cli = vec![parse_parameter("B=3").unwrap(), parse_parameter("C=4").unwrap()];
        let merged = merge_parameters(file, cli);
        let flat: Vec<_> = merged.iter().map(|p| format!("{}={}", p.name, p.value)).collect();
        assert_eq!(flat, vec!["A=1", "B=3", "C=4"]);
    }

    #[test]
    fn test_load_param_file_skips_comments() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("params");
        fs::write(&path, "# header\nA=1\n\nB = two\n")?;
        let params = load_param_file(&path)?;
        assert_eq!(params.len(), 2);
        assert_eq!(params[1].name, "B");
        assert_eq!(params[1].value, " two");
        Ok(())
    }

    #[test]
    fn test_resolve_by_name() -> Result<()> {
        let dir = tempdir()?;
        let project = Project::new(dir.path());
        fs::create_dir_all(project.pigscripts_dir())?;
        fs::write(project.pigscripts_dir().join("songs.pig"), "a = LOAD 'x';\n")?;
        let script = Script::resolve(&project, "songs")?;
        assert_eq!(script.name, "songs");
        assert!(script.source()?.contains("LOAD"));
        assert!(Script::resolve(&project, "missing").is_err());
        Ok(())
    }

    #[test]
    fn test_ensure_gitignored_appends_once() -> Result<()> {
        let dir = tempdir()?;
        let project = Project::new(dir.path());
        fs::write(dir.path().join(".gitignore"), "target")?;
        ensure_gitignored(&project, ".pigpen-local")?;
        ensure_gitignored(&project, ".pigpen-local")?;
        let text = fs::read_to_string(dir.path().join(".gitignore"))?;
        assert_eq!(text, "target\n.pigpen-local\n");
        Ok(())
    }

    #[test]
    fn test_ensure_gitignored_without_file_is_noop() -> Result<()> {
        let dir = tempdir()?;
        ensure_gitignored(&Project::new(dir.path()), ".pigpen-local")?;
        assert!(!dir.path().join(".gitignore").exists());
        Ok(())
    }
}
