//! Per-component install markers.
//!
//! Each component owns `<install root>/<component>/install-date.txt`, holding
//! the Unix time of its last successful install as decimal text.

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use tempfile::NamedTempFile;
use tracing::debug;

use super::fetch::Fetcher;
use crate::error::SandboxError;

const MARKER_FILE: &str = "install-date.txt";

#[derive(Debug, Clone)]
pub struct InstallLedger {
    root: PathBuf,
}

impl InstallLedger {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn marker_path(&self, component_id: &str) -> PathBuf {
        self.root.join(component_id).join(MARKER_FILE)
    }

    /// Records "now" as the install time of `component_id`.
    pub fn record(&self, component_id: &str) -> Result<i64, SandboxError> {
        let now = chrono::Utc::now().timestamp();
        self.record_at(component_id, now)?;
        Ok(now)
    }

    /// The marker is written to a sibling temp file and renamed over the old
    /// one, so readers see either the previous or the new timestamp.
    pub fn record_at(&self, component_id: &str, installed_at: i64) -> Result<(), SandboxError> {
        let marker = self.marker_path(component_id);
        let dir = marker.parent().unwrap_or(&self.root);
        fs::create_dir_all(dir)
            .map_err(|e| SandboxError::io(format!("creating {}", dir.display()), e))?;

        let mut tmp = NamedTempFile::new_in(dir)
            .map_err(|e| SandboxError::io(format!("creating temp marker in {}", dir.display()), e))?;
        writeln!(tmp, "{installed_at}")
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| SandboxError::io("writing install marker", e))?;
        tmp.persist(&marker)
            .map_err(|e| SandboxError::io(format!("replacing {}", marker.display()), e.error))?;
        debug!(component = component_id, installed_at, "recorded install");
        Ok(())
    }

    pub fn lookup(&self, component_id: &str) -> Option<i64> {
        read_marker(&self.marker_path(component_id))
    }

    pub fn needs_install(&self, component_id: &str) -> bool {
        self.lookup(component_id).is_none()
    }

    /// True iff a record exists and `remote_last_modified` is strictly newer.
    /// No record is not an update; callers check `needs_install` for that.
    pub fn is_stale(&self, component_id: &str, remote_last_modified: Option<i64>) -> bool {
        match (self.lookup(component_id), remote_last_modified) {
            (Some(installed_at), Some(remote)) => remote > installed_at,
            _ => false,
        }
    }

    pub async fn needs_update(
        &self,
        component_id: &str,
        archive_url: &str,
        fetcher: &Fetcher,
    ) -> Result<bool, SandboxError> {
        if self.needs_install(component_id) {
            return Ok(false);
        }
        let meta = fetcher.remote_meta(archive_url).await?;
        let stale = self.is_stale(component_id, meta.last_modified);
        debug!(component = component_id, remote = ?meta.last_modified, stale, "update check");
        Ok(stale)
    }
}

fn read_marker(path: &Path) -> Option<i64> {
    let text = fs::read_to_string(path).ok()?;
    text.trim().parse::<i64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_record_then_lookup() {
        let dir = tempdir().unwrap();
        let ledger = InstallLedger::new(dir.path());
        assert!(ledger.needs_install("pig"));
        let ts = ledger.record("pig").unwrap();
        assert_eq!(ledger.lookup("pig"), Some(ts));
        assert!(!ledger.needs_install("pig"));
        let text = fs::read_to_string(ledger.marker_path("pig")).unwrap();
        assert_eq!(text, format!("{ts}\n"));
    }

    #[test]
    fn test_record_overwrites_previous() {
        let dir = tempdir().unwrap();
        let ledger = InstallLedger::new(dir.path());
        ledger.record_at("jython", 100).unwrap();
        ledger.record_at("jython", 200).unwrap();
        assert_eq!(ledger.lookup("jython"), Some(200));
        let leftovers: Vec<_> = fs::read_dir(dir.path().join("jython")).unwrap().collect();
        assert_eq!(leftovers.len(), 1, "temp marker files must not linger");
    }

    #[test]
    fn test_is_stale_strictly_newer() {
        let dir = tempdir().unwrap();
        let ledger = InstallLedger::new(dir.path());
        ledger.record_at("jython", 1_000).unwrap();
        assert!(ledger.is_stale("jython", Some(1_001)));
        assert!(!ledger.is_stale("jython", Some(1_000)));
        assert!(!ledger.is_stale("jython", Some(999)));
        assert!(!ledger.is_stale("jython", None));
    }

    #[test]
    fn test_is_stale_without_record_is_false() {
        let dir = tempdir().unwrap();
        let ledger = InstallLedger::new(dir.path());
        assert!(!ledger.is_stale("jython", Some(i64::MAX)));
    }

    #[tokio::test]
    async fn test_needs_update_without_record_skips_network() {
        let dir = tempdir().unwrap();
        let ledger = InstallLedger::new(dir.path());
        let fetcher = Fetcher::new(std::time::Duration::from_secs(1)).unwrap();
        // Port 9 (discard) is never reached: no record short-circuits first.
        let res = ledger.needs_update("jython", "http://127.0.0.1:9/jython.jar", &fetcher).await;
        assert!(matches!(res, Ok(false)));
    }

    #[test]
    fn test_garbage_marker_reads_as_absent() {
        let dir = tempdir().unwrap();
        let ledger = InstallLedger::new(dir.path());
        fs::create_dir_all(dir.path().join("pig")).unwrap();
        fs::write(ledger.marker_path("pig"), "not a number").unwrap();
        assert_eq!(ledger.lookup("pig"), None);
    }
}
