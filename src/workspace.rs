//! Process-private scratch directory for key material and HTTP diagnostics
//!
//! A [`Workspace`] is created once at startup. It holds, per content item, the private key,
//! the CSR and the signed certificate (`<uuid>.key`, `<uuid>.csr`, `<uuid>.crt`), plus short
//! lived `gt-http-diag-XXXXXX` files that capture transport diagnostics for one transaction.
//!
//! The directory is created with owner-only permissions and removed when the workspace is
//! dropped, or by [`LiveWorkspaces::remove_all`] on exit paths that skip destructors. Setting
//! `GENETORRENT_DEVMODE` to a directory path switches to a preserved
//! workspace in that directory which is left in place for inspection.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use tempfile::{Builder, NamedTempFile, TempDir};
use tracing::{info, warn};

use crate::error::BootstrapError;

/// Points the workspace at a fixed directory and disables cleanup.
pub const DEV_MODE_ENV: &str = "GENETORRENT_DEVMODE";

const SCRATCH_PREFIX: &str = "gt-http-diag-";
const SCRATCH_RANDOM_LEN: usize = 6;

/// Roots of self-cleaning workspaces that have not been removed yet.
#[derive(Debug, Default)]
pub struct LiveWorkspaces {
    roots: Mutex<Vec<PathBuf>>,
}

impl LiveWorkspaces {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry every [`Workspace`] reports to.
    pub fn global() -> &'static LiveWorkspaces {
        static LIVE: OnceLock<LiveWorkspaces> = OnceLock::new();
        LIVE.get_or_init(LiveWorkspaces::new)
    }

    pub fn track(&self, root: &Path) {
        self.roots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(root.to_path_buf());
    }

    pub fn forget(&self, root: &Path) {
        self.roots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|tracked| tracked != root);
    }

    pub fn contains(&self, root: &Path) -> bool {
        self.roots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|tracked| tracked == root)
    }

    /// Delete every tracked directory tree; returns how many were removed.
    ///
    /// For exit paths such as `process::exit` where `Drop` never runs.
    pub fn remove_all(&self) -> usize {
        let roots = std::mem::take(&mut *self.roots.lock().unwrap_or_else(PoisonError::into_inner));
        let mut removed = 0;
        for root in roots {
            match std::fs::remove_dir_all(&root) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %root.display(), error = %e, "Failed to clean up temp directory")
                }
            }
        }
        removed
    }
}

#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
    // None when preserved; dropping the TempDir removes the tree.
    guard: Option<TempDir>,
}

impl Workspace {
    /// Create the workspace for this process.
    ///
    /// Honors [`DEV_MODE_ENV`]; otherwise a fresh private directory is created under the
    /// system temp directory (`TMPDIR`).
    pub fn create() -> Result<Self, BootstrapError> {
        match std::env::var_os(DEV_MODE_ENV) {
            Some(dir) if !dir.is_empty() => Self::preserved(PathBuf::from(dir)),
            _ => Self::create_in(&std::env::temp_dir()),
        }
    }

    /// Create a private, self-cleaning workspace below `parent`.
    pub fn create_in(parent: &Path) -> Result<Self, BootstrapError> {
        let started = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let prefix = format!("GeneTorrent-{:06}-{}-", std::process::id(), started);

        let dir = Builder::new().prefix(&prefix).tempdir_in(parent).map_err(|e| {
            BootstrapError::Workspace(format!(
                "Failure creating temporary directory under {}: {}.  Set the TMPDIR environment variable to choose another location",
                parent.display(),
                e
            ))
        })?;

        info!(path = %dir.path().display(), "Created temporary workspace");
        LiveWorkspaces::global().track(dir.path());
        Ok(Self {
            root: dir.path().to_path_buf(),
            guard: Some(dir),
        })
    }

    /// Use `dir` as a workspace that survives process exit.
    pub fn preserved(dir: PathBuf) -> Result<Self, BootstrapError> {
        std::fs::create_dir_all(&dir).map_err(|e| {
            BootstrapError::Workspace(format!("Failure creating {}: {}", dir.display(), e))
        })?;
        info!(path = %dir.display(), "[devModeOverride] using preserved workspace");
        Ok(Self {
            root: dir,
            guard: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn is_preserved(&self) -> bool {
        self.guard.is_none()
    }

    pub fn key_path(&self, uuid: &str) -> Result<PathBuf, BootstrapError> {
        self.artifact_path(uuid, "key")
    }

    pub fn csr_path(&self, uuid: &str) -> Result<PathBuf, BootstrapError> {
        self.artifact_path(uuid, "csr")
    }

    pub fn cert_path(&self, uuid: &str) -> Result<PathBuf, BootstrapError> {
        self.artifact_path(uuid, "crt")
    }

    fn artifact_path(&self, uuid: &str, extension: &str) -> Result<PathBuf, BootstrapError> {
        validate_identifier(uuid)?;
        Ok(self.root.join(format!("{}.{}", uuid, extension)))
    }

    /// A uniquely named scratch file, deleted when the returned handle is dropped.
    pub fn scratch_file(&self) -> Result<NamedTempFile, BootstrapError> {
        Builder::new()
            .prefix(SCRATCH_PREFIX)
            .rand_bytes(SCRATCH_RANDOM_LEN)
            .tempfile_in(&self.root)
            .map_err(|e| {
                BootstrapError::io(
                    format!("Failed to create diagnostic scratch file in {}", self.root.display()),
                    e,
                )
            })
    }

    /// Replace `path` with `content`, readable by the owner only.
    ///
    /// The bytes go to a fresh file that is then renamed over the target, so a reader never
    /// sees a half-written artifact and the previous contents are unlinked, not rewritten
    /// in place.
    pub fn write_private(&self, path: &Path, content: &[u8]) -> Result<(), BootstrapError> {
        let mut staged = NamedTempFile::new_in(&self.root).map_err(|e| {
            BootstrapError::io(format!("Failure opening {} for output", path.display()), e)
        })?;
        staged.write_all(content).map_err(|e| {
            BootstrapError::io(format!("Failure writing {}", path.display()), e)
        })?;
        staged.as_file().sync_all().map_err(|e| {
            BootstrapError::io(format!("Failure flushing {}", path.display()), e)
        })?;
        staged.persist(path).map_err(|e| {
            BootstrapError::io(format!("Failure replacing {}", path.display()), e.error)
        })?;
        Ok(())
    }

    /// Remove the workspace now instead of at drop, reporting failures.
    pub fn close(mut self) -> Result<(), BootstrapError> {
        match self.guard.take() {
            Some(dir) => {
                LiveWorkspaces::global().forget(&self.root);
                dir.close().map_err(|e| {
                    BootstrapError::io(format!("Failed to clean up {}", self.root.display()), e)
                })
            }
            None => Ok(()),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Some(dir) = self.guard.take() {
            let root = dir.path().to_path_buf();
            LiveWorkspaces::global().forget(&root);
            if let Err(e) = dir.close() {
                warn!(path = %root.display(), error = %e, "Failed to clean up temp directory");
            }
        }
    }
}

/// Artifact identifiers become file names; keep them to a conservative character set.
fn validate_identifier(uuid: &str) -> Result<(), BootstrapError> {
    let acceptable = !uuid.is_empty()
        && uuid.len() <= 128
        && !uuid.starts_with('.')
        && uuid
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if acceptable {
        Ok(())
    } else {
        Err(BootstrapError::InvalidIdentifier(uuid.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UUID: &str = "4c3f4ad8-36bc-4bcb-9a2e-0d6bb0a1a6de";

    #[test]
    fn test_workspace_is_private_and_removed_on_drop() {
        let parent = tempfile::tempdir().unwrap();
        let workspace = Workspace::create_in(parent.path()).unwrap();
        let root = workspace.path().to_path_buf();
        assert!(root.is_dir());
        assert!(!workspace.is_preserved());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&root).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o700);
        }

        std::fs::write(workspace.cert_path(UUID).unwrap(), b"pem").unwrap();
        assert!(LiveWorkspaces::global().contains(&root));
        drop(workspace);
        assert!(!root.exists());
        assert!(!LiveWorkspaces::global().contains(&root));
    }

    #[test]
    fn test_remove_all_deletes_tracked_trees() {
        let parent = tempfile::tempdir().unwrap();
        let live = LiveWorkspaces::new();
        let first = parent.path().join("first");
        let second = parent.path().join("second");
        let kept = parent.path().join("kept");
        for dir in [&first, &second, &kept] {
            std::fs::create_dir(dir).unwrap();
            std::fs::write(dir.join(format!("{}.key", UUID)), b"private").unwrap();
        }
        live.track(&first);
        live.track(&second);
        live.track(&kept);
        live.forget(&kept);

        assert_eq!(live.remove_all(), 2);
        assert!(!first.exists());
        assert!(!second.exists());
        assert!(kept.join(format!("{}.key", UUID)).exists());
        assert!(!live.contains(&first));
        assert_eq!(live.remove_all(), 0);
    }

    #[test]
    fn test_preserved_and_closed_workspaces_are_not_tracked() {
        let parent = tempfile::tempdir().unwrap();
        let preserved = Workspace::preserved(parent.path().join("devmode")).unwrap();
        assert!(!LiveWorkspaces::global().contains(preserved.path()));

        let workspace = Workspace::create_in(parent.path()).unwrap();
        let root = workspace.path().to_path_buf();
        workspace.close().unwrap();
        assert!(!LiveWorkspaces::global().contains(&root));
    }

    #[test]
    fn test_preserved_workspace_survives() {
        let parent = tempfile::tempdir().unwrap();
        let dir = parent.path().join("devmode");
        let workspace = Workspace::preserved(dir.clone()).unwrap();
        assert!(workspace.is_preserved());
        workspace
            .write_private(&workspace.key_path(UUID).unwrap(), b"secret")
            .unwrap();
        workspace.close().unwrap();
        assert!(dir.join(format!("{}.key", UUID)).exists());
    }

    #[test]
    fn test_artifact_names() {
        let parent = tempfile::tempdir().unwrap();
        let workspace = Workspace::create_in(parent.path()).unwrap();
        let key = workspace.key_path(UUID).unwrap();
        assert_eq!(key.file_name().unwrap(), format!("{}.key", UUID).as_str());
        assert!(workspace.csr_path(UUID).unwrap().ends_with(format!("{}.csr", UUID)));
        assert!(workspace.cert_path(UUID).unwrap().ends_with(format!("{}.crt", UUID)));
    }

    #[test]
    fn test_rejects_path_like_identifiers() {
        let parent = tempfile::tempdir().unwrap();
        let workspace = Workspace::create_in(parent.path()).unwrap();
        for bad in ["", "../escape", "a/b", "..", ".hidden", "semi;colon"] {
            assert!(
                matches!(workspace.key_path(bad), Err(BootstrapError::InvalidIdentifier(_))),
                "accepted {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_write_private_replaces_contents() {
        let parent = tempfile::tempdir().unwrap();
        let workspace = Workspace::create_in(parent.path()).unwrap();
        let path = workspace.key_path(UUID).unwrap();

        workspace.write_private(&path, b"first key").unwrap();
        workspace.write_private(&path, b"second").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"second");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o077, 0);
        }

        // Only the artifact itself is left behind, no staging files.
        let entries: Vec<_> = std::fs::read_dir(workspace.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_scratch_files_are_unique_and_transient() {
        let parent = tempfile::tempdir().unwrap();
        let workspace = Workspace::create_in(parent.path()).unwrap();
        let first = workspace.scratch_file().unwrap();
        let second = workspace.scratch_file().unwrap();
        assert_ne!(first.path(), second.path());
        let name = first.path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(SCRATCH_PREFIX));
        assert_eq!(name.len(), SCRATCH_PREFIX.len() + SCRATCH_RANDOM_LEN);

        let path = first.path().to_path_buf();
        drop(first);
        assert!(!path.exists());
    }
}
