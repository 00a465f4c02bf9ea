//! Embedded agent executor binary provisioning.
//!
//! The control plane ships the executor inside its own binary. At startup
//! the embedded bytes are extracted into `<data_dir>/bin/` when the
//! recorded version is missing or stale. Development builds that were not
//! produced with the `embed-executor` feature fall back to downloading the
//! matching version from the release host.

use std::path::PathBuf;

use tracing::{debug, info, warn};

use lodestar_core::LodestarHome;

use crate::error::{SupervisorError, SupervisorResult};

/// Executor version baked into this control plane build.
pub const EXECUTOR_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the installed executor binary.
pub const EXECUTOR_BINARY_NAME: &str = "lodestar-executor";

/// Release host for executor fallback downloads.
const EXECUTOR_RELEASE_BASE: &str =
    "https://github.com/lodestar-dev/lodestar/releases/download";

#[cfg(feature = "embed-executor")]
const EMBEDDED_EXECUTOR: Option<&[u8]> = Some(include_bytes!(env!("LODESTAR_EXECUTOR_BIN")));

#[cfg(not(feature = "embed-executor"))]
const EMBEDDED_EXECUTOR: Option<&[u8]> = None;

/// Extracts or downloads the executor binary matching this build.
pub struct ExecutorBinaryManager {
    home: LodestarHome,
    http: reqwest::Client,
}

impl ExecutorBinaryManager {
    /// Create a manager rooted at the given data directory.
    #[must_use]
    pub fn new(home: LodestarHome) -> Self {
        Self {
            home,
            http: reqwest::Client::new(),
        }
    }

    /// Where the executor binary lives once installed.
    #[must_use]
    pub fn binary_path(&self) -> PathBuf {
        self.home.bin_dir().join(EXECUTOR_BINARY_NAME)
    }

    fn version_path(&self) -> PathBuf {
        self.home
            .bin_dir()
            .join(format!("{EXECUTOR_BINARY_NAME}.version"))
    }

    fn recorded_version(&self) -> Option<String> {
        std::fs::read_to_string(self.version_path())
            .ok()
            .map(|s| s.trim().to_owned())
    }

    /// Test-mode override path, honored only in debug builds.
    ///
    /// # Errors
    ///
    /// Returns an error when the override is set in a release build.
    pub fn override_path() -> SupervisorResult<Option<PathBuf>> {
        match std::env::var("LODESTAR_EXECUTOR_BIN") {
            Ok(path) if cfg!(debug_assertions) => {
                warn!(path = %path, "using executor binary override (test mode)");
                Ok(Some(PathBuf::from(path)))
            }
            Ok(_) => Err(SupervisorError::ExecutorUnavailable(
                "LODESTAR_EXECUTOR_BIN override is not allowed in release builds".to_owned(),
            )),
            Err(_) => Ok(None),
        }
    }

    /// Ensure an executor binary of the expected version is installed.
    ///
    /// # Errors
    ///
    /// Fails when neither embedded bytes nor a downloadable artifact are
    /// available, or on filesystem errors.
    pub async fn ensure_installed(&self) -> SupervisorResult<PathBuf> {
        if let Some(path) = Self::override_path()? {
            return Ok(path);
        }

        let path = self.binary_path();
        if path.is_file() && self.recorded_version().as_deref() == Some(EXECUTOR_VERSION) {
            debug!(path = %path.display(), version = EXECUTOR_VERSION, "executor binary current");
            return Ok(path);
        }

        if let Some(bytes) = EMBEDDED_EXECUTOR {
            self.install(bytes)?;
            info!(
                path = %path.display(),
                version = EXECUTOR_VERSION,
                "executor binary extracted from embedded payload"
            );
            return Ok(path);
        }

        // Development build without embedded bytes: fetch the matching
        // release artifact instead.
        let url = self.fallback_url()?;
        info!(url = %url, "downloading executor binary (no embedded payload)");
        let bytes = self
            .http
            .get(&url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| SupervisorError::Download {
                url: url.clone(),
                reason: e.to_string(),
            })?
            .bytes()
            .await
            .map_err(|e| SupervisorError::Download {
                url: url.clone(),
                reason: e.to_string(),
            })?;
        self.install(&bytes)?;
        Ok(path)
    }

    fn fallback_url(&self) -> SupervisorResult<String> {
        let os = std::env::consts::OS;
        let arch = std::env::consts::ARCH;
        match (os, arch) {
            ("linux" | "macos", "x86_64" | "aarch64") => Ok(format!(
                "{EXECUTOR_RELEASE_BASE}/v{EXECUTOR_VERSION}/{EXECUTOR_BINARY_NAME}_{os}_{arch}"
            )),
            _ => Err(SupervisorError::UnsupportedPlatform {
                os: std::env::consts::OS,
                arch: std::env::consts::ARCH,
            }),
        }
    }

    /// Write the binary and version record atomically (temp file + rename).
    fn install(&self, bytes: &[u8]) -> SupervisorResult<()> {
        std::fs::create_dir_all(self.home.bin_dir())?;
        let tmp = self
            .home
            .bin_dir()
            .join(format!(".{EXECUTOR_BINARY_NAME}.partial"));
        std::fs::write(&tmp, bytes)?;
        set_executable(&tmp)?;
        std::fs::rename(&tmp, self.binary_path())?;
        std::fs::write(self.version_path(), EXECUTOR_VERSION)?;
        Ok(())
    }
}

#[cfg(unix)]
fn set_executable(path: &std::path::Path) -> SupervisorResult<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_executable(_path: &std::path::Path) -> SupervisorResult<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(dir: &std::path::Path) -> ExecutorBinaryManager {
        let home = LodestarHome::at(dir);
        home.ensure_layout().unwrap();
        ExecutorBinaryManager::new(home)
    }

    #[test]
    fn test_install_records_version() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        manager.install(b"fake-binary").unwrap();
        assert!(manager.binary_path().is_file());
        assert_eq!(manager.recorded_version().as_deref(), Some(EXECUTOR_VERSION));
    }

    #[test]
    fn test_stale_version_detected() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        manager.install(b"fake-binary").unwrap();
        std::fs::write(manager.version_path(), "0.0.0-old").unwrap();
        assert_ne!(manager.recorded_version().as_deref(), Some(EXECUTOR_VERSION));
    }

    #[test]
    fn test_fallback_url_shape() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        let url = manager.fallback_url().unwrap();
        assert!(url.contains(EXECUTOR_VERSION));
        assert!(url.contains(EXECUTOR_BINARY_NAME));
    }
}
