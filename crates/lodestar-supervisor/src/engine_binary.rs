//! Managed workflow engine binary: download, install, launch arguments.
//!
//! The engine version is pinned at compile time and is not configurable:
//! bumping it is a code change that ships only after the control plane has
//! been tested against it end to end.

use std::path::PathBuf;

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use lodestar_core::{ENGINE_PORT, LodestarHome};

use crate::error::{SupervisorError, SupervisorResult};
use crate::subprocess::SubprocessSpec;

/// Pinned engine release.
pub const ENGINE_VERSION: &str = "1.4.2";

/// Name of the installed engine binary.
pub const ENGINE_BINARY_NAME: &str = "loom";

/// Release host for engine archives.
const ENGINE_RELEASE_BASE: &str = "https://github.com/loom-run/loom/releases/download";

/// Map the build target onto the engine's release artifact naming.
fn release_platform() -> SupervisorResult<(&'static str, &'static str)> {
    let os = match std::env::consts::OS {
        "linux" => "linux",
        "macos" => "darwin",
        "windows" => "windows",
        other => {
            return Err(SupervisorError::UnsupportedPlatform {
                os: other,
                arch: std::env::consts::ARCH,
            });
        }
    };
    let arch = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => {
            return Err(SupervisorError::UnsupportedPlatform {
                os: std::env::consts::OS,
                arch: other,
            });
        }
    };
    Ok((os, arch))
}

/// Immutable download URL for a pinned version and platform.
#[must_use]
pub fn download_url(version: &str, os: &str, arch: &str) -> String {
    format!("{ENGINE_RELEASE_BASE}/v{version}/{ENGINE_BINARY_NAME}_{version}_{os}_{arch}.tar.gz")
}

/// Installs and launches the pinned engine binary under the data dir.
pub struct EngineBinaryManager {
    home: LodestarHome,
    http: reqwest::Client,
}

impl EngineBinaryManager {
    /// Create a manager rooted at the given data directory.
    #[must_use]
    pub fn new(home: LodestarHome) -> Self {
        Self {
            home,
            http: reqwest::Client::new(),
        }
    }

    /// Where the engine binary lives once installed.
    #[must_use]
    pub fn binary_path(&self) -> PathBuf {
        self.home.bin_dir().join(ENGINE_BINARY_NAME)
    }

    /// Ensure the pinned engine binary is installed, downloading it on
    /// first start.
    ///
    /// # Errors
    ///
    /// Fails when the platform has no published artifact, the download
    /// fails, or the archive cannot be unpacked.
    pub async fn ensure_installed(&self) -> SupervisorResult<PathBuf> {
        let path = self.binary_path();
        if path.is_file() {
            debug!(path = %path.display(), "engine binary already installed");
            return Ok(path);
        }

        let (os, arch) = release_platform()?;
        let url = download_url(ENGINE_VERSION, os, arch);
        info!(url = %url, "downloading workflow engine binary");

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

        let digest = Sha256::digest(&bytes);
        debug!(sha256 = %format!("{digest:x}"), size = bytes.len(), "engine archive downloaded");

        self.extract_binary(&bytes)?;
        info!(path = %path.display(), version = ENGINE_VERSION, "engine binary installed");
        Ok(path)
    }

    /// Unpack the engine binary entry out of the release tarball and
    /// install it with `0755`.
    fn extract_binary(&self, archive: &[u8]) -> SupervisorResult<()> {
        std::fs::create_dir_all(self.home.bin_dir())?;
        let decoder = flate2::read::GzDecoder::new(archive);
        let mut tar = tar::Archive::new(decoder);

        for entry in tar.entries().map_err(|e| SupervisorError::Extract(e.to_string()))? {
            let mut entry = entry.map_err(|e| SupervisorError::Extract(e.to_string()))?;
            let entry_path = entry
                .path()
                .map_err(|e| SupervisorError::Extract(e.to_string()))?;
            let is_engine = entry_path
                .file_name()
                .is_some_and(|n| n == ENGINE_BINARY_NAME);
            if !is_engine {
                continue;
            }

            // Unpack next to the final path, then rename into place.
            let tmp = self.home.bin_dir().join(format!(".{ENGINE_BINARY_NAME}.partial"));
            entry
                .unpack(&tmp)
                .map_err(|e| SupervisorError::Extract(e.to_string()))?;
            set_executable(&tmp)?;
            std::fs::rename(&tmp, self.binary_path())?;
            return Ok(());
        }
        Err(SupervisorError::Extract(format!(
            "archive has no '{ENGINE_BINARY_NAME}' entry"
        )))
    }

    /// Subprocess spec for the dev-mode single-node engine.
    #[must_use]
    pub fn launch_spec(&self) -> SubprocessSpec {
        SubprocessSpec {
            name: "engine".to_owned(),
            command: self.binary_path(),
            args: vec![
                "server".to_owned(),
                "start".to_owned(),
                "--dev".to_owned(),
                "--port".to_owned(),
                ENGINE_PORT.to_string(),
                "--data-dir".to_owned(),
                self.home.engine_data_dir().display().to_string(),
            ],
            env: Vec::new(),
            port: Some(ENGINE_PORT),
            pid_file: self.home.pid_file("engine"),
            log_file: self.home.log_file("engine"),
            required: true,
        }
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
