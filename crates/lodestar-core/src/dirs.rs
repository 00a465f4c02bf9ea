//! Directory scaffolding for the Lodestar data directory.
//!
//! All persistent state lives under a single hardcoded directory in the
//! user's home. It is deliberately not user-configurable: moving it would
//! orphan the resource store and every managed binary.
//!
//! # Layout
//!
//! ```text
//! ~/.lodestar/                    (LodestarHome)
//! ├── bin/
//! │   ├── loom                      (managed workflow engine binary)
//! │   ├── lodestar-executor         (extracted agent executor binary)
//! │   └── lodestar-executor.version (recorded executor version)
//! ├── engine/                       (engine data subdir, passed via --data-dir)
//! ├── store/                        (SurrealKV resource store)
//! ├── logs/                         (daemon and component log files)
//! ├── run/                          (PID files, one per managed component)
//! └── config.toml                   (LLM provider config)
//! ```

use std::path::{Path, PathBuf};

use crate::error::{CoreError, CoreResult};

/// The Lodestar data directory (`~/.lodestar/`).
#[derive(Debug, Clone)]
pub struct LodestarHome {
    root: PathBuf,
}

impl LodestarHome {
    /// Resolve the data directory under the user's home.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::HomeUnavailable`] if `$HOME` cannot be resolved.
    pub fn resolve() -> CoreResult<Self> {
        let home = std::env::var("HOME")
            .map_err(|_| CoreError::HomeUnavailable("$HOME is not set".to_owned()))?;
        Ok(Self {
            root: PathBuf::from(home).join(".lodestar"),
        })
    }

    /// Use an explicit root. Test-only seam; the CLI always resolves.
    #[must_use]
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root data directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for managed and extracted binaries.
    #[must_use]
    pub fn bin_dir(&self) -> PathBuf {
        self.root.join("bin")
    }

    /// Data subdirectory handed to the managed engine.
    #[must_use]
    pub fn engine_data_dir(&self) -> PathBuf {
        self.root.join("engine")
    }

    /// SurrealKV resource store directory.
    #[must_use]
    pub fn store_dir(&self) -> PathBuf {
        self.root.join("store")
    }

    /// Log file directory.
    #[must_use]
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// PID file directory.
    #[must_use]
    pub fn run_dir(&self) -> PathBuf {
        self.root.join("run")
    }

    /// PID file path for a named managed component.
    #[must_use]
    pub fn pid_file(&self, component: &str) -> PathBuf {
        self.run_dir().join(format!("{component}.pid"))
    }

    /// Log file path for a named managed component.
    #[must_use]
    pub fn log_file(&self, component: &str) -> PathBuf {
        self.logs_dir().join(format!("{component}.log"))
    }

    /// The LLM provider config file.
    #[must_use]
    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    /// Create every directory in the layout that does not yet exist.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Io`] if a directory cannot be created.
    pub fn ensure_layout(&self) -> CoreResult<()> {
        for dir in [
            self.root.clone(),
            self.bin_dir(),
            self.engine_data_dir(),
            self.store_dir(),
            self.logs_dir(),
            self.run_dir(),
        ] {
            std::fs::create_dir_all(&dir)?;
        }
        Ok(())
    }
}
