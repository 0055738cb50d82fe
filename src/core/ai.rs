//! AI Runtime Gate
//!
//! Readiness checks for the isolated Python runtime that AI upscaling runs
//! in. Installation and download of the runtime are handled by an external
//! collaborator; this module only answers "may an upscale job run right
//! now?" and hands out the interpreter/script paths for the external-process
//! invocation.

use std::path::PathBuf;

/// Readiness gate queried before any upscale job is dispatched.
pub trait AiRuntime: Send + Sync {
    /// Whether the runtime is installed and usable right now
    fn is_ready(&self) -> bool;

    /// Path to the runtime's interpreter, when present
    fn interpreter(&self) -> Option<PathBuf>;

    /// Path to the upscaler entry script, when present
    fn upscaler_script(&self) -> Option<PathBuf>;
}

/// Package directories that must exist in site-packages for the upscaler
/// to work. Checking directories is much faster than importing them.
const REQUIRED_PACKAGES: [&str; 3] = ["torch", "numpy", "PIL"];

/// Directory-probing implementation over the managed runtime tree:
///
/// ```text
/// {root}/bin/python3            (python.exe on Windows)
/// {root}/lib/site-packages/...
/// {root}/scripts/upscaler.py
/// ```
pub struct IsolatedRuntime {
    root: PathBuf,
}

impl IsolatedRuntime {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn interpreter_path(&self) -> PathBuf {
        if cfg!(windows) {
            self.root.join("python.exe")
        } else {
            self.root.join("bin").join("python3")
        }
    }

    fn site_packages(&self) -> PathBuf {
        self.root.join("lib").join("site-packages")
    }

    fn script_path(&self) -> PathBuf {
        self.root.join("scripts").join("upscaler.py")
    }

    fn packages_present(&self) -> bool {
        let site = self.site_packages();
        REQUIRED_PACKAGES
            .iter()
            .all(|package| site.join(package).is_dir())
    }
}

impl AiRuntime for IsolatedRuntime {
    fn is_ready(&self) -> bool {
        let ready = self.interpreter_path().is_file()
            && self.script_path().is_file()
            && self.packages_present();
        if !ready {
            tracing::debug!(root = %self.root.display(), "AI runtime not ready");
        }
        ready
    }

    fn interpreter(&self) -> Option<PathBuf> {
        let path = self.interpreter_path();
        path.is_file().then_some(path)
    }

    fn upscaler_script(&self) -> Option<PathBuf> {
        let path = self.script_path();
        path.is_file().then_some(path)
    }
}

/// Builds an [`IsolatedRuntime`] rooted in the platform data directory when
/// no explicit root is configured.
pub fn default_runtime_root() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mediaforge")
        .join("runtime")
}
