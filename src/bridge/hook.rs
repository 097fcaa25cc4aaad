//! One-shot helper script launcher.
//!
//! The first time the guest is told one of its identity UUIDs, an optional
//! executable beside the running binary is started. It gets no arguments,
//! inherits stdout/stderr, and its exit status is never checked. A missing
//! script or a failed spawn is logged and otherwise ignored.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::process::Command;
use tracing::{info, warn};

/// Runs the helper script at most once per launcher.
#[derive(Debug)]
pub struct HookLauncher {
    path: Option<PathBuf>,
    fired: AtomicBool,
}

impl HookLauncher {
    /// Launcher for an explicit script path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            fired: AtomicBool::new(false),
        }
    }

    /// Launcher for `name` resolved against the executable's directory.
    ///
    /// An absolute `name` is used as is.
    pub fn beside_executable(name: &Path) -> Self {
        match std::env::current_exe() {
            Ok(exe) => {
                let dir = exe.parent().map(Path::to_path_buf).unwrap_or_default();
                Self::new(dir.join(name))
            }
            Err(e) => {
                warn!("Cannot locate executable, helper script disabled: {}", e);
                Self::disabled()
            }
        }
    }

    /// Launcher that never runs anything.
    pub fn disabled() -> Self {
        Self {
            path: None,
            fired: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Start the script unless an earlier call already did.
    ///
    /// Returns `true` for the one call that performed the transition,
    /// whether or not the script could actually be started.
    pub fn fire_once(&self) -> bool {
        if self
            .fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        if let Some(path) = &self.path {
            launch(path);
        }
        true
    }
}

fn launch(path: &Path) {
    if !path.is_file() {
        info!("No helper script at {}", path.display());
        return;
    }

    // The child is dropped without waiting; tokio reaps it in the background.
    match Command::new(path)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
    {
        Ok(child) => info!(
            "Started helper script {} (pid {:?})",
            path.display(),
            child.id()
        ),
        Err(e) => warn!("Failed to start helper script {}: {}", path.display(), e),
    }
}
