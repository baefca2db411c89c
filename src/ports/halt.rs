//! Halt / maintenance-mode flag
//!
//! A halted system still serves reads. Every write path asks the checker first
//! and fails loudly with `SystemHalted`.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::errors::{IntakeError, IntakeResult};

/// Source of the system-wide halt condition
pub trait HaltChecker: Send + Sync {
    fn is_halted(&self) -> bool;
}

/// Reject a write when halted
pub fn ensure_writable(checker: &dyn HaltChecker, retry_after_secs: u64) -> IntakeResult<()> {
    if checker.is_halted() {
        tracing::warn!(retry_after_secs, "write rejected: system halted");
        return Err(IntakeError::SystemHalted { retry_after_secs });
    }
    Ok(())
}

/// In-process switch toggled by operators and tests
#[derive(Debug, Default)]
pub struct HaltSwitch {
    halted: AtomicBool,
}

impl HaltSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn halt(&self) {
        if !self.halted.swap(true, Ordering::SeqCst) {
            tracing::warn!("system halt engaged");
        }
    }

    pub fn resume(&self) {
        if self.halted.swap(false, Ordering::SeqCst) {
            tracing::info!("system halt released");
        }
    }
}

impl HaltChecker for HaltSwitch {
    fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }
}

/// Halted while a marker file exists
#[derive(Debug, Clone)]
pub struct FileHaltFlag {
    path: PathBuf,
}

impl FileHaltFlag {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl HaltChecker for FileHaltFlag {
    fn is_halted(&self) -> bool {
        self.path.exists()
    }
}

/// Never halted
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverHalted;

impl HaltChecker for NeverHalted {
    fn is_halted(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_switch_toggles() {
        let switch = HaltSwitch::new();
        assert!(ensure_writable(&switch, 60).is_ok());

        switch.halt();
        let err = ensure_writable(&switch, 60).unwrap_err();
        assert!(matches!(err, IntakeError::SystemHalted { retry_after_secs: 60 }));

        switch.resume();
        assert!(!switch.is_halted());
    }

    #[test]
    fn test_file_flag_follows_marker() {
        let tmp = TempDir::new().unwrap();
        let flag = FileHaltFlag::new(tmp.path().join("HALT"));
        assert!(!flag.is_halted());

        std::fs::write(flag.path(), b"maintenance").unwrap();
        assert!(flag.is_halted());

        std::fs::remove_file(flag.path()).unwrap();
        assert!(!flag.is_halted());
    }
}
