//! Single-flight guards for long-running operations.
//!
//! Each operation kind may run at most once at a time. A second attempt
//! while one is running is rejected with a warning; it is not queued.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Backup,
    Restore,
    Import,
    Export,
    ClearAll,
    BatchRate,
}

impl OperationKind {
    pub const ALL: [OperationKind; 6] = [
        OperationKind::Backup,
        OperationKind::Restore,
        OperationKind::Import,
        OperationKind::Export,
        OperationKind::ClearAll,
        OperationKind::BatchRate,
    ];

    fn index(self) -> usize {
        match self {
            OperationKind::Backup => 0,
            OperationKind::Restore => 1,
            OperationKind::Import => 2,
            OperationKind::Export => 3,
            OperationKind::ClearAll => 4,
            OperationKind::BatchRate => 5,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::Backup => "backup",
            OperationKind::Restore => "restore",
            OperationKind::Import => "import",
            OperationKind::Export => "export",
            OperationKind::ClearAll => "clear all ratings",
            OperationKind::BatchRate => "rate playlist",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    Idle,
    Running,
}

/// Process-wide running flags, one per operation kind.
#[derive(Debug, Default)]
pub struct Coordinator {
    running: [AtomicBool; 6],
}

impl Coordinator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Mark `kind` as running. Returns `None` (and logs) if it already is.
    /// The flag is released when the returned guard drops.
    pub fn try_begin(self: &Arc<Self>, kind: OperationKind) -> Option<OperationGuard> {
        let flag = &self.running[kind.index()];
        match flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => {
                log::debug!("{kind} started");
                Some(OperationGuard {
                    coordinator: Arc::clone(self),
                    kind,
                })
            }
            Err(_) => {
                log::warn!("{kind} already in progress, ignoring request");
                None
            }
        }
    }

    pub fn state(&self, kind: OperationKind) -> OperationState {
        if self.running[kind.index()].load(Ordering::Acquire) {
            OperationState::Running
        } else {
            OperationState::Idle
        }
    }
}

/// Proof that an operation holds its kind's running flag.
#[derive(Debug)]
pub struct OperationGuard {
    coordinator: Arc<Coordinator>,
    kind: OperationKind,
}

impl OperationGuard {
    pub fn kind(&self) -> OperationKind {
        self.kind
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        self.coordinator.running[self.kind.index()].store(false, Ordering::Release);
        log::debug!("{} finished", self.kind);
    }
}
