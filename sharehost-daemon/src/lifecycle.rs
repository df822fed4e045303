//! Per-protocol lifecycle state and the keyed operation lock.
//!
//! Each protocol owns one [`ProtocolSlot`]. An operation must win the slot's
//! lock with [`ProtocolSlot::try_begin`]; losing callers get `None` at once
//! and never queue. Status reads go through a separate `RwLock` so they never
//! wait on an in-flight operation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, RwLock, TryLockError};

use chrono::Utc;

use sharehost_core::{ProtocolName, ProtocolRecord, ProtocolRuntimeState, ProtocolStatus};

// ---------------------------------------------------------------------------
// Transition planning
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Install,
    Start,
    Stop,
    Uninstall,
    Reset,
    UpdateConfig,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Install => "install",
            Operation::Start => "start",
            Operation::Stop => "stop",
            Operation::Uninstall => "uninstall",
            Operation::Reset => "reset",
            Operation::UpdateConfig => "update_config",
        }
    }
}

/// What an operation does from a given status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    /// Already in the requested state; succeed without side effects.
    NoOp,
    /// Run the operation, showing `transient` while it is in flight.
    Run {
        transient: Option<ProtocolStatus>,
        success: ProtocolStatus,
    },
    Invalid,
}

pub fn plan(op: Operation, current: ProtocolStatus) -> Plan {
    use ProtocolStatus::*;
    match (op, current) {
        (Operation::Install, Uninstalled) => Plan::Run {
            transient: Some(Installing),
            success: Installed,
        },
        (Operation::Install, Installed | Stopped | Running) => Plan::NoOp,

        (Operation::Start, Installed | Stopped) => Plan::Run {
            transient: Some(Starting),
            success: Running,
        },
        (Operation::Start, Running) => Plan::NoOp,

        (Operation::Stop, Running) => Plan::Run {
            transient: Some(Stopping),
            success: Stopped,
        },
        (Operation::Stop, Uninstalled | Installed | Stopped) => Plan::NoOp,

        (Operation::Uninstall, Installed | Stopped | Error) => Plan::Run {
            transient: None,
            success: Uninstalled,
        },
        (Operation::Uninstall, Uninstalled) => Plan::NoOp,

        (Operation::Reset, Error) => Plan::Run {
            transient: None,
            success: Uninstalled,
        },
        (Operation::Reset, Uninstalled) => Plan::NoOp,

        (Operation::UpdateConfig, Installed | Stopped | Running) => Plan::Run {
            transient: None,
            success: current,
        },

        _ => Plan::Invalid,
    }
}

// ---------------------------------------------------------------------------
// Slots
// ---------------------------------------------------------------------------

pub struct ProtocolSlot {
    op_lock: Mutex<()>,
    state: RwLock<ProtocolRuntimeState>,
    resync_pending: AtomicBool,
}

/// Held for the duration of one operation; clears `in_flight` on drop.
pub struct OperationGuard<'a> {
    slot: &'a ProtocolSlot,
    _lock: MutexGuard<'a, ()>,
}

impl ProtocolSlot {
    fn new(record: &ProtocolRecord) -> Self {
        Self {
            op_lock: Mutex::new(()),
            state: RwLock::new(ProtocolRuntimeState {
                name: record.name.clone(),
                status: record.status,
                last_transition: record.updated_at,
                last_error: record.last_error.clone(),
                in_flight: None,
                rollback_candidate: None,
            }),
            resync_pending: AtomicBool::new(false),
        }
    }

    /// Take the operation lock, or `None` when another operation holds it.
    pub fn try_begin(&self, operation: &str) -> Option<OperationGuard<'_>> {
        let lock = match self.op_lock.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return None,
            // A panicked operation leaves no invariant behind the unit mutex.
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };
        let token = format!("{operation}:{}", uuid::Uuid::new_v4());
        self.write_state(|s| s.in_flight = Some(token));
        Some(OperationGuard {
            slot: self,
            _lock: lock,
        })
    }

    pub fn snapshot(&self) -> ProtocolRuntimeState {
        match self.state.read() {
            Ok(s) => s.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn status(&self) -> ProtocolStatus {
        self.snapshot().status
    }

    /// Name of the operation holding the lock, if any.
    pub fn in_flight(&self) -> Option<String> {
        self.snapshot()
            .in_flight
            .and_then(|t| t.split(':').next().map(str::to_string))
    }

    /// Ask the current lock holder to synchronize again before releasing.
    pub fn mark_resync(&self) {
        self.resync_pending.store(true, Ordering::SeqCst);
    }

    pub fn take_resync(&self) -> bool {
        self.resync_pending.swap(false, Ordering::SeqCst)
    }

    fn write_state(&self, f: impl FnOnce(&mut ProtocolRuntimeState)) {
        let mut guard = match self.state.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard);
    }
}

impl OperationGuard<'_> {
    pub fn set_status(&self, status: ProtocolStatus) {
        self.slot.write_state(|s| {
            s.status = status;
            s.last_transition = Utc::now();
            if status != ProtocolStatus::Error {
                s.last_error = None;
                s.rollback_candidate = None;
            }
        });
    }

    pub fn fail(&self, error: String, rollback_candidate: Option<std::path::PathBuf>) {
        self.slot.write_state(|s| {
            s.status = ProtocolStatus::Error;
            s.last_transition = Utc::now();
            s.last_error = Some(error);
            if rollback_candidate.is_some() {
                s.rollback_candidate = rollback_candidate;
            }
        });
    }

    pub fn slot(&self) -> &ProtocolSlot {
        self.slot
    }
}

impl Drop for OperationGuard<'_> {
    fn drop(&mut self) {
        self.slot.write_state(|s| s.in_flight = None);
    }
}

/// One slot per registered protocol, fixed at startup.
pub struct LockTable {
    slots: HashMap<ProtocolName, ProtocolSlot>,
}

impl LockTable {
    pub fn new<'a>(records: impl IntoIterator<Item = &'a ProtocolRecord>) -> Self {
        Self {
            slots: records
                .into_iter()
                .map(|r| (r.name.clone(), ProtocolSlot::new(r)))
                .collect(),
        }
    }

    pub fn get(&self, name: &ProtocolName) -> Option<&ProtocolSlot> {
        self.slots.get(name)
    }
}
