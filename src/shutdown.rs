use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    NotStarted,
    InProgress,
    Done,
}

impl ShutdownPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ShutdownPhase::NotStarted,
            1 => ShutdownPhase::InProgress,
            _ => ShutdownPhase::Done,
        }
    }
}

/// What asked the process to exit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitTrigger {
    Exit,
    Interrupt,
    Terminate,
    Panic,
    Quit,
}

impl fmt::Display for ExitTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExitTrigger::Exit => "process exit",
            ExitTrigger::Interrupt => "interrupt signal",
            ExitTrigger::Terminate => "termination signal",
            ExitTrigger::Panic => "panic",
            ExitTrigger::Quit => "quit request",
        };
        f.write_str(name)
    }
}

/// Makes cleanup run once no matter how many exit paths fire
#[derive(Debug, Default)]
pub struct ShutdownGuard {
    phase: AtomicU8,
}

impl ShutdownGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> ShutdownPhase {
        ShutdownPhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    /// Claim the cleanup. Only the first caller gets `true`.
    pub fn try_begin(&self, trigger: ExitTrigger) -> bool {
        match self
            .phase
            .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => {
                log::info!("Shutdown started by {}", trigger);
                true
            }
            Err(phase) => {
                log::debug!(
                    "Ignoring {} during shutdown ({:?})",
                    trigger,
                    ShutdownPhase::from_u8(phase)
                );
                false
            }
        }
    }

    pub fn finish(&self) {
        self.phase.store(2, Ordering::SeqCst);
        log::info!("Shutdown complete");
    }

    /// The process may exit once cleanup has finished
    pub fn is_done(&self) -> bool {
        self.phase() == ShutdownPhase::Done
    }
}
