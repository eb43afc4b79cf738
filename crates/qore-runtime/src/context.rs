//! Evaluation context configuration

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{QoreError, Result};

/// Configuration and state for evaluation.
///
/// This is passed through evaluation and lvalue resolution and controls
/// behavior like reference-chain limits and interruption.
#[derive(Debug, Clone)]
pub struct EvalContext {
    /// Maximum number of links followed while resolving one lvalue
    pub max_reference_depth: usize,

    /// Shared flag; once set, evaluation and resolution stop with
    /// [`QoreError::Interrupted`]
    pub interrupt: Arc<AtomicBool>,
}

impl Default for EvalContext {
    fn default() -> Self {
        Self {
            max_reference_depth: 1000,
            interrupt: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl EvalContext {
    /// Create a new context with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context with a custom reference-chain limit.
    pub fn with_max_reference_depth(max_depth: usize) -> Self {
        Self {
            max_reference_depth: max_depth,
            ..Default::default()
        }
    }

    /// Check if evaluation has been interrupted.
    pub fn is_interrupted(&self) -> bool {
        self.interrupt.load(Ordering::Relaxed)
    }

    /// Fail with [`QoreError::Interrupted`] if the interrupt flag is set.
    pub fn check_interrupt(&self) -> Result<()> {
        if self.is_interrupted() {
            return Err(QoreError::Interrupted);
        }
        Ok(())
    }

    /// Request interruption of evaluation.
    pub fn interrupt(&self) {
        self.interrupt.store(true, Ordering::Relaxed);
    }

    /// Reset the interrupt flag.
    pub fn reset_interrupt(&self) {
        self.interrupt.store(false, Ordering::Relaxed);
    }
}
