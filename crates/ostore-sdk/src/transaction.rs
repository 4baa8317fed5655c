use std::fmt::Display;

use tracing::{debug, warn};

type Compensation<'a> = Box<dyn FnOnce() -> Result<(), String> + 'a>;

/// Undo log for a multi-step write.
///
/// Each applied step registers a compensation. Dropping the scope without
/// [`commit`](Self::commit) runs the compensations newest first. A failing
/// compensation is logged and the rest still run.
pub struct TransactionScope<'a> {
    operation: &'static str,
    compensations: Vec<(String, Compensation<'a>)>,
    committed: bool,
}

impl<'a> TransactionScope<'a> {
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            compensations: Vec::new(),
            committed: false,
        }
    }

    /// Register the undo action for a step that has just been applied.
    pub fn on_rollback<E, F>(&mut self, step: impl Into<String>, undo: F)
    where
        E: Display,
        F: FnOnce() -> Result<(), E> + 'a,
    {
        self.compensations.push((
            step.into(),
            Box::new(move || undo().map_err(|e| e.to_string())),
        ));
    }

    /// Keep every applied step.
    pub fn commit(mut self) {
        self.committed = true;
        self.compensations.clear();
    }

    /// Undo every applied step now.
    pub fn rollback(self) {
        drop(self);
    }

    /// Number of registered compensations.
    pub fn len(&self) -> usize {
        self.compensations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.compensations.is_empty()
    }
}

impl Drop for TransactionScope<'_> {
    fn drop(&mut self) {
        if self.committed || self.compensations.is_empty() {
            return;
        }
        debug!(
            operation = self.operation,
            steps = self.compensations.len(),
            "rolling back"
        );
        while let Some((step, undo)) = self.compensations.pop() {
            if let Err(error) = undo() {
                warn!(operation = self.operation, step = %step, error = %error, "compensation failed");
            }
        }
    }
}

impl std::fmt::Debug for TransactionScope<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionScope")
            .field("operation", &self.operation)
            .field("steps", &self.compensations.len())
            .field("committed", &self.committed)
            .finish()
    }
}
