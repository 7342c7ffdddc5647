//! Progress reporting
//!
//! Loads and preloads report `(finished, total)` unit counts. Backends are free
//! to report whatever their transport sees (including totals that grow as
//! dependencies are discovered); [`ProgressReporter`] normalizes that into the
//! caller-facing contract: `total >= 1`, `finished <= total`, and `finished`
//! never decreasing within one operation.

use std::cell::Cell;
use std::rc::Rc;

/// Progress callback: `(finished_units, total_units)`
pub type ProgressFn = Rc<dyn Fn(usize, usize)>;

/// Monotonic wrapper around an optional [`ProgressFn`]
pub struct ProgressReporter {
    callback: Option<ProgressFn>,
    finished: Cell<usize>,
    total: Cell<usize>,
    reported: Cell<bool>,
}

impl ProgressReporter {
    /// Create a reporter; `None` makes every report a no-op
    pub fn new(callback: Option<ProgressFn>) -> Self {
        Self {
            callback,
            finished: Cell::new(0),
            total: Cell::new(0),
            reported: Cell::new(false),
        }
    }

    /// Whether a callback is attached
    pub fn is_attached(&self) -> bool {
        self.callback.is_some()
    }

    /// Report raw progress, clamped into the monotonic contract
    pub fn report(&self, finished: usize, total: usize) {
        let Some(callback) = &self.callback else {
            return;
        };

        let total = total.max(1).max(self.finished.get());
        let finished = finished.min(total).max(self.finished.get());

        self.finished.set(finished);
        self.total.set(total);
        self.reported.set(true);

        log::trace!("Progress {}/{}", finished, total);
        callback(finished, total);
    }

    /// Emit the terminal `(total, total)` call if it has not been emitted yet
    pub fn complete(&self) {
        if self.callback.is_none() {
            return;
        }
        let total = self.total.get().max(1);
        if !self.reported.get() || self.finished.get() < total {
            self.report(total, total);
        }
    }

    /// Last reported `(finished, total)`
    pub fn last(&self) -> (usize, usize) {
        (self.finished.get(), self.total.get())
    }
}

/// Scale a sub-operation's progress into its share of an overall total
///
/// `base` units are already done; the sub-operation owns `share` units and
/// reports `(finished, total)` in its own units.
pub fn scale_into(base: usize, share: usize, finished: usize, total: usize) -> usize {
    let total = total.max(1);
    let finished = finished.min(total);
    base + finished * share / total
}
