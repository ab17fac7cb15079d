//! Wall-clock and page-visibility sources.
//!
//! The core never reads time on its own; sessions take a `Clock` so tests
//! and transcript replays can drive time explicitly.

use chrono::Utc;
use std::cell::Cell;
use std::rc::Rc;

use crate::signal::{Watch, WatchReader};
use crate::types::Millis;

pub trait Clock {
    fn now_ms(&self) -> Millis;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> Millis {
        Utc::now().timestamp_millis()
    }
}

/// Clock advanced by hand. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<Millis>>,
}

impl ManualClock {
    pub fn new(start: Millis) -> Self {
        Self {
            now: Rc::new(Cell::new(start)),
        }
    }

    pub fn set(&self, now: Millis) {
        self.now.set(now);
    }

    pub fn advance(&self, delta: Millis) -> Millis {
        let next = self.now.get().saturating_add(delta);
        self.now.set(next);
        next
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> Millis {
        self.now.get()
    }
}

/// Page visibility. Starts visible; a headless runtime never hides it.
pub struct VisibilitySource {
    visible: Watch<bool>,
}

impl Default for VisibilitySource {
    fn default() -> Self {
        Self::new(true)
    }
}

impl VisibilitySource {
    pub fn new(visible: bool) -> Self {
        Self {
            visible: Watch::new(visible),
        }
    }

    pub fn is_visible(&self) -> bool {
        self.visible.get()
    }

    /// Returns true when the value changed.
    pub fn set_visible(&self, visible: bool) -> bool {
        self.visible.set(visible)
    }

    pub fn reader(&self) -> WatchReader<bool> {
        self.visible.reader()
    }
}
