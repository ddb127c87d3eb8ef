//! The capability every navigable unit (window, page, prompt) implements, and
//! the origin a dispatch is issued from.

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};

use shared::{domain::Outcome, error::NavError};

use crate::{navigator::Navigator, transition::TransitionInstance};

/// A navigable view.
///
/// Views are reused across invocations of the same slot, so `inflow` may be
/// entered again while an earlier call is still on the stack. A view that
/// cannot tolerate that must build a fresh instance per call and forward to it.
pub trait View: Send + Sync {
    /// The routing context this view emits out-messages from.
    fn name(&self) -> &str;

    fn lock(&self) {}

    fn unlock(&self) {}

    fn close(&self) {}

    fn inflow(&self, nav: &Navigator, transition: &TransitionInstance)
        -> Result<Outcome, NavError>;
}

/// Where a dispatch comes from.
#[derive(Clone)]
pub enum Origin {
    /// The bootstrap origin used by `Navigator::start`; resolves in the global context.
    Root,
    /// A non-view origin, e.g. a request handler. Its name is the context key.
    Named(String),
    View(Arc<dyn View>),
}

impl Origin {
    pub fn context_key(&self) -> &str {
        match self {
            Origin::Root => "",
            Origin::Named(name) => name,
            Origin::View(view) => view.name(),
        }
    }

    pub fn as_view(&self) -> Option<&Arc<dyn View>> {
        match self {
            Origin::View(view) => Some(view),
            _ => None,
        }
    }
}

impl From<Arc<dyn View>> for Origin {
    fn from(view: Arc<dyn View>) -> Self {
        Origin::View(view)
    }
}

impl From<&str> for Origin {
    fn from(name: &str) -> Self {
        Origin::Named(name.to_string())
    }
}

impl fmt::Debug for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Root => f.write_str("Root"),
            Origin::Named(name) => f.debug_tuple("Named").field(name).finish(),
            Origin::View(view) => f.debug_tuple("View").field(&view.name()).finish(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewState {
    Active,
    Locked,
    Closed,
}

/// Lifecycle bookkeeping a view can embed to serialise its own lock/unlock/close
/// calls when it is shared between concurrent modal dispatches.
///
/// Locks nest: a view locked by two overlapping modal calls stays `Locked`
/// until both have unlocked. `Closed` is final.
#[derive(Debug, Default)]
pub struct Lifecycle {
    locks: AtomicUsize,
    closed: AtomicBool,
}

impl Lifecycle {
    pub fn lock(&self) {
        self.locks.fetch_add(1, Ordering::AcqRel);
    }

    pub fn unlock(&self) {
        let _ = self
            .locks
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn state(&self) -> ViewState {
        if self.closed.load(Ordering::Acquire) {
            ViewState::Closed
        } else if self.locks.load(Ordering::Acquire) > 0 {
            ViewState::Locked
        } else {
            ViewState::Active
        }
    }
}
