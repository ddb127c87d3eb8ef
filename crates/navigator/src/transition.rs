use std::{fmt, sync::Arc};

use shared::domain::{Mode, Payload};

use crate::view::{Origin, View};

/// An immutable, named edge to a target view, shared by every dispatch that
/// resolves to it.
#[derive(Clone)]
pub struct TransitionTemplate {
    name: String,
    target: Arc<dyn View>,
}

impl TransitionTemplate {
    pub fn new(name: impl Into<String>, target: Arc<dyn View>) -> Self {
        Self {
            name: name.into(),
            target,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> &Arc<dyn View> {
        &self.target
    }

    /// Binds a payload and mode into a private instance. The template is never touched.
    pub fn instantiate(&self, payload: Payload, mode: Mode) -> TransitionInstance {
        TransitionInstance {
            name: self.name.clone(),
            target: Arc::clone(&self.target),
            payload,
            mode,
            origin: None,
        }
    }
}

impl fmt::Debug for TransitionTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransitionTemplate")
            .field("name", &self.name)
            .field("target", &self.target.name())
            .finish()
    }
}

/// One bound invocation of a template: the unit of work handed to `View::inflow`.
pub struct TransitionInstance {
    name: String,
    target: Arc<dyn View>,
    payload: Payload,
    mode: Mode,
    origin: Option<Arc<dyn View>>,
}

impl TransitionInstance {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> &Arc<dyn View> {
        &self.target
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// The view this transition was issued from, unset for `Replace`.
    pub fn origin(&self) -> Option<&Arc<dyn View>> {
        self.origin.as_ref()
    }

    /// The target as an origin, for views dispatching onwards from their own `inflow`.
    pub fn as_origin(&self) -> Origin {
        Origin::View(Arc::clone(&self.target))
    }

    pub(crate) fn set_origin(&mut self, origin: Option<Arc<dyn View>>) {
        self.origin = origin;
    }
}

impl fmt::Debug for TransitionInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransitionInstance")
            .field("name", &self.name)
            .field("target", &self.target.name())
            .field("mode", &self.mode)
            .field("origin", &self.origin.as_ref().map(|view| view.name().to_string()))
            .finish_non_exhaustive()
    }
}
