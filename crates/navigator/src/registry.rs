//! Resolution of `viewtype` names from routing files to view instances.

use std::{collections::HashMap, sync::Arc};

use crate::view::View;

/// Turns a `viewtype` (and the target context it was declared under) into a view.
pub trait ViewFactory: Send + Sync {
    fn resolve(&self, view_type: &str, context: &str) -> Option<Arc<dyn View>>;
}

type Constructor = Arc<dyn Fn(&str) -> Arc<dyn View> + Send + Sync>;

/// A string-keyed map of view constructors.
#[derive(Default, Clone)]
pub struct ViewRegistry {
    constructors: HashMap<String, Constructor>,
}

impl ViewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a constructor called once per routing line naming `view_type`.
    /// It receives the target context from that line.
    pub fn register<F>(&mut self, view_type: impl Into<String>, constructor: F) -> &mut Self
    where
        F: Fn(&str) -> Arc<dyn View> + Send + Sync + 'static,
    {
        self.constructors
            .insert(view_type.into(), Arc::new(constructor));
        self
    }

    /// Registers one instance handed out for every line naming `view_type`.
    pub fn register_shared(&mut self, view_type: impl Into<String>, view: Arc<dyn View>) -> &mut Self {
        self.register(view_type, move |_| Arc::clone(&view))
    }

    pub fn contains(&self, view_type: &str) -> bool {
        self.constructors.contains_key(view_type)
    }
}

impl ViewFactory for ViewRegistry {
    fn resolve(&self, view_type: &str, context: &str) -> Option<Arc<dyn View>> {
        self.constructors
            .get(view_type)
            .map(|constructor| constructor(context))
    }
}
