use std::{
    collections::HashMap,
    panic::{self, AssertUnwindSafe},
    path::{Path, PathBuf},
    sync::{Arc, PoisonError, RwLock},
};

use futures::TryStreamExt;
use serde_json::Value;
use shared::{
    domain::{KeyValue, Mode, Outcome, Payload, QueryParams},
    error::NavError,
};
use tracing::{debug, info, warn};

use crate::{
    fetch::{FetchResolver, Persistence},
    present::{JsonPresenter, Presenter},
    query::{present_stream, PreparedQuery, Query, QueryRegistry, ResultStream},
    registry::ViewFactory,
    routing::{parse_flow, read_flow, RoutingTable, GLOBAL_CONTEXT},
    transition::{TransitionInstance, TransitionTemplate},
    view::Origin,
};

pub const START: &str = "START";
pub const EXIT: &str = "EXIT";

/// Called with every instance before the target runs. Failures are logged and ignored.
pub type DispatchObserver<'a> = &'a (dyn Fn(&TransitionInstance) -> anyhow::Result<()> + Sync);

#[derive(Default, Clone, Copy)]
pub struct DispatchOptions<'a> {
    pub observer: Option<DispatchObserver<'a>>,
}

/// Owns the routing table and query registry and moves control between views.
pub struct Navigator {
    routes: RoutingTable,
    queries: QueryRegistry,
    definitions: RwLock<HashMap<String, Value>>,
    fetcher: Option<FetchResolver>,
    presenter: Arc<dyn Presenter>,
}

impl Default for Navigator {
    fn default() -> Self {
        Self::new()
    }
}

impl Navigator {
    pub fn new() -> Self {
        let routes = RoutingTable::new();
        routes.ensure_context(GLOBAL_CONTEXT);
        Self {
            routes,
            queries: QueryRegistry::new(),
            definitions: RwLock::new(HashMap::new()),
            fetcher: None,
            presenter: Arc::new(JsonPresenter),
        }
    }

    pub fn with_persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.fetcher = Some(FetchResolver::new(persistence));
        self
    }

    pub fn with_presenter(mut self, presenter: Arc<dyn Presenter>) -> Self {
        self.presenter = presenter;
        self
    }

    pub fn routes(&self) -> &RoutingTable {
        &self.routes
    }

    pub fn queries(&self) -> &QueryRegistry {
        &self.queries
    }

    /// Loads `file_name` from every candidate directory into `context`.
    ///
    /// Missing or malformed candidates are skipped. Ending up with nothing for
    /// the global context is a configuration error; a feature-module context
    /// simply stays empty.
    pub fn load_routing_table(
        &self,
        context: &str,
        file_name: impl AsRef<Path>,
        dirs: &[PathBuf],
        views: &dyn ViewFactory,
    ) -> Result<usize, NavError> {
        let file_name = file_name.as_ref();
        let templates = read_flow(file_name, dirs, views);
        let loaded = self.routes.extend(context, templates);
        info!(context, file = %file_name.display(), entries = loaded, "routing table loaded");

        if context == GLOBAL_CONTEXT && self.routes.is_empty(GLOBAL_CONTEXT) {
            return Err(NavError::Configuration(format!(
                "could not load routing table {} from any of {:?}",
                file_name.display(),
                dirs
            )));
        }
        Ok(loaded)
    }

    /// Parses routing text held in memory. Unlike file candidates, a bad line is reported.
    pub fn load_routing_source(
        &self,
        context: &str,
        source: &str,
        views: &dyn ViewFactory,
    ) -> Result<usize, NavError> {
        let templates = parse_flow(source, views)?;
        Ok(self.routes.extend(context, templates))
    }

    pub fn add_transition(&self, context: &str, template: TransitionTemplate) {
        self.routes.insert(context, template);
    }

    pub fn register_query(&self, name: impl Into<String>, query: Arc<dyn Query>, defaults: QueryParams) {
        self.queries.register(name, query, defaults);
    }

    /// Free-form per-message view metadata contributed by feature modules.
    pub fn register_view_definition(&self, name: impl Into<String>, definition: Value) {
        self.definitions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), definition);
    }

    pub fn view_definition(&self, name: &str) -> Option<Value> {
        self.definitions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Finds the template for `message`, context first, then global.
    pub fn resolve(&self, context: &str, message: &str) -> Result<Arc<TransitionTemplate>, NavError> {
        if let Some(template) = self.routes.resolve(context, message) {
            debug!(context, outmessage = message, view = template.target().name(), "resolved");
            return Ok(template);
        }
        if message == EXIT {
            debug!(context, "exit requested");
            return Err(NavError::ApplicationClosed);
        }
        warn!(context, outmessage = message, "unknown outmessage");
        Err(NavError::flow(context, message))
    }

    pub fn dispatch(
        &self,
        origin: &Origin,
        message: &str,
        mode: Mode,
        payload: Payload,
    ) -> Result<Outcome, NavError> {
        self.dispatch_with(origin, message, mode, payload, DispatchOptions::default())
    }

    /// Resolves `message` from `origin`, binds a fresh instance and runs the
    /// target, adjusting the origin's lifecycle according to `mode`.
    ///
    /// Panics raised by views are not caught here.
    pub fn dispatch_with(
        &self,
        origin: &Origin,
        message: &str,
        mode: Mode,
        payload: Payload,
        options: DispatchOptions<'_>,
    ) -> Result<Outcome, NavError> {
        let context = origin.context_key();
        let template = self.resolve(context, message)?;
        let mut instance = template.instantiate(payload, mode);

        if let Some(observer) = options.observer {
            notify(observer, &instance);
        }

        debug!(context, outmessage = message, %mode, "dispatching");
        let target = Arc::clone(instance.target());
        match mode {
            Mode::Modal => {
                let view = origin.as_view();
                if let Some(view) = view {
                    view.lock();
                }
                instance.set_origin(view.cloned());
                let outcome = target.inflow(self, &instance);
                if let Some(view) = view {
                    view.unlock();
                }
                outcome
            }
            Mode::Replace => {
                instance.set_origin(None);
                if let Some(view) = origin.as_view() {
                    view.close();
                }
                target.inflow(self, &instance)
            }
            Mode::Open => {
                instance.set_origin(origin.as_view().cloned());
                target.inflow(self, &instance)
            }
        }
    }

    /// Bootstrap: a modal `START` from the root origin.
    pub fn start(&self, payload: Payload) -> Result<Outcome, NavError> {
        info!("starting navigation");
        self.dispatch(&Origin::Root, START, Mode::Modal, payload)
    }

    pub fn prepare_query(&self, name: &str, params: &QueryParams) -> Result<PreparedQuery, NavError> {
        self.queries.prepare(name, params)
    }

    /// Runs a registered query. Nothing executes until the stream is polled.
    pub fn run_query(&self, name: &str, params: &QueryParams) -> Result<ResultStream, NavError> {
        self.queries.run(name, params, Arc::clone(&self.presenter))
    }

    pub async fn fetch(&self, module: &str, table: &str, key: &KeyValue) -> Result<Value, NavError> {
        let record = self.fetcher()?.fetch_by_key(module, table, key).await?;
        Ok(self.presenter.present(record))
    }

    /// Re-resolves the owner and yields the entities linked to it through `link`.
    pub async fn fetch_set(
        &self,
        module: &str,
        table: &str,
        key: &KeyValue,
        link: &str,
    ) -> Result<ResultStream, NavError> {
        let records = self.fetcher()?.fetch_set(module, table, key, link).await?;
        Ok(present_stream(records, Arc::clone(&self.presenter)))
    }

    /// Collects a result stream, stopping at the first error.
    pub async fn collect(stream: ResultStream) -> Result<Vec<Value>, NavError> {
        stream.try_collect().await
    }

    fn fetcher(&self) -> Result<&FetchResolver, NavError> {
        self.fetcher.as_ref().ok_or(NavError::NoPersistence)
    }
}

fn notify(observer: DispatchObserver<'_>, instance: &TransitionInstance) {
    match panic::catch_unwind(AssertUnwindSafe(|| observer(instance))) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(transition = instance.name(), error = %err, "dispatch observer failed"),
        Err(_) => warn!(transition = instance.name(), "dispatch observer panicked"),
    }
}

#[cfg(test)]
#[path = "tests/navigator_tests.rs"]
mod tests;
