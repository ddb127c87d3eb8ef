//! View-navigation engine: routes out-messages emitted by views to target
//! views through a context-keyed routing table, and exposes named queries and
//! key-based fetches to those views.

pub mod fetch;
pub mod modules;
pub mod navigator;
pub mod present;
pub mod query;
pub mod registry;
pub mod routing;
pub mod transition;
pub mod view;

pub use fetch::{key_filter, FetchResolver, Persistence};
pub use modules::{FeatureModule, ModuleLoader};
pub use navigator::{DispatchObserver, DispatchOptions, Navigator, EXIT, START};
pub use present::{JsonPresenter, Presenter};
pub use query::{PreparedQuery, Query, QueryRegistry, RecordStream, ResultStream};
pub use registry::{ViewFactory, ViewRegistry};
pub use routing::{parse_flow, parse_line, read_flow, FlowLine, RoutingTable, GLOBAL_CONTEXT};
pub use shared::{
    domain::{KeyValue, Mode, Outcome, Payload, QueryParams, Record},
    error::{ErrorCode, NavError},
};
pub use transition::{TransitionInstance, TransitionTemplate};
pub use view::{Lifecycle, Origin, View, ViewState};
