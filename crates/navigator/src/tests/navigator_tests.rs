use super::*;

use std::{
    fs,
    sync::{Barrier, Mutex},
    thread,
};

use serde_json::json;

use crate::{
    registry::ViewRegistry,
    view::{Lifecycle, View, ViewState},
};

type CallLog = Arc<Mutex<Vec<String>>>;

struct RecordingView {
    name: String,
    log: CallLog,
    lifecycle: Lifecycle,
}

impl RecordingView {
    fn new(name: &str, log: &CallLog) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            log: Arc::clone(log),
            lifecycle: Lifecycle::default(),
        })
    }

    fn record(&self, call: &str) {
        self.log
            .lock()
            .expect("log")
            .push(format!("{}.{call}", self.name));
    }
}

impl View for RecordingView {
    fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) {
        self.lifecycle.lock();
        self.record("lock");
    }

    fn unlock(&self) {
        self.lifecycle.unlock();
        self.record("unlock");
    }

    fn close(&self) {
        self.lifecycle.close();
        self.record("close");
    }

    fn inflow(&self, _nav: &Navigator, transition: &TransitionInstance) -> Result<Outcome, NavError> {
        self.record("inflow");
        let origin = transition.origin().map(|view| view.name().to_string());
        Ok(Outcome::new(
            self.name.clone(),
            json!({
                "payload": transition.payload(),
                "mode": transition.mode(),
                "origin": origin,
                "transition": transition.name(),
            }),
        ))
    }
}

fn log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

fn calls(log: &CallLog) -> Vec<String> {
    log.lock().expect("log").clone()
}

fn as_origin(view: &Arc<RecordingView>) -> Origin {
    let view: Arc<dyn View> = view.clone();
    Origin::View(view)
}

#[test]
fn context_entry_wins_over_global() {
    let log = log();
    let nav = Navigator::new();
    nav.add_transition("", TransitionTemplate::new("M", RecordingView::new("global", &log)));
    nav.add_transition("ctxA", TransitionTemplate::new("M", RecordingView::new("specific", &log)));

    let origin = RecordingView::new("ctxA", &log);
    let outcome = nav
        .dispatch(&as_origin(&origin), "M", Mode::Open, json!(null))
        .expect("dispatch");
    assert_eq!(outcome.title, "specific");
}

#[test]
fn falls_back_to_global_context() {
    let log = log();
    let nav = Navigator::new();
    nav.add_transition("", TransitionTemplate::new("M", RecordingView::new("global", &log)));

    let origin = RecordingView::new("elsewhere", &log);
    let outcome = nav
        .dispatch(&as_origin(&origin), "M", Mode::Open, json!(null))
        .expect("dispatch");
    assert_eq!(outcome.title, "global");

    let outcome = nav
        .dispatch(&Origin::from("web-handler"), "M", Mode::Modal, json!(null))
        .expect("dispatch from named origin");
    assert_eq!(outcome.title, "global");
}

#[test]
fn unknown_message_is_a_flow_error_and_exit_closes() {
    let nav = Navigator::new();

    let err = nav
        .dispatch(&Origin::Root, "FOO", Mode::Modal, json!(null))
        .expect_err("unknown message");
    assert!(matches!(err, NavError::Flow { ref message, .. } if message == "FOO"));
    assert_eq!(err.to_string(), "unknown outmessage: FOO");

    let err = nav
        .dispatch(&Origin::Root, EXIT, Mode::Modal, json!(null))
        .expect_err("exit");
    assert!(err.is_application_closed());
}

#[test]
fn exit_resolves_like_any_message_when_routed() {
    let log = log();
    let nav = Navigator::new();
    nav.add_transition("APP", TransitionTemplate::new(EXIT, RecordingView::new("goodbye", &log)));

    let origin = RecordingView::new("APP", &log);
    let outcome = nav
        .dispatch(&as_origin(&origin), EXIT, Mode::Replace, json!(null))
        .expect("routed exit");
    assert_eq!(outcome.title, "goodbye");

    let other = RecordingView::new("OTHER", &log);
    let err = nav
        .dispatch(&as_origin(&other), EXIT, Mode::Replace, json!(null))
        .expect_err("unrouted exit");
    assert!(err.is_application_closed());
}

#[test]
fn sequential_dispatches_keep_their_own_payload() {
    let log = log();
    let nav = Navigator::new();
    nav.add_transition("", TransitionTemplate::new("SHOW", RecordingView::new("target", &log)));

    let first = nav
        .dispatch(&Origin::Root, "SHOW", Mode::Modal, json!("P1"))
        .expect("first");
    let second = nav
        .dispatch(&Origin::Root, "SHOW", Mode::Open, json!("P2"))
        .expect("second");

    assert_eq!(first.result["payload"], json!("P1"));
    assert_eq!(first.result["mode"], json!("modal"));
    assert_eq!(second.result["payload"], json!("P2"));
    assert_eq!(second.result["mode"], json!("open"));
}

struct RendezvousView {
    barrier: Barrier,
}

impl View for RendezvousView {
    fn name(&self) -> &str {
        "rendezvous"
    }

    fn inflow(&self, _nav: &Navigator, transition: &TransitionInstance) -> Result<Outcome, NavError> {
        // Both dispatches are inside inflow before either reads its payload.
        self.barrier.wait();
        Ok(Outcome::new("rendezvous", transition.payload().clone()))
    }
}

#[test]
fn concurrent_dispatches_through_one_template_are_isolated() {
    let nav = Navigator::new();
    nav.add_transition(
        "",
        TransitionTemplate::new(
            "MEET",
            Arc::new(RendezvousView {
                barrier: Barrier::new(2),
            }),
        ),
    );

    let (first, second) = thread::scope(|scope| {
        let first = scope.spawn(|| nav.dispatch(&Origin::Root, "MEET", Mode::Modal, json!(1)));
        let second = scope.spawn(|| nav.dispatch(&Origin::Root, "MEET", Mode::Modal, json!(2)));
        (
            first.join().expect("first thread"),
            second.join().expect("second thread"),
        )
    });

    assert_eq!(first.expect("first").result, json!(1));
    assert_eq!(second.expect("second").result, json!(2));
}

#[test]
fn modal_locks_around_inflow() {
    let log = log();
    let nav = Navigator::new();
    nav.add_transition("", TransitionTemplate::new("GO", RecordingView::new("T", &log)));
    let origin = RecordingView::new("O", &log);

    let outcome = nav
        .dispatch(&as_origin(&origin), "GO", Mode::Modal, json!(null))
        .expect("dispatch");

    assert_eq!(calls(&log), vec!["O.lock", "T.inflow", "O.unlock"]);
    assert_eq!(outcome.result["origin"], json!("O"));
    assert_eq!(origin.lifecycle.state(), ViewState::Active);
}

#[test]
fn replace_closes_origin_before_inflow() {
    let log = log();
    let nav = Navigator::new();
    nav.add_transition("", TransitionTemplate::new("GO", RecordingView::new("T", &log)));
    let origin = RecordingView::new("O", &log);

    let outcome = nav
        .dispatch(&as_origin(&origin), "GO", Mode::Replace, json!(null))
        .expect("dispatch");

    assert_eq!(calls(&log), vec!["O.close", "T.inflow"]);
    assert_eq!(outcome.result["origin"], json!(null));
    assert_eq!(origin.lifecycle.state(), ViewState::Closed);
}

#[test]
fn replace_from_root_skips_close() {
    let log = log();
    let nav = Navigator::new();
    nav.add_transition("", TransitionTemplate::new("GO", RecordingView::new("T", &log)));

    nav.dispatch(&Origin::Root, "GO", Mode::Replace, json!(null))
        .expect("dispatch");
    assert_eq!(calls(&log), vec!["T.inflow"]);
}

#[test]
fn open_leaves_origin_alone() {
    let log = log();
    let nav = Navigator::new();
    nav.add_transition("", TransitionTemplate::new("GO", RecordingView::new("T", &log)));
    let origin = RecordingView::new("O", &log);

    let outcome = nav
        .dispatch(&as_origin(&origin), "GO", Mode::Open, json!(null))
        .expect("dispatch");

    assert_eq!(calls(&log), vec!["T.inflow"]);
    assert_eq!(outcome.result["origin"], json!("O"));
}

#[test]
fn start_dispatches_modal_start_from_root() {
    let log = log();
    let nav = Navigator::new();
    nav.add_transition("", TransitionTemplate::new(START, RecordingView::new("APP", &log)));

    let outcome = nav.start(json!({"name": "demo"})).expect("start");
    assert_eq!(outcome.title, "APP");
    assert_eq!(outcome.result["transition"], json!("START"));
    assert_eq!(outcome.result["mode"], json!("modal"));
    assert_eq!(outcome.result["payload"]["name"], json!("demo"));
}

#[test]
fn observer_sees_instance_and_its_failures_are_swallowed() {
    let log = log();
    let nav = Navigator::new();
    nav.add_transition("", TransitionTemplate::new("GO", RecordingView::new("T", &log)));

    let seen = Mutex::new(Vec::new());
    let observer = |instance: &TransitionInstance| -> anyhow::Result<()> {
        seen.lock()
            .expect("seen")
            .push((instance.name().to_string(), instance.payload().clone()));
        anyhow::bail!("observer broke")
    };
    let outcome = nav
        .dispatch_with(
            &Origin::Root,
            "GO",
            Mode::Modal,
            json!(5),
            DispatchOptions {
                observer: Some(&observer),
            },
        )
        .expect("dispatch survives observer error");
    assert_eq!(outcome.title, "T");
    assert_eq!(
        seen.into_inner().expect("seen"),
        vec![("GO".to_string(), json!(5))]
    );

    let panicking = |_: &TransitionInstance| -> anyhow::Result<()> { panic!("observer panic") };
    nav.dispatch_with(
        &Origin::Root,
        "GO",
        Mode::Modal,
        json!(null),
        DispatchOptions {
            observer: Some(&panicking),
        },
    )
    .expect("dispatch survives observer panic");
}

/// Forwards to `NEXT` from its own inflow, the way a menu view would.
struct ForwardingView {
    name: String,
    mode: Mode,
}

impl View for ForwardingView {
    fn name(&self) -> &str {
        &self.name
    }

    fn inflow(&self, nav: &Navigator, transition: &TransitionInstance) -> Result<Outcome, NavError> {
        nav.dispatch(&transition.as_origin(), "NEXT", self.mode, transition.payload().clone())
    }
}

#[test]
fn views_dispatch_onwards_from_their_own_context() {
    let log = log();
    let nav = Navigator::new();
    nav.add_transition(
        "",
        TransitionTemplate::new(
            START,
            Arc::new(ForwardingView {
                name: "menu".into(),
                mode: Mode::Modal,
            }),
        ),
    );
    nav.add_transition("menu", TransitionTemplate::new("NEXT", RecordingView::new("leaf", &log)));

    let outcome = nav.start(json!("carried")).expect("start");
    assert_eq!(outcome.title, "leaf");
    assert_eq!(outcome.result["origin"], json!("menu"));
    assert_eq!(outcome.result["payload"], json!("carried"));
}

#[test]
fn errors_from_nested_dispatch_reach_the_caller() {
    let nav = Navigator::new();
    nav.add_transition(
        "",
        TransitionTemplate::new(
            START,
            Arc::new(ForwardingView {
                name: "menu".into(),
                mode: Mode::Replace,
            }),
        ),
    );

    let err = nav.start(json!(null)).expect_err("NEXT is not routed");
    assert!(matches!(err, NavError::Flow { ref context, .. } if context == "menu"));
}

#[test]
fn empty_root_table_is_a_configuration_error() {
    let install = tempfile::tempdir().expect("install dir");
    let config = tempfile::tempdir().expect("config dir");
    let dirs = vec![install.path().to_path_buf(), config.path().to_path_buf()];
    let views = ViewRegistry::new();
    let nav = Navigator::new();

    let err = nav
        .load_routing_table("", "app.flow", &dirs, &views)
        .expect_err("root flow missing everywhere");
    assert!(matches!(err, NavError::Configuration(ref msg) if msg.contains("app.flow")));

    let loaded = nav
        .load_routing_table("kinship", "modules/kinship.flow", &dirs, &views)
        .expect("module flow may be missing");
    assert_eq!(loaded, 0);
    assert!(nav.routes().contexts().contains(&"kinship".to_string()));
    assert!(nav.routes().is_empty("kinship"));
}

#[test]
fn root_table_found_in_one_location_is_enough() {
    let install = tempfile::tempdir().expect("install dir");
    let config = tempfile::tempdir().expect("config dir");
    fs::write(
        config.path().join("app.flow"),
        "START: APP.Application\nABOUT: APP.About # show info\n",
    )
    .expect("write flow");

    let log = log();
    let mut views = ViewRegistry::new();
    let about_log = Arc::clone(&log);
    let app_log = Arc::clone(&log);
    views
        .register("Application", move |_| -> Arc<dyn View> {
            RecordingView::new("APP", &app_log)
        })
        .register("About", move |_| -> Arc<dyn View> {
            RecordingView::new("About", &about_log)
        });

    let nav = Navigator::new();
    let dirs = vec![install.path().to_path_buf(), config.path().to_path_buf()];
    let loaded = nav
        .load_routing_table("", "app.flow", &dirs, &views)
        .expect("root flow");
    assert_eq!(loaded, 2);

    let outcome = nav.start(json!(null)).expect("start");
    assert_eq!(outcome.title, "APP");
}

#[test]
fn routing_source_errors_are_reported() {
    let nav = Navigator::new();
    let views = ViewRegistry::new();
    let err = nav
        .load_routing_source("", "START: APP.Missing", &views)
        .expect_err("unknown view type");
    assert!(matches!(err, NavError::UnknownViewType(ref name) if name == "Missing"));
}

#[test]
fn view_definitions_are_kept_by_name() {
    let nav = Navigator::new();
    assert!(nav.view_definition("INDIVIDUALS").is_none());
    nav.register_view_definition("INDIVIDUALS", json!({"query": "individuals"}));
    assert_eq!(
        nav.view_definition("INDIVIDUALS"),
        Some(json!({"query": "individuals"}))
    );
}

#[tokio::test]
async fn fetch_without_persistence_is_reported() {
    let nav = Navigator::new();
    let err = nav
        .fetch("main", "individual", &KeyValue::Single(json!(1)))
        .await
        .expect_err("no persistence");
    assert!(matches!(err, NavError::NoPersistence));
}

#[tokio::test]
async fn collect_stops_at_the_first_error() {
    use futures::{stream, StreamExt};
    use std::sync::atomic::{AtomicUsize, Ordering};

    let pulled = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&pulled);
    let results: ResultStream = stream::iter(vec![
        Ok(json!(1)),
        Err(NavError::QueryNotFound("broken".into())),
        Ok(json!(3)),
    ])
    .inspect(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    })
    .boxed();

    let err = Navigator::collect(results).await.expect_err("error");
    assert!(matches!(err, NavError::QueryNotFound(ref name) if name == "broken"));
    assert_eq!(pulled.load(Ordering::SeqCst), 2);
}
