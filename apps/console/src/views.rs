//! Line-oriented terminal views.

use std::{
    fs,
    io::{self, BufRead, BufReader, Write},
    path::PathBuf,
    sync::{Arc, Mutex, PoisonError},
};

use navigator::{
    KeyValue, Lifecycle, Mode, NavError, Navigator, Outcome, QueryParams, TransitionInstance,
    View, ViewState, EXIT,
};
use serde_json::{json, Map, Value};
use shared::domain::scalar_text;
use tokio::runtime::Handle;
use tracing::{debug, warn};

/// Shared input/output for every view of one session.
pub struct Terminal {
    input: Mutex<Box<dyn BufRead + Send>>,
    output: Mutex<Box<dyn Write + Send>>,
}

impl Terminal {
    pub fn new(input: impl BufRead + Send + 'static, output: impl Write + Send + 'static) -> Self {
        Self {
            input: Mutex::new(Box::new(input)),
            output: Mutex::new(Box::new(output)),
        }
    }

    pub fn stdio() -> Self {
        Self::new(BufReader::new(io::stdin()), io::stdout())
    }

    pub fn say(&self, text: &str) -> io::Result<()> {
        let mut output = self.output.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(output, "{text}")?;
        output.flush()
    }

    /// Prints `question` and reads one trimmed line; `None` at end of input.
    pub fn prompt(&self, question: &str) -> io::Result<Option<String>> {
        {
            let mut output = self.output.lock().unwrap_or_else(PoisonError::into_inner);
            write!(output, "{question}")?;
            output.flush()?;
        }
        let mut line = String::new();
        let read = self
            .input
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .read_line(&mut line)?;
        if read == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }
}

/// Errors a view reports on screen and recovers from.
fn recoverable(err: &NavError) -> bool {
    !matches!(err, NavError::ApplicationClosed | NavError::Io(_))
}

/// The main menu. Runs until the user exits or input ends.
pub struct ApplicationView {
    context: String,
    title: String,
    about: PathBuf,
    terminal: Arc<Terminal>,
    lifecycle: Lifecycle,
}

impl ApplicationView {
    pub fn new(context: &str, title: impl Into<String>, about: PathBuf, terminal: Arc<Terminal>) -> Self {
        Self {
            context: context.to_string(),
            title: title.into(),
            about,
            terminal,
            lifecycle: Lifecycle::default(),
        }
    }

    pub fn state(&self) -> ViewState {
        self.lifecycle.state()
    }
}

impl View for ApplicationView {
    fn name(&self) -> &str {
        &self.context
    }

    fn lock(&self) {
        self.lifecycle.lock();
    }

    fn unlock(&self) {
        self.lifecycle.unlock();
    }

    fn close(&self) {
        self.lifecycle.close();
    }

    fn inflow(&self, nav: &Navigator, transition: &TransitionInstance) -> Result<Outcome, NavError> {
        let origin = transition.as_origin();
        loop {
            self.terminal.say(&format!("\n== {} ==", self.title))?;
            let Some(choice) = self
                .terminal
                .prompt("[A]bout  [C]onfiguration  [T]ables  e[X]it > ")?
            else {
                return nav.dispatch(&origin, EXIT, Mode::Replace, Value::Null);
            };

            let (message, payload) = match choice.to_ascii_lowercase().as_str() {
                "" => continue,
                "a" => ("ABOUT", json!({ "path": self.about.display().to_string() })),
                "c" => ("CONFIGURATION", Value::Null),
                "t" => ("TABLES", json!({ "view": "TABLES" })),
                "x" => return nav.dispatch(&origin, EXIT, Mode::Replace, Value::Null),
                other => {
                    self.terminal.say(&format!("unknown choice '{other}'"))?;
                    continue;
                }
            };

            match nav.dispatch(&origin, message, Mode::Modal, payload) {
                Ok(outcome) => debug!(outmessage = message, title = %outcome.title, "returned"),
                Err(err) if recoverable(&err) => {
                    warn!(outmessage = message, error = %err, "navigation failed");
                    self.terminal.say(&format!("error: {err}"))?;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Prints the text file named by the payload's `path`.
pub struct AboutView {
    context: String,
    terminal: Arc<Terminal>,
}

impl AboutView {
    pub fn new(context: &str, terminal: Arc<Terminal>) -> Self {
        Self {
            context: context.to_string(),
            terminal,
        }
    }
}

impl View for AboutView {
    fn name(&self) -> &str {
        &self.context
    }

    fn inflow(&self, _nav: &Navigator, transition: &TransitionInstance) -> Result<Outcome, NavError> {
        let path = transition
            .payload()
            .get("path")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                format!("(no about text at '{path}')")
            }
            Err(err) => return Err(err.into()),
        };
        self.terminal.say(text.trim_end())?;
        Ok(Outcome::new("About", Value::String(text)))
    }
}

/// Prints the effective settings.
pub struct ConfigurationView {
    context: String,
    settings: Value,
    terminal: Arc<Terminal>,
}

impl ConfigurationView {
    pub fn new(context: &str, settings: Value, terminal: Arc<Terminal>) -> Self {
        Self {
            context: context.to_string(),
            settings,
            terminal,
        }
    }
}

impl View for ConfigurationView {
    fn name(&self) -> &str {
        &self.context
    }

    fn inflow(&self, _nav: &Navigator, _transition: &TransitionInstance) -> Result<Outcome, NavError> {
        let text = serde_json::to_string_pretty(&self.settings)
            .map_err(|err| NavError::Persistence(err.into()))?;
        self.terminal.say(&text)?;
        Ok(Outcome::new("Configuration", self.settings.clone()))
    }
}

/// Pages through a named query.
///
/// The view definition named by the payload's `view` (or the out-message)
/// supplies `title` and `query`. A definition with `drill` opens the row's
/// `drill` field as another table view through `ROWS`; one with `table` and
/// `key` opens the row through `RECORD`.
pub struct TableView {
    context: String,
    terminal: Arc<Terminal>,
    handle: Handle,
}

impl TableView {
    pub fn new(context: &str, terminal: Arc<Terminal>, handle: Handle) -> Self {
        Self {
            context: context.to_string(),
            terminal,
            handle,
        }
    }

    fn definition(&self, nav: &Navigator, transition: &TransitionInstance) -> Map<String, Value> {
        let payload = transition.payload();
        let name = payload
            .get("view")
            .and_then(Value::as_str)
            .unwrap_or(transition.name());
        let mut definition = match nav.view_definition(name) {
            Some(Value::Object(definition)) => definition,
            _ => Map::new(),
        };
        if let Some(query) = payload.get("query") {
            definition.insert("query".into(), query.clone());
        }
        definition
    }

    fn open(
        &self,
        nav: &Navigator,
        transition: &TransitionInstance,
        definition: &Map<String, Value>,
        row: &Value,
    ) -> Result<Outcome, NavError> {
        let origin = transition.as_origin();
        if let Some(field) = definition.get("drill").and_then(Value::as_str) {
            let target = row.get(field).map(scalar_text).unwrap_or_default();
            return nav.dispatch(
                &origin,
                "ROWS",
                Mode::Modal,
                json!({ "view": format!("rows:{target}") }),
            );
        }

        let columns = definition.get("key").and_then(Value::as_array);
        match (definition.get("table"), columns) {
            (Some(table), Some(columns)) if !columns.is_empty() => {
                let key: Vec<Value> = columns
                    .iter()
                    .filter_map(Value::as_str)
                    .map(|column| row.get(column).cloned().unwrap_or(Value::Null))
                    .collect();
                let payload = json!({
                    "module": definition.get("module").cloned().unwrap_or(json!("")),
                    "table": table,
                    "key": key,
                    "related": definition.get("related").cloned().unwrap_or(json!([])),
                });
                nav.dispatch(&origin, "RECORD", Mode::Modal, payload)
            }
            _ => Err(NavError::Configuration(
                "rows of this table cannot be opened".into(),
            )),
        }
    }
}

impl View for TableView {
    fn name(&self) -> &str {
        &self.context
    }

    fn inflow(&self, nav: &Navigator, transition: &TransitionInstance) -> Result<Outcome, NavError> {
        let definition = self.definition(nav, transition);
        let query = definition
            .get("query")
            .and_then(Value::as_str)
            .ok_or_else(|| NavError::QueryNotFound(transition.name().to_string()))?
            .to_string();
        let title = definition
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or(&query)
            .to_string();

        let mut pagenum: i64 = 1;
        loop {
            let mut params = QueryParams::new();
            params.insert(navigator::query::PAGENUM.into(), Value::from(pagenum));
            let stream = nav.run_query(&query, &params)?;
            let rows = self.handle.block_on(Navigator::collect(stream))?;

            self.terminal.say(&format!("\n-- {title} (page {pagenum}) --"))?;
            if rows.is_empty() {
                self.terminal.say("(no rows)")?;
            }
            for (index, row) in rows.iter().enumerate() {
                self.terminal.say(&format!("{:>3}. {}", index + 1, row_text(row)))?;
            }

            let Some(choice) = self.terminal.prompt("[N]ext  [P]revious  <number> open  [B]ack > ")? else {
                return Ok(Outcome::new(title, Value::Array(rows)));
            };
            match choice.to_ascii_lowercase().as_str() {
                "n" => pagenum += 1,
                "p" => pagenum = (pagenum - 1).max(1),
                "b" | "" => return Ok(Outcome::new(title, Value::Array(rows))),
                other => {
                    let row = other
                        .parse::<usize>()
                        .ok()
                        .and_then(|number| number.checked_sub(1))
                        .and_then(|index| rows.get(index));
                    let Some(row) = row else {
                        self.terminal.say(&format!("unknown choice '{other}'"))?;
                        continue;
                    };
                    if let Err(err) = self.open(nav, transition, &definition, row) {
                        if !recoverable(&err) {
                            return Err(err);
                        }
                        self.terminal.say(&format!("error: {err}"))?;
                    }
                }
            }
        }
    }
}

/// Fetches and prints the record named by the payload's `module`, `table`
/// and `key`, then offers the rows of each table listed in `related`.
pub struct RecordView {
    context: String,
    terminal: Arc<Terminal>,
    handle: Handle,
}

impl RecordView {
    pub fn new(context: &str, terminal: Arc<Terminal>, handle: Handle) -> Self {
        Self {
            context: context.to_string(),
            terminal,
            handle,
        }
    }

    fn show_related(
        &self,
        nav: &Navigator,
        module: &str,
        table: &str,
        key: &KeyValue,
        link: &str,
    ) -> Result<(), NavError> {
        let rows = self.handle.block_on(async {
            let stream = nav.fetch_set(module, table, key, link).await?;
            Navigator::collect(stream).await
        });
        match rows {
            Ok(rows) => {
                self.terminal.say(&format!("-- {link} of {table} {key} --"))?;
                if rows.is_empty() {
                    self.terminal.say("(no rows)")?;
                }
                for row in &rows {
                    self.terminal.say(&format!("     {}", row_text(row)))?;
                }
            }
            Err(err) if recoverable(&err) => {
                warn!(table, link, error = %err, "related rows failed");
                self.terminal.say(&format!("error: {err}"))?;
            }
            Err(err) => return Err(err),
        }
        Ok(())
    }
}

impl View for RecordView {
    fn name(&self) -> &str {
        &self.context
    }

    fn inflow(&self, nav: &Navigator, transition: &TransitionInstance) -> Result<Outcome, NavError> {
        let payload = transition.payload();
        let module = payload.get("module").and_then(Value::as_str).unwrap_or_default();
        let table = payload
            .get("table")
            .and_then(Value::as_str)
            .ok_or_else(|| NavError::Configuration("record payload names no table".into()))?;
        let key = KeyValue::from(payload.get("key").cloned().unwrap_or(Value::Null));

        let related: Vec<&str> = payload
            .get("related")
            .and_then(Value::as_array)
            .map(|links| links.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let record = self.handle.block_on(nav.fetch(module, table, &key))?;
        self.terminal.say(&format!("\n-- {table} {key} --"))?;
        if let Value::Object(fields) = &record {
            for (column, value) in fields.iter().filter(|(column, _)| !is_marker(column)) {
                self.terminal.say(&format!("{column:>16}: {}", scalar_text(value)))?;
            }
        }
        let outcome = Outcome::new(format!("{table} {key}"), record);
        if related.is_empty() {
            return Ok(outcome);
        }

        let question = format!("related: {}  [B]ack > ", related.join(", "));
        loop {
            let Some(choice) = self.terminal.prompt(&question)? else {
                return Ok(outcome);
            };
            if choice.is_empty() || choice.eq_ignore_ascii_case("b") {
                return Ok(outcome);
            }
            let Some(link) = related.iter().find(|link| link.eq_ignore_ascii_case(&choice)) else {
                self.terminal.say(&format!("unknown choice '{choice}'"))?;
                continue;
            };
            self.show_related(nav, module, table, &key, link)?;
        }
    }
}

fn is_marker(column: &str) -> bool {
    column.starts_with('_') && column.ends_with('_')
}

fn row_text(row: &Value) -> String {
    match row {
        Value::Object(fields) => fields
            .iter()
            .filter(|(column, _)| !is_marker(column))
            .map(|(column, value)| format!("{column}={}", scalar_text(value)))
            .collect::<Vec<_>>()
            .join("  "),
        other => scalar_text(other),
    }
}

#[cfg(test)]
#[path = "tests/views_tests.rs"]
mod tests;
