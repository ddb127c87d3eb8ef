//! The routing table (`context -> message -> template`) and its text-format loader.
//!
//! One transition per line:
//!
//! ```text
//! OUTMESSAGE : TARGETCONTEXT.VIEWTYPE   # optional comment
//! ```
//!
//! Blank and comment-only lines are ignored.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::{Arc, PoisonError, RwLock},
};

use shared::error::NavError;
use tracing::{debug, warn};

use crate::{registry::ViewFactory, transition::TransitionTemplate};

/// Context consulted when a context-specific entry is missing.
pub const GLOBAL_CONTEXT: &str = "";

type Transitions = HashMap<String, Arc<TransitionTemplate>>;

#[derive(Default)]
pub struct RoutingTable {
    contexts: RwLock<HashMap<String, Transitions>>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the entry for the template's name in `context`.
    pub fn insert(&self, context: &str, template: TransitionTemplate) {
        self.extend(context, std::iter::once(template));
    }

    /// Merges templates into `context`, creating it if needed. Returns the
    /// number of templates merged.
    pub fn extend<I>(&self, context: &str, templates: I) -> usize
    where
        I: IntoIterator<Item = TransitionTemplate>,
    {
        let mut contexts = self.contexts.write().unwrap_or_else(PoisonError::into_inner);
        let table = contexts.entry(context.to_string()).or_default();
        let mut merged = 0;
        for template in templates {
            table.insert(template.name().to_string(), Arc::new(template));
            merged += 1;
        }
        merged
    }

    /// Context-specific entry first, then the global context.
    pub fn resolve(&self, context: &str, message: &str) -> Option<Arc<TransitionTemplate>> {
        let contexts = self.contexts.read().unwrap_or_else(PoisonError::into_inner);
        contexts
            .get(context)
            .and_then(|table| table.get(message))
            .or_else(|| {
                contexts
                    .get(GLOBAL_CONTEXT)
                    .and_then(|table| table.get(message))
            })
            .cloned()
    }

    pub fn len(&self, context: &str) -> usize {
        let contexts = self.contexts.read().unwrap_or_else(PoisonError::into_inner);
        contexts.get(context).map_or(0, HashMap::len)
    }

    pub fn is_empty(&self, context: &str) -> bool {
        self.len(context) == 0
    }

    pub fn contexts(&self) -> Vec<String> {
        let contexts = self.contexts.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = contexts.keys().cloned().collect();
        names.sort();
        names
    }

    /// Makes sure `context` exists even when nothing was loaded into it.
    pub(crate) fn ensure_context(&self, context: &str) {
        self.extend(context, std::iter::empty());
    }
}

/// One parsed routing line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowLine {
    pub message: String,
    pub context: String,
    pub view_type: String,
    pub comment: Option<String>,
}

/// Parses a single line. `Ok(None)` for blank and comment-only lines.
pub fn parse_line(line_no: usize, line: &str) -> Result<Option<FlowLine>, NavError> {
    let (content, comment) = match line.split_once('#') {
        Some((content, comment)) => (content.trim(), Some(comment.trim().to_string())),
        None => (line.trim(), None),
    };
    if content.is_empty() {
        return Ok(None);
    }

    let malformed = || NavError::MalformedFlow {
        line: line_no,
        content: line.trim_end().to_string(),
    };

    let (message, rest) = content.split_once(':').ok_or_else(malformed)?;
    let (context, view_type) = rest.trim().rsplit_once('.').ok_or_else(malformed)?;
    let (message, context, view_type) = (message.trim(), context.trim(), view_type.trim());
    if message.is_empty() || view_type.is_empty() {
        return Err(malformed());
    }

    debug!(outmessage = message, context, view_type, "routing line");
    Ok(Some(FlowLine {
        message: message.to_string(),
        context: context.to_string(),
        view_type: view_type.to_string(),
        comment: comment.filter(|c| !c.is_empty()),
    }))
}

/// Parses a whole routing source, resolving every view type through `views`.
/// Any bad line fails the whole source.
pub fn parse_flow(text: &str, views: &dyn ViewFactory) -> Result<Vec<TransitionTemplate>, NavError> {
    let mut templates = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let Some(flow_line) = parse_line(index + 1, line)? else {
            continue;
        };
        let target = views
            .resolve(&flow_line.view_type, &flow_line.context)
            .ok_or_else(|| NavError::UnknownViewType(flow_line.view_type.clone()))?;
        templates.push(TransitionTemplate::new(flow_line.message, target));
    }
    Ok(templates)
}

/// Reads `file_name` relative to each directory in turn and merges what it
/// finds; entries from later directories override earlier ones.
///
/// A missing, unreadable or malformed candidate contributes nothing.
pub fn read_flow(
    file_name: &Path,
    dirs: &[PathBuf],
    views: &dyn ViewFactory,
) -> Vec<TransitionTemplate> {
    let mut merged: HashMap<String, TransitionTemplate> = HashMap::new();
    let mut order: Vec<String> = Vec::new();
    let mut seen: Vec<PathBuf> = Vec::new();

    for dir in dirs {
        let canonical = fs::canonicalize(dir).unwrap_or_else(|_| dir.clone());
        if seen.contains(&canonical) {
            continue;
        }
        seen.push(canonical);

        let path = dir.join(file_name);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) => {
                debug!(path = %path.display(), error = %err, "routing candidate not readable");
                continue;
            }
        };
        match parse_flow(&text, views) {
            Ok(templates) => {
                debug!(path = %path.display(), entries = templates.len(), "routing candidate read");
                for template in templates {
                    let name = template.name().to_string();
                    if merged.insert(name.clone(), template).is_none() {
                        order.push(name);
                    }
                }
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "discarding routing candidate");
            }
        }
    }

    order
        .into_iter()
        .filter_map(|name| merged.remove(&name))
        .collect()
}

#[cfg(test)]
#[path = "tests/routing_tests.rs"]
mod tests;
