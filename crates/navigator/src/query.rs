use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use futures::stream::{BoxStream, StreamExt};
use serde_json::Value;
use shared::{
    domain::{QueryParams, Record},
    error::NavError,
};

use crate::present::Presenter;

pub const PAGENUM: &str = "pagenum";
pub const PAGESIZE: &str = "pagesize";
pub const DEFAULT_PAGENUM: i64 = 1;
pub const DEFAULT_PAGESIZE: i64 = 10;

/// Lazy, single-pass sequence of raw records.
pub type RecordStream = BoxStream<'static, anyhow::Result<Record>>;

/// Lazy, single-pass sequence of presented results.
pub type ResultStream = BoxStream<'static, Result<Value, NavError>>;

/// A named query implementation. Receives the merged, normalised parameters.
pub trait Query: Send + Sync {
    fn execute(&self, params: &QueryParams) -> RecordStream;
}

impl<F> Query for F
where
    F: Fn(&QueryParams) -> RecordStream + Send + Sync,
{
    fn execute(&self, params: &QueryParams) -> RecordStream {
        self(params)
    }
}

struct Registration {
    query: Arc<dyn Query>,
    defaults: QueryParams,
}

/// A query ready to run: the implementation plus its merged parameters.
pub struct PreparedQuery {
    pub query: Arc<dyn Query>,
    pub params: QueryParams,
}

impl PreparedQuery {
    pub fn pagenum(&self) -> i64 {
        page_value(self.params.get(PAGENUM)).unwrap_or(DEFAULT_PAGENUM)
    }

    pub fn pagesize(&self) -> i64 {
        page_value(self.params.get(PAGESIZE)).unwrap_or(DEFAULT_PAGESIZE)
    }

    pub fn execute(&self) -> RecordStream {
        self.query.execute(&self.params)
    }
}

#[derive(Default)]
pub struct QueryRegistry {
    entries: RwLock<HashMap<String, Registration>>,
}

impl QueryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `query` under `name`. A later registration for the same name wins.
    pub fn register(&self, name: impl Into<String>, query: Arc<dyn Query>, mut defaults: QueryParams) {
        normalize_paging(&mut defaults);
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), Registration { query, defaults });
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Defaults overlaid with `supplied`, paging normalised. Bad paging values
    /// are corrected, never reported.
    pub fn prepare(&self, name: &str, supplied: &QueryParams) -> Result<PreparedQuery, NavError> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let registration = entries
            .get(name)
            .ok_or_else(|| NavError::QueryNotFound(name.to_string()))?;

        let mut params = registration.defaults.clone();
        params.extend(supplied.iter().map(|(k, v)| (k.clone(), v.clone())));
        normalize_paging(&mut params);

        Ok(PreparedQuery {
            query: Arc::clone(&registration.query),
            params,
        })
    }

    /// Prepares and runs `name`, presenting each record as it is pulled.
    pub fn run(
        &self,
        name: &str,
        supplied: &QueryParams,
        presenter: Arc<dyn Presenter>,
    ) -> Result<ResultStream, NavError> {
        let prepared = self.prepare(name, supplied)?;
        tracing::debug!(
            query = name,
            pagenum = prepared.pagenum(),
            pagesize = prepared.pagesize(),
            "running query"
        );
        Ok(present_stream(prepared.execute(), presenter))
    }
}

pub(crate) fn present_stream(records: RecordStream, presenter: Arc<dyn Presenter>) -> ResultStream {
    records
        .map(move |item| {
            item.map(|record| presenter.present(record))
                .map_err(NavError::from)
        })
        .boxed()
}

fn page_value(value: Option<&Value>) -> Option<i64> {
    let parsed = match value? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    parsed.filter(|n| *n >= 1)
}

fn normalize_paging(params: &mut QueryParams) {
    let pagenum = page_value(params.get(PAGENUM)).unwrap_or(DEFAULT_PAGENUM);
    let pagesize = page_value(params.get(PAGESIZE)).unwrap_or(DEFAULT_PAGESIZE);
    params.insert(PAGENUM.to_string(), Value::from(pagenum));
    params.insert(PAGESIZE.to_string(), Value::from(pagesize));
}

#[cfg(test)]
#[path = "tests/query_tests.rs"]
mod tests;
