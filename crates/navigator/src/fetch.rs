//! Resolution of `(module, table, key)` references against the persistence
//! collaborator.
//!
//! Stateless front ends cannot hold a live entity between requests, so they
//! re-resolve the owner every time and walk the relationship from there.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use shared::{
    domain::{KeyValue, Record},
    error::NavError,
};

use crate::query::RecordStream;

#[async_trait]
pub trait Persistence: Send + Sync {
    /// Primary-key column names of `table`, in declaration order.
    async fn primary_key_columns(&self, module: &str, table: &str) -> anyhow::Result<Vec<String>>;

    /// The single entity matching every `(column, value)` pair, if any.
    async fn get(
        &self,
        module: &str,
        table: &str,
        filter: &[(String, Value)],
    ) -> anyhow::Result<Option<Record>>;

    /// Entities reached from `owner` through the relationship named `link`.
    async fn related(&self, owner: &Record, link: &str) -> anyhow::Result<RecordStream>;
}

/// Pairs declared key columns with supplied key values.
///
/// A single column takes exactly one value; a composite key takes one value
/// per column, matched positionally. Anything else is an arity mismatch.
pub fn key_filter(
    table: &str,
    columns: &[String],
    key: &KeyValue,
) -> Result<Vec<(String, Value)>, NavError> {
    let values = key.values();
    if columns.is_empty() || columns.len() != values.len() {
        return Err(NavError::KeyArityMismatch {
            table: table.to_string(),
            expected: columns.len(),
            supplied: values.len(),
        });
    }
    Ok(columns.iter().cloned().zip(values).collect())
}

#[derive(Clone)]
pub struct FetchResolver {
    persistence: Arc<dyn Persistence>,
}

impl FetchResolver {
    pub fn new(persistence: Arc<dyn Persistence>) -> Self {
        Self { persistence }
    }

    pub async fn fetch_by_key(
        &self,
        module: &str,
        table: &str,
        key: &KeyValue,
    ) -> Result<Record, NavError> {
        let columns = self.persistence.primary_key_columns(module, table).await?;
        let filter = key_filter(table, &columns, key)?;
        tracing::debug!(module, table, key = %key, "fetching by key");
        self.persistence
            .get(module, table, &filter)
            .await?
            .ok_or_else(|| NavError::NotFound {
                table: table.to_string(),
                key: key.to_string(),
            })
    }

    pub async fn fetch_set(
        &self,
        module: &str,
        table: &str,
        key: &KeyValue,
        link: &str,
    ) -> Result<RecordStream, NavError> {
        let owner = self.fetch_by_key(module, table, key).await?;
        tracing::debug!(module, table, link, "following relationship");
        Ok(self.persistence.related(&owner, link).await?)
    }
}

#[cfg(test)]
#[path = "tests/fetch_tests.rs"]
mod tests;
