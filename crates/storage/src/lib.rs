use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures::stream::{self, StreamExt};
use navigator::{Persistence, Query, RecordStream};
use serde_json::{Map, Value};
use shared::domain::{QueryParams, Record};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Column, Database, Pool, Row, Sqlite, TypeInfo, ValueRef,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

const DEFAULT_SCHEMA: &str = "main";

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, <Sqlite as Database>::Arguments<'q>>;

/// SQLite-backed persistence. A module name maps to an attached schema;
/// the empty module is `main`.
#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

/// One foreign key of a child table, columns paired in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    pub parent: String,
    /// `(child column, parent column)`
    pub columns: Vec<(String, String)>,
}

impl SqliteStore {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        // Every connection to an in-memory database sees its own empty database.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(connect_options)
            .await
            .with_context(|| format!("failed to open sqlite database '{database_url}'"))?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    /// Runs a batch of `;`-separated statements, e.g. a schema or seed script.
    pub async fn execute_script(&self, sql: &str) -> Result<()> {
        sqlx::raw_sql(sql)
            .execute(&self.pool)
            .await
            .context("failed to execute sql script")?;
        Ok(())
    }

    pub async fn table_names(&self, module: &str) -> Result<Vec<String>> {
        let sql = format!(
            "SELECT name FROM {}.sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            quote_ident(schema_name(module))?
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>(0).map_err(Into::into))
            .collect()
    }

    pub async fn primary_key(&self, module: &str, table: &str) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT name, pk FROM pragma_table_info(?, ?)")
            .bind(table)
            .bind(schema_name(module))
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("failed to inspect table '{table}'"))?;
        if rows.is_empty() {
            bail!("unknown table '{}.{table}'", schema_name(module));
        }

        let mut columns = Vec::new();
        for row in rows {
            let position: i64 = row.try_get("pk")?;
            if position > 0 {
                columns.push((position, row.try_get::<String, _>("name")?));
            }
        }
        columns.sort_by_key(|(position, _)| *position);
        Ok(columns.into_iter().map(|(_, name)| name).collect())
    }

    pub async fn foreign_keys(&self, module: &str, table: &str) -> Result<Vec<ForeignKey>> {
        let rows = sqlx::query(
            r#"SELECT id, seq, "table" AS parent, "from" AS child_column, "to" AS parent_column
               FROM pragma_foreign_key_list(?, ?)
               ORDER BY id, seq"#,
        )
        .bind(table)
        .bind(schema_name(module))
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("failed to inspect foreign keys of '{table}'"))?;

        let mut keys: Vec<(i64, ForeignKey)> = Vec::new();
        for row in rows {
            let id: i64 = row.try_get("id")?;
            let seq: i64 = row.try_get("seq")?;
            let parent: String = row.try_get("parent")?;
            let child_column: String = row.try_get("child_column")?;
            let parent_column = match row.try_get::<Option<String>, _>("parent_column")? {
                Some(column) => column,
                // Implicit reference to the parent's primary key.
                None => self
                    .primary_key(module, &parent)
                    .await?
                    .get(usize::try_from(seq)?)
                    .cloned()
                    .ok_or_else(|| anyhow!("foreign key {id} of '{table}' has no parent column"))?,
            };
            match keys.last_mut() {
                Some((last_id, key)) if *last_id == id => {
                    key.columns.push((child_column, parent_column));
                }
                _ => keys.push((
                    id,
                    ForeignKey {
                        parent,
                        columns: vec![(child_column, parent_column)],
                    },
                )),
            }
        }
        Ok(keys.into_iter().map(|(_, key)| key).collect())
    }

    /// Rows of `table` matching every `(column, value)` pair.
    pub async fn select(
        &self,
        module: &str,
        table: &str,
        filter: &[(String, Value)],
        limit: Option<i64>,
    ) -> Result<Vec<Record>> {
        let mut sql = format!(
            "SELECT * FROM {}.{}",
            quote_ident(schema_name(module))?,
            quote_ident(table)?
        );
        if !filter.is_empty() {
            let conditions = filter
                .iter()
                .map(|(column, _)| Ok(format!("{} = ?", quote_ident(column)?)))
                .collect::<Result<Vec<_>>>()?;
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        if limit.is_some() {
            sql.push_str(" LIMIT ?");
        }

        let mut query = sqlx::query(&sql);
        for (_, value) in filter {
            query = bind_value(query, value);
        }
        if let Some(limit) = limit {
            query = query.bind(limit);
        }
        let rows = query.fetch_all(&self.pool).await?;

        let key_columns = self.primary_key(module, table).await?;
        rows.iter()
            .map(|row| to_record(module, table, &key_columns, row))
            .collect()
    }

    /// Runs arbitrary SQL with positional binds, mapping rows onto `table`.
    pub async fn query_records(
        &self,
        module: &str,
        table: &str,
        key_columns: &[String],
        sql: &str,
        binds: &[Value],
    ) -> Result<Vec<Record>> {
        let mut query = sqlx::query(sql);
        for value in binds {
            query = bind_value(query, value);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("query failed: {sql}"))?;
        rows.iter()
            .map(|row| to_record(module, table, key_columns, row))
            .collect()
    }
}

#[async_trait]
impl Persistence for SqliteStore {
    async fn primary_key_columns(&self, module: &str, table: &str) -> Result<Vec<String>> {
        self.primary_key(module, table).await
    }

    async fn get(
        &self,
        module: &str,
        table: &str,
        filter: &[(String, Value)],
    ) -> Result<Option<Record>> {
        Ok(self
            .select(module, table, filter, Some(1))
            .await?
            .into_iter()
            .next())
    }

    /// `link` names a child table holding a foreign key to the owner's table.
    async fn related(&self, owner: &Record, link: &str) -> Result<RecordStream> {
        let foreign_key = self
            .foreign_keys(&owner.module, link)
            .await?
            .into_iter()
            .find(|key| key.parent.eq_ignore_ascii_case(&owner.table))
            .ok_or_else(|| anyhow!("table '{link}' has no foreign key to '{}'", owner.table))?;

        let filter = foreign_key
            .columns
            .iter()
            .map(|(child, parent)| {
                owner
                    .field(parent)
                    .cloned()
                    .map(|value| (child.clone(), value))
                    .ok_or_else(|| anyhow!("'{}' has no column '{parent}'", owner.table))
            })
            .collect::<Result<Vec<_>>>()?;

        let store = self.clone();
        let module = owner.module.clone();
        let link = link.to_string();
        Ok(lazy_records(async move {
            store.select(&module, &link, &filter, None).await
        }))
    }
}

/// A query implementation backed by a SQL statement.
///
/// Named parameters are bound positionally in the order given to
/// [`SqlQuery::bind_param`]; paging is appended as `LIMIT ? OFFSET ?`.
#[derive(Clone)]
pub struct SqlQuery {
    store: SqliteStore,
    module: String,
    table: String,
    key_columns: Vec<String>,
    sql: String,
    binds: Vec<String>,
}

impl SqlQuery {
    pub fn new(store: SqliteStore, table: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            store,
            module: String::new(),
            table: table.into(),
            key_columns: Vec::new(),
            sql: sql.into(),
            binds: Vec::new(),
        }
    }

    pub fn in_module(mut self, module: impl Into<String>) -> Self {
        self.module = module.into();
        self
    }

    pub fn key_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.key_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn bind_param(mut self, name: impl Into<String>) -> Self {
        self.binds.push(name.into());
        self
    }

    fn statement(&self, params: &QueryParams) -> (String, Vec<Value>) {
        let pagenum = params
            .get(navigator::query::PAGENUM)
            .and_then(Value::as_i64)
            .unwrap_or(navigator::query::DEFAULT_PAGENUM);
        let pagesize = params
            .get(navigator::query::PAGESIZE)
            .and_then(Value::as_i64)
            .unwrap_or(navigator::query::DEFAULT_PAGESIZE);

        let mut binds: Vec<Value> = self
            .binds
            .iter()
            .map(|name| params.get(name).cloned().unwrap_or(Value::Null))
            .collect();
        // Past the end of any table once the offset no longer fits.
        let offset = pagenum
            .saturating_sub(1)
            .checked_mul(pagesize)
            .unwrap_or(i64::MAX);
        binds.push(Value::from(pagesize));
        binds.push(Value::from(offset));

        let sql = format!("{} LIMIT ? OFFSET ?", self.sql.trim().trim_end_matches(';'));
        (sql, binds)
    }
}

impl Query for SqlQuery {
    fn execute(&self, params: &QueryParams) -> RecordStream {
        let (sql, binds) = self.statement(params);
        let query = self.clone();
        tracing::debug!(table = %self.table, sql = %sql, "sql query");
        lazy_records(async move {
            query
                .store
                .query_records(&query.module, &query.table, &query.key_columns, &sql, &binds)
                .await
        })
    }
}

/// Defers `fetch` until the stream is first polled, then yields its rows one by one.
fn lazy_records<F>(fetch: F) -> RecordStream
where
    F: std::future::Future<Output = Result<Vec<Record>>> + Send + 'static,
{
    stream::once(fetch)
        .flat_map(|result| {
            let items: Vec<Result<Record>> = match result {
                Ok(records) => records.into_iter().map(Ok).collect(),
                Err(err) => vec![Err(err)],
            };
            stream::iter(items)
        })
        .boxed()
}

fn schema_name(module: &str) -> &str {
    if module.is_empty() {
        DEFAULT_SCHEMA
    } else {
        module
    }
}

/// Double-quotes `name` after checking it is a plain identifier.
pub fn quote_ident(name: &str) -> Result<String> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        bail!("invalid sql identifier '{name}'");
    }
    Ok(format!("\"{name}\""))
}

fn bind_value<'q>(query: SqliteQuery<'q>, value: &Value) -> SqliteQuery<'q> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(flag) => query.bind(*flag),
        Value::Number(number) => match number.as_i64() {
            Some(int) => query.bind(int),
            None => query.bind(number.as_f64()),
        },
        Value::String(text) => query.bind(text.clone()),
        other => query.bind(other.to_string()),
    }
}

fn to_record(module: &str, table: &str, key_columns: &[String], row: &SqliteRow) -> Result<Record> {
    let fields = decode_row(row)?;
    let key = key_columns
        .iter()
        .map(|column| fields.get(column).cloned().unwrap_or(Value::Null))
        .collect();
    Ok(Record {
        module: schema_name(module).to_string(),
        table: table.to_string(),
        key,
        fields,
    })
}

fn decode_row(row: &SqliteRow) -> Result<Map<String, Value>> {
    let mut fields = Map::new();
    for column in row.columns() {
        let index = column.ordinal();
        let raw = row.try_get_raw(index)?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            let type_name = raw.type_info().name().to_ascii_uppercase();
            match type_name.as_str() {
                "INTEGER" | "BOOLEAN" => Value::from(row.try_get_unchecked::<i64, _>(index)?),
                "REAL" | "NUMERIC" => Value::from(row.try_get_unchecked::<f64, _>(index)?),
                "BLOB" => Value::String(STANDARD.encode(row.try_get_unchecked::<Vec<u8>, _>(index)?)),
                _ => Value::String(row.try_get_unchecked::<String, _>(index)?),
            }
        };
        fields.insert(column.name().to_string(), value);
    }
    Ok(fields)
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url.contains(":memory:") || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
