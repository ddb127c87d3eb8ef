//! Feature modules shipped with the console.

use std::{collections::HashMap, sync::Arc};

use navigator::{FeatureModule, NavError, Navigator, QueryParams};
use serde_json::json;
use storage::{quote_ident, SqlQuery, SqliteStore};

pub const BASE: &str = "base";

/// Lists the database's tables and exposes every table as a `rows:<table>`
/// query and view definition. A definition's `related` names the tables
/// whose foreign keys point at it.
pub struct BaseModule {
    app_name: String,
    store: SqliteStore,
    tables: Vec<Table>,
}

struct Table {
    name: String,
    key: Vec<String>,
    /// Tables holding a foreign key to this one.
    related: Vec<String>,
}

impl BaseModule {
    /// Reads the tables of the main schema with their primary and foreign keys.
    pub async fn discover(app_name: impl Into<String>, store: SqliteStore) -> anyhow::Result<Self> {
        let mut tables = Vec::new();
        let mut related: HashMap<String, Vec<String>> = HashMap::new();
        for table in store.table_names("").await? {
            let key = store.primary_key("", &table).await?;
            for foreign_key in store.foreign_keys("", &table).await? {
                let children = related.entry(foreign_key.parent.to_lowercase()).or_default();
                if !children.contains(&table) {
                    children.push(table.clone());
                }
            }
            tables.push(Table { name: table, key, related: Vec::new() });
        }
        for table in &mut tables {
            table.related = related.remove(&table.name.to_lowercase()).unwrap_or_default();
        }
        Ok(Self {
            app_name: app_name.into(),
            store,
            tables,
        })
    }
}

impl FeatureModule for BaseModule {
    fn name(&self) -> &str {
        BASE
    }

    fn app_name(&self) -> &str {
        &self.app_name
    }

    fn install(&self, nav: &Navigator) -> Result<(), NavError> {
        let tables = SqlQuery::new(
            self.store.clone(),
            "sqlite_master",
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .key_columns(["name"]);
        nav.register_query("tables", Arc::new(tables), QueryParams::new());
        nav.register_view_definition(
            "TABLES",
            json!({ "title": "Tables", "query": "tables", "drill": "name" }),
        );

        for table in &self.tables {
            let name = format!("rows:{}", table.name);
            let sql = format!("SELECT * FROM {}", quote_ident(&table.name)?);
            let query = SqlQuery::new(self.store.clone(), table.name.clone(), sql)
                .key_columns(table.key.clone());
            nav.register_query(name.clone(), Arc::new(query), QueryParams::new());
            nav.register_view_definition(
                name.clone(),
                json!({
                    "title": table.name,
                    "query": name,
                    "table": table.name,
                    "key": table.key,
                    "related": table.related,
                }),
            );
        }
        tracing::info!(module = BASE, tables = self.tables.len(), "installed");
        Ok(())
    }
}
