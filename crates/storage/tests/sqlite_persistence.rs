use std::sync::Arc;

use navigator::{KeyValue, NavError, Navigator, QueryParams};
use serde_json::json;
use storage::{SqlQuery, SqliteStore};

const SCHEMA: &str = r#"
CREATE TABLE individual (
    code TEXT PRIMARY KEY,
    year INTEGER NOT NULL
);
CREATE TABLE kinship (
    first  TEXT NOT NULL REFERENCES individual(code),
    second TEXT NOT NULL REFERENCES individual(code),
    kinship REAL NOT NULL,
    PRIMARY KEY (first, second)
);
CREATE TABLE ring (
    id INTEGER PRIMARY KEY,
    owner TEXT NOT NULL REFERENCES individual,
    label TEXT NOT NULL
);
INSERT INTO individual VALUES ('VAYF', 2007), ('GOc', 2006), ('(GOVAYF)62', 2008);
INSERT INTO kinship VALUES ('GOc', 'VAYF', 0.0);
INSERT INTO ring VALUES (1, 'VAYF', 'BGC/BR23/10/164'), (2, 'GOc', 'BGC/BR23/09/007'), (3, 'VAYF', 'BGC/BR23/11/020');
"#;

async fn seeded() -> (tempfile::TempDir, SqliteStore) {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!(
        "sqlite://{}",
        dir.path().join("kinship.db").to_string_lossy().replace('\\', "/")
    );
    let store = SqliteStore::new(&url).await.expect("db");
    store.execute_script(SCHEMA).await.expect("schema");
    (dir, store)
}

#[tokio::test]
async fn primary_keys_follow_declaration_order() {
    let (_dir, store) = seeded().await;
    assert_eq!(store.primary_key("", "individual").await.expect("pk"), vec!["code"]);
    assert_eq!(
        store.primary_key("", "kinship").await.expect("pk"),
        vec!["first", "second"]
    );
    assert!(store.primary_key("", "missing").await.is_err());
    assert_eq!(
        store.table_names("").await.expect("tables"),
        vec!["individual", "kinship", "ring"]
    );
}

#[tokio::test]
async fn implicit_foreign_key_targets_parent_primary_key() {
    let (_dir, store) = seeded().await;
    let keys = store.foreign_keys("", "ring").await.expect("fks");
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0].parent, "individual");
    assert_eq!(keys[0].columns, vec![("owner".to_string(), "code".to_string())]);
}

#[tokio::test]
async fn navigator_fetches_single_and_composite_keys() {
    let (_dir, store) = seeded().await;
    let nav = Navigator::new().with_persistence(Arc::new(store));

    let individual = nav
        .fetch("", "individual", &KeyValue::Single(json!("VAYF")))
        .await
        .expect("individual");
    assert_eq!(individual["year"], json!(2007));
    assert_eq!(individual["_pk_"], json!("VAYF"));

    let kinship = nav
        .fetch(
            "",
            "kinship",
            &KeyValue::Composite(vec![json!("GOc"), json!("VAYF")]),
        )
        .await
        .expect("kinship");
    assert_eq!(kinship["kinship"], json!(0.0));
    assert_eq!(kinship["_pk_"], json!("GOc,VAYF"));

    let err = nav
        .fetch("", "kinship", &KeyValue::Single(json!("GOc")))
        .await
        .expect_err("arity");
    assert!(matches!(
        err,
        NavError::KeyArityMismatch {
            expected: 2,
            supplied: 1,
            ..
        }
    ));

    let err = nav
        .fetch("", "individual", &KeyValue::Single(json!("nobody")))
        .await
        .expect_err("missing");
    assert!(matches!(err, NavError::NotFound { .. }));
}

#[tokio::test]
async fn fetch_set_walks_foreign_key_sets() {
    let (_dir, store) = seeded().await;
    let nav = Navigator::new().with_persistence(Arc::new(store));

    let rings = nav
        .fetch_set("", "individual", &KeyValue::Single(json!("VAYF")), "ring")
        .await
        .expect("fetch set");
    let rings = Navigator::collect(rings).await.expect("rings");
    let labels: Vec<_> = rings.iter().map(|ring| ring["label"].clone()).collect();
    assert_eq!(labels, vec![json!("BGC/BR23/10/164"), json!("BGC/BR23/11/020")]);

    let err = nav
        .fetch_set("", "individual", &KeyValue::Single(json!("VAYF")), "kinship_missing")
        .await
        .err()
        .expect("no such link");
    assert!(matches!(err, NavError::Persistence(_)));
}

#[tokio::test]
async fn registered_sql_query_pages_results() {
    let (_dir, store) = seeded().await;
    let nav = Navigator::new().with_persistence(Arc::new(store.clone()));
    let mut defaults = QueryParams::new();
    defaults.insert("pagesize".into(), json!(2));
    nav.register_query(
        "individuals",
        Arc::new(
            SqlQuery::new(store, "individual", "SELECT * FROM individual ORDER BY code")
                .key_columns(["code"]),
        ),
        defaults,
    );

    let first = Navigator::collect(nav.run_query("individuals", &QueryParams::new()).expect("run"))
        .await
        .expect("page 1");
    let codes: Vec<_> = first.iter().map(|row| row["code"].clone()).collect();
    assert_eq!(codes, vec![json!("(GOVAYF)62"), json!("GOc")]);

    let mut page_two = QueryParams::new();
    page_two.insert("pagenum".into(), json!("2"));
    let second = Navigator::collect(nav.run_query("individuals", &page_two).expect("run"))
        .await
        .expect("page 2");
    assert_eq!(second.len(), 1);
    assert_eq!(second[0]["_pk_"], json!("VAYF"));

    let mut garbage = QueryParams::new();
    garbage.insert("pagenum".into(), json!("abc"));
    let fallback = Navigator::collect(nav.run_query("individuals", &garbage).expect("run"))
        .await
        .expect("fallback page");
    assert_eq!(fallback.len(), 2);
}

#[tokio::test]
async fn page_beyond_any_offset_yields_no_rows() {
    let (_dir, store) = seeded().await;
    let nav = Navigator::new().with_persistence(Arc::new(store.clone()));
    nav.register_query(
        "individuals",
        Arc::new(SqlQuery::new(store, "individual", "SELECT * FROM individual").key_columns(["code"])),
        QueryParams::new(),
    );

    let mut last_page = QueryParams::new();
    last_page.insert("pagenum".into(), json!("9223372036854775807"));
    let rows = Navigator::collect(nav.run_query("individuals", &last_page).expect("run"))
        .await
        .expect("no overflow");
    assert!(rows.is_empty());
}
