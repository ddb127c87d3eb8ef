use serde_json::Value;
use shared::domain::Record;

/// Shapes a raw record for a view. Called exactly once per record surfaced.
pub trait Presenter: Send + Sync {
    fn present(&self, record: Record) -> Value;
}

/// Flattens a record to a JSON object with `_pk_` and `_table_` markers.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonPresenter;

impl Presenter for JsonPresenter {
    fn present(&self, record: Record) -> Value {
        let key = record.key_text();
        let mut object = record.fields;
        object.insert("_pk_".to_string(), Value::String(key));
        object.insert("_table_".to_string(), Value::String(record.table));
        Value::Object(object)
    }
}
