use serde_json::{Map, Value};

use super::{Cache, ReadOptions, ReadResult, WriteOptions};
use crate::error::CacheError;
use crate::key::{compute_id, Variables};
use crate::selection::Selection;
use crate::storage::LayerId;
use crate::subscription::NotifySet;

/// A record addressed by type and key values, as returned by
/// [`Cache::record`].
pub struct RecordHandle<'c> {
    cache: &'c mut Cache,
    type_name: String,
    id: String,
}

impl Cache {
    /// Address a record by its type and key values.
    ///
    /// `keys` is either an object carrying every key field of the type or a
    /// single raw key value.
    pub fn record(&mut self, type_name: &str, keys: &Value) -> Result<RecordHandle<'_>, CacheError> {
        let key_fields = self.config.key_fields(type_name);
        if key_fields.is_empty() {
            return Err(CacheError::NoKeyFields {
                type_name: type_name.to_string(),
            });
        }
        if keys.is_object() {
            if let Some(missing) = key_fields
                .iter()
                .find(|field| matches!(keys.get(field.as_str()), None | Some(Value::Null)))
            {
                return Err(CacheError::MissingKeyField {
                    type_name: type_name.to_string(),
                    field: missing.clone(),
                });
            }
        }
        let id = compute_id(&self.config, type_name, keys).ok_or_else(|| {
            CacheError::MissingKeyField {
                type_name: type_name.to_string(),
                field: key_fields.join(", "),
            }
        })?;
        Ok(RecordHandle {
            id: format!("{}:{}", type_name, id),
            type_name: type_name.to_string(),
            cache: self,
        })
    }
}

impl RecordHandle<'_> {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn delete(&mut self, layer: Option<LayerId>) -> Result<NotifySet, CacheError> {
        self.cache.delete(&self.id, layer)
    }

    /// Invalidate the record, or one field of it. `args` selects the field
    /// key for fields that take arguments.
    pub fn mark_stale(&mut self, field: Option<&str>, args: Option<&Map<String, Value>>) {
        let key = field.map(|field| Cache::field_key(field, args));
        self.cache.mark_record_stale(&self.id, key.as_deref());
    }

    pub fn read(&self, selection: &Selection, variables: Variables) -> ReadResult {
        self.cache.read(
            ReadOptions::new(selection)
                .with_parent(self.id.clone())
                .with_variables(variables),
        )
    }

    pub fn write(
        &mut self,
        selection: &Selection,
        data: &Value,
        variables: Variables,
        layer: Option<LayerId>,
    ) -> Result<NotifySet, CacheError> {
        self.cache.write(
            WriteOptions::new(selection, data)
                .with_parent(self.id.clone())
                .with_variables(variables)
                .with_layer(layer),
        )
    }
}
