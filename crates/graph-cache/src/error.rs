use thiserror::Error;

use crate::storage::LayerId;

/// Errors raised by the cache.
///
/// Every variant signals a mismatch between the caller (or the generated
/// selections) and the cache contents. None of them are recovered from
/// internally.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("could not find layer with id: {0}")]
    LayerNotFound(LayerId),
    #[error(
        "found multiple instances of list \"{name}\"; provide a parent id or target all lists"
    )]
    AmbiguousList { name: String },
    #[error("cannot find list with name \"{name}\"")]
    ListNotFound { name: String },
    #[error("record of type {type_name} is missing key field \"{field}\"")]
    MissingKeyField { type_name: String, field: String },
    #[error("type {type_name} has no key fields and cannot be addressed directly")]
    NoKeyFields { type_name: String },
    #[error("encountered abstract type without __typename in the payload (field \"{field}\")")]
    MissingTypename { field: String },
    #[error("parent id variable \"{variable}\" must be a string")]
    InvalidParentId { variable: String },
    #[error("invalid cache snapshot: {0}")]
    Snapshot(#[from] serde_json::Error),
}
