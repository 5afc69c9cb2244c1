//! Cache configuration.
//!
//! The serializable part (key fields, GC buffer, freshness age, partial
//! tolerance) is usually loaded from the same JSON the code generator reads.
//! Scalar codecs and the clock are attached in code.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use graph_cache_util::clock::{Clock, SystemClock};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Number of idle GC ticks a field survives when nothing subscribes to it.
pub const DEFAULT_CACHE_BUFFER_SIZE: u32 = 10;

/// Per-type settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TypeConfig {
    /// Fields that identify a record of this type. An empty list marks the
    /// type as embedded.
    pub keys: Vec<String>,
}

/// A marshal/unmarshal pair for a custom scalar.
#[derive(Clone)]
pub struct ScalarCodec {
    pub marshal: Rc<dyn Fn(&Value) -> Value>,
    pub unmarshal: Rc<dyn Fn(&Value) -> Value>,
}

impl ScalarCodec {
    pub fn new(
        marshal: impl Fn(&Value) -> Value + 'static,
        unmarshal: impl Fn(&Value) -> Value + 'static,
    ) -> Self {
        Self {
            marshal: Rc::new(marshal),
            unmarshal: Rc::new(unmarshal),
        }
    }
}

impl fmt::Debug for ScalarCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScalarCodec").finish_non_exhaustive()
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheConfig {
    /// Idle ticks before an unsubscribed field is evicted.
    pub cache_buffer_size: u32,
    /// Maximum age (milliseconds) before a written field is considered stale.
    pub default_lifetime: Option<u64>,
    /// Whether callers accept partial data from the cache.
    pub default_partial: bool,
    /// Key fields used for types without an entry in `types`.
    pub default_keys: Vec<String>,
    pub types: HashMap<String, TypeConfig>,
    #[serde(skip)]
    pub scalars: HashMap<String, ScalarCodec>,
    #[serde(skip)]
    clock: Option<Rc<dyn Clock>>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_buffer_size: DEFAULT_CACHE_BUFFER_SIZE,
            default_lifetime: None,
            default_partial: false,
            default_keys: vec!["id".to_string()],
            types: HashMap::new(),
            scalars: HashMap::new(),
            clock: None,
        }
    }
}

impl fmt::Debug for CacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheConfig")
            .field("cache_buffer_size", &self.cache_buffer_size)
            .field("default_lifetime", &self.default_lifetime)
            .field("default_partial", &self.default_partial)
            .field("default_keys", &self.default_keys)
            .field("types", &self.types)
            .field("scalars", &self.scalars.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CacheConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Set the key fields for a type. Pass an empty list to make it embedded.
    pub fn with_keys<I, S>(mut self, type_name: &str, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.types.insert(
            type_name.to_string(),
            TypeConfig {
                keys: keys.into_iter().map(Into::into).collect(),
            },
        );
        self
    }

    pub fn with_buffer_size(mut self, size: u32) -> Self {
        self.cache_buffer_size = size;
        self
    }

    pub fn with_lifetime(mut self, millis: u64) -> Self {
        self.default_lifetime = Some(millis);
        self
    }

    pub fn with_partial(mut self, allow: bool) -> Self {
        self.default_partial = allow;
        self
    }

    pub fn with_scalar(mut self, type_name: &str, codec: ScalarCodec) -> Self {
        self.scalars.insert(type_name.to_string(), codec);
        self
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Some(Rc::new(clock));
        self
    }

    /// The key fields that identify records of `type_name`.
    pub fn key_fields(&self, type_name: &str) -> &[String] {
        match self.types.get(type_name) {
            Some(cfg) => &cfg.keys,
            None => &self.default_keys,
        }
    }

    pub fn now_millis(&self) -> u64 {
        match &self.clock {
            Some(clock) => clock.now_millis(),
            None => SystemClock.now_millis(),
        }
    }
}
