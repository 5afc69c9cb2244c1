//! Selection trees.
//!
//! A [`Selection`] describes which fields of a record to read or write and
//! how. Selections are pure data: the code generator emits them as JSON
//! artifacts (deserialized through serde) and the cache walks them with plain
//! recursion. Each [`FieldSelection`] is tagged by [`FieldKind`] as a scalar,
//! a link to another record, or a link to an abstract type whose concrete
//! fields depend on `__typename`.

use std::collections::HashMap;
use std::rc::Rc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::key::{compute_key, Variables};

/// Field name the cache uses to dispatch abstract selections.
pub const TYPENAME: &str = "__typename";

/// Fields keyed by their output (possibly aliased) name.
pub type FieldMap = IndexMap<String, FieldSelection>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Selection {
    pub fields: FieldMap,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abstract_fields: Option<AbstractFields>,
    /// Concrete types to assume while generating loading state.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub loading_types: Vec<String>,
}

/// Per-concrete-type field sets of an abstract selection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AbstractFields {
    pub fields: IndexMap<String, FieldMap>,
    /// Concrete type → abstract type with an entry in `fields`.
    pub type_map: HashMap<String, String>,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    pub fn with_field(mut self, name: impl Into<String>, field: FieldSelection) -> Self {
        self.fields.insert(name.into(), field);
        self
    }

    /// The fields that apply to a record of `typename`.
    pub fn fields_for_type(&self, typename: Option<&str>, loading: bool) -> &FieldMap {
        let typename = if loading && !self.loading_types.is_empty() {
            self.loading_types.first().map(String::as_str)
        } else {
            typename
        };
        let (Some(typename), Some(abs)) = (typename, self.abstract_fields.as_ref()) else {
            return &self.fields;
        };
        abs.fields
            .get(typename)
            .or_else(|| {
                abs.type_map
                    .get(typename)
                    .and_then(|parent| abs.fields.get(parent))
            })
            .unwrap_or(&self.fields)
    }
}

/// Shape of a field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Scalar,
    Link(Rc<Selection>),
    Abstract {
        selection: Rc<Selection>,
        /// A null value becomes a sentinel object instead of cascading.
        has_required: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateMode {
    Append,
    Prepend,
    Replace,
}

/// An argument value: a literal or a reference to an operation variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum Argument {
    Variable(String),
    #[serde(
        alias = "String",
        alias = "Int",
        alias = "Float",
        alias = "Boolean",
        alias = "Enum"
    )]
    Literal(Value),
}

impl Argument {
    pub fn evaluate(&self, variables: &Variables) -> Option<Value> {
        match self {
            Argument::Literal(v) => Some(v.clone()),
            Argument::Variable(name) => variables.get(name).cloned(),
        }
    }
}

/// Evaluate every argument of a map, dropping missing variables.
pub fn evaluate_arguments(
    args: &IndexMap<String, Argument>,
    variables: &Variables,
) -> Map<String, Value> {
    args.iter()
        .filter_map(|(name, arg)| arg.evaluate(variables).map(|v| (name.clone(), v)))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMeta {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub connection: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationAction {
    Insert,
    Remove,
    Toggle,
    Delete,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Position {
    First,
    #[default]
    Last,
}

/// Predicates on a list's stored filter arguments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListWhen {
    pub must: Map<String, Value>,
    pub must_not: Map<String, Value>,
}

impl ListWhen {
    pub fn must(mut self, key: impl Into<String>, value: Value) -> Self {
        self.must.insert(key.into(), value);
        self
    }

    pub fn must_not(mut self, key: impl Into<String>, value: Value) -> Self {
        self.must_not.insert(key.into(), value);
        self
    }

    /// Whether a list with `filters` passes.
    ///
    /// `must` entries only constrain lists that have filters; a list without
    /// filters always passes `must_not`.
    pub fn matches(&self, filters: Option<&Map<String, Value>>) -> bool {
        let Some(filters) = filters else {
            return true;
        };
        let must = self
            .must
            .iter()
            .all(|(key, value)| filters.get(key) == Some(value));
        let must_not = self
            .must_not
            .iter()
            .all(|(key, value)| filters.get(key) != Some(value));
        must && must_not
    }
}

/// A list mutation attached to a field of a mutation result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListOperation {
    pub action: OperationAction,
    #[serde(default)]
    pub list: Option<String>,
    /// Record type for `delete`.
    #[serde(default, rename = "type")]
    pub type_name: Option<String>,
    #[serde(default, rename = "parentID")]
    pub parent_id: Option<Argument>,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub all_lists: bool,
    #[serde(default)]
    pub when: Option<ListWhen>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Directive {
    pub name: String,
    #[serde(default)]
    pub arguments: IndexMap<String, Argument>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadingKind {
    /// Emit a placeholder marker for this field.
    Value,
    /// Keep walking into the field's selection.
    Continue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadingList {
    pub depth: u32,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadingDirective {
    pub kind: LoadingKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list: Option<LoadingList>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawField", into = "RawField")]
pub struct FieldSelection {
    pub type_name: String,
    pub key_raw: String,
    pub nullable: bool,
    pub visible: bool,
    pub kind: FieldKind,
    pub list: Option<ListMeta>,
    pub updates: Vec<UpdateMode>,
    pub filters: IndexMap<String, Argument>,
    pub operations: Vec<ListOperation>,
    pub directives: Vec<Directive>,
    pub loading: Option<LoadingDirective>,
}

impl FieldSelection {
    fn new(type_name: &str, key_raw: &str, kind: FieldKind) -> Self {
        Self {
            type_name: type_name.to_string(),
            key_raw: key_raw.to_string(),
            nullable: false,
            visible: true,
            kind,
            list: None,
            updates: Vec::new(),
            filters: IndexMap::new(),
            operations: Vec::new(),
            directives: Vec::new(),
            loading: None,
        }
    }

    pub fn scalar(type_name: &str, key_raw: &str) -> Self {
        Self::new(type_name, key_raw, FieldKind::Scalar)
    }

    pub fn link(type_name: &str, key_raw: &str, selection: Selection) -> Self {
        Self::new(type_name, key_raw, FieldKind::Link(Rc::new(selection)))
    }

    pub fn link_rc(type_name: &str, key_raw: &str, selection: Rc<Selection>) -> Self {
        Self::new(type_name, key_raw, FieldKind::Link(selection))
    }

    pub fn abstract_link(type_name: &str, key_raw: &str, selection: Selection) -> Self {
        Self::new(
            type_name,
            key_raw,
            FieldKind::Abstract {
                selection: Rc::new(selection),
                has_required: false,
            },
        )
    }

    /// Build the raw key from literal arguments.
    pub fn with_arguments(mut self, field: &str, args: &Map<String, Value>) -> Self {
        self.key_raw = compute_key(field, Some(args));
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn with_updates(mut self, updates: &[UpdateMode]) -> Self {
        self.updates = updates.to_vec();
        self
    }

    pub fn with_list(mut self, name: &str, type_name: &str, connection: bool) -> Self {
        self.list = Some(ListMeta {
            name: name.to_string(),
            type_name: type_name.to_string(),
            connection,
        });
        self
    }

    pub fn with_operation(mut self, operation: ListOperation) -> Self {
        self.operations.push(operation);
        self
    }

    pub fn selection(&self) -> Option<&Rc<Selection>> {
        match &self.kind {
            FieldKind::Scalar => None,
            FieldKind::Link(selection) | FieldKind::Abstract { selection, .. } => Some(selection),
        }
    }

    pub fn is_abstract(&self) -> bool {
        matches!(self.kind, FieldKind::Abstract { .. })
    }

    pub fn abstract_has_required(&self) -> bool {
        matches!(
            self.kind,
            FieldKind::Abstract {
                has_required: true,
                ..
            }
        )
    }

    pub fn supports(&self, mode: UpdateMode) -> bool {
        self.updates.contains(&mode)
    }

    /// Evaluate `@include`/`@skip` against `variables`.
    pub fn included(&self, variables: &Variables) -> bool {
        for directive in &self.directives {
            let condition = directive
                .arguments
                .get("if")
                .and_then(|arg| arg.evaluate(variables))
                .map(|v| truthy(&v));
            match (directive.name.as_str(), condition) {
                ("include", Some(false)) | ("include", None) => return false,
                ("skip", Some(true)) => return false,
                _ => {}
            }
        }
        true
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn default_true() -> bool {
    true
}

/// The on-the-wire form of a field, as emitted by the code generator.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawField {
    #[serde(rename = "type")]
    type_name: String,
    key_raw: String,
    #[serde(default)]
    nullable: bool,
    #[serde(default = "default_true")]
    visible: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    selection: Option<Rc<Selection>>,
    #[serde(default, rename = "abstract")]
    is_abstract: bool,
    #[serde(default)]
    abstract_has_required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    list: Option<ListMeta>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    updates: Vec<UpdateMode>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    filters: IndexMap<String, Argument>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    operations: Vec<ListOperation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    directives: Vec<Directive>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    loading: Option<LoadingDirective>,
}

impl From<RawField> for FieldSelection {
    fn from(raw: RawField) -> Self {
        let kind = match raw.selection {
            None => FieldKind::Scalar,
            Some(selection) if raw.is_abstract => FieldKind::Abstract {
                selection,
                has_required: raw.abstract_has_required,
            },
            Some(selection) => FieldKind::Link(selection),
        };
        Self {
            type_name: raw.type_name,
            key_raw: raw.key_raw,
            nullable: raw.nullable,
            visible: raw.visible,
            kind,
            list: raw.list,
            updates: raw.updates,
            filters: raw.filters,
            operations: raw.operations,
            directives: raw.directives,
            loading: raw.loading,
        }
    }
}

impl From<FieldSelection> for RawField {
    fn from(field: FieldSelection) -> Self {
        let (selection, is_abstract, abstract_has_required) = match field.kind {
            FieldKind::Scalar => (None, false, false),
            FieldKind::Link(selection) => (Some(selection), false, false),
            FieldKind::Abstract {
                selection,
                has_required,
            } => (Some(selection), true, has_required),
        };
        Self {
            type_name: field.type_name,
            key_raw: field.key_raw,
            nullable: field.nullable,
            visible: field.visible,
            selection,
            is_abstract,
            abstract_has_required,
            list: field.list,
            updates: field.updates,
            filters: field.filters,
            operations: field.operations,
            directives: field.directives,
            loading: field.loading,
        }
    }
}
