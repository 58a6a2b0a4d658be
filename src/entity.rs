//! Generic entity carrier.
//!
//! The engine never dispatches on Rust type identity. Every entity crossing
//! an engine boundary is converted to a [`FieldMap`], a flat field-name to
//! JSON-value mapping carrying two reserved keys: the *type tag* naming the
//! entity's logical type and the *primary-key tag* naming its primary-key
//! field. The tags survive every round trip; losing them is a programming
//! error, not a recoverable runtime condition.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::StorageError;

/// Reserved key carrying the entity's logical type name.
pub const TYPE_TAG: &str = "_entity";

/// Reserved key carrying the name of the entity's primary-key field.
pub const PRIMARY_KEY_TAG: &str = "_primary_key";

/// Schema-less representation of one row.
pub type FieldMap = Map<String, Value>;

/// A value the engine can store and fetch.
///
/// Field names follow the serde wire names (conventionally lowercased
/// snake_case, matching the database column names). The logical name binds
/// the type to its [`Table`](crate::model::Table) declaration and is
/// conventionally the struct name.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync {
    /// Logical name used for table lookup, key prefixes, and the type tag.
    fn entity_name() -> &'static str;
}

/// Startup-time snapshot of an entity's field layout.
///
/// Captured once per table at engine construction; used to enumerate field
/// names, detect slice-typed columns, and synthesize skeleton rows during
/// list expansion. Runtime paths never introspect entity types again.
#[derive(Debug, Clone)]
pub struct Prototype {
    name: String,
    fields: FieldMap,
}

impl Prototype {
    /// Capture the prototype of a defaulted entity.
    pub fn of<E: Entity + Default>() -> Result<Self, StorageError> {
        Self::from_entity(&E::default())
    }

    /// Capture the prototype from a concrete entity value.
    pub fn from_entity<E: Entity>(entity: &E) -> Result<Self, StorageError> {
        let fields = to_map(entity)?;
        Ok(Self {
            name: E::entity_name().to_string(),
            fields,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn fields(&self) -> &FieldMap {
        &self.fields
    }

    /// Names of fields whose JSON representation is an array.
    pub(crate) fn slice_fields(&self) -> Vec<String> {
        self.fields
            .iter()
            .filter(|(_, value)| value.is_array())
            .map(|(name, _)| name.clone())
            .collect()
    }
}

/// Convert an entity into its tagged field mapping.
pub(crate) fn to_map<E: Entity>(entity: &E) -> Result<FieldMap, StorageError> {
    let value = serde_json::to_value(entity)
        .map_err(|err| StorageError::contract(format!("entity does not serialize: {err}")))?;
    let Value::Object(mut map) = value else {
        return Err(StorageError::contract(format!(
            "entity `{}` must serialize to a JSON object",
            E::entity_name()
        )));
    };
    map.insert(
        TYPE_TAG.to_string(),
        Value::String(E::entity_name().to_string()),
    );
    Ok(map)
}

/// Populate an entity from a field mapping.
pub(crate) fn from_map<E: Entity>(map: FieldMap) -> Result<E, StorageError> {
    serde_json::from_value(Value::Object(map))
        .map_err(|err| StorageError::contract(format!("entity does not deserialize: {err}")))
}

/// Populate an ordered sequence of entities from row mappings.
pub(crate) fn from_maps<E: Entity>(maps: Vec<FieldMap>) -> Result<Vec<E>, StorageError> {
    maps.into_iter().map(from_map).collect()
}

/// The row's type tag, or a contract violation when absent.
pub(crate) fn type_tag(map: &FieldMap) -> Result<&str, StorageError> {
    map.get(TYPE_TAG)
        .and_then(Value::as_str)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| StorageError::contract("field map is missing its type tag"))
}

/// Overwrite `into` with every field of `from`, keeping fields `from`
/// does not mention.
pub(crate) fn merge(into: &mut FieldMap, from: &FieldMap) {
    for (key, value) in from {
        into.insert(key.clone(), value.clone());
    }
}
