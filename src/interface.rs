use std::collections::BTreeMap;

use crate::value::Value;

/// The root variables visible to a template render.
///
/// Every render starts from a fresh scope seeded with a shallow copy of these
/// variables, so assignments made by `{% set %}` never leak back into the
/// `Context` itself. Lists and maps are shared handles though, so mutating a
/// nested map through a dotted `set` target is visible to the caller.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Context {
    data: BTreeMap<String, Value>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a context from the keys of a JSON object. Anything other than
    /// an object yields an empty context.
    pub fn from_json(json: serde_json::Value) -> Self {
        let data = match json {
            serde_json::Value::Object(entries) => entries
                .into_iter()
                .map(|(k, v)| (k, Value::from(v)))
                .collect(),
            serde_json::Value::Null
            | serde_json::Value::Bool(_)
            | serde_json::Value::Number(_)
            | serde_json::Value::String(_)
            | serde_json::Value::Array(_) => BTreeMap::new(),
        };
        Self { data }
    }

    pub fn insert<N: AsRef<str>, V: Into<Value>>(&mut self, name: N, value: V) -> &mut Self {
        self.data.insert(name.as_ref().to_string(), value.into());
        self
    }

    pub fn get<T: AsRef<str>>(&self, name: T) -> Option<&Value> {
        self.data.get(name.as_ref())
    }

    pub fn contains<T: AsRef<str>>(&self, name: T) -> bool {
        self.data.contains_key(name.as_ref())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub(crate) fn variables(&self) -> &BTreeMap<String, Value> {
        &self.data
    }
}

impl From<serde_json::Value> for Context {
    fn from(json: serde_json::Value) -> Self {
        Self::from_json(json)
    }
}

/// Serializes as a JSON object. Functions become `null`.
#[cfg(feature = "serde")]
impl serde::Serialize for Context {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;

        let mut map = serializer.serialize_map(Some(self.data.len()))?;
        for (name, value) in &self.data {
            map.serialize_entry(name, &value.to_json())?;
        }
        map.end()
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for Context {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let entries = BTreeMap::<String, serde_json::Value>::deserialize(deserializer)?;
        let data = entries
            .into_iter()
            .map(|(name, value)| (name, Value::from(value)))
            .collect();
        Ok(Self { data })
    }
}
