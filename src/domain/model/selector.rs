use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Node id under which system variables live (`["sys", "query"]`).
pub const SYSTEM_VARIABLE_NODE_ID: &str = "sys";

/// A two-part variable address: `(node_id, variable_name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Selector {
    node_id: String,
    variable_name: String,
}

impl Selector {
    pub fn new(node_id: impl Into<String>, variable_name: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            variable_name: variable_name.into(),
        }
    }

    pub fn system(variable_name: impl Into<String>) -> Self {
        Self::new(SYSTEM_VARIABLE_NODE_ID, variable_name)
    }

    pub fn parse_value(value: &Value) -> Option<Self> {
        match value {
            Value::Array(arr) => {
                let mut parts = Vec::with_capacity(arr.len());
                for v in arr {
                    let s = v.as_str()?;
                    if !s.is_empty() {
                        parts.push(s.to_string());
                    }
                }
                Self::from_parts(parts)
            }
            Value::String(s) => Self::parse_str(s),
            _ => None,
        }
    }

    /// Parse `"node.var"`. The first dot splits, so variable names may
    /// themselves contain dots.
    pub fn parse_str(selector: &str) -> Option<Self> {
        let (node_id, variable_name) = selector.split_once('.')?;
        if node_id.is_empty() || variable_name.is_empty() {
            return None;
        }
        Some(Self::new(node_id, variable_name))
    }

    fn from_parts(parts: Vec<String>) -> Option<Self> {
        match parts.len() {
            2 => {
                let mut iter = parts.into_iter();
                let node_id = iter.next()?;
                let variable_name = iter.next()?;
                Some(Self::new(node_id, variable_name))
            }
            _ => None,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn variable_name(&self) -> &str {
        &self.variable_name
    }

    pub fn is_system(&self) -> bool {
        self.node_id == SYSTEM_VARIABLE_NODE_ID
    }
}

impl std::fmt::Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.node_id, self.variable_name)
    }
}

impl Serialize for Selector {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        [self.node_id.as_str(), self.variable_name.as_str()].serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Selector {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct SelectorVisitor;

        impl<'de> serde::de::Visitor<'de> for SelectorVisitor {
            type Value = Selector;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("selector string like 'node.var' or a two-element string array")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Selector::parse_str(v).ok_or_else(|| E::custom("invalid selector string"))
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::SeqAccess<'de>,
            {
                let mut parts = Vec::new();
                while let Some(value) = seq.next_element::<String>()? {
                    if !value.is_empty() {
                        parts.push(value);
                    }
                }
                Selector::from_parts(parts)
                    .ok_or_else(|| serde::de::Error::custom("invalid selector array"))
            }
        }

        deserializer.deserialize_any(SelectorVisitor)
    }
}
