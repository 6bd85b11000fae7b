use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Symbolic pointer into the generated description. Identifiers threaded
/// between nodes are references, never resolved values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reference {
    Ref {
        logical_id: String,
    },
    Attr {
        logical_id: String,
        attribute: String,
    },
    Literal {
        value: String,
    },
    Join {
        separator: String,
        parts: Vec<Reference>,
    },
}

impl Reference {
    pub fn to(logical_id: impl Into<String>) -> Self {
        Reference::Ref {
            logical_id: logical_id.into(),
        }
    }

    pub fn attr(logical_id: impl Into<String>, attribute: impl Into<String>) -> Self {
        Reference::Attr {
            logical_id: logical_id.into(),
            attribute: attribute.into(),
        }
    }

    pub fn literal(value: impl Into<String>) -> Self {
        Reference::Literal {
            value: value.into(),
        }
    }

    pub fn join(separator: impl Into<String>, parts: Vec<Reference>) -> Self {
        Reference::Join {
            separator: separator.into(),
            parts,
        }
    }

    pub fn region() -> Self {
        Reference::to("AWS::Region")
    }

    pub fn account_id() -> Self {
        Reference::to("AWS::AccountId")
    }

    /// Logical id of the resource this reference points at, if any.
    pub fn target(&self) -> Option<&str> {
        match self {
            Reference::Ref { logical_id } | Reference::Attr { logical_id, .. } => {
                Some(logical_id.as_str())
            }
            Reference::Literal { .. } | Reference::Join { .. } => None,
        }
    }

    /// Intrinsic-function form used inside the rendered template.
    pub fn to_template(&self) -> Value {
        match self {
            Reference::Ref { logical_id } => json!({ "Ref": logical_id }),
            Reference::Attr {
                logical_id,
                attribute,
            } => json!({ "Fn::GetAtt": [logical_id, attribute] }),
            Reference::Literal { value } => Value::String(value.clone()),
            Reference::Join { separator, parts } => {
                let parts: Vec<Value> = parts.iter().map(Reference::to_template).collect();
                json!({ "Fn::Join": [separator, parts] })
            }
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Ref { logical_id } => write!(f, "${{{logical_id}}}"),
            Reference::Attr {
                logical_id,
                attribute,
            } => write!(f, "${{{logical_id}.{attribute}}}"),
            Reference::Literal { value } => f.write_str(value),
            Reference::Join { separator, parts } => {
                for (idx, part) in parts.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(separator)?;
                    }
                    write!(f, "{part}")?;
                }
                Ok(())
            }
        }
    }
}

impl From<&str> for Reference {
    fn from(value: &str) -> Self {
        Reference::literal(value)
    }
}

impl From<String> for Reference {
    fn from(value: String) -> Self {
        Reference::literal(value)
    }
}

/// One resource entry of the generated description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDeclaration {
    pub logical_id: String,
    pub resource_type: String,
    pub properties: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_policy: Option<String>,
}

impl ResourceDeclaration {
    pub fn new(logical_id: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            logical_id: logical_id.into(),
            resource_type: resource_type.into(),
            properties: Map::new(),
            depends_on: Vec::new(),
            deletion_policy: None,
        }
    }

    pub fn property(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }

    pub fn reference(self, key: &str, reference: &Reference) -> Self {
        self.property(key, reference.to_template())
    }

    pub fn depends_on(mut self, logical_id: impl Into<String>) -> Self {
        self.depends_on.push(logical_id.into());
        self
    }

    pub fn retain(mut self) -> Self {
        self.deletion_policy = Some("Retain".to_string());
        self
    }

    pub fn id_ref(&self) -> Reference {
        Reference::to(self.logical_id.clone())
    }

    pub fn attr(&self, attribute: &str) -> Reference {
        Reference::attr(self.logical_id.clone(), attribute)
    }

    /// Template body for this resource.
    pub fn to_template(&self) -> Value {
        let mut body = Map::new();
        body.insert("Type".into(), Value::String(self.resource_type.clone()));
        if !self.properties.is_empty() {
            body.insert("Properties".into(), Value::Object(self.properties.clone()));
        }
        if !self.depends_on.is_empty() {
            body.insert("DependsOn".into(), json!(self.depends_on));
        }
        if let Some(policy) = &self.deletion_policy {
            body.insert("DeletionPolicy".into(), Value::String(policy.clone()));
        }
        Value::Object(body)
    }
}

/// Renders a list of references as template values.
pub fn reference_list(references: &[Reference]) -> Value {
    Value::Array(references.iter().map(Reference::to_template).collect())
}

/// Resource naming for one environment: logical ids are alphanumeric,
/// physical names keep the raw prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Naming {
    prefix: String,
    logical_prefix: String,
}

impl Naming {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            logical_prefix: prefix.chars().filter(|c| c.is_ascii_alphanumeric()).collect(),
        }
    }

    pub fn logical(&self, name: &str) -> String {
        format!("{}{}", self.logical_prefix, name)
    }

    pub fn physical(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }
}
