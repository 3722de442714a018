//! Structural descriptors for node inputs and outputs.
//!
//! A [`Shape`] enumerates named, typed properties. It drives readiness
//! (every required property must hold a value), edge validation (both ends of
//! an edge must name declared properties), and value checks before and after
//! a node is invoked.

use serde::{Deserialize, Serialize};

use crate::types::{Value, ValueMap};

static ANY: ValueKind = ValueKind::Any;

/// Type of a single property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ValueKind {
    Any,
    Boolean,
    Number,
    String,
    Array { items: Box<ValueKind> },
    Struct { properties: Vec<Property> },
    Union { variants: Vec<ValueKind> },
}

impl ValueKind {
    pub fn array(items: ValueKind) -> Self {
        Self::Array {
            items: Box::new(items),
        }
    }

    /// Whether multiple edges may feed a property of this kind.
    pub fn is_array(&self) -> bool {
        matches!(self, Self::Array { .. })
    }

    /// Check a value against this kind.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::Any => true,
            Self::Boolean => value.is_boolean(),
            Self::Number => value.is_number(),
            Self::String => value.is_string(),
            Self::Array { items } => value
                .as_array()
                .is_some_and(|values| values.iter().all(|v| items.accepts(v))),
            Self::Struct { properties } => value.as_object().is_some_and(|obj| {
                properties.iter().all(|p| match obj.get(&p.name) {
                    Some(v) => p.kind.accepts(v),
                    None => p.optional,
                })
            }),
            Self::Union { variants } => variants.iter().any(|k| k.accepts(value)),
        }
    }

    /// Short human-readable name, used in diagnostics.
    pub fn describe(&self) -> String {
        match self {
            Self::Any => "any".into(),
            Self::Boolean => "boolean".into(),
            Self::Number => "number".into(),
            Self::String => "string".into(),
            Self::Array { items } => format!("{}[]", items.describe()),
            Self::Struct { .. } => "struct".into(),
            Self::Union { variants } => variants
                .iter()
                .map(|v| v.describe())
                .collect::<Vec<_>>()
                .join(" | "),
        }
    }
}

/// A named property of a shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub name: String,
    pub kind: ValueKind,
    #[serde(default)]
    pub optional: bool,
}

/// Input or output shape of a node descriptor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Shape {
    #[serde(default)]
    pub properties: Vec<Property>,
    /// Open shapes accept any property name with kind `any`.
    #[serde(default)]
    pub open: bool,
}

impl Shape {
    /// The empty struct; used by nodes without inputs or outputs.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A shape accepting arbitrary property names.
    pub fn open() -> Self {
        Self {
            properties: vec![],
            open: true,
        }
    }

    /// Add a required property.
    pub fn with(mut self, name: impl Into<String>, kind: ValueKind) -> Self {
        self.properties.push(Property {
            name: name.into(),
            kind,
            optional: false,
        });
        self
    }

    /// Add an optional property.
    pub fn with_optional(mut self, name: impl Into<String>, kind: ValueKind) -> Self {
        self.properties.push(Property {
            name: name.into(),
            kind,
            optional: true,
        });
        self
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.open || self.property(name).is_some()
    }

    /// Kind of a property; open shapes report `any` for undeclared names.
    pub fn kind_of(&self, name: &str) -> Option<&ValueKind> {
        match self.property(name) {
            Some(p) => Some(&p.kind),
            None if self.open => Some(&ANY),
            None => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty() && !self.open
    }

    pub fn required(&self) -> impl Iterator<Item = &Property> {
        self.properties.iter().filter(|p| !p.optional)
    }

    /// Every required property has a value.
    pub fn is_satisfied_by(&self, values: &ValueMap) -> bool {
        self.required().all(|p| values.contains_key(&p.name))
    }

    /// Check every present value against its declared kind.
    ///
    /// Returns the offending property and a message on the first mismatch.
    pub fn check(&self, values: &ValueMap) -> std::result::Result<(), (String, String)> {
        for (name, value) in values {
            match self.kind_of(name) {
                Some(kind) if kind.accepts(value) => {}
                Some(kind) => {
                    return Err((
                        name.clone(),
                        format!("expected {}, got {}", kind.describe(), value),
                    ))
                }
                None => return Err((name.clone(), "property not declared".into())),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn values(pairs: &[(&str, Value)]) -> ValueMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_readiness_requires_all_required() {
        let shape = Shape::empty()
            .with("a", ValueKind::Boolean)
            .with("b", ValueKind::Boolean)
            .with_optional("hint", ValueKind::String);

        assert!(!shape.is_satisfied_by(&values(&[("a", json!(true))])));
        assert!(shape.is_satisfied_by(&values(&[("a", json!(true)), ("b", json!(false))])));
        // Optional inputs never flip readiness.
        assert!(shape.is_satisfied_by(&values(&[
            ("a", json!(true)),
            ("b", json!(false)),
            ("hint", json!("x")),
        ])));
    }

    #[test]
    fn test_empty_shape_is_always_satisfied() {
        assert!(Shape::empty().is_satisfied_by(&ValueMap::new()));
        assert!(Shape::empty().is_empty());
        assert!(!Shape::open().is_empty());
    }

    #[test]
    fn test_check_kinds() {
        let shape = Shape::empty()
            .with("flag", ValueKind::Boolean)
            .with("items", ValueKind::array(ValueKind::Number));

        assert!(shape
            .check(&values(&[("flag", json!(true)), ("items", json!([1, 2]))]))
            .is_ok());

        let (prop, msg) = shape.check(&values(&[("flag", json!("yes"))])).unwrap_err();
        assert_eq!(prop, "flag");
        assert!(msg.contains("expected boolean"));

        let (prop, _) = shape.check(&values(&[("other", json!(1))])).unwrap_err();
        assert_eq!(prop, "other");
    }

    #[test]
    fn test_open_shape_accepts_anything() {
        let shape = Shape::open();
        assert!(shape.has_property("whatever"));
        assert!(shape.check(&values(&[("x", json!({"a": 1}))])).is_ok());
    }

    #[test]
    fn test_struct_and_union_kinds() {
        let kind = ValueKind::Struct {
            properties: vec![Property {
                name: "id".into(),
                kind: ValueKind::String,
                optional: false,
            }],
        };
        assert!(kind.accepts(&json!({"id": "x", "extra": 1})));
        assert!(!kind.accepts(&json!({"extra": 1})));

        let union = ValueKind::Union {
            variants: vec![ValueKind::String, ValueKind::Number],
        };
        assert!(union.accepts(&json!(3)));
        assert!(!union.accepts(&json!(true)));
        assert_eq!(union.describe(), "string | number");
    }
}
