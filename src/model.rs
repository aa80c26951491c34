use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identity of a persisted item: structured type plus local id.
/// Branch and revision live in the persistence substrate and are not part of
/// this layer. Ordering is `(type_name, id)`, which doubles as the
/// deterministic tie-break for links with equal order keys.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Encode, Decode)]
pub struct ItemKey {
    pub type_name: String,
    pub id: u64,
}

impl ItemKey {
    pub fn new(type_name: &str, id: u64) -> Self {
        ItemKey { type_name: type_name.to_string(), id }
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.type_name, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Multiplicity {
    Single,
    Multiple,
}

/// Declared value type of an attribute: a primitive datatype, an enumeration,
/// or a class/interface type named by `Item`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Bool,
    Int,
    Float,
    Text,
    Enum { name: String, literals: Vec<String> },
    Item(String),
}

/// Attribute descriptor as declared by the meta-model, consumed read-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDescriptor {
    pub id: String,
    pub name: String,
    pub owner_type: String,
    pub multiplicity: Multiplicity,
    #[serde(default)]
    pub ordered: bool,
    #[serde(default)]
    pub bag: bool,
    #[serde(default)]
    pub mandatory: bool,
    #[serde(default)]
    pub composite: bool,
    pub value_type: ValueType,
}

impl AttributeDescriptor {
    pub fn is_collection(&self) -> bool {
        self.multiplicity == Multiplicity::Multiple
    }

    /// Target type name for reference attributes, `None` for primitives.
    pub fn target_type(&self) -> Option<&str> {
        match &self.value_type {
            ValueType::Item(name) => Some(name),
            _ => None,
        }
    }
}

/// Domain value handed to and returned from storage strategies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Item(ItemKey),
    Collection(Vec<AttrValue>),
}

impl AttrValue {
    pub fn is_null(&self) -> bool {
        matches!(self, AttrValue::Null)
    }

    /// True for `Null` and for an empty collection.
    pub fn is_empty(&self) -> bool {
        match self {
            AttrValue::Null => true,
            AttrValue::Collection(values) => values.is_empty(),
            _ => false,
        }
    }

    pub fn as_item(&self) -> Option<&ItemKey> {
        match self {
            AttrValue::Item(key) => Some(key),
            _ => None,
        }
    }

    /// Elements of a collection value. `Null` counts as the empty collection,
    /// any other scalar is rejected.
    pub fn elements(&self) -> Option<&[AttrValue]> {
        match self {
            AttrValue::Collection(values) => Some(values),
            AttrValue::Null => Some(&[]),
            _ => None,
        }
    }

    pub fn item(key: ItemKey) -> AttrValue {
        AttrValue::Item(key)
    }

    pub fn collection(values: Vec<AttrValue>) -> AttrValue {
        AttrValue::Collection(values)
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Null => write!(f, "null"),
            AttrValue::Bool(v) => write!(f, "{}", v),
            AttrValue::Int(v) => write!(f, "{}", v),
            AttrValue::Float(v) => write!(f, "{}", v),
            AttrValue::Text(v) => write!(f, "{}", v),
            AttrValue::Item(k) => write!(f, "{}", k),
            AttrValue::Collection(values) => {
                write!(f, "[")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<ItemKey> for AttrValue {
    fn from(key: ItemKey) -> Self {
        AttrValue::Item(key)
    }
}
