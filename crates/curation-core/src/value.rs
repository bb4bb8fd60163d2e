//! Feature values
//!
//! A feature is either a primitive value or a slot list of role/target links.
//! Link targets are addresses and therefore only meaningful inside the graph
//! that holds the link.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::graph::Address;

/// A primitive feature value
///
/// Floats compare by their total order so that values can be grouped and
/// sorted like any other key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrimitiveValue {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl PrimitiveValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Boolean(_) => 0,
            Self::Integer(_) => 1,
            Self::Float(_) => 2,
            Self::String(_) => 3,
        }
    }
}

impl PartialEq for PrimitiveValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PrimitiveValue {}

impl PartialOrd for PrimitiveValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PrimitiveValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Boolean(a), Self::Boolean(b)) => a.cmp(b),
            (Self::Integer(a), Self::Integer(b)) => a.cmp(b),
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b),
            (Self::String(a), Self::String(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl Hash for PrimitiveValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Self::Boolean(b) => b.hash(state),
            Self::Integer(i) => i.hash(state),
            Self::Float(f) => f.to_bits().hash(state),
            Self::String(s) => s.hash(state),
        }
    }
}

impl std::fmt::Display for PrimitiveValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

/// One slot of a link feature
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkWithRole {
    /// Role the filler plays for the host
    pub role: String,

    /// Address of the filler in the same graph as the host
    pub target: Address,
}

impl LinkWithRole {
    pub fn new(role: impl Into<String>, target: Address) -> Self {
        Self {
            role: role.into(),
            target,
        }
    }
}

/// Value of a feature on an annotation node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Links(Vec<LinkWithRole>),
    Primitive(PrimitiveValue),
}

impl FeatureValue {
    pub fn as_primitive(&self) -> Option<&PrimitiveValue> {
        match self {
            Self::Primitive(p) => Some(p),
            Self::Links(_) => None,
        }
    }

    pub fn as_links(&self) -> Option<&[LinkWithRole]> {
        match self {
            Self::Links(links) => Some(links),
            Self::Primitive(_) => None,
        }
    }
}

impl From<&str> for FeatureValue {
    fn from(value: &str) -> Self {
        Self::Primitive(PrimitiveValue::String(value.to_string()))
    }
}

impl From<String> for FeatureValue {
    fn from(value: String) -> Self {
        Self::Primitive(PrimitiveValue::String(value))
    }
}

impl From<i64> for FeatureValue {
    fn from(value: i64) -> Self {
        Self::Primitive(PrimitiveValue::Integer(value))
    }
}

impl From<f64> for FeatureValue {
    fn from(value: f64) -> Self {
        Self::Primitive(PrimitiveValue::Float(value))
    }
}

impl From<bool> for FeatureValue {
    fn from(value: bool) -> Self {
        Self::Primitive(PrimitiveValue::Boolean(value))
    }
}

impl From<PrimitiveValue> for FeatureValue {
    fn from(value: PrimitiveValue) -> Self {
        Self::Primitive(value)
    }
}

impl From<Vec<LinkWithRole>> for FeatureValue {
    fn from(value: Vec<LinkWithRole>) -> Self {
        Self::Links(value)
    }
}
