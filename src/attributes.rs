//! Directory attributes shaped for JSON responses.

use serde::{Serialize, Serializer};

use crate::ldap::DirectoryEntry;

/// Placeholder for attributes the entry does not carry.
pub const NOT_AVAILABLE: &str = "N/A";

/// Normalized attribute value.
///
/// Serializes to `"N/A"`, a string or an array of strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    Absent,
    Scalar(String),
    Multi(Vec<String>),
}

impl AttributeValue {
    /// Collapse a raw value list: none left is [`AttributeValue::Absent`],
    /// a single one is [`AttributeValue::Scalar`].
    pub fn from_values(values: Option<&[String]>) -> Self {
        match values {
            None | Some([]) => Self::Absent,
            Some([value]) => Self::Scalar(value.clone()),
            Some(values) => Self::Multi(values.to_vec()),
        }
    }

    /// Always a sequence. Absent values become `["N/A"]`.
    pub fn into_sequence(self) -> Vec<String> {
        match self {
            Self::Absent => vec![NOT_AVAILABLE.to_owned()],
            Self::Scalar(value) => vec![value],
            Self::Multi(values) => values,
        }
    }
}

impl Serialize for AttributeValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Absent => serializer.serialize_str(NOT_AVAILABLE),
            Self::Scalar(value) => serializer.serialize_str(value),
            Self::Multi(values) => values.serialize(serializer),
        }
    }
}

/// Normalized value of `key` on `entry`.
pub fn get_attr(entry: &DirectoryEntry, key: &str) -> AttributeValue {
    AttributeValue::from_values(entry.values(key))
}

/// Attributes reported for a verified user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAttributes {
    pub mail: AttributeValue,
    pub cn: AttributeValue,
    pub ou: AttributeValue,
    pub account_status: AttributeValue,
    pub object_class: Vec<String>,
}

impl UserAttributes {
    pub fn from_entry(entry: &DirectoryEntry) -> Self {
        Self {
            mail: get_attr(entry, "mail"),
            cn: get_attr(entry, "cn"),
            ou: get_attr(entry, "ou"),
            account_status: get_attr(entry, "accountstatus"),
            object_class: get_attr(entry, "objectclass").into_sequence(),
        }
    }
}
