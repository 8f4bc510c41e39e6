//! Attribute level modifications applied by `Store::modify`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModOp {
    /// Add the values, keeping any already present.
    Add,
    /// Replace every value of the attribute. No values removes it.
    Replace,
    /// Remove the values. No values removes the attribute.
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modification {
    pub op: ModOp,
    pub attribute: String,
    pub values: Vec<String>,
}

impl Modification {
    pub fn new(op: ModOp, attribute: &str, values: &[&str]) -> Self {
        Modification {
            op,
            attribute: attribute.to_string(),
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }
}

pub fn m_add(attr: &str, values: &[&str]) -> Modification {
    Modification::new(ModOp::Add, attr, values)
}

pub fn m_replace(attr: &str, values: &[&str]) -> Modification {
    Modification::new(ModOp::Replace, attr, values)
}

pub fn m_remove(attr: &str, values: &[&str]) -> Modification {
    Modification::new(ModOp::Remove, attr, values)
}

pub fn m_purge(attr: &str) -> Modification {
    Modification::new(ModOp::Remove, attr, &[])
}
