//! The schema view consumed by the partition and the search layer.
//!
//! The store does not manage schema. It only needs to know, for any attribute
//! named on an entry, a DN or a filter, which canonical attribute type it
//! refers to, how its values are normalised and compared, and which other
//! attribute types are subtypes of it. [`SchemaView`] is that capability.
//! [`Schema`] is a small in memory implementation that carries the core
//! directory attributes, and can be extended by callers.

use std::cmp::Ordering;
use std::fmt::Debug;
use std::str::FromStr;
use std::sync::Arc;

use hashbrown::HashMap;
use uuid::Uuid;

use crate::csn::Csn;
use crate::dn::Dn;
use crate::prelude::*;

/// How the values of an attribute are normalised and ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchingRule {
    /// caseIgnoreMatch and friends. Deep trimmed and lower cased.
    CaseIgnore,
    /// caseExactMatch. Deep trimmed only.
    CaseExact,
    /// integerMatch / integerOrderingMatch.
    Integer,
    /// distinguishedNameMatch.
    DistinguishedName,
    /// uuidMatch / uuidOrderingMatch.
    Uuid,
    /// csnMatch / csnOrderingMatch.
    Csn,
    /// octetStringMatch. The value is taken verbatim.
    OctetString,
}

fn deep_trim(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

impl MatchingRule {
    /// Normalise a raw value into its canonical comparable form.
    pub fn normalize(&self, schema: &dyn SchemaView, value: &str) -> Result<String, OperationError> {
        match self {
            MatchingRule::CaseIgnore => Ok(deep_trim(value).to_lowercase()),
            MatchingRule::CaseExact => Ok(deep_trim(value)),
            MatchingRule::OctetString => Ok(value.to_string()),
            MatchingRule::Integer => value
                .trim()
                .parse::<i128>()
                .map(|i| i.to_string())
                .map_err(|_| {
                    OperationError::SchemaViolation(SchemaError::InvalidAttributeSyntax(
                        value.to_string(),
                    ))
                }),
            MatchingRule::Uuid => Uuid::parse_str(value.trim())
                .map(|u| u.as_hyphenated().to_string())
                .map_err(|_| {
                    OperationError::SchemaViolation(SchemaError::InvalidAttributeSyntax(
                        value.to_string(),
                    ))
                }),
            MatchingRule::Csn => Csn::from_str(value.trim()).map(|c| c.to_string()),
            MatchingRule::DistinguishedName => {
                let dn = Dn::parse(value)?.normalize(schema)?;
                Ok(dn.norm_name())
            }
        }
    }

    /// Compare two values that have already been normalised by this rule.
    pub fn compare(&self, a: &str, b: &str) -> Ordering {
        match self {
            MatchingRule::Integer => match (a.parse::<i128>(), b.parse::<i128>()) {
                (Ok(x), Ok(y)) => x.cmp(&y),
                _ => a.cmp(b),
            },
            _ => a.as_bytes().cmp(b.as_bytes()),
        }
    }

    /// True when the byte order of normalised values agrees with
    /// [`compare`](Self::compare), which lets range scans walk an index in
    /// key order and stop at the bound.
    pub fn is_byte_ordered(&self) -> bool {
        !matches!(self, MatchingRule::Integer)
    }
}

/// An attribute type definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaAttribute {
    pub oid: String,
    /// Lower cased names, the first is canonical.
    pub names: Vec<String>,
    /// Canonical name of the superior type.
    pub superior: Option<String>,
    pub equality: Option<MatchingRule>,
    pub ordering: Option<MatchingRule>,
    pub substring: Option<MatchingRule>,
    pub single_value: bool,
}

impl SchemaAttribute {
    pub fn new(oid: &str, name: &str) -> Self {
        SchemaAttribute {
            oid: oid.to_string(),
            names: vec![name.to_lowercase()],
            superior: None,
            equality: None,
            ordering: None,
            substring: None,
            single_value: false,
        }
    }

    pub fn alias(mut self, name: &str) -> Self {
        self.names.push(name.to_lowercase());
        self
    }

    pub fn sup(mut self, name: &str) -> Self {
        self.superior = Some(name.to_lowercase());
        self
    }

    pub fn equality(mut self, rule: MatchingRule) -> Self {
        self.equality = Some(rule);
        self
    }

    pub fn ordering(mut self, rule: MatchingRule) -> Self {
        self.ordering = Some(rule);
        self
    }

    pub fn substring(mut self, rule: MatchingRule) -> Self {
        self.substring = Some(rule);
        self
    }

    pub fn single_value(mut self) -> Self {
        self.single_value = true;
        self
    }

    /// The canonical name of this type.
    pub fn name(&self) -> &str {
        self.names.first().map(String::as_str).unwrap_or(self.oid.as_str())
    }

    pub fn equality_rule(&self) -> MatchingRule {
        self.equality.unwrap_or(MatchingRule::OctetString)
    }

    pub fn ordering_or_equality(&self) -> MatchingRule {
        self.ordering.unwrap_or_else(|| self.equality_rule())
    }

    pub fn substring_or_equality(&self) -> MatchingRule {
        self.substring.unwrap_or_else(|| self.equality_rule())
    }

    pub fn normalize(&self, schema: &dyn SchemaView, value: &str) -> Result<String, OperationError> {
        self.equality_rule().normalize(schema, value)
    }
}

/// The lookup service the partition consumes. It is injected as an
/// `Arc<dyn SchemaView>` so callers can back it with their own registry.
pub trait SchemaView: Send + Sync + Debug {
    /// Look up an attribute type by any of its names or its OID. Names are
    /// case insensitive.
    fn attribute_type(&self, name: &str) -> Option<Arc<SchemaAttribute>>;

    fn has_descendants(&self, attr: &SchemaAttribute) -> bool;

    /// Every transitive subtype of `attr`, not including `attr` itself.
    fn descendants_of(&self, attr: &SchemaAttribute) -> Vec<Arc<SchemaAttribute>>;

    fn resolve(&self, name: &str) -> Result<Arc<SchemaAttribute>, OperationError> {
        self.attribute_type(name).ok_or_else(|| {
            admin_debug!(?name, "attribute type not in schema");
            OperationError::InvalidAttributeName(name.to_string())
        })
    }
}

/// An in memory attribute registry.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    attributes: HashMap<AttrString, Arc<SchemaAttribute>>,
    subtypes: HashMap<AttrString, Vec<AttrString>>,
}

impl Schema {
    pub fn new() -> Self {
        Schema::default()
    }

    /// Add an attribute type. Matching rules not set on the definition are
    /// inherited from its superior, which must already be present.
    pub fn add_attribute(&mut self, mut attr: SchemaAttribute) -> Result<(), OperationError> {
        if let Some(sup) = attr.superior.clone() {
            let parent = self.attribute_type(&sup).ok_or_else(|| {
                admin_error!(attr = ?attr.name(), ?sup, "superior attribute type is missing");
                OperationError::InvalidAttributeName(sup.clone())
            })?;
            attr.equality = attr.equality.or(parent.equality);
            attr.ordering = attr.ordering.or(parent.ordering);
            attr.substring = attr.substring.or(parent.substring);
            self.subtypes
                .entry(AttrString::from(parent.name()))
                .or_default()
                .push(AttrString::from(attr.name()));
        }

        let attr = Arc::new(attr);
        for name in attr.names.iter() {
            self.attributes.insert(AttrString::from(name.as_str()), attr.clone());
        }
        self.attributes
            .insert(AttrString::from(attr.oid.as_str()), attr.clone());
        Ok(())
    }

    /// The core directory attributes the store and its tests rely on.
    pub fn core() -> Self {
        use MatchingRule as M;
        let defs = vec![
            SchemaAttribute::new(OID_OBJECTCLASS, ATTR_OBJECTCLASS).equality(M::CaseIgnore),
            SchemaAttribute::new(OID_ALIASED_OBJECT_NAME, ATTR_ALIASED_OBJECT_NAME)
                .equality(M::DistinguishedName)
                .single_value(),
            SchemaAttribute::new(OID_ENTRYUUID, ATTR_ENTRYUUID)
                .equality(M::Uuid)
                .ordering(M::Uuid)
                .single_value(),
            SchemaAttribute::new(OID_ENTRYCSN, ATTR_ENTRYCSN)
                .equality(M::Csn)
                .ordering(M::Csn)
                .single_value(),
            SchemaAttribute::new(OID_ENTRYPARENTID, ATTR_ENTRYPARENTID)
                .equality(M::Integer)
                .ordering(M::Integer)
                .single_value(),
            SchemaAttribute::new("2.5.4.41", ATTR_NAME)
                .equality(M::CaseIgnore)
                .ordering(M::CaseIgnore)
                .substring(M::CaseIgnore),
            SchemaAttribute::new("2.5.4.3", ATTR_CN)
                .alias("commonName")
                .sup(ATTR_NAME),
            SchemaAttribute::new("2.5.4.4", ATTR_SN)
                .alias("surname")
                .sup(ATTR_NAME),
            SchemaAttribute::new("2.5.4.42", ATTR_GIVENNAME).sup(ATTR_NAME),
            SchemaAttribute::new("2.5.4.11", ATTR_OU)
                .alias("organizationalUnitName")
                .sup(ATTR_NAME),
            SchemaAttribute::new("2.5.4.10", ATTR_O)
                .alias("organizationName")
                .sup(ATTR_NAME),
            SchemaAttribute::new("2.5.4.12", ATTR_TITLE).sup(ATTR_NAME),
            SchemaAttribute::new("0.9.2342.19200300.100.1.25", ATTR_DC)
                .alias("domainComponent")
                .equality(M::CaseIgnore)
                .substring(M::CaseIgnore)
                .single_value(),
            SchemaAttribute::new("0.9.2342.19200300.100.1.1", ATTR_UID)
                .alias("userid")
                .equality(M::CaseIgnore)
                .substring(M::CaseIgnore),
            SchemaAttribute::new("0.9.2342.19200300.100.1.3", ATTR_MAIL)
                .alias("rfc822Mailbox")
                .equality(M::CaseIgnore)
                .substring(M::CaseIgnore),
            SchemaAttribute::new("2.5.4.13", ATTR_DESCRIPTION)
                .equality(M::CaseIgnore)
                .substring(M::CaseIgnore),
            SchemaAttribute::new("2.5.4.20", ATTR_TELEPHONENUMBER)
                .equality(M::CaseIgnore)
                .substring(M::CaseIgnore),
            SchemaAttribute::new("1.3.6.1.1.1.1.0", ATTR_UIDNUMBER)
                .equality(M::Integer)
                .ordering(M::Integer)
                .single_value(),
            SchemaAttribute::new("1.3.6.1.1.1.1.1", ATTR_GIDNUMBER)
                .equality(M::Integer)
                .ordering(M::Integer)
                .single_value(),
            SchemaAttribute::new("2.5.4.31", ATTR_MEMBER).equality(M::DistinguishedName),
            SchemaAttribute::new("2.5.4.34", ATTR_SEEALSO).equality(M::DistinguishedName),
        ];

        let mut schema = Schema::new();
        for def in defs {
            // Definitions are ordered so every superior precedes its subtypes.
            if let Err(e) = schema.add_attribute(def) {
                admin_error!(?e, "core schema definition rejected");
            }
        }
        schema
    }
}

impl SchemaView for Schema {
    fn attribute_type(&self, name: &str) -> Option<Arc<SchemaAttribute>> {
        self.attributes
            .get(name.trim().to_lowercase().as_str())
            .cloned()
    }

    fn has_descendants(&self, attr: &SchemaAttribute) -> bool {
        self.subtypes
            .get(attr.name())
            .map(|s| !s.is_empty())
            .unwrap_or(false)
    }

    fn descendants_of(&self, attr: &SchemaAttribute) -> Vec<Arc<SchemaAttribute>> {
        let mut out: Vec<Arc<SchemaAttribute>> = Vec::new();
        let mut pending: Vec<AttrString> = self
            .subtypes
            .get(attr.name())
            .cloned()
            .unwrap_or_default();
        while let Some(name) = pending.pop() {
            if let Some(sub) = self.attributes.get(name.as_str()) {
                if out.iter().any(|o| o.oid == sub.oid) {
                    continue;
                }
                if let Some(more) = self.subtypes.get(name.as_str()) {
                    pending.extend(more.iter().cloned());
                }
                out.push(sub.clone());
            }
        }
        out
    }
}
