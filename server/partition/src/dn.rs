//! Distinguished names.
//!
//! A [`Dn`] is a sequence of [`Rdn`]s ordered leaf first, so `ou=people,dc=example`
//! has `ou=people` at index 0. Every [`Ava`] keeps the type and value as the
//! user wrote them. Once [`Dn::normalize`] has run, each ava also carries the
//! canonical attribute name and the value normalised by the attribute's
//! equality rule, and names compare by those.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::prelude::*;
use crate::schema::SchemaView;

/// An attribute value assertion, one `type=value` pair of an rdn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ava {
    up_type: String,
    up_value: String,
    norm_type: Option<String>,
    norm_value: Option<String>,
}

impl Ava {
    pub fn new(attr: &str, value: &str) -> Self {
        Ava {
            up_type: attr.trim().to_string(),
            up_value: value.to_string(),
            norm_type: None,
            norm_value: None,
        }
    }

    pub fn up_type(&self) -> &str {
        &self.up_type
    }

    pub fn up_value(&self) -> &str {
        &self.up_value
    }

    /// The canonical attribute name, or the lower cased user type if this ava
    /// has not been normalised.
    pub fn norm_type(&self) -> String {
        self.norm_type
            .clone()
            .unwrap_or_else(|| self.up_type.to_lowercase())
    }

    pub fn norm_value(&self) -> &str {
        self.norm_value.as_deref().unwrap_or(self.up_value.as_str())
    }

    pub fn is_normalized(&self) -> bool {
        self.norm_type.is_some() && self.norm_value.is_some()
    }

    fn normalize(&self, schema: &dyn SchemaView) -> Result<Ava, OperationError> {
        let attr = schema.resolve(&self.up_type)?;
        let norm_value = attr.normalize(schema, &self.up_value)?;
        Ok(Ava {
            up_type: self.up_type.clone(),
            up_value: self.up_value.clone(),
            norm_type: Some(attr.name().to_string()),
            norm_value: Some(norm_value),
        })
    }

    fn norm_string(&self) -> String {
        format!("{}={}", self.norm_type(), escape_value(self.norm_value()))
    }

    fn up_string(&self) -> String {
        format!("{}={}", self.up_type, escape_value(&self.up_value))
    }
}

impl PartialEq for Ava {
    fn eq(&self, other: &Self) -> bool {
        self.norm_type() == other.norm_type() && self.norm_value() == other.norm_value()
    }
}

impl Eq for Ava {}

impl Hash for Ava {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.norm_type().hash(state);
        self.norm_value().hash(state);
    }
}

/// A relative distinguished name. Usually one ava, possibly several joined
/// with `+`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rdn {
    avas: Vec<Ava>,
}

impl Rdn {
    pub fn new(attr: &str, value: &str) -> Self {
        Rdn {
            avas: vec![Ava::new(attr, value)],
        }
    }

    pub fn parse(value: &str) -> Result<Self, OperationError> {
        let avas = split_unescaped(value, &['+'])
            .into_iter()
            .map(|a| parse_ava(a, value))
            .collect::<Result<Vec<_>, _>>()?;
        if avas.is_empty() {
            return Err(OperationError::InvalidDnSyntax(value.to_string()));
        }
        Ok(Rdn { avas })
    }

    pub fn avas(&self) -> &[Ava] {
        &self.avas
    }

    pub fn is_normalized(&self) -> bool {
        self.avas.iter().all(Ava::is_normalized)
    }

    pub fn normalize(&self, schema: &dyn SchemaView) -> Result<Rdn, OperationError> {
        let mut avas = self
            .avas
            .iter()
            .map(|a| a.normalize(schema))
            .collect::<Result<Vec<_>, _>>()?;
        avas.sort_by_key(|a| a.norm_string());
        avas.dedup();
        Ok(Rdn { avas })
    }

    /// The canonical form, used for equality and ordering of rdns.
    pub fn norm_name(&self) -> String {
        let mut parts: Vec<String> = self.avas.iter().map(Ava::norm_string).collect();
        parts.sort();
        parts.join("+")
    }

    pub fn up_name(&self) -> String {
        self.avas
            .iter()
            .map(Ava::up_string)
            .collect::<Vec<_>>()
            .join("+")
    }
}

impl PartialEq for Rdn {
    fn eq(&self, other: &Self) -> bool {
        self.norm_name() == other.norm_name()
    }
}

impl Eq for Rdn {}

impl Hash for Rdn {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.norm_name().hash(state);
    }
}

impl PartialOrd for Rdn {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Rdn {
    fn cmp(&self, other: &Self) -> Ordering {
        self.norm_name().cmp(&other.norm_name())
    }
}

impl fmt::Display for Rdn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.up_name())
    }
}

/// A distinguished name, leaf rdn first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dn {
    rdns: Vec<Rdn>,
}

impl Dn {
    /// The empty name, parent of every partition suffix.
    pub fn root() -> Self {
        Dn { rdns: Vec::new() }
    }

    pub fn parse(value: &str) -> Result<Self, OperationError> {
        if value.trim().is_empty() {
            return Ok(Dn::root());
        }
        let rdns = split_unescaped(value, &[',', ';'])
            .into_iter()
            .map(Rdn::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Dn { rdns })
    }

    pub fn from_rdns(rdns: Vec<Rdn>) -> Self {
        Dn { rdns }
    }

    pub fn normalize(&self, schema: &dyn SchemaView) -> Result<Dn, OperationError> {
        let rdns = self
            .rdns
            .iter()
            .map(|r| r.normalize(schema))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Dn { rdns })
    }

    pub fn is_normalized(&self) -> bool {
        self.rdns.iter().all(Rdn::is_normalized)
    }

    pub fn rdns(&self) -> &[Rdn] {
        &self.rdns
    }

    pub fn rdn(&self) -> Option<&Rdn> {
        self.rdns.first()
    }

    pub fn parent(&self) -> Option<Dn> {
        if self.rdns.is_empty() {
            None
        } else {
            Some(Dn {
                rdns: self.rdns[1..].to_vec(),
            })
        }
    }

    pub fn child(&self, rdn: Rdn) -> Dn {
        let mut rdns = Vec::with_capacity(self.rdns.len() + 1);
        rdns.push(rdn);
        rdns.extend(self.rdns.iter().cloned());
        Dn { rdns }
    }

    pub fn len(&self) -> usize {
        self.rdns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rdns.is_empty()
    }

    pub fn is_root(&self) -> bool {
        self.rdns.is_empty()
    }

    /// True if `ancestor` is this name or any of its parents.
    pub fn is_descendant_of(&self, ancestor: &Dn) -> bool {
        if ancestor.len() > self.len() {
            return false;
        }
        let offset = self.len() - ancestor.len();
        self.rdns[offset..]
            .iter()
            .zip(ancestor.rdns.iter())
            .all(|(a, b)| a == b)
    }

    /// The rdns of this name that sit below `suffix`, leaf first. `None` if
    /// this name is not within `suffix`.
    pub fn relative_to(&self, suffix: &Dn) -> Option<&[Rdn]> {
        if self.is_descendant_of(suffix) {
            Some(&self.rdns[..self.len() - suffix.len()])
        } else {
            None
        }
    }

    pub fn up_name(&self) -> String {
        self.rdns
            .iter()
            .map(Rdn::up_name)
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn norm_name(&self) -> String {
        self.rdns
            .iter()
            .map(Rdn::norm_name)
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl PartialEq for Dn {
    fn eq(&self, other: &Self) -> bool {
        self.rdns == other.rdns
    }
}

impl Eq for Dn {}

impl Hash for Dn {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.norm_name().hash(state);
    }
}

impl fmt::Display for Dn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.up_name())
    }
}

/// Split on any of `seps` where the separator is not escaped. Leading and
/// trailing whitespace of each piece is kept, callers trim.
fn split_unescaped<'a>(value: &'a str, seps: &[char]) -> Vec<&'a str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    for (i, c) in value.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        if c == '\\' {
            escaped = true;
        } else if seps.contains(&c) {
            out.push(&value[start..i]);
            start = i + c.len_utf8();
        }
    }
    out.push(&value[start..]);
    out
}

fn valid_attr_type(t: &str) -> bool {
    let mut chars = t.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '-')
        }
        Some(c) if c.is_ascii_digit() => {
            t.split('.')
                .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
        }
        _ => false,
    }
}

fn parse_ava(raw: &str, whole: &str) -> Result<Ava, OperationError> {
    let bad = || OperationError::InvalidDnSyntax(whole.to_string());
    let eq = split_unescaped(raw, &['=']);
    if eq.len() < 2 {
        return Err(bad());
    }
    let attr = eq[0].trim();
    if !valid_attr_type(attr) {
        return Err(bad());
    }
    // Everything after the first '=' is the value, including any further
    // unescaped '='.
    let value_raw = &raw[eq[0].len() + 1..];
    let value = unescape_value(value_raw).ok_or_else(bad)?;
    if value.is_empty() {
        return Err(bad());
    }
    Ok(Ava::new(attr, &value))
}

/// Resolve escapes and trim unescaped surrounding spaces.
fn unescape_value(raw: &str) -> Option<String> {
    let raw = raw.trim_start();
    let mut bytes: Vec<u8> = Vec::with_capacity(raw.len());
    // Length of the value up to and including the last escaped byte, which
    // trailing space trimming must not cut into.
    let mut keep = 0;
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\0' => return None,
            '\\' => {
                let n = chars.next()?;
                if n.is_ascii_hexdigit() {
                    let m = chars.next()?;
                    let hex: String = [n, m].iter().collect();
                    let b = u8::from_str_radix(&hex, 16).ok()?;
                    if b == 0 {
                        return None;
                    }
                    bytes.push(b);
                } else {
                    let mut buf = [0u8; 4];
                    bytes.extend_from_slice(n.encode_utf8(&mut buf).as_bytes());
                }
                keep = bytes.len();
            }
            _ => {
                let mut buf = [0u8; 4];
                bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
    while bytes.len() > keep && bytes.last() == Some(&b' ') {
        bytes.pop();
    }
    String::from_utf8(bytes).ok()
}

fn escape_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let last = value.chars().count().saturating_sub(1);
    for (i, c) in value.chars().enumerate() {
        let special = matches!(c, ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=')
            || (i == 0 && (c == '#' || c == ' '))
            || (i == last && c == ' ');
        if special {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Schema;

    #[test]
    fn test_dn_parse_simple() {
        let dn = Dn::parse("ou=people, dc=example,dc=com").expect("parse");
        assert_eq!(dn.len(), 3);
        assert_eq!(dn.rdn().map(|r| r.up_name()), Some("ou=people".to_string()));
        assert_eq!(dn.up_name(), "ou=people,dc=example,dc=com");
        let parent = dn.parent().expect("parent");
        assert_eq!(parent.up_name(), "dc=example,dc=com");
        assert!(Dn::parse("").expect("root").is_root());
    }

    #[test]
    fn test_dn_parse_escapes() {
        let dn = Dn::parse(r"cn=Smith\, John+uid=jsmith,dc=example").expect("parse");
        let rdn = dn.rdn().expect("rdn");
        assert_eq!(rdn.avas().len(), 2);
        assert_eq!(rdn.avas()[0].up_value(), "Smith, John");

        let dn = Dn::parse(r"cn=\23hash\2C comma\ ,dc=example").expect("parse");
        assert_eq!(dn.rdn().expect("rdn").avas()[0].up_value(), "#hash, comma ");
    }

    #[test]
    fn test_dn_parse_rejects_garbage() {
        assert!(Dn::parse("ou").is_err());
        assert!(Dn::parse("=people").is_err());
        assert!(Dn::parse("ou=").is_err());
        assert!(Dn::parse("ou=people,,dc=com").is_err());
        assert!(Dn::parse("1ou=people").is_err());
        assert!(Dn::parse(r"ou=bad\").is_err());
    }

    #[test]
    fn test_dn_normalize() {
        let schema = Schema::core();
        let dn = Dn::parse("OU=People ,  commonName=John   SMITH+UID=JS, DC=Example")
            .expect("parse");
        let ndn = dn.normalize(&schema).expect("normalize");
        assert!(ndn.is_normalized());
        assert_eq!(ndn.norm_name(), "ou=people,cn=john smith+uid=js,dc=example");
        // The user form is untouched.
        assert_eq!(ndn.up_name(), "OU=People,commonName=John   SMITH+UID=JS,DC=Example");
        // Normalised names parse back to the same name.
        let again = Dn::parse(&ndn.norm_name())
            .expect("parse")
            .normalize(&schema)
            .expect("normalize");
        assert_eq!(again, ndn);

        assert_eq!(
            Dn::parse("nosuchattr=x").expect("parse").normalize(&schema),
            Err(OperationError::InvalidAttributeName("nosuchattr".to_string()))
        );
    }

    #[test]
    fn test_dn_normalize_escapes_special_values() {
        let schema = Schema::core();
        let dn = Dn::parse(r"cn=a\,b,dc=example")
            .expect("parse")
            .normalize(&schema)
            .expect("normalize");
        assert_eq!(dn.norm_name(), r"cn=a\,b,dc=example");
        let back = Dn::parse(&dn.norm_name()).expect("parse");
        assert_eq!(back.len(), 2);
    }

    #[test]
    fn test_dn_descendant() {
        let schema = Schema::core();
        let suffix = Dn::parse("dc=example,dc=com")
            .and_then(|d| d.normalize(&schema))
            .expect("dn");
        let people = Dn::parse("ou=People,DC=example,dc=COM")
            .and_then(|d| d.normalize(&schema))
            .expect("dn");
        let other = Dn::parse("dc=other,dc=com")
            .and_then(|d| d.normalize(&schema))
            .expect("dn");
        assert!(people.is_descendant_of(&suffix));
        assert!(suffix.is_descendant_of(&suffix));
        assert!(!suffix.is_descendant_of(&people));
        assert!(!other.is_descendant_of(&suffix));
        assert!(people.is_descendant_of(&Dn::root()));
        assert_eq!(
            people.relative_to(&suffix).map(|r| r.len()),
            Some(1)
        );
        assert!(other.relative_to(&suffix).is_none());

        let child = suffix.child(Rdn::new("ou", "people").normalize(&schema).expect("rdn"));
        assert_eq!(child, people);
    }
}
