//! Search filters.
//!
//! A [`Filter`] is the unresolved form of a search assertion, exactly as a
//! caller gave it: attribute names are whatever the caller wrote and values
//! are not yet normalised. Filters are built with the `f_*` helpers or parsed
//! from their RFC 4515 string form with [`Filter::from_ldap_str`]. The
//! [`Optimiser`](crate::optimiser::Optimiser) turns them into something that
//! can be evaluated.

use std::fmt;

use regex::Regex;

use crate::prelude::*;

/// The deepest nesting of and, or and not terms a parsed filter may have.
pub const FILTER_DEPTH_MAX: usize = 32;

lazy_static! {
    /// An attribute descriptor without options: a name or a numeric OID.
    static ref ATTRIBUTE_DESCRIPTION_RE: Regex = {
        #[allow(clippy::expect_used)]
        Regex::new(r"^([A-Za-z][A-Za-z0-9-]*|[0-9]+(\.[0-9]+)*)$")
            .expect("Invalid attribute description regex found")
    };
}

pub fn f_eq(a: &str, v: &str) -> Filter {
    Filter::Eq(AttrString::from(a), v.to_string())
}

pub fn f_sub(a: &str, initial: Option<&str>, any: &[&str], terminal: Option<&str>) -> Filter {
    Filter::Sub(
        AttrString::from(a),
        SubstringAssertion {
            initial: initial.map(str::to_string),
            any: any.iter().map(|s| s.to_string()).collect(),
            terminal: terminal.map(str::to_string),
        },
    )
}

pub fn f_ge(a: &str, v: &str) -> Filter {
    Filter::Ge(AttrString::from(a), v.to_string())
}

pub fn f_le(a: &str, v: &str) -> Filter {
    Filter::Le(AttrString::from(a), v.to_string())
}

pub fn f_approx(a: &str, v: &str) -> Filter {
    Filter::Approx(AttrString::from(a), v.to_string())
}

pub fn f_pres(a: &str) -> Filter {
    Filter::Pres(AttrString::from(a))
}

pub fn f_and(vs: Vec<Filter>) -> Filter {
    Filter::And(vs)
}

pub fn f_or(vs: Vec<Filter>) -> Filter {
    Filter::Or(vs)
}

pub fn f_not(f: Filter) -> Filter {
    Filter::Not(Box::new(f))
}

/// The pieces of a substring assertion, `initial*any*any*terminal`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SubstringAssertion {
    pub initial: Option<String>,
    pub any: Vec<String>,
    /// The final piece, anchored at the end of the value.
    pub terminal: Option<String>,
}

impl SubstringAssertion {
    pub fn is_empty(&self) -> bool {
        self.initial.is_none() && self.any.is_empty() && self.terminal.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Filter {
    Eq(AttrString, String),
    Sub(AttrString, SubstringAssertion),
    Ge(AttrString, String),
    Le(AttrString, String),
    Approx(AttrString, String),
    Pres(AttrString),
    /// An empty and is true.
    And(Vec<Filter>),
    /// An empty or is false.
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    /// Parse the string representation of a filter. A bare item without
    /// surrounding parentheses, such as `cn=foo`, is accepted at the top.
    pub fn from_ldap_str(s: &str) -> Result<Filter, OperationError> {
        let trimmed = s.trim();
        let mut p = FilterParser {
            input: trimmed.as_bytes(),
            pos: 0,
        };
        let f = if trimmed.starts_with('(') {
            p.filter(0)?
        } else {
            p.item()?
        };
        if p.pos != p.input.len() {
            filter_warn!(filter = %s, pos = p.pos, "trailing characters after filter");
            return Err(OperationError::FilterParseError);
        }
        Ok(f)
    }

    /// Every attribute named in this filter, as written.
    pub fn attributes(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_attributes(&mut out);
        out.sort_unstable();
        out.dedup();
        out
    }

    fn collect_attributes<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Filter::Eq(a, _)
            | Filter::Sub(a, _)
            | Filter::Ge(a, _)
            | Filter::Le(a, _)
            | Filter::Approx(a, _)
            | Filter::Pres(a) => out.push(a.as_str()),
            Filter::And(l) | Filter::Or(l) => l.iter().for_each(|f| f.collect_attributes(out)),
            Filter::Not(f) => f.collect_attributes(out),
        }
    }
}

fn escape_value(v: &str) -> String {
    let mut out = String::with_capacity(v.len());
    for c in v.chars() {
        match c {
            '*' => out.push_str("\\2a"),
            '(' => out.push_str("\\28"),
            ')' => out.push_str("\\29"),
            '\\' => out.push_str("\\5c"),
            '\0' => out.push_str("\\00"),
            c => out.push(c),
        }
    }
    out
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Eq(a, v) => write!(f, "({}={})", a, escape_value(v)),
            Filter::Ge(a, v) => write!(f, "({}>={})", a, escape_value(v)),
            Filter::Le(a, v) => write!(f, "({}<={})", a, escape_value(v)),
            Filter::Approx(a, v) => write!(f, "({}~={})", a, escape_value(v)),
            Filter::Pres(a) => write!(f, "({}=*)", a),
            Filter::Sub(a, s) => {
                write!(f, "({}=", a)?;
                if let Some(i) = &s.initial {
                    f.write_str(&escape_value(i))?;
                }
                f.write_str("*")?;
                for any in s.any.iter() {
                    write!(f, "{}*", escape_value(any))?;
                }
                if let Some(t) = &s.terminal {
                    f.write_str(&escape_value(t))?;
                }
                f.write_str(")")
            }
            Filter::And(l) => {
                f.write_str("(&")?;
                for i in l {
                    write!(f, "{}", i)?;
                }
                f.write_str(")")
            }
            Filter::Or(l) => {
                f.write_str("(|")?;
                for i in l {
                    write!(f, "{}", i)?;
                }
                f.write_str(")")
            }
            Filter::Not(i) => write!(f, "(!{})", i),
        }
    }
}

struct FilterParser<'s> {
    input: &'s [u8],
    pos: usize,
}

impl FilterParser<'_> {
    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn expect(&mut self, c: u8) -> Result<(), OperationError> {
        if self.peek() == Some(c) {
            self.pos += 1;
            Ok(())
        } else {
            filter_warn!(
                expected = %(c as char),
                pos = self.pos,
                "unexpected character in filter"
            );
            Err(OperationError::FilterParseError)
        }
    }

    fn filter(&mut self, depth: usize) -> Result<Filter, OperationError> {
        if depth > FILTER_DEPTH_MAX {
            filter_warn!(depth, "filter is nested too deeply");
            return Err(OperationError::FilterParseError);
        }
        self.expect(b'(')?;
        let f = match self.peek() {
            Some(b'&') => {
                self.pos += 1;
                Filter::And(self.filter_list(depth)?)
            }
            Some(b'|') => {
                self.pos += 1;
                Filter::Or(self.filter_list(depth)?)
            }
            Some(b'!') => {
                self.pos += 1;
                Filter::Not(Box::new(self.filter(depth + 1)?))
            }
            _ => self.item()?,
        };
        self.expect(b')')?;
        Ok(f)
    }

    fn filter_list(&mut self, depth: usize) -> Result<Vec<Filter>, OperationError> {
        let mut l = Vec::new();
        while self.peek() == Some(b'(') {
            l.push(self.filter(depth + 1)?);
        }
        Ok(l)
    }

    fn item(&mut self) -> Result<Filter, OperationError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if matches!(c, b'=' | b'~' | b'<' | b'>' | b':' | b'(' | b')') {
                break;
            }
            self.pos += 1;
        }
        let attr = std::str::from_utf8(&self.input[start..self.pos])
            .map_err(|_| OperationError::FilterParseError)?
            .trim();
        if !ATTRIBUTE_DESCRIPTION_RE.is_match(attr) {
            filter_warn!(?attr, "invalid attribute description in filter");
            return Err(OperationError::FilterParseError);
        }
        let attr = AttrString::from(attr);

        let op = match self.peek() {
            Some(b'=') => {
                self.pos += 1;
                b'='
            }
            Some(c @ (b'~' | b'<' | b'>')) => {
                self.pos += 1;
                self.expect(b'=')?;
                c
            }
            Some(b':') => {
                filter_warn!("extensible match filters are not supported");
                return Err(OperationError::FilterParseError);
            }
            _ => {
                filter_warn!(pos = self.pos, "missing filter type");
                return Err(OperationError::FilterParseError);
            }
        };

        let vstart = self.pos;
        while let Some(c) = self.peek() {
            match c {
                b')' => break,
                b'(' => {
                    filter_warn!(pos = self.pos, "unescaped parenthesis in filter value");
                    return Err(OperationError::FilterParseError);
                }
                _ => self.pos += 1,
            }
        }
        let raw = &self.input[vstart..self.pos];

        match op {
            b'~' => Ok(Filter::Approx(attr, unescape(raw)?)),
            b'>' => Ok(Filter::Ge(attr, unescape(raw)?)),
            b'<' => Ok(Filter::Le(attr, unescape(raw)?)),
            _ if raw == b"*" => Ok(Filter::Pres(attr)),
            _ if raw.contains(&b'*') => substring(attr, raw),
            _ => Ok(Filter::Eq(attr, unescape(raw)?)),
        }
    }
}

fn substring(attr: AttrString, raw: &[u8]) -> Result<Filter, OperationError> {
    let parts: Vec<&[u8]> = raw.split(|c| *c == b'*').collect();
    let (first, rest) = parts.split_first().ok_or(OperationError::FilterParseError)?;
    let (last, middle) = rest.split_last().ok_or(OperationError::FilterParseError)?;

    let non_empty = |p: &[u8]| -> Result<Option<String>, OperationError> {
        if p.is_empty() {
            Ok(None)
        } else {
            unescape(p).map(Some)
        }
    };

    let sub = SubstringAssertion {
        initial: non_empty(first)?,
        any: middle
            .iter()
            .filter(|p| !p.is_empty())
            .map(|p| unescape(p))
            .collect::<Result<Vec<_>, _>>()?,
        terminal: non_empty(last)?,
    };
    if sub.is_empty() {
        filter_warn!(%attr, "substring filter has no substrings");
        return Err(OperationError::FilterParseError);
    }
    Ok(Filter::Sub(attr, sub))
}

fn unescape(raw: &[u8]) -> Result<String, OperationError> {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'\\' {
            let hex = raw
                .get(i + 1..i + 3)
                .and_then(|h| std::str::from_utf8(h).ok())
                .and_then(|h| u8::from_str_radix(h, 16).ok())
                .ok_or_else(|| {
                    filter_warn!("invalid escape sequence in filter value");
                    OperationError::FilterParseError
                })?;
            out.push(hex);
            i += 3;
        } else {
            out.push(raw[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|_| {
        filter_warn!("filter value is not valid utf-8");
        OperationError::FilterParseError
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_parse_simple() {
        assert_eq!(Filter::from_ldap_str("(cn=Alice)"), Ok(f_eq("cn", "Alice")));
        assert_eq!(Filter::from_ldap_str("uid=alice"), Ok(f_eq("uid", "alice")));
        assert_eq!(Filter::from_ldap_str(" (objectClass=*) "), Ok(f_pres("objectClass")));
        assert_eq!(Filter::from_ldap_str("(uidNumber>=1000)"), Ok(f_ge("uidNumber", "1000")));
        assert_eq!(Filter::from_ldap_str("(uidNumber<=2000)"), Ok(f_le("uidNumber", "2000")));
        assert_eq!(Filter::from_ldap_str("(sn~=smyth)"), Ok(f_approx("sn", "smyth")));
        assert_eq!(Filter::from_ldap_str("(2.5.4.3=x)"), Ok(f_eq("2.5.4.3", "x")));
        assert_eq!(Filter::from_ldap_str("(cn=)"), Ok(f_eq("cn", "")));
    }

    #[test]
    fn test_filter_parse_substring() {
        assert_eq!(
            Filter::from_ldap_str("(cn=Al*)"),
            Ok(f_sub("cn", Some("Al"), &[], None))
        );
        assert_eq!(
            Filter::from_ldap_str("(cn=*ice)"),
            Ok(f_sub("cn", None, &[], Some("ice")))
        );
        assert_eq!(
            Filter::from_ldap_str("(cn=a*l**i*e)"),
            Ok(f_sub("cn", Some("a"), &["l", "i"], Some("e")))
        );
        assert_eq!(
            Filter::from_ldap_str("(cn=*li*)"),
            Ok(f_sub("cn", None, &["li"], None))
        );
        assert_eq!(
            Filter::from_ldap_str("(cn=**)"),
            Err(OperationError::FilterParseError)
        );
    }

    #[test]
    fn test_filter_parse_composite() {
        let f = Filter::from_ldap_str("(&(objectClass=person)(|(uid=alice)(uid=bob))(!(sn=Jones)))")
            .expect("parse");
        assert_eq!(
            f,
            f_and(vec![
                f_eq("objectClass", "person"),
                f_or(vec![f_eq("uid", "alice"), f_eq("uid", "bob")]),
                f_not(f_eq("sn", "Jones")),
            ])
        );
        assert_eq!(f.attributes(), vec!["objectClass", "sn", "uid"]);

        assert_eq!(Filter::from_ldap_str("(&)"), Ok(f_and(vec![])));
        assert_eq!(Filter::from_ldap_str("(|)"), Ok(f_or(vec![])));
    }

    #[test]
    fn test_filter_parse_escapes() {
        assert_eq!(
            Filter::from_ldap_str(r"(cn=a\2a\28b\29\5c)"),
            Ok(f_eq("cn", r"a*(b)\"))
        );
        // An escaped star is never a wildcard.
        assert_eq!(
            Filter::from_ldap_str(r"(cn=\2a*)"),
            Ok(f_sub("cn", Some("*"), &[], None))
        );
        assert_eq!(Filter::from_ldap_str(r"(sn=Ren\c3\a9)"), Ok(f_eq("sn", "René")));
        assert_eq!(Filter::from_ldap_str("(sn=René)"), Ok(f_eq("sn", "René")));
    }

    #[test]
    fn test_filter_parse_errors() {
        for bad in [
            "",
            "(",
            "(cn=a",
            "cn=a)",
            "(cn=a)(sn=b)",
            "(=a)",
            "(c n=a)",
            "(cn~a)",
            "(cn:dn:=a)",
            "(cn=a(b)",
            r"(cn=\zz)",
            r"(cn=\c3)",
            "(!(cn=a)(cn=b))",
            "(&(cn=a)x)",
        ] {
            assert_eq!(
                Filter::from_ldap_str(bad),
                Err(OperationError::FilterParseError),
                "{}",
                bad
            );
        }
    }

    #[test]
    fn test_filter_depth_limit() {
        let mut deep = String::from("(cn=a)");
        for _ in 0..FILTER_DEPTH_MAX {
            deep = format!("(!{})", deep);
        }
        assert!(Filter::from_ldap_str(&deep).is_ok());
        let deeper = format!("(!{})", deep);
        assert_eq!(
            Filter::from_ldap_str(&deeper),
            Err(OperationError::FilterParseError)
        );
    }

    #[test]
    fn test_filter_display() {
        let f = f_and(vec![
            f_sub("cn", Some("a*b"), &["c"], None),
            f_not(f_pres("mail")),
            f_ge("uidNumber", "10"),
        ]);
        let s = f.to_string();
        assert_eq!(s, r"(&(cn=a\2ab*c*)(!(mail=*))(uidNumber>=10))");
        assert_eq!(Filter::from_ldap_str(&s), Ok(f));
    }
}
