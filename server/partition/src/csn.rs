//! Change sequence numbers.
//!
//! A CSN has the form `yyyymmddhhmmss.ffffffZ#cccccc#rrr#oooooo` where the
//! trailing fields are the change count, replica id and operation number in
//! hex. Every field is fixed width so the string form sorts the same way as
//! the CSN itself.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};

use time::OffsetDateTime;

use crate::prelude::*;

const TIMESTAMP_LEN: usize = 21;
const MAX_CHANGE_COUNT: u32 = 0x00ff_ffff;
const MAX_REPLICA_ID: u16 = 0x0fff;
const MAX_OP_NUMBER: u32 = 0x00ff_ffff;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Csn {
    timestamp: String,
    change_count: u32,
    replica_id: u16,
    op_number: u32,
}

fn invalid_csn(value: &str) -> OperationError {
    OperationError::SchemaViolation(SchemaError::InvalidAttributeSyntax(value.to_string()))
}

fn format_timestamp(at: OffsetDateTime) -> String {
    let at = at.to_offset(time::UtcOffset::UTC);
    format!(
        "{:04}{:02}{:02}{:02}{:02}{:02}.{:06}",
        at.year(),
        u8::from(at.month()),
        at.day(),
        at.hour(),
        at.minute(),
        at.second(),
        at.microsecond()
    )
}

impl Csn {
    pub fn new(
        at: OffsetDateTime,
        change_count: u32,
        replica_id: u16,
        op_number: u32,
    ) -> Result<Self, OperationError> {
        if change_count > MAX_CHANGE_COUNT || replica_id > MAX_REPLICA_ID || op_number > MAX_OP_NUMBER
        {
            return Err(OperationError::InvalidState);
        }
        let timestamp = format_timestamp(at);
        Ok(Csn {
            timestamp,
            change_count,
            replica_id,
            op_number,
        })
    }

    pub fn change_count(&self) -> u32 {
        self.change_count
    }

    pub fn replica_id(&self) -> u16 {
        self.replica_id
    }
}

impl fmt::Display for Csn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}Z#{:06x}#{:03x}#{:06x}",
            self.timestamp, self.change_count, self.replica_id, self.op_number
        )
    }
}

impl FromStr for Csn {
    type Err = OperationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = value.split('#').collect();
        let [ts, cc, rid, op] = parts.as_slice() else {
            return Err(invalid_csn(value));
        };

        let timestamp = ts
            .strip_suffix('Z')
            .or_else(|| ts.strip_suffix('z'))
            .ok_or_else(|| invalid_csn(value))?;
        let well_formed = timestamp.len() == TIMESTAMP_LEN
            && timestamp.char_indices().all(|(i, c)| {
                if i == 14 {
                    c == '.'
                } else {
                    c.is_ascii_digit()
                }
            });
        if !well_formed || cc.len() != 6 || rid.len() != 3 || op.len() != 6 {
            return Err(invalid_csn(value));
        }

        let change_count = u32::from_str_radix(cc, 16).map_err(|_| invalid_csn(value))?;
        let replica_id = u16::from_str_radix(rid, 16).map_err(|_| invalid_csn(value))?;
        let op_number = u32::from_str_radix(op, 16).map_err(|_| invalid_csn(value))?;

        Ok(Csn {
            timestamp: timestamp.to_string(),
            change_count,
            replica_id,
            op_number,
        })
    }
}

/// Hands out CSNs for one replica. The change count increases with every
/// CSN and wraps at its field width.
#[derive(Debug)]
pub struct CsnFactory {
    replica_id: u16,
    change_count: AtomicU32,
}

impl CsnFactory {
    pub fn new(replica_id: u16) -> Self {
        CsnFactory {
            replica_id: replica_id & MAX_REPLICA_ID,
            change_count: AtomicU32::new(0),
        }
    }

    pub fn new_csn(&self) -> Csn {
        let count = self.change_count.fetch_add(1, Ordering::Relaxed) & MAX_CHANGE_COUNT;
        let timestamp = format_timestamp(OffsetDateTime::now_utc());
        Csn {
            timestamp,
            change_count: count,
            replica_id: self.replica_id,
            op_number: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csn_parse_and_display() {
        let s = "20261016083015.123456Z#00000a#001#000000";
        let csn = Csn::from_str(s).expect("valid csn");
        assert_eq!(csn.change_count(), 10);
        assert_eq!(csn.replica_id(), 1);
        assert_eq!(csn.to_string(), s);
    }

    #[test]
    fn test_csn_rejects_malformed() {
        assert!(Csn::from_str("").is_err());
        assert!(Csn::from_str("20261016083015Z#000000#000#000000").is_err());
        assert!(Csn::from_str("20261016083015.123456Z#0000#000#000000").is_err());
        assert!(Csn::from_str("20261016083015.123456Z#00000g#000#000000").is_err());
        assert!(Csn::from_str("20261016083015.123456#000000#000#000000").is_err());
    }

    #[test]
    fn test_csn_factory_is_monotonic() {
        let f = CsnFactory::new(3);
        let a = f.new_csn();
        let b = f.new_csn();
        assert!(b > a);
        assert_eq!(b.change_count(), a.change_count() + 1);
        assert_eq!(a.replica_id(), 3);
        // Round trips through the string form.
        assert_eq!(Csn::from_str(&a.to_string()).expect("parse"), a);
    }
}
