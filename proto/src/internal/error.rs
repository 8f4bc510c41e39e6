use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/* ===== errors ===== */
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(rename_all = "lowercase")]
pub enum SchemaError {
    NoClassFound,
    MissingMustAttribute(Vec<String>),
    InvalidAttributeSyntax(String),
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(rename_all = "lowercase")]
pub enum ConsistencyError {
    Unknown,
    // Index name, entry id
    IndexAsymmetric(String, u64),
    RdnIndexMissing(u64),
    RdnIndexOrphaned(u64),
    OneLevelParentMismatch(u64),
    SubLevelReflexiveMissing(u64),
    EntryIdSequenceBehind(u64),
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(rename_all = "lowercase")]
pub enum OperationError {
    // Directory semantics.
    NoSuchObject(String),
    AlreadyExists(String),
    SchemaViolation(SchemaError),
    AliasProblem(String),
    AliasDereferencing(String),
    NotAllowedOnNonLeaf(String),
    IndexNotFound(String),
    InvalidDnSyntax(String),
    InvalidAttributeName(String),
    FilterParseError,
    SizeLimitExceeded,
    // Cursor misuse.
    InvalidCursorState,
    UnsupportedCursorOperation,
    // Storage and integrity.
    InvalidEntryId,
    InvalidState,
    CorruptedEntry(u64),
    CorruptedIndex(String),
    DestroyFailed(Vec<OperationError>),
    BackendEngine,
    SqliteError,
    SerdeJsonError,
    FsError,
}

impl Display for OperationError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        let mut output = format!("{:?}", self)
            .split("::")
            .last()
            .unwrap_or("")
            .to_string();

        if let Some(msg) = self.message() {
            output += &format!(" - {}", msg);
        };
        f.write_str(&output)
    }
}

impl std::error::Error for OperationError {}

impl OperationError {
    /// Return the message associated with the error if there is one.
    pub fn message(&self) -> Option<String> {
        match self {
            Self::NoSuchObject(_) => Some("The named entry does not exist.".into()),
            Self::AlreadyExists(_) => {
                Some("An entry with this distinguished name already exists.".into())
            }
            Self::SchemaViolation(_) => None,
            Self::AliasProblem(_) => Some("The alias target does not exist.".into()),
            Self::AliasDereferencing(_) => {
                Some("The alias target is outside the partition, is an alias, or would form a cycle.".into())
            }
            Self::NotAllowedOnNonLeaf(_) => Some("The entry still has children.".into()),
            Self::IndexNotFound(_) => None,
            Self::InvalidDnSyntax(_) => None,
            Self::InvalidAttributeName(_) => None,
            Self::FilterParseError => None,
            Self::SizeLimitExceeded => {
                Some("The search returned more candidates than the size limit allows.".into())
            }
            Self::InvalidCursorState => {
                Some("The cursor is not positioned on an element.".into())
            }
            Self::UnsupportedCursorOperation => None,
            Self::InvalidEntryId => None,
            Self::InvalidState => None,
            Self::CorruptedEntry(_) => None,
            Self::CorruptedIndex(_) => None,
            Self::DestroyFailed(_) => {
                Some("One or more indices failed to close cleanly.".into())
            }
            Self::BackendEngine => None,
            Self::SqliteError => None,
            Self::SerdeJsonError => None,
            Self::FsError => None,
        }
    }
}

#[test]
fn test_operationerror_as_nice_string() {
    assert_eq!(
        OperationError::InvalidState.to_string(),
        "InvalidState".to_string()
    );
    assert_eq!(
        OperationError::CorruptedEntry(12345).to_string(),
        "CorruptedEntry(12345)".to_string()
    );
    assert_eq!(
        OperationError::NotAllowedOnNonLeaf("ou=people".to_string()).to_string(),
        "NotAllowedOnNonLeaf(\"ou=people\") - The entry still has children.".to_string()
    );
}

#[test]
fn test_operationerror_compares_payloads() {
    assert_eq!(
        OperationError::NoSuchObject("a".to_string()),
        OperationError::NoSuchObject("a".to_string())
    );
    assert_ne!(
        OperationError::NoSuchObject("a".to_string()),
        OperationError::NoSuchObject("b".to_string())
    );
    assert_ne!(
        OperationError::SchemaViolation(SchemaError::NoClassFound),
        OperationError::SchemaViolation(SchemaError::InvalidAttributeSyntax(
            "uidNumber".to_string()
        ))
    );
}

#[test]
fn test_operationerror_serde() {
    let e = OperationError::SchemaViolation(SchemaError::MissingMustAttribute(vec![
        "entrycsn".to_string(),
    ]));
    let s = serde_json::to_string(&e).expect("serialise");
    let r: OperationError = serde_json::from_str(&s).expect("deserialise");
    assert_eq!(e, r);
}
