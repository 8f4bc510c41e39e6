//! Order preserving encodings of table keys and values.
//!
//! Each value is stored as two blobs. The sort blob is what SQLite orders
//! and compares, so its byte order must agree with the type's `Ord`. The
//! data blob carries anything needed to rebuild the value that the sort blob
//! does not, such as the user provided form of a name.

use std::fmt::Debug;

use crate::be::dbentry::DbEntry;
use crate::be::serde_json_error;
use crate::entry::EntryId;
use crate::prelude::*;

pub trait TableCodec: Sized + Clone + Debug + Send + Sync + 'static {
    fn sort_bytes(&self) -> Vec<u8>;

    fn data_bytes(&self) -> Result<Vec<u8>, OperationError> {
        Ok(Vec::new())
    }

    fn decode(sort: &[u8], data: &[u8]) -> Result<Self, OperationError>;
}

impl TableCodec for EntryId {
    fn sort_bytes(&self) -> Vec<u8> {
        self.as_u64().to_be_bytes().to_vec()
    }

    fn decode(sort: &[u8], _data: &[u8]) -> Result<Self, OperationError> {
        let raw: [u8; 8] = sort.try_into().map_err(|_| {
            admin_error!(len = sort.len(), "stored entry id has the wrong width");
            OperationError::InvalidEntryId
        })?;
        Ok(EntryId::new(u64::from_be_bytes(raw)))
    }
}

impl TableCodec for String {
    fn sort_bytes(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    fn decode(sort: &[u8], _data: &[u8]) -> Result<Self, OperationError> {
        String::from_utf8(sort.to_vec()).map_err(|e| {
            admin_error!(?e, "stored index key is not utf8");
            OperationError::CorruptedIndex(String::from_utf8_lossy(sort).into_owned())
        })
    }
}

impl TableCodec for DbEntry {
    // Master table values are never compared.
    fn sort_bytes(&self) -> Vec<u8> {
        Vec::new()
    }

    fn data_bytes(&self) -> Result<Vec<u8>, OperationError> {
        serde_json::to_vec(self).map_err(serde_json_error)
    }

    fn decode(_sort: &[u8], data: &[u8]) -> Result<Self, OperationError> {
        serde_json::from_slice(data).map_err(serde_json_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_id_sorts_numerically() {
        let ids = [1u64, 2, 255, 256, 65536, u64::MAX];
        for pair in ids.windows(2) {
            let a = EntryId::new(pair[0]).sort_bytes();
            let b = EntryId::new(pair[1]).sort_bytes();
            assert!(a < b);
        }
        let id = EntryId::new(300);
        assert_eq!(EntryId::decode(&id.sort_bytes(), &[]), Ok(id));
        assert!(EntryId::decode(&[1, 2, 3], &[]).is_err());
    }
}
