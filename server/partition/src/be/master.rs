//! The master table: entry id to entry, and the id sequence.

use std::sync::Arc;

use concread::arcache::{ARCache, ARCacheBuilder};
use concread::cowcell::CowCell;
use rusqlite::OptionalExtension;

use crate::be::dbentry::DbEntry;
use crate::be::table::{sql_table_name, Table, TableCursor};
use crate::be::{sqlite_error, Db};
use crate::cursor::Cursor;
use crate::entry::{Entry, EntryId};
use crate::prelude::*;

const SEQ_KEY: &str = "next_id";

pub struct MasterTable {
    db: Db,
    table: Table<EntryId, DbEntry>,
    meta: String,
    entry_cache: ARCache<EntryId, Arc<Entry>>,
    // The last id handed out.
    maxid: CowCell<u64>,
}

impl std::fmt::Debug for MasterTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterTable")
            .field("table", &self.table.name())
            .finish()
    }
}

impl MasterTable {
    pub fn open(db: &Db, cache_size: usize) -> Result<Self, OperationError> {
        let table = Table::open(db, &sql_table_name("tbl", MASTER_TABLE_NAME), false)?;
        let meta = sql_table_name("meta", MASTER_TABLE_NAME);
        db.with_conn(|conn| {
            conn.execute(
                &format!(
                    "CREATE TABLE IF NOT EXISTS \"{meta}\" (
                        name TEXT PRIMARY KEY,
                        value INTEGER NOT NULL
                    )"
                ),
                [],
            )
            .map(|_| ())
            .map_err(sqlite_error)
        })?;

        let mut cache_size = cache_size;
        if cache_size < MINIMUM_CACHE_SIZE {
            admin_warn!(
                "Configured Arc Cache size too low {} - setting to {} ...",
                cache_size,
                MINIMUM_CACHE_SIZE
            );
            cache_size = MINIMUM_CACHE_SIZE;
        }

        let entry_cache = ARCacheBuilder::new()
            .set_size(cache_size, 0)
            .set_reader_quiesce(true)
            .build()
            .ok_or_else(|| {
                admin_error!("Failed to build entry cache");
                OperationError::BackendEngine
            })?;

        let mt = MasterTable {
            db: db.clone(),
            table,
            meta,
            entry_cache,
            maxid: CowCell::new(0),
        };

        // A crash after an add but before the sequence was written leaves the
        // stored sequence behind the highest id. Never reuse an id.
        let persisted = mt.read_seq()?;
        let highest = mt.highest_id()?;
        let start = persisted.max(highest);
        {
            let mut w = mt.maxid.write();
            *w = start;
            w.commit();
        }
        admin_debug!(persisted, highest, "master table opened");
        Ok(mt)
    }

    fn read_seq(&self) -> Result<u64, OperationError> {
        let meta = &self.meta;
        let v: Option<i64> = self.db.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT value FROM \"{meta}\" WHERE name = ?1"),
                [SEQ_KEY],
                |row| row.get(0),
            )
            .optional()
            .map_err(sqlite_error)
        })?;
        v.unwrap_or(0)
            .try_into()
            .map_err(|_| OperationError::InvalidEntryId)
    }

    fn write_seq(&self, value: u64) -> Result<(), OperationError> {
        let meta = &self.meta;
        let value = i64::try_from(value).map_err(|_| OperationError::InvalidEntryId)?;
        self.db.with_conn(|conn| {
            conn.execute(
                &format!("INSERT OR REPLACE INTO \"{meta}\" (name, value) VALUES (?1, ?2)"),
                rusqlite::params![SEQ_KEY, value],
            )
            .map(|_| ())
            .map_err(sqlite_error)
        })
    }

    fn highest_id(&self) -> Result<u64, OperationError> {
        let mut c = self.table.cursor();
        if c.last()? {
            c.get_key().map(EntryId::as_u64)
        } else {
            Ok(0)
        }
    }

    /// Allocate the next entry id. Ids start at 1 and are never reused.
    pub fn get_next_id(&self) -> Result<EntryId, OperationError> {
        let mut w = self.maxid.write();
        let next = w.checked_add(1).ok_or_else(|| {
            admin_error!("entry id sequence exhausted");
            OperationError::InvalidEntryId
        })?;
        self.write_seq(next)?;
        *w = next;
        w.commit();
        Ok(EntryId::new(next))
    }

    /// Restart numbering. Only valid once the partition is empty.
    pub fn reset_counter(&self) -> Result<(), OperationError> {
        let mut w = self.maxid.write();
        self.write_seq(0)?;
        *w = 0;
        w.commit();
        admin_info!("master table id sequence reset");
        Ok(())
    }

    /// The last id handed out.
    pub fn current_id(&self) -> u64 {
        *self.maxid.read()
    }

    pub fn get(&self, id: EntryId) -> Result<Option<Arc<Entry>>, OperationError> {
        let mut rd = self.entry_cache.read();
        if let Some(e) = rd.get(&id) {
            return Ok(Some(e.clone()));
        }
        let db_e = match self.table.get(&id) {
            Ok(Some(db_e)) => db_e,
            Ok(None) => return Ok(None),
            Err(OperationError::SerdeJsonError) => {
                admin_error!(%id, "stored entry can not be decoded");
                return Err(OperationError::CorruptedEntry(id.as_u64()));
            }
            Err(e) => return Err(e),
        };
        let e = Arc::new(Entry::from_dbentry(db_e, id));
        rd.insert(id, e.clone());
        Ok(Some(e))
    }

    pub fn put(&self, id: EntryId, entry: &Entry) -> Result<(), OperationError> {
        self.table.put(&id, &entry.to_dbentry())?;
        let mut w = self.entry_cache.write();
        w.remove(id);
        w.commit();
        Ok(())
    }

    pub fn delete(&self, id: EntryId) -> Result<Option<Arc<Entry>>, OperationError> {
        let prior = self.get(id)?;
        self.table.remove(&id)?;
        let mut w = self.entry_cache.write();
        w.remove(id);
        w.commit();
        Ok(prior)
    }

    pub fn count(&self) -> Result<usize, OperationError> {
        self.table.count()
    }

    /// Every stored tuple in id order.
    pub fn cursor(&self) -> TableCursor<EntryId, DbEntry> {
        self.table.cursor()
    }

    pub fn close(&self) -> Result<(), OperationError> {
        self.table.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dn::Dn;

    fn entry(cn: &str) -> Entry {
        Entry::new(Dn::parse(&format!("cn={cn},dc=example")).expect("dn"))
            .with("objectclass", &["top"])
            .with("cn", &[cn])
    }

    #[test]
    fn test_master_table_ids_and_entries() {
        sketching::test_init();
        let db = Db::open("").expect("open");
        let mt = MasterTable::open(&db, 64).expect("master");
        let a = mt.get_next_id().expect("id");
        let b = mt.get_next_id().expect("id");
        assert_eq!(a, EntryId::new(1));
        assert_eq!(b, EntryId::new(2));

        mt.put(a, &entry("a")).expect("put");
        mt.put(b, &entry("b")).expect("put");
        assert_eq!(mt.count(), Ok(2));
        let got = mt.get(a).expect("get").expect("present");
        assert_eq!(got.id(), Some(a));
        assert_eq!(got.get_single("cn"), Some("a"));

        // Overwrite goes through the cache.
        mt.put(a, &entry("a2")).expect("put");
        let got = mt.get(a).expect("get").expect("present");
        assert_eq!(got.get_single("cn"), Some("a2"));

        assert!(mt.delete(a).expect("delete").is_some());
        assert_eq!(mt.get(a), Ok(None));
        assert_eq!(mt.count(), Ok(1));

        // Deleted ids are not handed out again.
        assert_eq!(mt.get_next_id(), Ok(EntryId::new(3)));
        mt.reset_counter().expect("reset");
        assert_eq!(mt.current_id(), 0);
    }

    #[test]
    fn test_master_table_undecodable_entry() {
        sketching::test_init();
        let db = Db::open("").expect("open");
        let mt = MasterTable::open(&db, 64).expect("master");
        let id = mt.get_next_id().expect("id");
        mt.put(id, &entry("a")).expect("put");

        let tbl = sql_table_name("tbl", MASTER_TABLE_NAME);
        db.with_conn(|conn| {
            conn.execute(&format!("UPDATE \"{tbl}\" SET value_data = x'7b7b'"), [])
                .map(|_| ())
                .map_err(sqlite_error)
        })
        .expect("corrupt");

        assert_eq!(mt.get(id), Err(OperationError::CorruptedEntry(id.as_u64())));
    }

    #[test]
    fn test_master_table_sequence_survives_reopen() {
        sketching::test_init();
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("master.db");
        let path = path.to_str().expect("path");
        {
            let db = Db::open(path).expect("open");
            let mt = MasterTable::open(&db, 64).expect("master");
            for _ in 0..3 {
                mt.get_next_id().expect("id");
            }
            let id = mt.get_next_id().expect("id");
            mt.put(id, &entry("x")).expect("put");
            db.close().expect("close");
        }
        let db = Db::open(path).expect("reopen");
        let mt = MasterTable::open(&db, 64).expect("master");
        assert_eq!(mt.current_id(), 4);
        assert_eq!(mt.get_next_id(), Ok(EntryId::new(5)));
    }

    #[test]
    fn test_master_table_sequence_behind_highest_id() {
        sketching::test_init();
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("master.db");
        let path = path.to_str().expect("path");
        {
            let db = Db::open(path).expect("open");
            let mt = MasterTable::open(&db, 64).expect("master");
            let id = mt.get_next_id().expect("id");
            mt.put(id, &entry("a")).expect("put");
            // Stored without the sequence ever reaching it.
            mt.put(EntryId::new(9), &entry("b")).expect("put");
            db.close().expect("close");
        }
        let db = Db::open(path).expect("reopen");
        let mt = MasterTable::open(&db, 64).expect("master");
        assert_eq!(mt.current_id(), 9);
        assert_eq!(mt.get_next_id(), Ok(EntryId::new(10)));
    }
}
