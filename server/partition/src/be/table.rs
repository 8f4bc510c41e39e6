//! Ordered, optionally duplicate keyed, persistent tables.
//!
//! A table with duplicates enabled holds any number of values per key and
//! presents them in value order. Without duplicates a `put` replaces the
//! existing value for the key.

use std::marker::PhantomData;
use std::sync::Arc;

use rusqlite::{params_from_iter, Connection, OptionalExtension};

use crate::be::codec::TableCodec;
use crate::be::{sqlite_error, Db};
use crate::cursor::{check_open, Cursor, Tuple};
use crate::prelude::*;

/// Turn an arbitrary table name into a safe sqlite identifier.
pub(crate) fn sql_table_name(prefix: &str, name: &str) -> String {
    let clean: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("{prefix}_{clean}")
}

#[derive(Debug)]
pub struct Table<K, V> {
    db: Db,
    name: Arc<str>,
    dups: bool,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> Clone for Table<K, V> {
    fn clone(&self) -> Self {
        Table {
            db: self.db.clone(),
            name: self.name.clone(),
            dups: self.dups,
            _marker: PhantomData,
        }
    }
}

#[derive(Debug, Clone)]
struct RawRow {
    key: Vec<u8>,
    key_data: Vec<u8>,
    value: Vec<u8>,
    value_data: Vec<u8>,
}

impl RawRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(RawRow {
            key: row.get(0)?,
            key_data: row.get(1)?,
            value: row.get(2)?,
            value_data: row.get(3)?,
        })
    }
}

impl<K: TableCodec, V: TableCodec> Table<K, V> {
    /// Open the table named `name`, creating it if needed.
    pub fn open(db: &Db, name: &str, dups: bool) -> Result<Self, OperationError> {
        let pk = if dups { "key, value" } else { "key" };
        db.with_conn(|conn| {
            conn.execute(
                &format!(
                    "CREATE TABLE IF NOT EXISTS \"{name}\" (
                        key BLOB NOT NULL,
                        key_data BLOB NOT NULL,
                        value BLOB NOT NULL,
                        value_data BLOB NOT NULL,
                        PRIMARY KEY ({pk})
                    ) WITHOUT ROWID"
                ),
                [],
            )
            .map(|_| ())
            .map_err(sqlite_error)
        })?;
        trace!(?name, ?dups, "table open");
        Ok(Table {
            db: db.clone(),
            name: Arc::from(name),
            dups,
            _marker: PhantomData,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_dups_enabled(&self) -> bool {
        self.dups
    }

    fn exists(&self, cond: &str, params: Vec<Vec<u8>>) -> Result<bool, OperationError> {
        let name = &self.name;
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!("SELECT 1 FROM \"{name}\" WHERE {cond} LIMIT 1"))
                .map_err(sqlite_error)?;
            stmt.exists(params_from_iter(params.iter()))
                .map_err(sqlite_error)
        })
    }

    fn count_where(&self, cond: &str, params: Vec<Vec<u8>>) -> Result<usize, OperationError> {
        let name = &self.name;
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!("SELECT COUNT(*) FROM \"{name}\" WHERE {cond}"))
                .map_err(sqlite_error)?;
            let c: i64 = stmt
                .query_row(params_from_iter(params.iter()), |row| row.get(0))
                .map_err(sqlite_error)?;
            usize::try_from(c).map_err(|_| OperationError::InvalidState)
        })
    }

    /// The first value for `key`, in value order.
    pub fn get(&self, key: &K) -> Result<Option<V>, OperationError> {
        let name = &self.name;
        let row = self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT key, key_data, value, value_data FROM \"{name}\"
                     WHERE key = ?1 ORDER BY value ASC LIMIT 1"
                ))
                .map_err(sqlite_error)?;
            stmt.query_row([key.sort_bytes()], RawRow::from_row)
                .optional()
                .map_err(sqlite_error)
        })?;
        row.map(|r| V::decode(&r.value, &r.value_data)).transpose()
    }

    pub fn has(&self, key: &K) -> Result<bool, OperationError> {
        self.exists("key = ?1", vec![key.sort_bytes()])
    }

    pub fn has_value(&self, key: &K, value: &V) -> Result<bool, OperationError> {
        self.exists(
            "key = ?1 AND value = ?2",
            vec![key.sort_bytes(), value.sort_bytes()],
        )
    }

    /// Is there any key ordered at or after `key`.
    pub fn has_greater_or_equal(&self, key: &K) -> Result<bool, OperationError> {
        self.exists("key >= ?1", vec![key.sort_bytes()])
    }

    /// Is there any key ordered at or before `key`.
    pub fn has_less_or_equal(&self, key: &K) -> Result<bool, OperationError> {
        self.exists("key <= ?1", vec![key.sort_bytes()])
    }

    /// Does `key` hold a value ordered at or after `value`.
    pub fn has_value_greater_or_equal(&self, key: &K, value: &V) -> Result<bool, OperationError> {
        self.exists(
            "key = ?1 AND value >= ?2",
            vec![key.sort_bytes(), value.sort_bytes()],
        )
    }

    /// Does `key` hold a value ordered at or before `value`.
    pub fn has_value_less_or_equal(&self, key: &K, value: &V) -> Result<bool, OperationError> {
        self.exists(
            "key = ?1 AND value <= ?2",
            vec![key.sort_bytes(), value.sort_bytes()],
        )
    }

    pub fn put(&self, key: &K, value: &V) -> Result<(), OperationError> {
        let name = &self.name;
        let verb = if self.dups {
            "INSERT OR IGNORE"
        } else {
            "INSERT OR REPLACE"
        };
        let params = [
            key.sort_bytes(),
            key.data_bytes()?,
            value.sort_bytes(),
            value.data_bytes()?,
        ];
        self.db.with_conn(|conn| {
            conn.execute(
                &format!(
                    "{verb} INTO \"{name}\" (key, key_data, value, value_data)
                     VALUES (?1, ?2, ?3, ?4)"
                ),
                params_from_iter(params.iter()),
            )
            .map(|_| ())
            .map_err(sqlite_error)
        })
    }

    /// Remove every value of `key`. Returns the number of tuples removed.
    pub fn remove(&self, key: &K) -> Result<usize, OperationError> {
        let name = &self.name;
        self.db.with_conn(|conn| {
            conn.execute(
                &format!("DELETE FROM \"{name}\" WHERE key = ?1"),
                [key.sort_bytes()],
            )
            .map_err(sqlite_error)
        })
    }

    /// Remove one tuple. Returns false if it was not present.
    pub fn remove_value(&self, key: &K, value: &V) -> Result<bool, OperationError> {
        let name = &self.name;
        self.db.with_conn(|conn| {
            conn.execute(
                &format!("DELETE FROM \"{name}\" WHERE key = ?1 AND value = ?2"),
                [key.sort_bytes(), value.sort_bytes()],
            )
            .map(|n| n > 0)
            .map_err(sqlite_error)
        })
    }

    /// Number of tuples in the table.
    pub fn count(&self) -> Result<usize, OperationError> {
        self.count_where("1 = 1", Vec::new())
    }

    /// Number of values held by `key`.
    pub fn count_key(&self, key: &K) -> Result<usize, OperationError> {
        self.count_where("key = ?1", vec![key.sort_bytes()])
    }

    /// Number of tuples whose key is ordered at or after `key`.
    pub fn greater_than_count(&self, key: &K) -> Result<usize, OperationError> {
        self.count_where("key >= ?1", vec![key.sort_bytes()])
    }

    /// Number of tuples whose key is ordered at or before `key`.
    pub fn less_than_count(&self, key: &K) -> Result<usize, OperationError> {
        self.count_where("key <= ?1", vec![key.sort_bytes()])
    }

    /// Every value of `key`, in value order.
    pub fn values(&self, key: &K) -> Result<Vec<V>, OperationError> {
        let name = &self.name;
        let rows = self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT key, key_data, value, value_data FROM \"{name}\"
                     WHERE key = ?1 ORDER BY value ASC"
                ))
                .map_err(sqlite_error)?;
            let rows = stmt
                .query_map([key.sort_bytes()], RawRow::from_row)
                .map_err(sqlite_error)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(sqlite_error)
        })?;
        rows.into_iter()
            .map(|r| V::decode(&r.value, &r.value_data))
            .collect()
    }

    /// A cursor over every tuple, in key then value order.
    pub fn cursor(&self) -> TableCursor<K, V> {
        TableCursor::new(self.clone(), None)
    }

    /// A cursor over the tuples of one key, in value order.
    pub fn cursor_key(&self, key: &K) -> TableCursor<K, V> {
        TableCursor::new(self.clone(), Some(key.sort_bytes()))
    }

    pub fn close(&self) -> Result<(), OperationError> {
        trace!(name = ?self.name, "table close");
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum Position {
    BeforeFirst,
    AfterLast,
    On(RawRow),
    Before(Vec<u8>, Option<Vec<u8>>),
    After(Vec<u8>, Option<Vec<u8>>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Backward,
}

/// A cursor over a [`Table`]. Each step is one ordered, limited query, so
/// the cursor holds no lock or statement between calls and observes writes
/// made between steps.
#[derive(Debug)]
pub struct TableCursor<K, V> {
    table: Table<K, V>,
    constraint: Option<Vec<u8>>,
    pos: Position,
    closed: bool,
}

impl<K: TableCodec, V: TableCodec> TableCursor<K, V> {
    fn new(table: Table<K, V>, constraint: Option<Vec<u8>>) -> Self {
        TableCursor {
            table,
            constraint,
            pos: Position::BeforeFirst,
            closed: false,
        }
    }

    fn step(&mut self, dir: Direction) -> Result<bool, OperationError> {
        check_open(self.closed)?;
        let order = match dir {
            Direction::Forward => "ASC",
            Direction::Backward => "DESC",
        };

        let mut conds: Vec<String> = Vec::with_capacity(2);
        let mut params: Vec<Vec<u8>> = Vec::with_capacity(3);

        if let Some(c) = &self.constraint {
            params.push(c.clone());
            conds.push(format!("key = ?{}", params.len()));
        }

        let bound: Option<(&str, Vec<u8>, Option<Vec<u8>>)> = match (&self.pos, dir) {
            (Position::BeforeFirst, Direction::Forward)
            | (Position::AfterLast, Direction::Backward) => None,
            (Position::BeforeFirst, Direction::Backward)
            | (Position::AfterLast, Direction::Forward) => {
                return Ok(false);
            }
            (Position::On(row), Direction::Forward) => {
                Some((">", row.key.clone(), Some(row.value.clone())))
            }
            (Position::On(row), Direction::Backward) => {
                Some(("<", row.key.clone(), Some(row.value.clone())))
            }
            (Position::Before(k, v), Direction::Forward) => Some((">=", k.clone(), v.clone())),
            (Position::Before(k, v), Direction::Backward) => Some(("<", k.clone(), v.clone())),
            (Position::After(k, v), Direction::Forward) => Some((">", k.clone(), v.clone())),
            (Position::After(k, v), Direction::Backward) => Some(("<=", k.clone(), v.clone())),
        };

        if let Some((op, k, v)) = bound {
            match v {
                Some(v) => {
                    params.push(k);
                    let ki = params.len();
                    params.push(v);
                    let vi = params.len();
                    conds.push(format!("(key, value) {op} (?{ki}, ?{vi})"));
                }
                None => {
                    params.push(k);
                    conds.push(format!("key {op} ?{}", params.len()));
                }
            }
        }

        let cond = if conds.is_empty() {
            "1 = 1".to_string()
        } else {
            conds.join(" AND ")
        };
        let name = &self.table.name;
        let sql = format!(
            "SELECT key, key_data, value, value_data FROM \"{name}\"
             WHERE {cond} ORDER BY key {order}, value {order} LIMIT 1"
        );

        let row = self
            .table
            .db
            .with_conn(|conn: &Connection| {
                let mut stmt = conn.prepare(&sql).map_err(sqlite_error)?;
                stmt.query_row(params_from_iter(params.iter()), RawRow::from_row)
                    .optional()
                    .map_err(sqlite_error)
            })?;

        match row {
            Some(row) => {
                self.pos = Position::On(row);
                Ok(true)
            }
            None => {
                self.pos = match dir {
                    Direction::Forward => Position::AfterLast,
                    Direction::Backward => Position::BeforeFirst,
                };
                Ok(false)
            }
        }
    }

    /// Position before the first tuple whose key is at or after `key`.
    pub fn before_key(&mut self, key: &K) -> Result<(), OperationError> {
        check_open(self.closed)?;
        self.pos = Position::Before(key.sort_bytes(), None);
        Ok(())
    }

    /// Position after the last tuple whose key is at or before `key`.
    pub fn after_key(&mut self, key: &K) -> Result<(), OperationError> {
        check_open(self.closed)?;
        self.pos = Position::After(key.sort_bytes(), None);
        Ok(())
    }

    /// Decode only the key of the current tuple.
    pub fn get_key(&self) -> Result<K, OperationError> {
        check_open(self.closed)?;
        match &self.pos {
            Position::On(row) => K::decode(&row.key, &row.key_data),
            _ => Err(OperationError::InvalidCursorState),
        }
    }

    fn positional_value(&self, value: &V) -> Option<Vec<u8>> {
        // Without duplicates the value plays no part in the order.
        if self.table.dups {
            Some(value.sort_bytes())
        } else {
            None
        }
    }
}

impl<K: TableCodec, V: TableCodec> Cursor for TableCursor<K, V> {
    type Item = Tuple<K, V>;

    fn before_first(&mut self) -> Result<(), OperationError> {
        check_open(self.closed)?;
        self.pos = Position::BeforeFirst;
        Ok(())
    }

    fn after_last(&mut self) -> Result<(), OperationError> {
        check_open(self.closed)?;
        self.pos = Position::AfterLast;
        Ok(())
    }

    fn next(&mut self) -> Result<bool, OperationError> {
        self.step(Direction::Forward)
    }

    fn previous(&mut self) -> Result<bool, OperationError> {
        self.step(Direction::Backward)
    }

    fn available(&self) -> bool {
        !self.closed && matches!(self.pos, Position::On(_))
    }

    fn get(&self) -> Result<Self::Item, OperationError> {
        check_open(self.closed)?;
        match &self.pos {
            Position::On(row) => Ok(Tuple::new(
                K::decode(&row.key, &row.key_data)?,
                V::decode(&row.value, &row.value_data)?,
            )),
            _ => Err(OperationError::InvalidCursorState),
        }
    }

    fn before(&mut self, element: &Self::Item) -> Result<(), OperationError> {
        check_open(self.closed)?;
        let v = self.positional_value(&element.value);
        self.pos = Position::Before(element.key.sort_bytes(), v);
        Ok(())
    }

    fn after(&mut self, element: &Self::Item) -> Result<(), OperationError> {
        check_open(self.closed)?;
        let v = self.positional_value(&element.value);
        self.pos = Position::After(element.key.sort_bytes(), v);
        Ok(())
    }

    fn close(&mut self) -> Result<(), OperationError> {
        self.closed = true;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::CursorIter;
    use crate::entry::EntryId;

    fn id(i: u64) -> EntryId {
        EntryId::new(i)
    }

    fn dup_table() -> Table<String, EntryId> {
        sketching::test_init();
        let db = Db::open("").expect("open");
        let t: Table<String, EntryId> = Table::open(&db, "t_dup", true).expect("table");
        for (k, v) in [("b", 3), ("a", 2), ("b", 1), ("c", 9), ("a", 1)] {
            t.put(&k.to_string(), &id(v)).expect("put");
        }
        t
    }

    #[test]
    fn test_table_dups_and_counts() {
        let t = dup_table();
        assert!(t.is_dups_enabled());
        assert_eq!(t.count(), Ok(5));
        assert_eq!(t.count_key(&"b".to_string()), Ok(2));
        // Same tuple twice is a no op.
        t.put(&"b".to_string(), &id(3)).expect("put");
        assert_eq!(t.count(), Ok(5));
        assert_eq!(t.get(&"b".to_string()), Ok(Some(id(1))));
        assert_eq!(t.get(&"z".to_string()), Ok(None));
        assert_eq!(t.values(&"a".to_string()), Ok(vec![id(1), id(2)]));
        assert_eq!(t.greater_than_count(&"b".to_string()), Ok(3));
        assert_eq!(t.less_than_count(&"a".to_string()), Ok(2));
        assert_eq!(t.has_greater_or_equal(&"d".to_string()), Ok(false));
        assert_eq!(t.has_less_or_equal(&"a".to_string()), Ok(true));
        assert_eq!(t.has_value_greater_or_equal(&"b".to_string(), &id(2)), Ok(true));
        assert_eq!(t.has_value_less_or_equal(&"c".to_string(), &id(8)), Ok(false));

        assert_eq!(t.remove_value(&"b".to_string(), &id(3)), Ok(true));
        assert_eq!(t.remove_value(&"b".to_string(), &id(3)), Ok(false));
        assert_eq!(t.remove(&"a".to_string()), Ok(2));
        assert_eq!(t.count(), Ok(2));
    }

    #[test]
    fn test_table_no_dups_replaces() {
        sketching::test_init();
        let db = Db::open("").expect("open");
        let t: Table<EntryId, String> = Table::open(&db, "t_single", false).expect("table");
        t.put(&id(1), &"x".to_string()).expect("put");
        t.put(&id(1), &"y".to_string()).expect("put");
        assert_eq!(t.count(), Ok(1));
        assert_eq!(t.get(&id(1)), Ok(Some("y".to_string())));
    }

    #[test]
    fn test_table_cursor_order_and_positioning() {
        let t = dup_table();
        let mut c = t.cursor();
        let all: Vec<(String, u64)> = CursorIter::new(&mut c)
            .map(|r| r.map(|t| (t.key, t.value.as_u64())).expect("tuple"))
            .collect();
        assert_eq!(
            all,
            vec![
                ("a".to_string(), 1),
                ("a".to_string(), 2),
                ("b".to_string(), 1),
                ("b".to_string(), 3),
                ("c".to_string(), 9)
            ]
        );

        // Walk backwards from the end.
        assert!(c.last().expect("last"));
        assert_eq!(c.get().map(|t| t.key), Ok("c".to_string()));
        assert!(c.previous().expect("previous"));
        assert_eq!(c.get().map(|t| t.value), Ok(id(3)));

        // Key + value positioning.
        c.before(&Tuple::new("b".to_string(), id(2))).expect("before");
        assert!(c.next().expect("next"));
        assert_eq!(c.get(), Ok(Tuple::new("b".to_string(), id(3))));
        c.after(&Tuple::new("b".to_string(), id(2))).expect("after");
        assert!(c.previous().expect("previous"));
        assert_eq!(c.get(), Ok(Tuple::new("b".to_string(), id(1))));

        // Key only positioning.
        c.before_key(&"b".to_string()).expect("before_key");
        assert!(c.next().expect("next"));
        assert_eq!(c.get_key(), Ok("b".to_string()));
        c.after_key(&"b".to_string()).expect("after_key");
        assert!(c.next().expect("next"));
        assert_eq!(c.get_key(), Ok("c".to_string()));
        assert!(!c.next().expect("next"));
        assert!(!c.available());

        c.close().expect("close");
        assert_eq!(c.next(), Err(OperationError::InvalidCursorState));
    }

    #[test]
    fn test_table_cursor_key_constrained() {
        let t = dup_table();
        let mut c = t.cursor_key(&"b".to_string());
        let vals: Vec<EntryId> = CursorIter::new(&mut c)
            .map(|r| r.map(|t| t.value).expect("tuple"))
            .collect();
        assert_eq!(vals, vec![id(1), id(3)]);
        assert!(c.last().expect("last"));
        assert_eq!(c.get().map(|t| t.value), Ok(id(3)));

        let mut c = t.cursor_key(&"nothing".to_string());
        assert!(!c.first().expect("first"));
    }
}
