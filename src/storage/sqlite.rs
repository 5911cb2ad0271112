//! `SQLite` backend: schema, pragmas, and batched transactional writes.

use crate::model::types::{
    CLASSIFICATION_LEVELS, CatalogEntry, ClassificationPath, ResourceLine,
};
use anyhow::{Context, Result, anyhow};
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Per-level column names, index 0 = classification level 1.
pub const CODE_COLUMNS: [&str; CLASSIFICATION_LEVELS] = [
    "cod_liv_1",
    "cod_liv_2",
    "cod_liv_3",
    "cod_liv_4",
    "cod_liv_5",
    "cod_liv_6",
    "cod_liv_7",
    "cod_liv_8",
    "cod_liv_9",
    "cod_liv_10",
    "cod_liv_11",
];

pub const DESCR_COLUMNS: [&str; CLASSIFICATION_LEVELS] = [
    "descr_liv_1",
    "descr_liv_2",
    "descr_liv_3",
    "descr_liv_4",
    "descr_liv_5",
    "descr_liv_6",
    "descr_liv_7",
    "descr_liv_8",
    "descr_liv_9",
    "descr_liv_10",
    "descr_liv_11",
];

const SCHEMA_VERSION: i64 = 1;

const MIGRATION_V1: &str = r"
CREATE TABLE IF NOT EXISTS entries (
    id INTEGER PRIMARY KEY,
    entry_code TEXT NOT NULL UNIQUE,
    author TEXT,
    year TEXT,
    edition TEXT,
    unit_price REAL NOT NULL DEFAULT 0,
    unit_of_measure TEXT NOT NULL DEFAULT '',
    price_without_surcharge REAL NOT NULL DEFAULT 0,
    labor_ratio REAL NOT NULL DEFAULT 0,
    resource_type TEXT NOT NULL DEFAULT '',
    description TEXT NOT NULL DEFAULT '',
    detail_description TEXT NOT NULL DEFAULT '',
    cod_liv_1 TEXT, descr_liv_1 TEXT,
    cod_liv_2 TEXT, descr_liv_2 TEXT,
    cod_liv_3 TEXT, descr_liv_3 TEXT,
    cod_liv_4 TEXT, descr_liv_4 TEXT,
    cod_liv_5 TEXT, descr_liv_5 TEXT,
    cod_liv_6 TEXT, descr_liv_6 TEXT,
    cod_liv_7 TEXT, descr_liv_7 TEXT,
    cod_liv_8 TEXT, descr_liv_8 TEXT,
    cod_liv_9 TEXT, descr_liv_9 TEXT,
    cod_liv_10 TEXT, descr_liv_10 TEXT,
    cod_liv_11 TEXT, descr_liv_11 TEXT,
    depth INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS resource_lines (
    id INTEGER PRIMARY KEY,
    entry_id INTEGER NOT NULL REFERENCES entries(id) ON DELETE CASCADE,
    code TEXT NOT NULL,
    unit_of_measure TEXT NOT NULL DEFAULT '',
    quantity REAL NOT NULL DEFAULT 0,
    unit_price REAL NOT NULL DEFAULT 0,
    amount REAL NOT NULL DEFAULT 0,
    resource_type TEXT NOT NULL DEFAULT '',
    description TEXT NOT NULL DEFAULT ''
);

CREATE INDEX IF NOT EXISTS idx_entries_cod_liv_1 ON entries(cod_liv_1);
CREATE INDEX IF NOT EXISTS idx_entries_cod_liv_2 ON entries(cod_liv_2);
CREATE INDEX IF NOT EXISTS idx_entries_cod_liv_3 ON entries(cod_liv_3);
CREATE INDEX IF NOT EXISTS idx_entries_cod_liv_4 ON entries(cod_liv_4);
CREATE INDEX IF NOT EXISTS idx_entries_cod_liv_5 ON entries(cod_liv_5);
CREATE INDEX IF NOT EXISTS idx_entries_depth ON entries(depth);
CREATE INDEX IF NOT EXISTS idx_resource_lines_entry ON resource_lines(entry_id);
";

/// Non-level entry columns, in insert/select order.
const ENTRY_SCALAR_COLUMNS: &str = "entry_code, author, year, edition, unit_price, \
     unit_of_measure, price_without_surcharge, labor_ratio, resource_type, \
     description, detail_description";

pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating db directory {}", parent.display()))?;
        }

        let mut conn = Connection::open(path)
            .with_context(|| format!("opening sqlite db at {}", path.display()))?;

        apply_pragmas(&mut conn)?;
        init_meta(&mut conn)?;
        migrate(&mut conn)?;

        Ok(Self { conn })
    }

    /// In-memory database, used by tests and one-shot tooling.
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        init_meta(&mut conn)?;
        migrate(&mut conn)?;
        Ok(Self { conn })
    }

    pub fn raw(&self) -> &Connection {
        &self.conn
    }

    pub fn schema_version(&self) -> Result<i64> {
        self.conn
            .query_row(
                "SELECT value FROM meta WHERE key='schema_version'",
                [],
                |row| row.get::<_, String>(0).map(|s| s.parse().unwrap_or(0)),
            )
            .optional()?
            .ok_or_else(|| anyhow!("schema_version missing"))
    }

    /// Delete every catalog entry and resource line in one transaction.
    ///
    /// Ingestion calls this before loading so the dataset is always a
    /// complete snapshot of one source document.
    pub fn clear_all(&mut self) -> Result<()> {
        let tx = self.conn.transaction()?;
        let resources = tx.execute("DELETE FROM resource_lines", [])?;
        let entries = tx.execute("DELETE FROM entries", [])?;
        tx.commit()?;
        if entries > 0 || resources > 0 {
            info!(entries, resources, "cleared catalog store");
        }
        Ok(())
    }

    /// Insert a batch of entries and their resource lines in a single
    /// transaction. Any failure rolls the whole batch back.
    pub fn insert_entries(&mut self, batch: &[CatalogEntry]) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let tx = self.conn.transaction()?;
        for entry in batch {
            let entry_id = insert_entry(&tx, entry)?;
            insert_resource_lines(&tx, entry_id, &entry.resources)?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn entry_count(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?)
    }

    pub fn resource_line_count(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM resource_lines", [], |row| row.get(0))?)
    }

    /// Whether at least one entry has been committed.
    pub fn is_populated(&self) -> Result<bool> {
        Ok(self.entry_count()? > 0)
    }

    /// Single-entry lookup by unique code, with its resource lines.
    /// Unknown codes are a not-found result, not an error.
    pub fn entry_by_code(&self, entry_code: &str) -> Result<Option<CatalogEntry>> {
        let sql = format!(
            "SELECT id, {ENTRY_SCALAR_COLUMNS}, {} FROM entries WHERE entry_code = ?",
            level_column_list()
        );
        let found = self
            .conn
            .query_row(&sql, params![entry_code], read_entry_row)
            .optional()?;

        let Some((id, mut entry)) = found else {
            return Ok(None);
        };
        entry.resources = self.resource_lines_for(id)?;
        Ok(Some(entry))
    }

    /// Load a page of entries for an already-built WHERE clause. Used by the
    /// search engine; `params` must match the placeholders in `where_sql`.
    pub fn entry_page(
        &self,
        where_sql: &str,
        params: &[Box<dyn rusqlite::ToSql>],
        limit: i64,
        offset: i64,
    ) -> Result<Vec<CatalogEntry>> {
        let sql = format!(
            "SELECT id, {ENTRY_SCALAR_COLUMNS}, {} FROM entries {} \
             ORDER BY entry_code LIMIT ? OFFSET ?",
            level_column_list(),
            where_sql,
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut bound: Vec<&dyn rusqlite::ToSql> = params.iter().map(|b| &**b).collect();
        bound.push(&limit);
        bound.push(&offset);

        let rows = stmt.query_map(rusqlite::params_from_iter(bound), read_entry_row)?;
        let mut out = Vec::new();
        for row in rows {
            let (id, mut entry) = row?;
            entry.resources = self.resource_lines_for(id)?;
            out.push(entry);
        }
        Ok(out)
    }

    pub fn count_where(
        &self,
        where_sql: &str,
        params: &[Box<dyn rusqlite::ToSql>],
    ) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM entries {where_sql}");
        let bound = params.iter().map(|b| &**b);
        Ok(self
            .conn
            .query_row(&sql, rusqlite::params_from_iter(bound), |row| row.get(0))?)
    }

    fn resource_lines_for(&self, entry_id: i64) -> Result<Vec<ResourceLine>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT code, unit_of_measure, quantity, unit_price, amount, \
                    resource_type, description \
             FROM resource_lines WHERE entry_id = ? ORDER BY id",
        )?;
        let rows = stmt.query_map(params![entry_id], |row| {
            Ok(ResourceLine {
                code: row.get(0)?,
                unit_of_measure: row.get(1)?,
                quantity: row.get(2)?,
                unit_price: row.get(3)?,
                amount: row.get(4)?,
                resource_type: row.get(5)?,
                description: row.get(6)?,
            })
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }
}

/// `cod_liv_1, descr_liv_1, ..., cod_liv_11, descr_liv_11`
fn level_column_list() -> String {
    let mut cols = Vec::with_capacity(CLASSIFICATION_LEVELS * 2);
    for k in 0..CLASSIFICATION_LEVELS {
        cols.push(CODE_COLUMNS[k]);
        cols.push(DESCR_COLUMNS[k]);
    }
    cols.join(", ")
}

/// Row shape: `id`, the scalar columns, then the 22 level columns.
fn read_entry_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(i64, CatalogEntry)> {
    let id: i64 = row.get(0)?;
    let mut pairs: [(Option<String>, Option<String>); CLASSIFICATION_LEVELS] = Default::default();
    for (k, pair) in pairs.iter_mut().enumerate() {
        let base = 12 + k * 2;
        *pair = (row.get(base)?, row.get(base + 1)?);
    }
    let entry = CatalogEntry {
        entry_code: row.get(1)?,
        author: row.get(2)?,
        year: row.get(3)?,
        edition: row.get(4)?,
        unit_price: row.get(5)?,
        unit_of_measure: row.get(6)?,
        price_without_surcharge: row.get(7)?,
        labor_ratio: row.get(8)?,
        resource_type: row.get(9)?,
        description: row.get(10)?,
        detail_description: row.get(11)?,
        path: ClassificationPath::from_columns(pairs),
        resources: Vec::new(),
    };
    Ok((id, entry))
}

fn insert_entry(tx: &Transaction<'_>, entry: &CatalogEntry) -> Result<i64> {
    let placeholders = vec!["?"; 12 + CLASSIFICATION_LEVELS * 2].join(",");
    let sql = format!(
        "INSERT INTO entries ({ENTRY_SCALAR_COLUMNS}, {}, depth) VALUES ({placeholders})",
        level_column_list()
    );

    let mut values: Vec<Box<dyn rusqlite::ToSql>> = vec![
        Box::new(entry.entry_code.clone()),
        Box::new(entry.author.clone()),
        Box::new(entry.year.clone()),
        Box::new(entry.edition.clone()),
        Box::new(entry.unit_price),
        Box::new(entry.unit_of_measure.clone()),
        Box::new(entry.price_without_surcharge),
        Box::new(entry.labor_ratio),
        Box::new(entry.resource_type.clone()),
        Box::new(entry.description.clone()),
        Box::new(entry.detail_description.clone()),
    ];
    for k in 1..=CLASSIFICATION_LEVELS {
        match entry.path.level(k) {
            Some(level) => {
                values.push(Box::new(level.code.clone()));
                values.push(Box::new(level.description.clone()));
            }
            None => {
                values.push(Box::new(None::<String>));
                values.push(Box::new(None::<String>));
            }
        }
    }
    values.push(Box::new(entry.path.depth() as i64));

    let mut stmt = tx.prepare_cached(&sql)?;
    stmt.execute(rusqlite::params_from_iter(values.iter().map(|b| &**b)))
        .with_context(|| format!("inserting entry {}", entry.entry_code))?;
    Ok(tx.last_insert_rowid())
}

fn insert_resource_lines(
    tx: &Transaction<'_>,
    entry_id: i64,
    lines: &[ResourceLine],
) -> Result<()> {
    if lines.is_empty() {
        return Ok(());
    }
    let mut stmt = tx.prepare_cached(
        "INSERT INTO resource_lines (entry_id, code, unit_of_measure, quantity, \
                                     unit_price, amount, resource_type, description) \
         VALUES (?,?,?,?,?,?,?,?)",
    )?;
    for line in lines {
        stmt.execute(params![
            entry_id,
            &line.code,
            &line.unit_of_measure,
            line.quantity,
            line.unit_price,
            line.amount,
            &line.resource_type,
            &line.description,
        ])?;
    }
    Ok(())
}

fn apply_pragmas(conn: &mut Connection) -> Result<()> {
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.execute_batch(
        r"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA temp_store = MEMORY;
        PRAGMA foreign_keys = ON;
        ",
    )?;
    Ok(())
}

fn init_meta(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS meta (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
        [],
    )?;

    let existing: Option<i64> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'schema_version'",
            [],
            |row| row.get::<_, String>(0).map(|s| s.parse().unwrap_or(0)),
        )
        .optional()?;

    if existing.is_none() {
        // Start at version 0 so migrate() applies full schema on first open.
        conn.execute(
            "INSERT INTO meta(key, value) VALUES('schema_version', 0)",
            [],
        )?;
    }

    Ok(())
}

fn migrate(conn: &mut Connection) -> Result<()> {
    let current: i64 = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'schema_version'",
            [],
            |row| row.get::<_, String>(0).map(|s| s.parse().unwrap_or(0)),
        )
        .optional()?
        .unwrap_or(0);

    if current == SCHEMA_VERSION {
        return Ok(());
    }
    if current > SCHEMA_VERSION {
        return Err(anyhow!(
            "database schema version {current} is newer than supported version {SCHEMA_VERSION}"
        ));
    }

    let tx = conn.transaction()?;
    if current < 1 {
        tx.execute_batch(MIGRATION_V1)?;
    }
    tx.execute(
        "UPDATE meta SET value = ? WHERE key = 'schema_version'",
        params![SCHEMA_VERSION.to_string()],
    )?;
    tx.commit()?;
    info!(from = current, to = SCHEMA_VERSION, "migrated catalog schema");
    Ok(())
}
