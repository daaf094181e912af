use std::collections::HashSet;
use std::path::Path;

use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, ToSql};
use uuid::Uuid;

use crate::config::is_identifier;
use crate::error::PersistenceError;
use crate::record::CanonicalRecord;

/// Rows per INSERT statement.
pub const CHUNK_SIZE: usize = 500;

/// Destination columns, in insert order. Anything else a record carries is dropped.
pub const COLUMNS: [&str; 11] = [
    "id",
    "fecha_creacion",
    "titulo",
    "descripcion",
    "direccion",
    "precio",
    "moneda",
    "superficie",
    "enlace",
    "lat",
    "lon",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InsertMode {
    #[default]
    Append,
    /// Drop and recreate the table before inserting. Only for re-seeding.
    Replace,
}

/// Accepts `sqlite://path`, `sqlite:path` or a bare path.
fn sqlite_path(db_url: &str) -> &str {
    db_url
        .strip_prefix("sqlite://")
        .or_else(|| db_url.strip_prefix("sqlite:"))
        .unwrap_or(db_url)
}

pub fn connect(db_url: &str) -> Result<Connection, PersistenceError> {
    let path = sqlite_path(db_url);
    if path != ":memory:" {
        if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| PersistenceError::Location {
                path: parent.to_path_buf(),
                source,
            })?;
        }
    }
    let conn = Connection::open(path).map_err(|source| PersistenceError::Connect {
        url: db_url.to_string(),
        source,
    })?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    Ok(conn)
}

#[cfg(test)]
pub fn connect_memory() -> Result<Connection, PersistenceError> {
    connect(":memory:")
}

fn checked_table(table: &str) -> Result<&str, PersistenceError> {
    if is_identifier(table) {
        Ok(table)
    } else {
        Err(PersistenceError::InvalidTable(table.to_string()))
    }
}

pub fn init_schema(conn: &Connection, table: &str) -> Result<(), PersistenceError> {
    let table = checked_table(table)?;
    conn.execute_batch(&format!(
        "
        CREATE TABLE IF NOT EXISTS {table} (
            id             TEXT PRIMARY KEY,
            fecha_creacion TEXT NOT NULL,
            titulo         TEXT NOT NULL,
            descripcion    TEXT,
            direccion      TEXT,
            precio         REAL NOT NULL,
            moneda         TEXT CHECK(moneda IN ('ARS','USD')),
            superficie     TEXT,
            enlace         TEXT,
            lat            REAL,
            lon            REAL
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_{table}_enlace ON {table}(enlace);
        "
    ))?;
    Ok(())
}

/// All stored links, fetched in one query over the `enlace` index.
pub fn existing_links(conn: &Connection, table: &str) -> Result<HashSet<String>, PersistenceError> {
    let table = checked_table(table)?;
    let mut stmt = conn.prepare(&format!(
        "SELECT enlace FROM {table} WHERE enlace IS NOT NULL"
    ))?;
    let links = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<HashSet<_>, _>>()?;
    Ok(links)
}

// ── Insert ──

/// A record projected onto the destination columns.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyRow {
    pub id: String,
    pub fecha_creacion: String,
    pub titulo: String,
    pub descripcion: Option<String>,
    pub direccion: Option<String>,
    pub precio: f64,
    pub moneda: &'static str,
    pub superficie: Option<String>,
    pub enlace: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

impl PropertyRow {
    fn values(&self) -> [&dyn ToSql; COLUMNS.len()] {
        [
            &self.id,
            &self.fecha_creacion,
            &self.titulo,
            &self.descripcion,
            &self.direccion,
            &self.precio,
            &self.moneda,
            &self.superficie,
            &self.enlace,
            &self.lat,
            &self.lon,
        ]
    }
}

/// Project records onto table rows, generating ids and creation timestamps
/// for records that do not bring their own.
pub fn prepare_rows(records: Vec<CanonicalRecord>) -> Vec<PropertyRow> {
    let now = Utc::now();
    records
        .into_iter()
        .map(|r| PropertyRow {
            id: r.id.unwrap_or_else(Uuid::new_v4).to_string(),
            fecha_creacion: r
                .created_at
                .unwrap_or(now)
                .to_rfc3339_opts(SecondsFormat::Micros, true),
            titulo: r.title,
            descripcion: r.description,
            direccion: r.address,
            precio: r.price_amount,
            moneda: r.currency.code(),
            superficie: r.surface,
            enlace: r.link,
            lat: r.latitude,
            lon: r.longitude,
        })
        .collect()
}

fn insert_sql(table: &str, rows: usize) -> String {
    let tuple = format!("({})", vec!["?"; COLUMNS.len()].join(", "));
    format!(
        "INSERT INTO {} ({}) VALUES {}",
        table,
        COLUMNS.join(", "),
        vec![tuple.as_str(); rows].join(", ")
    )
}

/// Insert `rows` in statements of [`CHUNK_SIZE`] rows inside one transaction.
/// Any failure rolls the whole batch back. `on_chunk` receives the size of
/// each chunk once it has been written.
pub fn insert_chunked(
    conn: &Connection,
    table: &str,
    rows: &[PropertyRow],
    mode: InsertMode,
    mut on_chunk: impl FnMut(usize),
) -> Result<usize, PersistenceError> {
    let table = checked_table(table)?;
    let tx = conn.unchecked_transaction()?;
    if mode == InsertMode::Replace {
        tx.execute_batch(&format!("DROP TABLE IF EXISTS {table};"))?;
    }
    init_schema(&tx, table)?;

    let mut count = 0;
    for chunk in rows.chunks(CHUNK_SIZE) {
        let params: Vec<&dyn ToSql> = chunk.iter().flat_map(|r| r.values()).collect();
        let mut stmt = tx.prepare(&insert_sql(table, chunk.len()))?;
        count += stmt.execute(params.as_slice())?;
        on_chunk(chunk.len());
    }
    tx.commit()?;
    Ok(count)
}

// ── Stats ──

pub struct TableStats {
    pub rows: usize,
    pub with_link: usize,
    pub foreign_currency: usize,
}

pub fn table_stats(conn: &Connection, table: &str) -> Result<TableStats, PersistenceError> {
    let table = checked_table(table)?;
    let rows = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))?;
    let with_link = conn.query_row(
        &format!("SELECT COUNT(*) FROM {table} WHERE enlace IS NOT NULL"),
        [],
        |r| r.get(0),
    )?;
    let foreign_currency = conn.query_row(
        &format!("SELECT COUNT(*) FROM {table} WHERE moneda = 'USD'"),
        [],
        |r| r.get(0),
    )?;
    Ok(TableStats {
        rows,
        with_link,
        foreign_currency,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Currency;

    fn rec(title: &str, link: Option<String>) -> CanonicalRecord {
        let mut r = CanonicalRecord::new(title, 10.0, Currency::Domestic);
        r.link = link;
        r
    }

    #[test]
    fn parses_db_urls() {
        assert_eq!(sqlite_path("sqlite://data/p.sqlite"), "data/p.sqlite");
        assert_eq!(sqlite_path("sqlite:p.sqlite"), "p.sqlite");
        assert_eq!(sqlite_path("/tmp/p.sqlite"), "/tmp/p.sqlite");
    }

    #[test]
    fn rejects_bad_table_names() {
        let conn = connect_memory().unwrap();
        assert!(matches!(
            init_schema(&conn, "properties;--"),
            Err(PersistenceError::InvalidTable(_))
        ));
    }

    #[test]
    fn prepare_rows_keeps_supplied_id_and_generates_missing() {
        let mut with_id = rec("A", None);
        let id = Uuid::new_v4();
        with_id.id = Some(id);
        let rows = prepare_rows(vec![with_id, rec("B", None), rec("C", None)]);
        assert_eq!(rows[0].id, id.to_string());
        assert_ne!(rows[1].id, rows[2].id);
        assert!(!rows[1].fecha_creacion.is_empty());
        assert_eq!(rows[1].moneda, "ARS");
    }

    #[test]
    fn inserts_across_several_chunks() {
        let conn = connect_memory().unwrap();
        let records: Vec<_> = (0..1203)
            .map(|i| rec(&format!("L{i}"), Some(format!("u{i}"))))
            .collect();
        let rows = prepare_rows(records);
        let mut chunks = Vec::new();
        let n = insert_chunked(&conn, "properties", &rows, InsertMode::Append, |c| {
            chunks.push(c)
        })
        .unwrap();
        assert_eq!(n, 1203);
        assert_eq!(chunks, vec![500, 500, 203]);
        assert_eq!(table_stats(&conn, "properties").unwrap().rows, 1203);
        assert_eq!(existing_links(&conn, "properties").unwrap().len(), 1203);
    }

    #[test]
    fn failed_chunk_rolls_back_whole_batch() {
        let conn = connect_memory().unwrap();
        init_schema(&conn, "properties").unwrap();
        let mut records: Vec<_> = (0..600)
            .map(|i| rec(&format!("L{i}"), Some(format!("u{i}"))))
            .collect();
        // Duplicate link in the second chunk violates the unique index.
        records.push(rec("dup", Some("u0".into())));
        let rows = prepare_rows(records);
        assert!(insert_chunked(&conn, "properties", &rows, InsertMode::Append, |_| {}).is_err());
        assert_eq!(table_stats(&conn, "properties").unwrap().rows, 0);
    }

    #[test]
    fn replace_mode_recreates_table() {
        let conn = connect_memory().unwrap();
        let first = prepare_rows(vec![rec("A", Some("a".into())), rec("B", Some("b".into()))]);
        insert_chunked(&conn, "properties", &first, InsertMode::Append, |_| {}).unwrap();
        let second = prepare_rows(vec![rec("C", Some("a".into()))]);
        insert_chunked(&conn, "properties", &second, InsertMode::Replace, |_| {}).unwrap();
        let stats = table_stats(&conn, "properties").unwrap();
        assert_eq!(stats.rows, 1);
        assert_eq!(stats.with_link, 1);
    }
}
