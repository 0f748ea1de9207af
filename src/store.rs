use std::path::Path;

use rusqlite::{params, Connection, OpenFlags};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::types::StoredCertificate;

/// Store file used when none is given.
pub const DEFAULT_DB_PATH: &str = "certificates.db";

const SCHEMA_SQL: &str = "CREATE TABLE IF NOT EXISTS certificates (
    ip           TEXT PRIMARY KEY NOT NULL,
    organization TEXT,
    common_name  TEXT,
    san          TEXT
)";

const UPSERT_SQL: &str = "INSERT INTO certificates (ip, organization, common_name, san) \
     VALUES (?1, ?2, ?3, ?4) \
     ON CONFLICT(ip) DO UPDATE SET organization = excluded.organization, \
     common_name = excluded.common_name, san = excluded.san";

const SELECT_COLUMNS: &str = "SELECT ip, organization, common_name, san FROM certificates";

/// Single-table certificate store backed by SQLite. One row per dialed target.
pub struct CertStore {
    conn: Connection,
}

/// Row filter for the query surface. IP matches by prefix, the rest by substring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryFilter {
    IpPrefix(String),
    Organization(String),
    CommonName(String),
    San(String),
}

impl QueryFilter {
    fn column(&self) -> &'static str {
        match self {
            QueryFilter::IpPrefix(_) => "ip",
            QueryFilter::Organization(_) => "organization",
            QueryFilter::CommonName(_) => "common_name",
            QueryFilter::San(_) => "san",
        }
    }

    fn pattern(&self) -> String {
        match self {
            QueryFilter::IpPrefix(t) => format!("{}%", escape_like(t)),
            QueryFilter::Organization(t) | QueryFilter::CommonName(t) | QueryFilter::San(t) => {
                format!("%{}%", escape_like(t))
            }
        }
    }
}

impl CertStore {
    /// Open the store at `path`, creating the file and table when absent.
    /// An existing file is reused as is.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if path.exists() {
            info!(path = %path.display(), "using existing database file");
        } else {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|source| StoreError::Create {
                    path: path.to_path_buf(),
                    source,
                })?;
            }
            info!(path = %path.display(), "creating database file");
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA_SQL)?;
        debug!(path = %path.display(), "certificate store opened");
        Ok(Self { conn })
    }

    /// Open an existing store without write access (query surface).
    pub fn open_read_only(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(Self { conn })
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn })
    }

    /// Insert the row, or overwrite organization/common name/SAN when the IP exists.
    pub fn upsert(&self, row: &StoredCertificate) -> Result<(), StoreError> {
        let mut stmt = self.conn.prepare_cached(UPSERT_SQL)?;
        stmt.execute(params![row.ip, row.organization, row.common_name, row.san])?;
        Ok(())
    }

    pub fn count(&self) -> Result<u64, StoreError> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM certificates", [], |r| r.get(0))?;
        Ok(n.max(0) as u64)
    }

    pub fn all(&self) -> Result<Vec<StoredCertificate>, StoreError> {
        let sql = format!("{SELECT_COLUMNS} ORDER BY ip");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], row_to_certificate)?;
        let out = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(out)
    }

    pub fn query(&self, filter: &QueryFilter) -> Result<Vec<StoredCertificate>, StoreError> {
        let sql = format!(
            "{SELECT_COLUMNS} WHERE {} LIKE ?1 ESCAPE '\\' ORDER BY ip",
            filter.column()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![filter.pattern()], row_to_certificate)?;
        let out = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(out)
    }
}

fn row_to_certificate(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredCertificate> {
    Ok(StoredCertificate {
        ip: row.get(0)?,
        organization: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
        common_name: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        san: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
    })
}

fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
