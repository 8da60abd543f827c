use crate::error::LoadError;
use chrono::Utc;
use eisa_client::Record;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, OptionalExtension, Result, ToSql, Transaction, params, params_from_iter};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// Bookkeeping table, one row per pipeline run.
pub const LOADS_TABLE: &str = "_eisa_loads";
/// Column added to every data table, pointing at the load that wrote the row.
pub const LOAD_ID_COLUMN: &str = "_eisa_load_id";

pub struct Destination {
    conn: Connection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadStatus {
    Running,
    Completed,
    Partial,
    Failed,
}

impl LoadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadStatus::Running => "running",
            LoadStatus::Completed => "completed",
            LoadStatus::Partial => "partial",
            LoadStatus::Failed => "failed",
        }
    }
}

/// Column type, inferred from the first value seen for a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Text,
    Integer,
    Real,
    Boolean,
    Json,
}

impl DataType {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null | Value::String(_) => DataType::Text,
            Value::Bool(_) => DataType::Boolean,
            Value::Number(n) if n.is_i64() => DataType::Integer,
            Value::Number(n) if n.is_u64() => DataType::Text,
            Value::Number(_) => DataType::Real,
            Value::Array(_) | Value::Object(_) => DataType::Json,
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            DataType::Text => "TEXT",
            DataType::Integer => "INTEGER",
            DataType::Real => "REAL",
            DataType::Boolean => "BOOLEAN",
            DataType::Json => "JSON",
        }
    }

    pub fn from_sql(declared: &str) -> Self {
        match declared.to_ascii_uppercase().as_str() {
            "INTEGER" => DataType::Integer,
            "REAL" => DataType::Real,
            "BOOLEAN" => DataType::Boolean,
            "JSON" => DataType::Json,
            _ => DataType::Text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
    pub primary_key: bool,
}

fn current_timestamp() -> i64 {
    Utc::now().timestamp()
}

pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                SqlValue::Integer(i)
            } else if n.is_u64() {
                SqlValue::Text(n.to_string())
            } else {
                n.as_f64().map(SqlValue::Real).unwrap_or(SqlValue::Null)
            }
        }
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn from_sql_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Value::from(f),
        ValueRef::Text(t) | ValueRef::Blob(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
    }
}

impl Destination {
    pub fn drop(path: &Path) -> std::io::Result<()> {
        fs::remove_file(path)
    }

    pub fn exists(path: &Path) -> bool {
        path.exists()
    }

    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -64000;  -- 64MB cache
            PRAGMA temp_store = MEMORY;
            ",
        )?;

        let destination = Destination { conn };
        destination.init_schema()?;
        Ok(destination)
    }

    pub fn open_in_memory() -> Result<Self> {
        let destination = Destination {
            conn: Connection::open_in_memory()?,
        };
        destination.init_schema()?;
        Ok(destination)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS _eisa_loads (
                load_id TEXT PRIMARY KEY,
                pipeline_name TEXT NOT NULL,
                dataset_name TEXT NOT NULL,
                status TEXT NOT NULL CHECK(status IN ('running', 'completed', 'partial', 'failed')),
                started_at INTEGER NOT NULL,
                finished_at INTEGER
            );

            CREATE INDEX IF NOT EXISTS idx_eisa_loads_status ON _eisa_loads(status);
            ",
        )?;
        Ok(())
    }

    // Load bookkeeping
    pub fn begin_load(&self, pipeline_name: &str, dataset_name: &str) -> Result<String> {
        let load_id = uuid::Uuid::new_v4().to_string();

        self.conn.execute(
            "INSERT INTO _eisa_loads (load_id, pipeline_name, dataset_name, status, started_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                &load_id,
                pipeline_name,
                dataset_name,
                LoadStatus::Running.as_str(),
                current_timestamp()
            ],
        )?;

        Ok(load_id)
    }

    pub fn finish_load(&self, load_id: &str, status: LoadStatus) -> Result<()> {
        self.conn.execute(
            "UPDATE _eisa_loads SET status = ?1, finished_at = ?2 WHERE load_id = ?3",
            params![status.as_str(), current_timestamp(), load_id],
        )?;
        Ok(())
    }

    pub fn load_status(&self, load_id: &str) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT status FROM _eisa_loads WHERE load_id = ?1",
                params![load_id],
                |row| row.get(0),
            )
            .optional()
    }

    pub fn load_count(&self) -> Result<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM _eisa_loads", [], |row| row.get(0))
    }

    // Table inspection
    pub fn table_exists(&self, table: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![table],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn columns(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        table_columns(&self.conn, table)
    }

    pub fn row_count(&self, table: &str) -> Result<i64> {
        if !self.table_exists(table)? {
            return Ok(0);
        }
        self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_ident(table)),
            [],
            |row| row.get(0),
        )
    }

    /// Read one row back as a record, keyed by `key_column`.
    pub fn fetch_row(&self, table: &str, key_column: &str, key: impl ToSql) -> Result<Option<Record>> {
        let sql = format!(
            "SELECT * FROM {} WHERE {} = ?1",
            quote_ident(table),
            quote_ident(key_column)
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

        stmt.query_row(params![key], |row| {
            let mut record = Record::new();
            for (idx, name) in names.iter().enumerate() {
                record.insert(name.clone(), from_sql_value(row.get_ref(idx)?));
            }
            Ok(record)
        })
        .optional()
    }

    pub fn transaction(&mut self) -> Result<Transaction<'_>> {
        self.conn.transaction()
    }

    pub fn get_connection(&self) -> &Connection {
        &self.conn
    }
}

fn table_columns(conn: &Connection, table: &str) -> Result<Vec<ColumnInfo>> {
    let mut stmt =
        conn.prepare("SELECT name, type, \"notnull\", pk FROM pragma_table_info(?1) ORDER BY cid")?;

    let columns = stmt
        .query_map(params![table], |row| {
            let declared: String = row.get(1)?;
            let not_null: bool = row.get(2)?;
            let pk: i64 = row.get(3)?;
            Ok(ColumnInfo {
                name: row.get(0)?,
                data_type: DataType::from_sql(&declared),
                nullable: !not_null,
                primary_key: pk > 0,
            })
        })?
        .collect::<Result<Vec<_>>>()?;

    Ok(columns)
}

/// Merge-writes flattened records into one table, creating the table and
/// adding columns as new keys show up.
///
/// SQLite column names are case-insensitive, so record keys that differ only
/// in case (`Q1`, `q1`) get distinct columns: the first key seen keeps its
/// name, later ones get a numbered suffix (`q1_2`).
pub struct TableWriter<'c> {
    conn: &'c Connection,
    table: String,
    primary_key: String,
    load_id: String,
    /// Lowercased column name -> column name as declared.
    known_columns: HashMap<String, String>,
    /// Record key -> column it is written to.
    key_columns: HashMap<String, String>,
    /// Lowercased names of the columns some key already writes to.
    claimed: HashSet<String>,
    written: usize,
}

impl<'c> TableWriter<'c> {
    pub fn new(conn: &'c Connection, table: &str, primary_key: &str, load_id: &str) -> Result<Self> {
        let known_columns = table_columns(conn, table)?
            .into_iter()
            .map(|c| (c.name.to_lowercase(), c.name))
            .collect();

        Ok(Self {
            conn,
            table: table.to_string(),
            primary_key: primary_key.to_string(),
            load_id: load_id.to_string(),
            known_columns,
            key_columns: HashMap::new(),
            claimed: HashSet::from([LOAD_ID_COLUMN.to_string()]),
            written: 0,
        })
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn write(&mut self, record: &Record) -> std::result::Result<(), LoadError> {
        if record
            .get(&self.primary_key)
            .is_none_or(|v| v.is_null())
        {
            return Err(LoadError::MissingPrimaryKey {
                table: self.table.clone(),
                key: self.primary_key.clone(),
            });
        }

        if self.known_columns.is_empty() {
            self.create_table()?;
        }

        let mut columns = Vec::with_capacity(record.len() + 1);
        let mut values = Vec::with_capacity(record.len() + 1);
        for (name, value) in record {
            if name == LOAD_ID_COLUMN {
                continue;
            }
            columns.push(quote_ident(&self.column_for(name, value)?));
            values.push(to_sql_value(value));
        }
        columns.push(quote_ident(LOAD_ID_COLUMN));
        values.push(SqlValue::Text(self.load_id.clone()));

        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "INSERT OR REPLACE INTO {} ({}) VALUES ({})",
            quote_ident(&self.table),
            columns.join(", "),
            placeholders.join(", ")
        );

        let mut stmt = self.conn.prepare_cached(&sql)?;
        stmt.execute(params_from_iter(values))?;
        self.written += 1;
        Ok(())
    }

    /// Resolve the column a record key is written to, adding it when needed.
    fn column_for(&mut self, key: &str, value: &Value) -> Result<String> {
        if let Some(column) = self.key_columns.get(key) {
            return Ok(column.clone());
        }

        let mut column = key.to_string();
        let mut suffix = 1;
        loop {
            let folded = column.to_lowercase();
            match self.known_columns.get(&folded) {
                None => {
                    self.add_column(&column, DataType::of(value))?;
                    break;
                }
                Some(existing) if *existing == column && !self.claimed.contains(&folded) => break,
                Some(_) => {
                    suffix += 1;
                    column = format!("{}_{}", key, suffix);
                }
            }
        }

        if column != key {
            warn!(
                "Key {:?} collides with an existing column of {}, writing it to {:?}",
                key, self.table, column
            );
        }
        self.claimed.insert(column.to_lowercase());
        self.key_columns.insert(key.to_string(), column.clone());
        Ok(column)
    }

    /// The key column is declared TEXT so SQLite never turns it into a rowid
    /// alias; integer ids are stored as their decimal text.
    fn create_table(&mut self) -> Result<()> {
        debug!("Creating table {}", self.table);
        self.conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} ({} TEXT PRIMARY KEY NOT NULL, {} TEXT NOT NULL)",
            quote_ident(&self.table),
            quote_ident(&self.primary_key),
            quote_ident(LOAD_ID_COLUMN),
        ))?;
        self.known_columns
            .insert(self.primary_key.to_lowercase(), self.primary_key.clone());
        self.known_columns
            .insert(LOAD_ID_COLUMN.to_string(), LOAD_ID_COLUMN.to_string());
        Ok(())
    }

    fn add_column(&mut self, name: &str, data_type: DataType) -> Result<()> {
        debug!("Adding column {}.{} ({})", self.table, name, data_type.as_sql());
        self.conn.execute_batch(&format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            quote_ident(&self.table),
            quote_ident(name),
            data_type.as_sql()
        ))?;
        self.known_columns.insert(name.to_lowercase(), name.to_string());
        Ok(())
    }
}
