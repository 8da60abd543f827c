// Schema export for loaded tables

use crate::destination::{DataType, Destination, LOAD_ID_COLUMN};
use crate::error::LoadError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    pub name: String,
    pub exported_at: DateTime<Utc>,
    pub tables: BTreeMap<String, TableSchema>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    pub write_disposition: String,
    pub columns: Vec<ColumnSchema>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub primary_key: bool,
}

impl SchemaSnapshot {
    /// Describe the given tables as they exist in the destination right now.
    /// Tables that were never created are left out.
    pub fn from_destination(
        destination: &Destination,
        name: &str,
        tables: &[&str],
    ) -> rusqlite::Result<Self> {
        let mut snapshot = BTreeMap::new();

        for table in tables {
            if !destination.table_exists(table)? {
                continue;
            }
            let columns = destination
                .columns(table)?
                .into_iter()
                .map(|c| ColumnSchema {
                    name: c.name,
                    data_type: c.data_type,
                    nullable: c.nullable,
                    primary_key: c.primary_key,
                })
                .collect();

            snapshot.insert(
                table.to_string(),
                TableSchema {
                    write_disposition: "merge".to_string(),
                    columns,
                },
            );
        }

        Ok(Self {
            name: name.to_string(),
            exported_at: Utc::now(),
            tables: snapshot,
        })
    }

    pub fn file_name(name: &str) -> String {
        format!("{}.schema.json", name)
    }

    /// Write the snapshot as pretty JSON into `dir`, creating it if needed.
    pub fn export(&self, dir: &Path) -> Result<PathBuf, LoadError> {
        fs::create_dir_all(dir)?;
        let path = dir.join(Self::file_name(&self.name));
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json)?;
        info!("Exported schema for {} tables to {}", self.tables.len(), path.display());
        Ok(path)
    }

    /// Data columns of a table, without the load bookkeeping column.
    pub fn data_columns(&self, table: &str) -> Vec<&str> {
        self.tables
            .get(table)
            .map(|t| {
                t.columns
                    .iter()
                    .map(|c| c.name.as_str())
                    .filter(|name| *name != LOAD_ID_COLUMN)
                    .collect()
            })
            .unwrap_or_default()
    }
}
