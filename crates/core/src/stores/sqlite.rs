use crate::traits::TableSink;
use crate::SinkError;
use csv::StringRecord;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};
use std::path::{Path, PathBuf};
use tracing::info;

pub const DEFAULT_SQLITE_PATH: &str = "financials.db";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Affinity {
    Integer,
    Real,
    Text,
}

impl Affinity {
    fn sql(self) -> &'static str {
        match self {
            Self::Integer => "INTEGER",
            Self::Real => "REAL",
            Self::Text => "TEXT",
        }
    }

    fn value(self, cell: &str) -> SqlValue {
        let cell = cell.trim();
        if cell.is_empty() {
            return SqlValue::Null;
        }
        match self {
            Self::Integer => cell
                .parse::<i64>()
                .map(SqlValue::Integer)
                .unwrap_or_else(|_| SqlValue::Text(cell.to_string())),
            Self::Real => cell
                .parse::<f64>()
                .map(SqlValue::Real)
                .unwrap_or_else(|_| SqlValue::Text(cell.to_string())),
            Self::Text => SqlValue::Text(cell.to_string()),
        }
    }
}

/// Loads CSV files into SQLite tables, replacing any previous contents.
pub struct SqliteTableLoader {
    db_path: PathBuf,
}

impl SqliteTableLoader {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }
}

fn validate_table_name(name: &str) -> Result<(), SinkError> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_');
    if valid_start && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_') {
        Ok(())
    } else {
        Err(SinkError::Request(format!("invalid table name: {name:?}")))
    }
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn infer_affinities(columns: usize, rows: &[StringRecord]) -> Vec<Affinity> {
    (0..columns)
        .map(|index| {
            let mut cells = rows
                .iter()
                .filter_map(|row| row.get(index))
                .map(str::trim)
                .filter(|cell| !cell.is_empty())
                .peekable();

            if cells.peek().is_none() {
                return Affinity::Text;
            }

            let cells: Vec<&str> = cells.collect();
            if cells.iter().all(|cell| cell.parse::<i64>().is_ok()) {
                Affinity::Integer
            } else if cells.iter().all(|cell| cell.parse::<f64>().is_ok()) {
                Affinity::Real
            } else {
                Affinity::Text
            }
        })
        .collect()
}

impl TableSink for SqliteTableLoader {
    fn load_table(&self, csv_path: &Path, table_name: &str) -> Result<usize, SinkError> {
        validate_table_name(table_name)?;

        let mut reader = csv::Reader::from_path(csv_path)?;
        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(|header| header.trim().to_string())
            .collect();
        if headers.iter().all(String::is_empty) {
            return Err(SinkError::Request(format!(
                "{} has no header row",
                csv_path.display()
            )));
        }
        let rows = reader.records().collect::<Result<Vec<_>, _>>()?;
        let affinities = infer_affinities(headers.len(), &rows);

        let table = quote_identifier(table_name);
        let column_defs = headers
            .iter()
            .zip(&affinities)
            .map(|(header, affinity)| format!("{} {}", quote_identifier(header), affinity.sql()))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = vec!["?"; headers.len()].join(", ");

        let mut connection = Connection::open(&self.db_path)?;
        let transaction = connection.transaction()?;
        transaction.execute_batch(&format!(
            "DROP TABLE IF EXISTS {table}; CREATE TABLE {table} ({column_defs});"
        ))?;
        {
            let mut insert =
                transaction.prepare(&format!("INSERT INTO {table} VALUES ({placeholders})"))?;
            for row in &rows {
                let values = affinities
                    .iter()
                    .enumerate()
                    .map(|(index, affinity)| affinity.value(row.get(index).unwrap_or_default()));
                insert.execute(params_from_iter(values))?;
            }
        }
        transaction.commit()?;

        info!(
            table = table_name,
            rows = rows.len(),
            db = %self.db_path.display(),
            "loaded csv into sqlite"
        );
        Ok(rows.len())
    }
}
