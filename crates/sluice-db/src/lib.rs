mod driver;
mod load;
mod mssql;
mod types;

pub use driver::{ConnSpec, Driver, detect_driver, parse_conn_url};
pub use load::{LoadMode, LoadParams, load_parquet};
pub use mssql::execute_batch;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error(
        "cannot detect SQL driver from connection string (expected sqlserver:// or mssql://)"
    )]
    UnknownDriver,
    #[error("invalid connection string: {0}")]
    InvalidConnString(String),
    #[error("connecting to {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },
    #[error("sql error: {0}")]
    Sql(#[from] tiberius::error::Error),
    #[error("reading parquet file: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),
    #[error("reading record batch: {0}")]
    Arrow(#[from] arrow::error::ArrowError),
    #[error("column {column:?}: unsupported Arrow type {data_type} for SQL Server")]
    UnsupportedType { column: String, data_type: String },
    #[error("invalid load mode {0:?} (must be append, truncate_and_load, or create_or_replace)")]
    InvalidMode(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
