use crate::mssql::{self, MssqlClient};
use crate::types::{column_value, create_table_ddl, sql_type_for};
use crate::{DbError, detect_driver};
use parquet::arrow::arrow_reader::{ParquetRecordBatchReader, ParquetRecordBatchReaderBuilder};
use std::path::PathBuf;
use std::str::FromStr;
use tiberius::TokenRow;
use tracing::debug;

const BATCH_SIZE: usize = 65_536;

/// How rows land in the target table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadMode {
    #[default]
    Append,
    TruncateAndLoad,
    CreateOrReplace,
}

impl LoadMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Append => "append",
            Self::TruncateAndLoad => "truncate_and_load",
            Self::CreateOrReplace => "create_or_replace",
        }
    }
}

impl FromStr for LoadMode {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "append" => Ok(Self::Append),
            "truncate_and_load" => Ok(Self::TruncateAndLoad),
            "create_or_replace" => Ok(Self::CreateOrReplace),
            other => Err(DbError::InvalidMode(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadParams {
    pub file_path: PathBuf,
    pub table: String,
    pub schema: String,
    pub mode: LoadMode,
    pub conn_str: String,
}

/// Streams a Parquet file into a database table.
///
/// The file's schema drives everything: for `CreateOrReplace` the target is
/// dropped and recreated from the mapped column types; `TruncateAndLoad`
/// empties it first. Row transfer always happens inside a single transaction
/// through the bulk-copy interface; any conversion or write error rolls the
/// transaction back. Returns total rows transferred.
pub async fn load_parquet(params: LoadParams) -> Result<u64, DbError> {
    detect_driver(&params.conn_str)?;

    let file = std::fs::File::open(&params.file_path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let schema = builder.schema().clone();

    // Refuse files with unmappable columns before touching the database.
    for field in schema.fields() {
        sql_type_for(field)?;
    }
    let reader = builder.with_batch_size(BATCH_SIZE).build()?;

    let mut client = mssql::connect(&params.conn_str).await?;
    let target = format!("[{}].[{}]", params.schema, params.table);

    if params.mode == LoadMode::CreateOrReplace {
        let drop_sql =
            format!("IF OBJECT_ID('{target}', 'U') IS NOT NULL DROP TABLE {target}");
        client.execute(drop_sql, &[]).await?;
        let ddl = create_table_ddl(&params.schema, &params.table, &schema)?;
        client.execute(ddl, &[]).await?;
    }

    if params.mode == LoadMode::TruncateAndLoad {
        client.execute(format!("TRUNCATE TABLE {target}"), &[]).await?;
    }

    client.execute("BEGIN TRAN", &[]).await?;
    match stream_rows(&mut client, &target, reader).await {
        Ok(total) => {
            client.execute("COMMIT TRAN", &[]).await?;
            debug!(table = %target, rows = total, "bulk load committed");
            Ok(total)
        }
        Err(e) => {
            let _ = client.execute("ROLLBACK TRAN", &[]).await;
            Err(e)
        }
    }
}

async fn stream_rows(
    client: &mut MssqlClient,
    target: &str,
    reader: ParquetRecordBatchReader,
) -> Result<u64, DbError> {
    let mut request = client.bulk_insert(target).await?;
    let mut total = 0u64;

    for batch in reader {
        let batch = batch?;
        for row_idx in 0..batch.num_rows() {
            let mut row = TokenRow::new();
            for column in batch.columns() {
                row.push(column_value(column.as_ref(), row_idx)?);
            }
            request.send(row).await?;
        }
        total += batch.num_rows() as u64;
    }

    request.finalize().await?;
    Ok(total)
}
