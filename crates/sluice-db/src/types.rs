use crate::DbError;
use arrow::array::{
    Array, BinaryArray, BooleanArray, Date32Array, Float32Array, Float64Array, Int8Array,
    Int16Array, Int32Array, Int64Array, LargeStringArray, StringArray, TimestampMicrosecondArray,
    TimestampMillisecondArray, TimestampNanosecondArray, TimestampSecondArray, UInt8Array,
    UInt16Array, UInt32Array, UInt64Array,
};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use std::borrow::Cow;
use tiberius::{ColumnData, IntoSql};

/// Days between 0001-01-01 (CE day 1) and the Unix epoch.
const UNIX_EPOCH_CE_DAYS: i32 = 719_163;

/// Maps an Arrow data type to a SQL Server column type.
pub fn sql_type_for(field: &Field) -> Result<&'static str, DbError> {
    let sql_type = match field.data_type() {
        DataType::Int8 | DataType::Int16 => "SMALLINT",
        DataType::Int32 => "INT",
        DataType::Int64 => "BIGINT",
        DataType::UInt8 => "TINYINT",
        DataType::UInt16 => "INT",
        DataType::UInt32 | DataType::UInt64 => "BIGINT",
        DataType::Float32 => "REAL",
        DataType::Float64 => "FLOAT",
        DataType::Utf8 | DataType::LargeUtf8 => "NVARCHAR(MAX)",
        DataType::Boolean => "BIT",
        DataType::Timestamp(_, _) => "DATETIME2",
        DataType::Date32 => "DATE",
        DataType::Binary => "VARBINARY(MAX)",
        other => {
            return Err(DbError::UnsupportedType {
                column: field.name().clone(),
                data_type: other.to_string(),
            });
        }
    };
    Ok(sql_type)
}

/// Builds a CREATE TABLE statement from an Arrow schema.
pub fn create_table_ddl(
    schema_name: &str,
    table_name: &str,
    schema: &Schema,
) -> Result<String, DbError> {
    let mut columns = Vec::with_capacity(schema.fields().len());
    for field in schema.fields() {
        let sql_type = sql_type_for(field)?;
        let nullability = if field.is_nullable() { "NULL" } else { "NOT NULL" };
        columns.push(format!("    [{}] {} {}", field.name(), sql_type, nullability));
    }
    Ok(format!(
        "CREATE TABLE [{schema_name}].[{table_name}] (\n{}\n)",
        columns.join(",\n")
    ))
}

/// Converts one cell of a record batch into a TDS value.
pub fn column_value(array: &dyn Array, row: usize) -> Result<ColumnData<'static>, DbError> {
    macro_rules! typed {
        ($array_ty:ty, $variant:ident, $map:expr) => {{
            let typed = array
                .as_any()
                .downcast_ref::<$array_ty>()
                .expect("array type matches data_type");
            if typed.is_null(row) {
                ColumnData::$variant(None)
            } else {
                #[allow(clippy::redundant_closure_call)]
                ColumnData::$variant(Some(($map)(typed.value(row))))
            }
        }};
    }

    let value = match array.data_type() {
        DataType::Int8 => typed!(Int8Array, I16, |v: i8| v as i16),
        DataType::Int16 => typed!(Int16Array, I16, |v: i16| v),
        DataType::Int32 => typed!(Int32Array, I32, |v: i32| v),
        DataType::Int64 => typed!(Int64Array, I64, |v: i64| v),
        DataType::UInt8 => typed!(UInt8Array, U8, |v: u8| v),
        DataType::UInt16 => typed!(UInt16Array, I32, |v: u16| v as i32),
        DataType::UInt32 => typed!(UInt32Array, I64, |v: u32| v as i64),
        DataType::UInt64 => typed!(UInt64Array, I64, |v: u64| v as i64),
        DataType::Float32 => typed!(Float32Array, F32, |v: f32| v),
        DataType::Float64 => typed!(Float64Array, F64, |v: f64| v),
        DataType::Boolean => typed!(BooleanArray, Bit, |v: bool| v),
        DataType::Utf8 => typed!(StringArray, String, |v: &str| Cow::Owned(v.to_string())),
        DataType::LargeUtf8 => {
            typed!(LargeStringArray, String, |v: &str| Cow::Owned(v.to_string()))
        }
        DataType::Binary => typed!(BinaryArray, Binary, |v: &[u8]| Cow::Owned(v.to_vec())),
        DataType::Timestamp(unit, _) => {
            let datetime = timestamp_value(array, row, unit)?;
            match datetime {
                Some(dt) => dt.into_sql(),
                None => ColumnData::DateTime2(None),
            }
        }
        DataType::Date32 => {
            let typed = array
                .as_any()
                .downcast_ref::<Date32Array>()
                .expect("array type matches data_type");
            if typed.is_null(row) {
                ColumnData::Date(None)
            } else {
                let days = typed.value(row);
                match NaiveDate::from_num_days_from_ce_opt(UNIX_EPOCH_CE_DAYS + days) {
                    Some(date) => date.into_sql(),
                    None => ColumnData::Date(None),
                }
            }
        }
        other => {
            return Err(DbError::UnsupportedType {
                column: String::new(),
                data_type: other.to_string(),
            });
        }
    };
    Ok(value)
}

fn timestamp_value(
    array: &dyn Array,
    row: usize,
    unit: &TimeUnit,
) -> Result<Option<NaiveDateTime>, DbError> {
    let raw: Option<i64> = match unit {
        TimeUnit::Second => {
            let typed = array
                .as_any()
                .downcast_ref::<TimestampSecondArray>()
                .expect("second timestamps");
            (!typed.is_null(row)).then(|| typed.value(row) * 1_000_000)
        }
        TimeUnit::Millisecond => {
            let typed = array
                .as_any()
                .downcast_ref::<TimestampMillisecondArray>()
                .expect("millisecond timestamps");
            (!typed.is_null(row)).then(|| typed.value(row) * 1_000)
        }
        TimeUnit::Microsecond => {
            let typed = array
                .as_any()
                .downcast_ref::<TimestampMicrosecondArray>()
                .expect("microsecond timestamps");
            (!typed.is_null(row)).then(|| typed.value(row))
        }
        TimeUnit::Nanosecond => {
            let typed = array
                .as_any()
                .downcast_ref::<TimestampNanosecondArray>()
                .expect("nanosecond timestamps");
            (!typed.is_null(row)).then(|| typed.value(row) / 1_000)
        }
    };

    Ok(raw.and_then(|micros| DateTime::from_timestamp_micros(micros).map(|dt| dt.naive_utc())))
}
