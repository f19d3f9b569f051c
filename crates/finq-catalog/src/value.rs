//! DuckDB value conversion

use duckdb::types::ValueRef;
use duckdb::Row;

/// Convert one DuckDB cell to a JSON value.
pub fn value_to_json(row: &Row, idx: usize) -> Result<serde_json::Value, duckdb::Error> {
    let value = match row.get_ref(idx)? {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Boolean(b) => serde_json::Value::Bool(b),
        ValueRef::TinyInt(i) => serde_json::json!(i),
        ValueRef::SmallInt(i) => serde_json::json!(i),
        ValueRef::Int(i) => serde_json::json!(i),
        ValueRef::BigInt(i) => serde_json::json!(i),
        ValueRef::HugeInt(i) => serde_json::json!(i),
        ValueRef::UTinyInt(i) => serde_json::json!(i),
        ValueRef::USmallInt(i) => serde_json::json!(i),
        ValueRef::UInt(i) => serde_json::json!(i),
        ValueRef::UBigInt(i) => serde_json::json!(i),
        ValueRef::Float(f) => serde_json::json!(f),
        ValueRef::Double(f) => serde_json::json!(f),
        ValueRef::Text(s) => {
            serde_json::Value::String(String::from_utf8_lossy(s).to_string())
        }
        ValueRef::Blob(b) => serde_json::Value::String(format!("<blob {} bytes>", b.len())),
        _ => serde_json::Value::String("<unsupported>".to_string()),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use duckdb::Connection;

    #[test]
    fn test_value_conversion_covers_common_types() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE t (b BOOLEAN, i BIGINT, f DOUBLE, s VARCHAR, n VARCHAR);
             INSERT INTO t VALUES (true, 42, 1.5, 'hello', NULL);",
        )
        .unwrap();

        let mut stmt = conn.prepare("SELECT * FROM t").unwrap();
        let values: Vec<serde_json::Value> = stmt
            .query_row([], |row| {
                Ok((0..5)
                    .map(|i| value_to_json(row, i).unwrap())
                    .collect::<Vec<_>>())
            })
            .unwrap();

        assert_eq!(values[0], serde_json::json!(true));
        assert_eq!(values[1], serde_json::json!(42));
        assert_eq!(values[2], serde_json::json!(1.5));
        assert_eq!(values[3], serde_json::json!("hello"));
        assert_eq!(values[4], serde_json::Value::Null);
    }
}
