//! Decoding of the TDengine REST response body

use serde::Deserialize;
use serde_json::Value;
use taospipe_core::{Row, StoreError};

/// Body returned by `POST /rest/sql`.
///
/// ```json
/// {"code":0,"column_meta":[["ts","TIMESTAMP",8],["v","INT",4]],"data":[["2024-01-01T00:00:00.000Z",1]],"rows":1}
/// {"code":9730,"desc":"Table does not exist"}
/// ```
#[derive(Debug, Deserialize)]
pub struct SqlResponse {
    pub code: i64,
    #[serde(default)]
    pub desc: Option<String>,
    /// `[name, type, length]` per column
    #[serde(default)]
    pub column_meta: Vec<Vec<Value>>,
    #[serde(default)]
    pub data: Vec<Vec<Value>>,
    #[serde(default)]
    pub rows: u64,
}

impl SqlResponse {
    pub fn parse(body: &str) -> Result<Self, StoreError> {
        serde_json::from_str(body).map_err(|e| StoreError::Decode(format!("{e}: {}", snippet(body))))
    }

    /// Turn a non-zero `code` into [`StoreError::Server`].
    pub fn into_result(self) -> Result<Self, StoreError> {
        if self.code == 0 {
            Ok(self)
        } else {
            Err(StoreError::Server {
                code: self.code,
                message: self.desc.unwrap_or_default(),
            })
        }
    }

    pub fn column_names(&self) -> Vec<String> {
        self.column_meta
            .iter()
            .enumerate()
            .map(|(i, meta)| match meta.first() {
                Some(Value::String(name)) => name.clone(),
                _ => format!("col{i}"),
            })
            .collect()
    }

    /// Rows written by an `INSERT`.
    ///
    /// Writes answer with a single `affected_rows` column; anything else
    /// falls back to the `rows` count.
    pub fn affected_rows(&self) -> u64 {
        let single_affected = self.column_meta.len() == 1
            && matches!(self.column_meta[0].first(), Some(Value::String(n)) if n == "affected_rows");
        if single_affected {
            if let Some(n) = self.data.first().and_then(|r| r.first()).and_then(Value::as_u64) {
                return n;
            }
        }
        self.rows
    }

    /// Zip column labels with every data row.
    pub fn into_rows(self) -> Vec<Row> {
        let names = self.column_names();
        self.data
            .into_iter()
            .map(|values| {
                names
                    .iter()
                    .cloned()
                    .zip(values.into_iter().chain(std::iter::repeat(Value::Null)))
                    .collect()
            })
            .collect()
    }
}

/// First 200 bytes of a body for error messages
fn snippet(body: &str) -> &str {
    let mut end = body.len().min(200);
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_response_affected_rows() {
        let resp = SqlResponse::parse(
            r#"{"code":0,"column_meta":[["affected_rows","INT",4]],"data":[[42]],"rows":1}"#,
        )
        .unwrap()
        .into_result()
        .unwrap();
        assert_eq!(resp.affected_rows(), 42);
    }

    #[test]
    fn non_insert_falls_back_to_rows() {
        let resp = SqlResponse::parse(
            r#"{"code":0,"column_meta":[["a","INT",4],["b","INT",4]],"data":[[1,2],[3,4]],"rows":2}"#,
        )
        .unwrap();
        assert_eq!(resp.affected_rows(), 2);
    }

    #[test]
    fn query_rows_zip_columns() {
        let resp = SqlResponse::parse(
            r#"{"code":0,"column_meta":[["ts","TIMESTAMP",8],["v","INT",4],["s","VARCHAR",16]],
                "data":[["2023-01-01T00:00:01.000Z",1,"x"],["2023-01-01T00:00:02.000Z",null,"y"]],"rows":2}"#,
        )
        .unwrap();
        let rows = resp.into_rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["v"], 1);
        assert_eq!(rows[1]["v"], Value::Null);
        assert_eq!(rows[1]["s"], "y");
    }

    #[test]
    fn short_data_row_padded_with_null() {
        let resp = SqlResponse::parse(
            r#"{"code":0,"column_meta":[["a","INT",4],["b","INT",4]],"data":[[1]],"rows":1}"#,
        )
        .unwrap();
        let rows = resp.into_rows();
        assert_eq!(rows[0]["b"], Value::Null);
    }

    #[test]
    fn error_code_becomes_server_error() {
        let err = SqlResponse::parse(r#"{"code":9730,"desc":"Table does not exist"}"#)
            .unwrap()
            .into_result()
            .unwrap_err();
        match err {
            StoreError::Server { code, message } => {
                assert_eq!(code, 9730);
                assert_eq!(message, "Table does not exist");
            }
            other => panic!("unexpected {other}"),
        }
    }

    #[test]
    fn garbage_is_decode_error() {
        let err = SqlResponse::parse("<html>502</html>").unwrap_err();
        assert!(matches!(err, StoreError::Decode(_)));
        assert!(err.to_string().contains("<html>"));
    }

    #[test]
    fn unnamed_columns_get_positional_names() {
        let resp = SqlResponse::parse(r#"{"code":0,"column_meta":[[]],"data":[[5]],"rows":1}"#)
            .unwrap();
        assert_eq!(resp.column_names(), vec!["col0".to_string()]);
    }
}
