//! Bulk load through `COPY … FROM STDIN` in text format.

use crate::builder::{qualified_table, quote_ident};
use crate::error::{DbError, DbResult};
use crate::rows::Rows;
use crate::value::Value;

use super::Driver;

/// Flush to the server once the buffer grows past this.
const CHUNK_SIZE: usize = 64 * 1024;

fn push_escaped(buf: &mut Vec<u8>, s: &str) {
    for c in s.bytes() {
        match c {
            b'\\' => buf.extend_from_slice(b"\\\\"),
            b'\t' => buf.extend_from_slice(b"\\t"),
            b'\n' => buf.extend_from_slice(b"\\n"),
            b'\r' => buf.extend_from_slice(b"\\r"),
            _ => buf.push(c),
        }
    }
}

fn push_float(buf: &mut Vec<u8>, f: f64, finite: String) {
    let text = if f.is_nan() {
        "NaN".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else {
        finite
    };
    buf.extend_from_slice(text.as_bytes());
}

/// Encode one value in COPY text format.
///
/// - NULL: `\N`
/// - Boolean: `t` or `f`
/// - Float: digits, or `NaN` / `Infinity` / `-Infinity`
/// - Everything else: its text form with `\\`, `\t`, `\n`, `\r` escaped
pub(crate) fn encode_copy_value(buf: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Null => buf.extend_from_slice(b"\\N"),
        Value::Bool(b) => buf.push(if *b { b't' } else { b'f' }),
        Value::Real(f) => push_float(buf, f64::from(*f), f.to_string()),
        Value::Double(f) => push_float(buf, *f, f.to_string()),
        other => push_escaped(buf, &other.to_string()),
    }
}

/// Encode every tuple of `rows` as tab-separated, newline-terminated lines.
pub fn encode_copy_text(rows: &Rows) -> Vec<u8> {
    let mut buf = Vec::new();
    for tuple in &rows.values {
        encode_tuple(&mut buf, tuple);
    }
    buf
}

fn encode_tuple(buf: &mut Vec<u8>, tuple: &[Value]) {
    for (i, value) in tuple.iter().enumerate() {
        if i > 0 {
            buf.push(b'\t');
        }
        encode_copy_value(buf, value);
    }
    buf.push(b'\n');
}

pub(crate) fn copy_statement(rows: &Rows) -> String {
    let columns: Vec<String> = rows.fields.iter().map(|f| quote_ident(&f.name)).collect();
    format!(
        "COPY {} ({}) FROM STDIN",
        qualified_table(rows.schema_or_default(), &rows.table_name),
        columns.join(", ")
    )
}

impl Driver {
    /// Bulk-load every tuple of `rows` into its table, bypassing per-row INSERT.
    pub async fn copy(&self, rows: &Rows) -> DbResult<u64> {
        rows.validate()?;
        if rows.is_empty() {
            return Ok(0);
        }
        let statement = copy_statement(rows);
        tracing::debug!("copy: {} ({} rows)", statement, rows.len());

        let mut conn = self.acquire().await?;
        let mut copy = conn.copy_in_raw(&statement).await.map_err(DbError::Execution)?;

        let mut buf = Vec::with_capacity(CHUNK_SIZE);
        for tuple in &rows.values {
            encode_tuple(&mut buf, tuple);
            if buf.len() >= CHUNK_SIZE {
                let chunk = std::mem::replace(&mut buf, Vec::with_capacity(CHUNK_SIZE));
                if let Err(e) = copy.send(chunk).await.map(|_| ()) {
                    let _ = copy.abort(e.to_string()).await;
                    return Err(DbError::Execution(e));
                }
            }
        }
        if !buf.is_empty() {
            if let Err(e) = copy.send(buf).await.map(|_| ()) {
                let _ = copy.abort(e.to_string()).await;
                return Err(DbError::Execution(e));
            }
        }
        let count = copy.finish().await.map_err(DbError::Execution)?;
        tracing::debug!("copy: {} rows loaded into '{}'", count, rows.table_name);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Datatype, Field};
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_copy_text() {
        let ts = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(3, 4, 5)
            .unwrap();
        let rows = Rows::new("events")
            .field(Field::new("Time", Datatype::Timestamp))
            .field(Field::new("note", Datatype::Text))
            .field(Field::new("v", Datatype::Double))
            .field(Field::new("ok", Datatype::Boolean))
            .row(vec![ts.into(), "a\tb\\c\nd".into(), f64::NAN.into(), true.into()])
            .row(vec![ts.into(), Value::Null, f64::NEG_INFINITY.into(), false.into()])
            .row(vec![ts.into(), "plain".into(), 2.5f64.into(), Value::Null]);
        let text = String::from_utf8(encode_copy_text(&rows)).unwrap();
        assert_eq!(
            text,
            "2024-01-02 03:04:05.000000\ta\\tb\\\\c\\nd\tNaN\tt\n\
             2024-01-02 03:04:05.000000\t\\N\t-Infinity\tf\n\
             2024-01-02 03:04:05.000000\tplain\t2.5\t\\N\n"
        );
    }

    #[test]
    fn test_copy_bytea() {
        let mut buf = Vec::new();
        encode_copy_value(&mut buf, &Value::Bytes(vec![0x01, 0xff]));
        assert_eq!(buf, b"\\\\x01ff");
    }

    #[test]
    fn test_copy_statement() {
        let rows = Rows::new("readings")
            .schema("metrics")
            .field(Field::new("Time", Datatype::Timestamp))
            .field(Field::new("temp", Datatype::Double));
        assert_eq!(
            copy_statement(&rows),
            "COPY \"metrics\".\"readings\" (\"Time\", \"temp\") FROM STDIN"
        );
    }
}
