//! Streaming `COPY ... FROM STDIN` into staging tables
//!
//! Rows are encoded in PostgreSQL's text COPY format and shipped in
//! bounded chunks, so a batch is never materialized in memory.

use crate::error::{HybridError, HybridResult};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::PgConnection;
use std::fmt::Write as _;

/// Bytes buffered before a chunk is sent
pub const COPY_CHUNK_BYTES: usize = 64 * 1024;

/// Row buffer in text COPY format
#[derive(Debug, Default)]
pub struct CopyBuffer {
    buf: String,
    in_row: bool,
}

impl CopyBuffer {
    /// Empty buffer with room for one chunk
    pub fn new() -> Self {
        Self {
            buf: String::with_capacity(COPY_CHUNK_BYTES),
            in_row: false,
        }
    }

    fn delimit(&mut self) {
        if self.in_row {
            self.buf.push('\t');
        }
        self.in_row = true;
    }

    /// Append a text column, escaping COPY metacharacters
    pub fn text(&mut self, value: &str) -> &mut Self {
        self.delimit();
        for c in value.chars() {
            match c {
                '\\' => self.buf.push_str("\\\\"),
                '\t' => self.buf.push_str("\\t"),
                '\n' => self.buf.push_str("\\n"),
                '\r' => self.buf.push_str("\\r"),
                other => self.buf.push(other),
            }
        }
        self
    }

    /// Append a bigint column
    pub fn int(&mut self, value: i64) -> &mut Self {
        self.delimit();
        let _ = write!(self.buf, "{value}");
        self
    }

    /// Append a double precision column
    pub fn float(&mut self, value: f64) -> &mut Self {
        self.delimit();
        if value.is_nan() {
            self.buf.push_str("NaN");
        } else if value.is_infinite() {
            self.buf
                .push_str(if value > 0.0 { "Infinity" } else { "-Infinity" });
        } else {
            let _ = write!(self.buf, "{value}");
        }
        self
    }

    /// Append a timestamptz column (microsecond precision, UTC)
    pub fn timestamp(&mut self, value: DateTime<Utc>) -> &mut Self {
        self.delimit();
        self.buf
            .push_str(&value.to_rfc3339_opts(SecondsFormat::Micros, true));
        self
    }

    /// Terminate the current row
    pub fn end_row(&mut self) {
        self.buf.push('\n');
        self.in_row = false;
    }

    /// Buffered bytes
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Buffered rows as text
    pub fn as_str(&self) -> &str {
        &self.buf
    }

    fn clear(&mut self) {
        self.buf.clear();
        self.in_row = false;
    }
}

/// Stream `rows` through `statement` (a `COPY ... FROM STDIN`), encoding each with `encode`
///
/// An encoding error aborts the COPY, which fails the surrounding
/// transaction. Returns the number of rows the server accepted.
pub async fn copy_rows<I, F>(
    conn: &mut PgConnection,
    statement: &str,
    rows: I,
    mut encode: F,
) -> HybridResult<u64>
where
    I: Iterator,
    F: FnMut(&mut CopyBuffer, I::Item) -> HybridResult<()>,
{
    let mut copy = conn
        .copy_in_raw(statement)
        .await
        .map_err(|e| HybridError::transaction("copy start", e))?;
    let mut buffer = CopyBuffer::new();

    for row in rows {
        if let Err(err) = encode(&mut buffer, row) {
            let _ = copy.abort(err.to_string()).await;
            return Err(err);
        }
        buffer.end_row();
        if buffer.len() >= COPY_CHUNK_BYTES {
            copy.send(buffer.as_str().as_bytes())
                .await
                .map_err(|e| HybridError::transaction("copy send", e))?;
            buffer.clear();
        }
    }

    if !buffer.is_empty() {
        copy.send(buffer.as_str().as_bytes())
            .await
            .map_err(|e| HybridError::transaction("copy send", e))?;
    }

    copy.finish()
        .await
        .map_err(|e| HybridError::transaction("copy finish", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_row_encoding() {
        let mut buf = CopyBuffer::new();
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        buf.timestamp(t).int(42).float(70.1);
        buf.end_row();
        assert_eq!(buf.as_str(), "2024-03-01T12:00:00.000000Z\t42\t70.1\n");
    }

    #[test]
    fn test_text_escaping() {
        let mut buf = CopyBuffer::new();
        buf.text("\"line1\nline2\"").text("a\tb\\c");
        buf.end_row();
        assert_eq!(buf.as_str(), "\"line1\\nline2\"\ta\\tb\\\\c\n");
    }

    #[test]
    fn test_special_floats() {
        let mut buf = CopyBuffer::new();
        buf.float(f64::NAN)
            .float(f64::INFINITY)
            .float(f64::NEG_INFINITY)
            .float(-0.5);
        buf.end_row();
        assert_eq!(buf.as_str(), "NaN\tInfinity\t-Infinity\t-0.5\n");
    }

    #[test]
    fn test_rows_are_independent() {
        let mut buf = CopyBuffer::new();
        buf.int(1);
        buf.end_row();
        buf.int(2).int(3);
        buf.end_row();
        assert_eq!(buf.as_str(), "1\n2\t3\n");
        assert_eq!(buf.len(), 6);
    }
}
