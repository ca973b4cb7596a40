//! The framed protocol between the in-scope remote SQL client and the
//! out-of-scope SQL executor (spec §1: "a SQL executor: run statements on a
//! named remote node" is an external collaborator; this module is the
//! wire format the client speaks to reach it).
//!
//! A one-byte tag followed by a length-prefixed payload, decoded
//! incrementally from a `BytesMut` with `Ok(None)` on a partial frame.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

const TAG_EXEC: u8 = b'E';
const TAG_QUERY: u8 = b'Q';
const TAG_ACK: u8 = b'A';
const TAG_FAIL: u8 = b'F';
const TAG_ROWS: u8 = b'R';

/// A request the core sends to a worker's SQL executor.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlRequest {
    /// Run one statement in its own transaction.
    Exec(String),
    /// Run one query and return its result rows.
    Query(String),
}

/// A reply from the worker's SQL executor.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlResponse {
    Ack,
    Fail(String),
    Rows(Vec<Vec<String>>),
}

#[derive(Debug, Default)]
pub struct SqlRequestCodec;

impl Encoder<SqlRequest> for SqlRequestCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: SqlRequest, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let (tag, text) = match item {
            SqlRequest::Exec(s) => (TAG_EXEC, s),
            SqlRequest::Query(s) => (TAG_QUERY, s),
        };
        dst.put_u8(tag);
        dst.put_u32(text.len() as u32);
        dst.extend_from_slice(text.as_bytes());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct SqlResponseCodec {
    state: DecodeState,
}

#[derive(Debug, Default)]
enum DecodeState {
    #[default]
    AwaitingTag,
    AwaitingRowCount,
    AwaitingPayload {
        tag: u8,
        len: u32,
    },
    AwaitingRow {
        rows: Vec<Vec<String>>,
        remaining_rows: u32,
    },
    AwaitingColCount {
        rows: Vec<Vec<String>>,
        remaining_rows: u32,
    },
    AwaitingCol {
        rows: Vec<Vec<String>>,
        remaining_rows: u32,
        cols: Vec<String>,
        remaining_cols: u32,
        col_len: u32,
    },
}

impl Decoder for SqlResponseCodec {
    type Item = SqlResponse;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match &self.state {
                DecodeState::AwaitingRow { .. } => unreachable!(
                    "AwaitingRow is never constructed; row decoding goes through AwaitingColCount/AwaitingCol"
                ),
                DecodeState::AwaitingTag => {
                    if src.is_empty() {
                        return Ok(None);
                    }
                    let tag = src[0];
                    src.advance(1);
                    match tag {
                        TAG_ACK => return Ok(Some(SqlResponse::Ack)),
                        TAG_FAIL => {
                            self.state = DecodeState::AwaitingPayload { tag, len: u32::MAX };
                        }
                        TAG_ROWS => {
                            self.state = DecodeState::AwaitingRowCount;
                        }
                        other => {
                            return Err(std::io::Error::new(
                                std::io::ErrorKind::InvalidData,
                                format!("unknown sql response tag {other:#x}"),
                            ));
                        }
                    }
                }
                DecodeState::AwaitingPayload { tag, len } => {
                    let tag = *tag;
                    let len = if *len == u32::MAX {
                        if src.len() < 4 {
                            return Ok(None);
                        }
                        let len = (&src[..4]).get_u32();
                        src.advance(4);
                        len
                    } else {
                        *len
                    };
                    if src.len() < len as usize {
                        self.state = DecodeState::AwaitingPayload { tag, len };
                        return Ok(None);
                    }
                    let text = String::from_utf8_lossy(&src[..len as usize]).into_owned();
                    src.advance(len as usize);
                    self.state = DecodeState::AwaitingTag;
                    debug_assert_eq!(tag, TAG_FAIL);
                    return Ok(Some(SqlResponse::Fail(text)));
                }
                DecodeState::AwaitingRowCount => {
                    if src.len() < 4 {
                        return Ok(None);
                    }
                    let remaining_rows = (&src[..4]).get_u32();
                    src.advance(4);
                    if remaining_rows == 0 {
                        self.state = DecodeState::AwaitingTag;
                        return Ok(Some(SqlResponse::Rows(Vec::new())));
                    }
                    self.state = DecodeState::AwaitingColCount {
                        rows: Vec::new(),
                        remaining_rows,
                    };
                }
                DecodeState::AwaitingColCount { .. } => {
                    if src.len() < 4 {
                        return Ok(None);
                    }
                    let remaining_cols = (&src[..4]).get_u32();
                    src.advance(4);
                    let (rows, remaining_rows) = match std::mem::take(&mut self.state) {
                        DecodeState::AwaitingColCount { rows, remaining_rows } => (rows, remaining_rows),
                        _ => unreachable!(),
                    };
                    self.state = DecodeState::AwaitingCol {
                        rows,
                        remaining_rows,
                        cols: Vec::new(),
                        remaining_cols,
                        col_len: u32::MAX,
                    };
                }
                DecodeState::AwaitingCol { col_len, .. } => {
                    let col_len = *col_len;
                    let col_len = if col_len == u32::MAX {
                        if src.len() < 4 {
                            return Ok(None);
                        }
                        let l = (&src[..4]).get_u32();
                        src.advance(4);
                        l
                    } else {
                        col_len
                    };
                    if src.len() < col_len as usize {
                        if let DecodeState::AwaitingCol { col_len: slot, .. } = &mut self.state {
                            *slot = col_len;
                        }
                        return Ok(None);
                    }
                    let value = String::from_utf8_lossy(&src[..col_len as usize]).into_owned();
                    src.advance(col_len as usize);

                    let (mut rows, remaining_rows, mut cols, remaining_cols) = match std::mem::take(&mut self.state) {
                        DecodeState::AwaitingCol {
                            rows,
                            remaining_rows,
                            cols,
                            remaining_cols,
                            ..
                        } => (rows, remaining_rows, cols, remaining_cols),
                        _ => unreachable!(),
                    };
                    cols.push(value);
                    let remaining_cols = remaining_cols - 1;

                    if remaining_cols == 0 {
                        rows.push(cols);
                        let remaining_rows = remaining_rows - 1;
                        if remaining_rows == 0 {
                            self.state = DecodeState::AwaitingTag;
                            return Ok(Some(SqlResponse::Rows(rows)));
                        }
                        self.state = DecodeState::AwaitingColCount { rows, remaining_rows };
                    } else {
                        self.state = DecodeState::AwaitingCol {
                            rows,
                            remaining_rows,
                            cols,
                            remaining_cols,
                            col_len: u32::MAX,
                        };
                    }
                }
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct SqlRequestServerCodec;

impl Decoder for SqlRequestServerCodec {
    type Item = SqlRequest;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 5 {
            return Ok(None);
        }
        let tag = src[0];
        let len = (&src[1..5]).get_u32() as usize;
        if src.len() < 5 + len {
            return Ok(None);
        }
        src.advance(5);
        let text = String::from_utf8_lossy(&src[..len]).into_owned();
        src.advance(len);
        match tag {
            TAG_EXEC => Ok(Some(SqlRequest::Exec(text))),
            TAG_QUERY => Ok(Some(SqlRequest::Query(text))),
            other => Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unknown sql request tag {other:#x}"),
            )),
        }
    }
}

impl Encoder<SqlResponse> for SqlResponseCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: SqlResponse, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            SqlResponse::Ack => dst.put_u8(TAG_ACK),
            SqlResponse::Fail(msg) => {
                dst.put_u8(TAG_FAIL);
                dst.put_u32(msg.len() as u32);
                dst.extend_from_slice(msg.as_bytes());
            }
            SqlResponse::Rows(rows) => {
                dst.put_u8(TAG_ROWS);
                dst.put_u32(rows.len() as u32);
                for row in rows {
                    dst.put_u32(row.len() as u32);
                    for col in row {
                        dst.put_u32(col.len() as u32);
                        dst.extend_from_slice(col.as_bytes());
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exec_request_round_trips() {
        let mut buf = BytesMut::new();
        SqlRequestCodec
            .encode(SqlRequest::Exec("drop table if exists t".into()), &mut buf)
            .unwrap();
        let decoded = SqlRequestServerCodec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, SqlRequest::Exec("drop table if exists t".into()));
        assert!(buf.is_empty());
    }

    #[test]
    fn ack_round_trips() {
        let mut buf = BytesMut::new();
        SqlResponseCodec::default().encode(SqlResponse::Ack, &mut buf).unwrap();
        let decoded = SqlResponseCodec::default().decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, SqlResponse::Ack);
    }

    #[test]
    fn fail_round_trips() {
        let mut buf = BytesMut::new();
        SqlResponseCodec::default()
            .encode(SqlResponse::Fail("slot already exists".into()), &mut buf)
            .unwrap();
        let decoded = SqlResponseCodec::default().decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, SqlResponse::Fail("slot already exists".into()));
    }

    #[test]
    fn rows_round_trip() {
        let mut buf = BytesMut::new();
        let rows = vec![
            vec!["ready".to_string(), "0/16B3748".to_string()],
            vec!["init".to_string(), "0/0".to_string()],
        ];
        SqlResponseCodec::default()
            .encode(SqlResponse::Rows(rows.clone()), &mut buf)
            .unwrap();
        let decoded = SqlResponseCodec::default().decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, SqlResponse::Rows(rows));
    }

    #[test]
    fn empty_rows_round_trip() {
        let mut buf = BytesMut::new();
        SqlResponseCodec::default()
            .encode(SqlResponse::Rows(Vec::new()), &mut buf)
            .unwrap();
        let decoded = SqlResponseCodec::default().decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, SqlResponse::Rows(Vec::new()));
    }

    #[test]
    fn decode_returns_none_on_partial_frame() {
        let mut full = BytesMut::new();
        SqlResponseCodec::default()
            .encode(SqlResponse::Fail("x".repeat(10)), &mut full)
            .unwrap();
        let mut partial = full.split_to(3);
        let mut codec = SqlResponseCodec::default();
        assert_eq!(codec.decode(&mut partial).unwrap(), None);
        partial.unsplit(full);
        assert!(codec.decode(&mut partial).unwrap().is_some());
    }
}
