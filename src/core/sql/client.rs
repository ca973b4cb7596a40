//! `RemoteSqlClient` (spec §4.1): one non-blocking session per (task,
//! node), driving connect, statement-batch execution (one SQL statement
//! per round trip — each its own remote transaction, per spec §4.1/§9
//! "SQL batch semantics"), and row queries as incremental `poll()` calls.
//!
//! Non-blocking read/write handling (`WouldBlock` loops, partial-write
//! buffering) is grounded in
//! `kimberlitedb-kimberlite/crates/kimberlite-server/src/connection.rs`'s
//! `Connection::read`/`Connection::write`.

use crate::core::errors::ShardlordError;
use crate::core::node::NodeId;
use crate::core::sql::wire::{SqlRequest, SqlRequestCodec, SqlResponse, SqlResponseCodec};
use bytes::{Buf, BytesMut};
use mio::net::TcpStream as MioTcpStream;
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::codec::{Decoder, Encoder};

/// Issued once per session, right after the TCP handshake completes and
/// before any caller-visible statement runs (spec §4.1): disables
/// synchronous-replication waits for this session's own writes, so the
/// control statements the core issues are never themselves blocked by the
/// replication topology they are in the middle of reconfiguring.
const SESSION_INIT_SQL: &str = "set synchronous_commit = local";

/// Whether a connection attempt completed or is still in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Ready,
    Pending,
}

/// The result of one `poll()` call.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlOutcome {
    /// No terminal event yet; call `poll()` again once the registered
    /// socket is next ready.
    InProgress,
    /// The in-flight exec batch completed.
    Done,
    /// The in-flight query returned its result rows.
    Rows(Vec<Vec<String>>),
}

/// The seam the CP state machine programs against, so its step functions
/// can be exercised against a scripted fake without a real socket.
pub trait SqlSession {
    fn ensure_connected(&mut self) -> Result<Progress, ShardlordError>;
    /// Splits `sql` on `;` and runs each statement as its own transaction,
    /// in order, aborting the whole batch on the first failure.
    fn start_exec_batch(&mut self, sql: &str) -> Result<(), ShardlordError>;
    fn start_query(&mut self, sql: &str) -> Result<(), ShardlordError>;
    fn poll(&mut self) -> Result<SqlOutcome, ShardlordError>;
    fn is_connected(&self) -> bool;
    fn close(&mut self);

    /// The socket to register with the readiness multiplexer, if a
    /// connection currently exists. Fakes used in tests never register
    /// with a real multiplexer, so the default is `None`.
    fn registrable_socket(&mut self) -> Option<&mut dyn mio::event::Source> {
        None
    }
}

enum Pending {
    None,
    SessionInit,
    Batch(VecDeque<String>),
    Query,
}

struct Conn {
    stream: MioTcpStream,
    established: bool,
    /// Set once the session-init directive has been acknowledged. Distinct
    /// from `established`, which only means the TCP handshake finished.
    session_ready: bool,
    write_buf: BytesMut,
    read_buf: BytesMut,
    req_codec: SqlRequestCodec,
    resp_codec: SqlResponseCodec,
}

impl Conn {
    fn new(stream: MioTcpStream) -> Self {
        Self {
            stream,
            established: false,
            session_ready: false,
            write_buf: BytesMut::new(),
            read_buf: BytesMut::new(),
            req_codec: SqlRequestCodec,
            resp_codec: SqlResponseCodec::default(),
        }
    }
}

pub struct RemoteSqlClient {
    node: NodeId,
    addr: SocketAddr,
    conn: Option<Conn>,
    pending: Pending,
}

impl RemoteSqlClient {
    pub fn new(node: NodeId, addr: SocketAddr) -> Self {
        Self {
            node,
            addr,
            conn: None,
            pending: Pending::None,
        }
    }

    fn io_err(&self, e: std::io::Error) -> ShardlordError {
        ShardlordError::Io {
            node: self.node,
            source: Arc::new(e),
        }
    }

    fn queue_request(&mut self, req: SqlRequest) -> Result<(), ShardlordError> {
        let node = self.node;
        let conn = self.conn.as_mut().ok_or(ShardlordError::NotConnected(node))?;
        conn.req_codec
            .encode(req, &mut conn.write_buf)
            .map_err(|e| ShardlordError::Io { node, source: Arc::new(e) })?;
        match self.try_flush() {
            Ok(_) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Returns `Ok(true)` once `write_buf` is fully drained, `Ok(false)`
    /// if the socket would block with bytes still queued.
    fn try_flush(&mut self) -> Result<bool, ShardlordError> {
        let node = self.node;
        let conn = self.conn.as_mut().ok_or(ShardlordError::NotConnected(node))?;
        while !conn.write_buf.is_empty() {
            match conn.stream.write(&conn.write_buf) {
                Ok(0) => {
                    let err = ShardlordError::Io {
                        node,
                        source: Arc::new(std::io::Error::new(
                            std::io::ErrorKind::WriteZero,
                            "connection closed while flushing",
                        )),
                    };
                    self.conn = None;
                    return Err(err);
                }
                Ok(n) => conn.write_buf.advance(n),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    let err = self.io_err(e);
                    self.conn = None;
                    return Err(err);
                }
            }
        }
        Ok(true)
    }

    /// Sends [`SESSION_INIT_SQL`] and waits for its ack. Mirrors `poll()`'s
    /// queue/flush/read/decode shape but is driven from `ensure_connected`,
    /// before any caller-visible batch or query exists.
    fn drive_session_init(&mut self) -> Result<Progress, ShardlordError> {
        if !matches!(self.pending, Pending::SessionInit) {
            self.pending = Pending::SessionInit;
            self.queue_request(SqlRequest::Exec(SESSION_INIT_SQL.to_string()))?;
            return Ok(Progress::Pending);
        }
        if !self.try_flush()? {
            return Ok(Progress::Pending);
        }
        self.try_read()?;
        let node = self.node;
        let conn = self.conn.as_mut().ok_or(ShardlordError::NotConnected(node))?;
        let decoded = conn
            .resp_codec
            .decode(&mut conn.read_buf)
            .map_err(|e| ShardlordError::Io { node, source: Arc::new(e) })?;
        let Some(resp) = decoded else {
            return Ok(Progress::Pending);
        };
        match resp {
            SqlResponse::Ack => {
                self.pending = Pending::None;
                self.conn.as_mut().expect("checked above").session_ready = true;
                Ok(Progress::Ready)
            }
            SqlResponse::Fail(msg) => {
                self.pending = Pending::None;
                self.conn = None;
                Err(ShardlordError::Sql { node, message: msg })
            }
            SqlResponse::Rows(_) => Err(ShardlordError::Sql {
                node,
                message: "protocol violation: expected ack for session init, got rows".into(),
            }),
        }
    }

    fn try_read(&mut self) -> Result<(), ShardlordError> {
        let node = self.node;
        let conn = self.conn.as_mut().ok_or(ShardlordError::NotConnected(node))?;
        let mut buf = [0u8; 4096];
        loop {
            match conn.stream.read(&mut buf) {
                Ok(0) => {
                    let err = ShardlordError::Io {
                        node,
                        source: Arc::new(std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            "connection closed by peer",
                        )),
                    };
                    self.conn = None;
                    return Err(err);
                }
                Ok(n) => conn.read_buf.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    let err = self.io_err(e);
                    self.conn = None;
                    return Err(err);
                }
            }
        }
    }
}

impl SqlSession for RemoteSqlClient {
    /// Drives the TCP handshake, then the session-init directive, to
    /// completion. A session only reaches `Ready` once both have finished:
    /// no statement the caller issues afterwards can land before the
    /// directive has been acknowledged by the remote executor.
    fn ensure_connected(&mut self) -> Result<Progress, ShardlordError> {
        if self.conn.is_none() {
            let stream = MioTcpStream::connect(self.addr).map_err(|e| self.io_err(e))?;
            self.conn = Some(Conn::new(stream));
            return Ok(Progress::Pending);
        }

        let established = self.conn.as_ref().expect("checked above").established;
        if !established {
            let conn = self.conn.as_mut().expect("checked above");
            return match conn.stream.take_error() {
                Ok(None) => {
                    conn.established = true;
                    Ok(Progress::Pending)
                }
                Ok(Some(e)) => {
                    let err = self.io_err(e);
                    self.conn = None;
                    Err(err)
                }
                Err(e) => {
                    let err = self.io_err(e);
                    self.conn = None;
                    Err(err)
                }
            };
        }

        if self.conn.as_ref().expect("checked above").session_ready {
            return Ok(Progress::Ready);
        }

        self.drive_session_init()
    }

    fn start_exec_batch(&mut self, sql: &str) -> Result<(), ShardlordError> {
        let mut statements: VecDeque<String> = sql
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        match statements.pop_front() {
            Some(first) => {
                self.pending = Pending::Batch(statements);
                self.queue_request(SqlRequest::Exec(first))
            }
            None => {
                self.pending = Pending::None;
                Ok(())
            }
        }
    }

    fn start_query(&mut self, sql: &str) -> Result<(), ShardlordError> {
        self.pending = Pending::Query;
        self.queue_request(SqlRequest::Query(sql.to_string()))
    }

    fn poll(&mut self) -> Result<SqlOutcome, ShardlordError> {
        match self.ensure_connected()? {
            Progress::Pending => return Ok(SqlOutcome::InProgress),
            Progress::Ready => {}
        }
        if !self.try_flush()? {
            return Ok(SqlOutcome::InProgress);
        }
        self.try_read()?;
        let node = self.node;
        let conn = self.conn.as_mut().ok_or(ShardlordError::NotConnected(node))?;
        let decoded = conn
            .resp_codec
            .decode(&mut conn.read_buf)
            .map_err(|e| ShardlordError::Io { node, source: Arc::new(e) })?;
        let Some(resp) = decoded else {
            return Ok(SqlOutcome::InProgress);
        };
        match resp {
            SqlResponse::Fail(msg) => {
                self.pending = Pending::None;
                self.conn = None;
                Err(ShardlordError::Sql { node, message: msg })
            }
            SqlResponse::Ack => match std::mem::replace(&mut self.pending, Pending::None) {
                Pending::Batch(mut queue) => match queue.pop_front() {
                    Some(stmt) => {
                        self.pending = Pending::Batch(queue);
                        self.queue_request(SqlRequest::Exec(stmt))?;
                        Ok(SqlOutcome::InProgress)
                    }
                    None => Ok(SqlOutcome::Done),
                },
                Pending::Query => Err(ShardlordError::Sql {
                    node,
                    message: "protocol violation: expected rows, got ack".into(),
                }),
                Pending::None => Ok(SqlOutcome::Done),
                Pending::SessionInit => unreachable!(
                    "session init is driven to completion in ensure_connected before poll() observes an Ack"
                ),
            },
            SqlResponse::Rows(rows) => {
                self.pending = Pending::None;
                Ok(SqlOutcome::Rows(rows))
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.conn.as_ref().is_some_and(|c| c.established)
    }

    fn close(&mut self) {
        self.conn = None;
        self.pending = Pending::None;
    }

    fn registrable_socket(&mut self) -> Option<&mut dyn mio::event::Source> {
        self.conn
            .as_mut()
            .map(|c| &mut c.stream as &mut dyn mio::event::Source)
    }
}

#[cfg(test)]
pub mod fake {
    //! A scripted, in-process stand-in for [`SqlSession`] so the CP state
    //! machine and task handlers can be tested without a real socket.

    use super::{Progress, SqlOutcome, SqlSession};
    use crate::core::errors::ShardlordError;
    use std::collections::VecDeque;

    #[derive(Clone)]
    pub enum Step {
        Connect(Result<Progress, ShardlordError>),
        StartBatch(Result<(), ShardlordError>),
        StartQuery(Result<(), ShardlordError>),
        Poll(Result<SqlOutcome, ShardlordError>),
    }

    #[derive(Default)]
    pub struct ScriptedSession {
        steps: VecDeque<Step>,
        connected: bool,
    }

    impl ScriptedSession {
        pub fn new(steps: Vec<Step>) -> Self {
            Self {
                steps: steps.into(),
                connected: false,
            }
        }

        pub fn is_exhausted(&self) -> bool {
            self.steps.is_empty()
        }
    }

    impl SqlSession for ScriptedSession {
        fn ensure_connected(&mut self) -> Result<Progress, ShardlordError> {
            match self.steps.pop_front() {
                Some(Step::Connect(r)) => {
                    if r == Ok(Progress::Ready) {
                        self.connected = true;
                    }
                    r
                }
                Some(_) => panic!("scripted session: expected ensure_connected call"),
                None => panic!("scripted session: script exhausted on ensure_connected"),
            }
        }

        fn start_exec_batch(&mut self, _sql: &str) -> Result<(), ShardlordError> {
            match self.steps.pop_front() {
                Some(Step::StartBatch(r)) => r,
                Some(_) => panic!("scripted session: expected start_exec_batch call"),
                None => panic!("scripted session: script exhausted on start_exec_batch"),
            }
        }

        fn start_query(&mut self, _sql: &str) -> Result<(), ShardlordError> {
            match self.steps.pop_front() {
                Some(Step::StartQuery(r)) => r,
                Some(_) => panic!("scripted session: expected start_query call"),
                None => panic!("scripted session: script exhausted on start_query"),
            }
        }

        fn poll(&mut self) -> Result<SqlOutcome, ShardlordError> {
            match self.steps.pop_front() {
                Some(Step::Poll(r)) => r,
                Some(_) => panic!("scripted session: expected poll call"),
                None => panic!("scripted session: script exhausted on poll"),
            }
        }

        fn is_connected(&self) -> bool {
            self.connected
        }

        fn close(&mut self) {
            self.connected = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::{ScriptedSession, Step};
    use super::*;

    #[test]
    fn scripted_session_drives_a_batch_to_completion() {
        let mut session = ScriptedSession::new(vec![
            Step::Connect(Ok(Progress::Ready)),
            Step::StartBatch(Ok(())),
            Step::Poll(Ok(SqlOutcome::InProgress)),
            Step::Poll(Ok(SqlOutcome::Done)),
        ]);
        assert_eq!(session.ensure_connected().unwrap(), Progress::Ready);
        session.start_exec_batch("drop table if exists t").unwrap();
        assert_eq!(session.poll().unwrap(), SqlOutcome::InProgress);
        assert_eq!(session.poll().unwrap(), SqlOutcome::Done);
        assert!(session.is_exhausted());
    }

    #[test]
    fn scripted_session_surfaces_sql_failure() {
        let mut session = ScriptedSession::new(vec![
            Step::Connect(Ok(Progress::Ready)),
            Step::StartBatch(Ok(())),
            Step::Poll(Err(ShardlordError::Sql {
                node: NodeId(3),
                message: "slot already exists".into(),
            })),
        ]);
        session.ensure_connected().unwrap();
        session.start_exec_batch("create slot").unwrap();
        let err = session.poll().unwrap_err();
        assert!(matches!(err, ShardlordError::Sql { .. }));
    }
}
