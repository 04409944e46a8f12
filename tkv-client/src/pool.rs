//! # Connection Pool
//!
//! Purpose: Reuse TCP connections to one store endpoint, keeping the
//! per-connection state (selected database, handshake, unread replies)
//! consistent across callers.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Keep a bounded set of reusable connections.
//! 2. **Minimal Locking**: Hold the mutex only while moving idle connections.
//! 3. **Fail Fast**: Exceeding the pool limit returns an error immediately.
//! 4. **Poison on Failure**: A connection that saw an IO or framing error is
//!    never returned to the pool, and the pool reports itself unhealthy.
//! 5. **Checked Checkout**: An idle socket whose peer hung up is discarded
//!    before any command is written to it.

use std::collections::VecDeque;
use std::io::{self, BufReader, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{ClientError, ClientResult};
use crate::events::{moved_event, EventRelay, FailureKind, LifecycleEvent};
use crate::resp::{encode_command, read_response, RespValue};

/// Per-connection settings applied on connect.
#[derive(Debug, Clone, Default)]
pub struct ConnectionSettings {
    /// Name announced with CLIENT SETNAME.
    pub client_name: Option<String>,
    /// Credential sent with AUTH.
    pub password: Option<String>,
    /// Optional TCP connect timeout.
    pub connect_timeout: Option<Duration>,
    /// Optional TCP read timeout.
    pub read_timeout: Option<Duration>,
    /// Optional TCP write timeout.
    pub write_timeout: Option<Duration>,
}

/// Pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Endpoint address, e.g. "127.0.0.1:6379".
    pub endpoint: String,
    /// Settings applied to every connection.
    pub settings: ConnectionSettings,
    /// Maximum number of idle connections to keep.
    pub max_idle: usize,
    /// Maximum total connections (idle + in-use).
    pub max_total: usize,
}

struct PoolState {
    idle: VecDeque<Connection>,
    total: usize,
    closed: bool,
}

struct PoolInner {
    config: PoolConfig,
    state: Mutex<PoolState>,
    relay: Arc<EventRelay>,
    healthy: Arc<AtomicBool>,
}

impl PoolInner {
    fn release_slot(&self) {
        let mut state = self.state.lock();
        state.total = state.total.saturating_sub(1);
    }

    fn return_connection(&self, conn: Connection) {
        let mut state = self.state.lock();
        if !state.closed && state.idle.len() < self.config.max_idle {
            state.idle.push_back(conn);
        } else {
            state.total = state.total.saturating_sub(1);
        }
    }

    fn report_failure(&self, err: &ClientError) {
        self.healthy.store(false, Ordering::Release);
        let failure = match err {
            ClientError::Closed => FailureKind::ConnectionDisposed,
            ClientError::Protocol => FailureKind::ProtocolFailure,
            _ => FailureKind::SocketFailure,
        };
        warn!(endpoint = %self.config.endpoint, %failure, error = %err, "connection failed");
        self.relay.emit(LifecycleEvent::ConnectionFailed {
            endpoint: self.config.endpoint.clone(),
            failure,
            message: Some(err.to_string()),
        });
    }

    fn report_error_reply(&self, message: &str) {
        warn!(endpoint = %self.config.endpoint, message, "error reply");
        if let Some(event) = moved_event(&self.config.endpoint, message) {
            self.relay.emit(event);
        }
        self.relay.emit(LifecycleEvent::ErrorMessage {
            endpoint: self.config.endpoint.clone(),
            message: message.to_string(),
        });
    }
}

/// Connection pool handle.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Creates a pool; connections are opened lazily on `acquire`.
    pub fn new(config: PoolConfig, relay: Arc<EventRelay>, healthy: Arc<AtomicBool>) -> Self {
        let state = PoolState {
            idle: VecDeque::with_capacity(config.max_idle),
            total: 0,
            closed: false,
        };
        ConnectionPool {
            inner: Arc::new(PoolInner {
                config,
                state: Mutex::new(state),
                relay,
                healthy,
            }),
        }
    }

    /// Endpoint this pool connects to.
    pub fn endpoint(&self) -> &str {
        &self.inner.config.endpoint
    }

    /// Acquires a connection from the pool.
    pub fn acquire(&self) -> ClientResult<PooledConnection> {
        while let Some(conn) = self.pop_idle()? {
            if conn.peer_closed() {
                self.discard(vec![conn]);
                continue;
            }
            return Ok(PooledConnection::new(self.inner.clone(), conn));
        }

        if !self.try_reserve()? {
            return Err(ClientError::PoolExhausted);
        }

        let config = &self.inner.config;
        match Connection::open(&config.endpoint, &config.settings) {
            Ok(conn) => Ok(PooledConnection::new(self.inner.clone(), conn)),
            Err(err) => {
                self.inner.release_slot();
                self.inner.healthy.store(false, Ordering::Release);
                let failure = match err {
                    ClientError::Server { .. } => FailureKind::AuthenticationFailure,
                    _ => FailureKind::UnableToConnect,
                };
                warn!(endpoint = %config.endpoint, %failure, error = %err, "connect failed");
                self.inner.relay.emit(LifecycleEvent::ConnectionFailed {
                    endpoint: config.endpoint.clone(),
                    failure,
                    message: Some(err.to_string()),
                });
                Err(err)
            }
        }
    }

    /// Drops idle connections and refuses further acquisitions.
    ///
    /// Connections currently checked out are closed when they are returned.
    pub fn close(&self) {
        let idle = {
            let mut state = self.inner.state.lock();
            state.closed = true;
            let drained: Vec<Connection> = state.idle.drain(..).collect();
            state.total = state.total.saturating_sub(drained.len());
            drained
        };
        for conn in idle {
            conn.shutdown();
        }
    }

    /// Number of idle connections currently pooled.
    pub fn idle_len(&self) -> usize {
        self.inner.state.lock().idle.len()
    }

    /// Drops idle connections whose peer closed the socket.
    ///
    /// Finding one marks the pool unhealthy. Returns how many were dropped.
    pub fn evict_closed(&self) -> usize {
        let closed: Vec<Connection> = {
            let mut state = self.inner.state.lock();
            let (closed, alive): (VecDeque<Connection>, VecDeque<Connection>) =
                state.idle.drain(..).partition(Connection::peer_closed);
            state.idle = alive;
            closed.into()
        };
        let count = closed.len();
        self.discard(closed);
        count
    }

    /// Shuts down idle connections already removed from the idle queue.
    fn discard(&self, closed: Vec<Connection>) {
        if closed.is_empty() {
            return;
        }
        {
            let mut state = self.inner.state.lock();
            state.total = state.total.saturating_sub(closed.len());
        }
        for conn in &closed {
            conn.shutdown();
        }
        debug!(
            endpoint = %self.inner.config.endpoint,
            count = closed.len(),
            "dropped closed idle connections"
        );
        self.inner.report_failure(&ClientError::Closed);
    }

    fn pop_idle(&self) -> ClientResult<Option<Connection>> {
        let mut state = self.inner.state.lock();
        if state.closed {
            return Err(ClientError::Closed);
        }
        Ok(state.idle.pop_front())
    }

    fn try_reserve(&self) -> ClientResult<bool> {
        let mut state = self.inner.state.lock();
        if state.closed {
            return Err(ClientError::Closed);
        }
        if state.total >= self.inner.config.max_total {
            return Ok(false);
        }
        state.total += 1;
        Ok(true)
    }
}

/// RAII wrapper returning a connection to the pool on drop.
pub struct PooledConnection {
    pool: Arc<PoolInner>,
    conn: Option<Connection>,
    valid: bool,
}

impl PooledConnection {
    fn new(pool: Arc<PoolInner>, conn: Connection) -> Self {
        PooledConnection {
            pool,
            conn: Some(conn),
            valid: true,
        }
    }

    /// Executes a command against logical database `db` and waits for the reply.
    ///
    /// Error replies are returned as `ClientError::Server`.
    pub fn exec(&mut self, db: u32, args: &[&[u8]]) -> ClientResult<RespValue> {
        let result = match self.conn.as_mut() {
            Some(conn) => conn.call(db, args),
            None => Err(ClientError::Closed),
        };
        self.observe(result)
    }

    /// Writes a command without waiting for its reply.
    pub fn send(&mut self, db: u32, args: &[&[u8]]) -> ClientResult<()> {
        let result = match self.conn.as_mut() {
            Some(conn) => conn.send(db, args),
            None => Err(ClientError::Closed),
        };
        self.observe(result)
    }

    fn observe<T>(&mut self, result: ClientResult<T>) -> ClientResult<T> {
        if let Some(conn) = self.conn.as_mut() {
            for message in conn.take_drained_errors() {
                self.pool.report_error_reply(&message);
            }
        }
        match &result {
            Err(err) if err.is_connection_failure() => {
                // If IO/protocol fails, do not return this connection to the pool.
                self.valid = false;
                self.pool.report_failure(err);
            }
            Err(ClientError::Server { message }) => {
                self.pool.report_error_reply(&String::from_utf8_lossy(message));
            }
            _ => {}
        }
        result
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => return,
        };

        if self.valid {
            self.pool.return_connection(conn);
        } else {
            conn.shutdown();
            self.pool.release_slot();
        }
    }
}

/// Single TCP connection with reusable buffers.
///
/// Tracks the selected logical database and the number of replies still
/// owed by the server for fire-and-forget commands.
pub struct Connection {
    // Buffered reader reduces syscalls while still allowing direct writes.
    reader: BufReader<TcpStream>,
    line_buf: Vec<u8>,
    write_buf: Vec<u8>,
    endpoint: String,
    db: u32,
    pending: usize,
    drained_errors: Vec<String>,
}

impl Connection {
    /// Connects to `endpoint` and performs the AUTH / CLIENT SETNAME handshake.
    pub fn open(endpoint: &str, settings: &ConnectionSettings) -> ClientResult<Self> {
        let stream = connect_stream(endpoint, settings.connect_timeout)?;
        if let Some(timeout) = settings.read_timeout {
            stream.set_read_timeout(Some(timeout))?;
        }
        if let Some(timeout) = settings.write_timeout {
            stream.set_write_timeout(Some(timeout))?;
        }
        // Disable Nagle to keep request latency low for small payloads.
        stream.set_nodelay(true)?;

        let mut conn = Connection {
            reader: BufReader::new(stream),
            line_buf: Vec::with_capacity(128),
            write_buf: Vec::with_capacity(256),
            endpoint: endpoint.to_string(),
            db: 0,
            pending: 0,
            drained_errors: Vec::new(),
        };
        conn.handshake(settings)?;
        debug!(endpoint, "connection opened");
        Ok(conn)
    }

    /// Endpoint this connection is attached to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Writes one command and reads one reply; error replies stay as values.
    pub fn exec_raw(&mut self, args: &[&[u8]]) -> ClientResult<RespValue> {
        self.write(args)?;
        read_response(&mut self.reader, &mut self.line_buf)
    }

    /// Executes a command in database `db`, turning error replies into errors.
    pub fn call(&mut self, db: u32, args: &[&[u8]]) -> ClientResult<RespValue> {
        self.drain_pending()?;
        self.select(db)?;
        match self.exec_raw(args)? {
            RespValue::Error(message) => Err(ClientError::Server { message }),
            value => Ok(value),
        }
    }

    /// Writes a command in database `db`; its reply is read before the next command.
    pub fn send(&mut self, db: u32, args: &[&[u8]]) -> ClientResult<()> {
        self.drain_pending()?;
        self.select(db)?;
        self.write(args)?;
        self.pending += 1;
        Ok(())
    }

    /// True when the peer has closed the socket or the socket reports an error.
    ///
    /// Checked with a non-blocking peek; unread data counts as alive.
    pub fn peer_closed(&self) -> bool {
        if !self.reader.buffer().is_empty() {
            return false;
        }
        let stream = self.reader.get_ref();
        if stream.set_nonblocking(true).is_err() {
            return true;
        }
        let mut byte = [0u8; 1];
        let closed = match stream.peek(&mut byte) {
            Ok(0) => true,
            Ok(_) => false,
            Err(err) => !matches!(
                err.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
            ),
        };
        stream.set_nonblocking(false).is_err() || closed
    }

    /// Closes the socket in both directions.
    pub fn shutdown(&self) {
        let _ = self.reader.get_ref().shutdown(Shutdown::Both);
    }

    /// Splits into the buffered read side and a cloned write side.
    pub fn into_split(self) -> ClientResult<(BufReader<TcpStream>, TcpStream)> {
        let writer = self.reader.get_ref().try_clone()?;
        Ok((self.reader, writer))
    }

    fn take_drained_errors(&mut self) -> Vec<String> {
        std::mem::take(&mut self.drained_errors)
    }

    fn handshake(&mut self, settings: &ConnectionSettings) -> ClientResult<()> {
        if let Some(password) = settings.password.as_deref() {
            if let RespValue::Error(message) = self.exec_raw(&[b"AUTH", password.as_bytes()])? {
                return Err(ClientError::Server { message });
            }
        }
        if let Some(name) = settings.client_name.as_deref() {
            // Servers without CLIENT SETNAME still accept the connection.
            let reply = self.exec_raw(&[b"CLIENT", b"SETNAME", name.as_bytes()])?;
            if let RespValue::Error(message) = reply {
                debug!(
                    endpoint = %self.endpoint,
                    reply = %String::from_utf8_lossy(&message),
                    "client name rejected"
                );
            }
        }
        Ok(())
    }

    fn select(&mut self, db: u32) -> ClientResult<()> {
        if self.db == db {
            return Ok(());
        }
        let index = db.to_string();
        match self.exec_raw(&[b"SELECT", index.as_bytes()])? {
            RespValue::Error(message) => Err(ClientError::Server { message }),
            _ => {
                debug!(endpoint = %self.endpoint, db, "selected database");
                self.db = db;
                Ok(())
            }
        }
    }

    fn drain_pending(&mut self) -> ClientResult<()> {
        while self.pending > 0 {
            let reply = read_response(&mut self.reader, &mut self.line_buf)?;
            self.pending -= 1;
            if let RespValue::Error(message) = reply {
                self.drained_errors.push(String::from_utf8_lossy(&message).into_owned());
            }
        }
        Ok(())
    }

    fn write(&mut self, args: &[&[u8]]) -> ClientResult<()> {
        self.write_buf.clear();
        encode_command(args, &mut self.write_buf);

        let stream = self.reader.get_mut();
        stream.write_all(&self.write_buf)?;
        stream.flush()?;
        Ok(())
    }
}

fn connect_stream(endpoint: &str, timeout: Option<Duration>) -> ClientResult<TcpStream> {
    let addrs = endpoint
        .to_socket_addrs()
        .map_err(|_| ClientError::InvalidAddress(endpoint.to_string()))?;

    let mut last_err = None;
    for addr in addrs {
        let attempt = match timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
            None => TcpStream::connect(addr),
        };
        match attempt {
            Ok(stream) => return Ok(stream),
            Err(err) => last_err = Some(err),
        }
    }
    match last_err {
        Some(err) => Err(ClientError::Io(err)),
        None => Err(ClientError::InvalidAddress(endpoint.to_string())),
    }
}
