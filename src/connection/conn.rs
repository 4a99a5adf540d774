//! Core connection type

use super::state::ConnectionState;
use super::transport::Transport;
use crate::protocol::decode::FrameScanner;
use crate::protocol::{decode_frame, encode_command, Command, Frame};
use crate::{Error, Result};
use bytes::{Buf, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tracing::Instrument;

// Process-wide connection ids, used to correlate log lines
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Callback invoked for connection-level errors raised after the handshake
/// (dropped socket, garbage on the wire).
///
/// Observers run on the connection's driver task and must not block.
pub type ErrorObserver = Arc<dyn Fn(&Error) + Send + Sync>;

/// Connection configuration
///
/// Use `ConnectionConfig::builder()` to set credentials and timeouts.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// ACL username (optional, requires a password)
    pub username: Option<String>,
    /// Password (optional)
    pub password: Option<String>,
    /// Logical database index selected after AUTH
    pub database: u32,
    /// Name reported by `CLIENT LIST`
    pub client_name: Option<String>,
    /// Timeout covering transport connect and handshake
    pub connect_timeout: Option<Duration>,
    /// Per-command reply timeout
    pub response_timeout: Option<Duration>,
    /// Depth of the command queue feeding the driver task
    pub channel_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            username: None,
            password: None,
            database: 0,
            client_name: None,
            connect_timeout: None,
            response_timeout: None,
            channel_capacity: 128,
        }
    }
}

impl ConnectionConfig {
    /// Create a builder for configuration
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let config = ConnectionConfig::builder()
    ///     .password("secret")
    ///     .database(2)
    ///     .connect_timeout(Duration::from_secs(5))
    ///     .build();
    /// ```
    pub fn builder() -> ConnectionConfigBuilder {
        ConnectionConfigBuilder {
            config: ConnectionConfig::default(),
        }
    }
}

/// Builder for creating `ConnectionConfig`
#[derive(Debug, Clone)]
pub struct ConnectionConfigBuilder {
    config: ConnectionConfig,
}

impl ConnectionConfigBuilder {
    /// Set the ACL username
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.config.username = Some(username.into());
        self
    }

    /// Set the password
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.config.password = Some(password.into());
        self
    }

    /// Select a logical database (default: 0)
    pub fn database(mut self, database: u32) -> Self {
        self.config.database = database;
        self
    }

    /// Set the client name
    pub fn client_name(mut self, name: impl Into<String>) -> Self {
        self.config.client_name = Some(name.into());
        self
    }

    /// Set connect timeout
    ///
    /// Default: None (no timeout)
    pub fn connect_timeout(mut self, duration: Duration) -> Self {
        self.config.connect_timeout = Some(duration);
        self
    }

    /// Set per-command reply timeout
    ///
    /// Default: None (wait forever)
    pub fn response_timeout(mut self, duration: Duration) -> Self {
        self.config.response_timeout = Some(duration);
        self
    }

    /// Set the command queue depth (default: 128, minimum: 1)
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity.max(1);
        self
    }

    /// Build the configuration
    pub fn build(self) -> ConnectionConfig {
        self.config
    }
}

/// Socket plus read buffer, owned by the handshake and then by the driver task
struct Wire {
    transport: Transport,
    read_buf: BytesMut,
    scanner: FrameScanner,
}

impl Wire {
    async fn send(&mut self, cmd: &Command) -> Result<()> {
        let buf = encode_command(cmd);
        self.transport.write_all(&buf).await?;
        self.transport.flush().await?;
        Ok(())
    }

    async fn receive(&mut self) -> Result<Frame> {
        loop {
            // Decode only once the whole frame is buffered
            let scanned = self
                .scanner
                .scan(&self.read_buf)
                .map_err(|e| Error::Protocol(e.to_string()))?;
            if let Some(len) = scanned {
                let (frame, consumed) = decode_frame(&self.read_buf[..len])
                    .map_err(|e| Error::Protocol(e.to_string()))?;
                self.read_buf.advance(consumed);
                return Ok(frame);
            }

            let n = self.transport.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
        }
    }

    async fn round_trip(&mut self, cmd: &Command) -> Result<Frame> {
        self.send(cmd).await?;
        self.receive().await
    }

    async fn quit(&mut self) -> Result<()> {
        // The server may already be gone; QUIT is best effort
        if self.round_trip(&Command::new("QUIT")).await.is_err() {
            tracing::debug!("QUIT not acknowledged");
        }
        if let Err(e) = self.transport.shutdown().await {
            tracing::debug!(error = %e, "transport shutdown after QUIT failed");
        }
        Ok(())
    }
}

enum Message {
    Command {
        cmd: Command,
        reply: oneshot::Sender<Result<Frame>>,
    },
    Quit(oneshot::Sender<Result<()>>),
}

/// State shared between `Connection` and its driver task
struct Shared {
    id: u64,
    state: Mutex<ConnectionState>,
    observers: Mutex<Vec<ErrorObserver>>,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Move to `Closed`; every state may close
    fn mark_closed(&self) {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Err(e) = state.transition(ConnectionState::Closed) {
            tracing::debug!(connection_id = self.id, error = %e, "close transition rejected");
        }
    }

    /// Report an asynchronous connection error and mark the connection dead
    fn fail(&self, err: Error) {
        self.mark_closed();
        crate::metrics::counters::async_connection_error(err.category());
        tracing::debug!(connection_id = self.id, error = %err, "connection failed");

        // Snapshot so observers may register further observers
        let observers: Vec<ErrorObserver> = match self.observers.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        for observer in observers {
            observer(&err);
        }
    }
}

/// Live cache connection
///
/// The transport belongs to a background driver task. `Connection` only holds
/// the sending side of its command queue, so every method takes `&self` and a
/// single connection can be shared by any number of callers through an `Arc`.
/// Commands are answered in the order they were queued.
pub struct Connection {
    tx: mpsc::Sender<Message>,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.shared.id)
            .field("state", &self.state())
            .finish()
    }
}

impl Connection {
    /// Run the handshake over an open transport and start the driver task
    ///
    /// Must be called from within a tokio runtime.
    pub async fn establish(transport: Transport, config: &ConnectionConfig) -> Result<Self> {
        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        let mut wire = Wire {
            transport,
            read_buf: BytesMut::with_capacity(8192),
            scanner: FrameScanner::new(),
        };

        let handshake_start = Instant::now();
        let state = handshake(&mut wire, config)
            .instrument(tracing::info_span!(
                "handshake",
                connection_id = id,
                database = config.database
            ))
            .await?;
        crate::metrics::histograms::handshake_duration(handshake_start.elapsed().as_millis() as u64);

        let shared = Arc::new(Shared {
            id,
            state: Mutex::new(state),
            observers: Mutex::new(Vec::new()),
        });

        let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
        tokio::spawn(drive(wire, rx, shared.clone(), config.response_timeout));

        tracing::info!(connection_id = id, "cache connection ready");
        Ok(Self { tx, shared })
    }

    /// Process-unique id of this connection
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Current state: `Ready` until closed or failed, then `Closed`
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Whether the connection has been closed or has failed
    pub fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Closed
    }

    /// Register an observer for asynchronous connection errors
    ///
    /// Each error event is delivered to each observer exactly once.
    pub fn on_error(&self, observer: ErrorObserver) {
        match self.shared.observers.lock() {
            Ok(mut guard) => guard.push(observer),
            Err(poisoned) => poisoned.into_inner().push(observer),
        }
    }

    /// Close the connection (QUIT, then transport shutdown)
    ///
    /// Idempotent: closing a closed connection succeeds.
    pub async fn close(&self) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }

        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Message::Quit(done_tx)).await.is_err() {
            // Driver already gone
            return Ok(());
        }
        match done_rx.await {
            Ok(result) => result,
            Err(_) => Ok(()),
        }
    }

    /// Send a command and wait for its reply
    ///
    /// Error replies are returned as `Error::Server`. If the server does not
    /// answer within `response_timeout` the command fails with
    /// `Error::Timeout` and the connection is closed, since the late reply
    /// would be matched to the next command.
    pub async fn command(&self, cmd: Command) -> Result<Frame> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }

        let name = cmd.name();
        let started = Instant::now();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Message::Command {
                cmd,
                reply: reply_tx,
            })
            .await
            .map_err(|_| Error::ConnectionClosed)?;

        let frame = reply_rx.await.map_err(|_| Error::ConnectionClosed)??;

        crate::metrics::histograms::command_duration(&name, started.elapsed().as_micros() as u64);

        match frame {
            Frame::Error(message) => Err(Error::Server(message)),
            frame => Ok(frame),
        }
    }

    /// PING, expecting PONG
    pub async fn ping(&self) -> Result<()> {
        match self.command(Command::new("PING")).await? {
            Frame::Simple(s) if s == "PONG" => Ok(()),
            other => Err(unexpected("PING", &other)),
        }
    }

    /// GET, returning raw bytes
    pub async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        match self.command(Command::new("GET").arg(key)).await? {
            Frame::Bulk(data) => Ok(Some(data)),
            Frame::Null => Ok(None),
            other => Err(unexpected("GET", &other)),
        }
    }

    /// GET, decoding the value as UTF-8
    pub async fn get_string(&self, key: &str) -> Result<Option<String>> {
        self.get(key)
            .await?
            .map(|data| bytes_to_string("GET", data))
            .transpose()
    }

    /// GET, deserializing a JSON value
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key).await? {
            Some(data) => serde_json::from_slice(&data)
                .map(Some)
                .map_err(|e| Error::Protocol(format!("invalid JSON at {}: {}", key, e))),
            None => Ok(None),
        }
    }

    /// SET
    pub async fn set(&self, key: &str, value: impl AsRef<[u8]>) -> Result<()> {
        let reply = self.command(Command::new("SET").arg(key).arg(value)).await?;
        expect_ok("SET", reply)
    }

    /// SET with an expiry (rounded up to whole seconds, at least one)
    pub async fn set_ex(&self, key: &str, value: impl AsRef<[u8]>, ttl: Duration) -> Result<()> {
        let seconds = ttl_seconds(ttl);
        let reply = self
            .command(
                Command::new("SET")
                    .arg(key)
                    .arg(value)
                    .arg("EX")
                    .arg(seconds.to_string()),
            )
            .await?;
        expect_ok("SET", reply)
    }

    /// SET a JSON-serialized value
    pub async fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let data = serde_json::to_vec(value)
            .map_err(|e| Error::Protocol(format!("failed to serialize {}: {}", key, e)))?;
        self.set(key, data).await
    }

    /// DEL, returning the number of keys removed
    pub async fn del(&self, keys: &[&str]) -> Result<i64> {
        let reply = self.command(Command::new("DEL").args(keys)).await?;
        expect_integer("DEL", reply)
    }

    /// EXISTS for a single key
    pub async fn exists(&self, key: &str) -> Result<bool> {
        let reply = self.command(Command::new("EXISTS").arg(key)).await?;
        Ok(expect_integer("EXISTS", reply)? > 0)
    }

    /// EXPIRE, returning whether the key existed
    pub async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let reply = self
            .command(
                Command::new("EXPIRE")
                    .arg(key)
                    .arg(ttl_seconds(ttl).to_string()),
            )
            .await?;
        Ok(expect_integer("EXPIRE", reply)? == 1)
    }

    /// HSET with several field/value pairs, returning the number of new fields
    pub async fn hset_multiple(&self, key: &str, fields: &[(&str, &str)]) -> Result<i64> {
        if fields.is_empty() {
            return Err(Error::Config("HSET requires at least one field".into()));
        }
        let mut cmd = Command::new("HSET").arg(key);
        for (field, value) in fields {
            cmd = cmd.arg(field).arg(value);
        }
        let reply = self.command(cmd).await?;
        expect_integer("HSET", reply)
    }

    /// HGETALL, empty when the key does not exist
    pub async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        let items = expect_strings("HGETALL", self.command(Command::new("HGETALL").arg(key)).await?)?;
        if items.len() % 2 != 0 {
            return Err(Error::Protocol(format!(
                "HGETALL returned an odd number of elements ({})",
                items.len()
            )));
        }

        let mut map = HashMap::with_capacity(items.len() / 2);
        let mut iter = items.into_iter();
        while let (Some(field), Some(value)) = (iter.next(), iter.next()) {
            map.insert(field, value);
        }
        Ok(map)
    }

    /// SADD, returning the number of members added
    pub async fn sadd(&self, key: &str, member: &str) -> Result<i64> {
        let reply = self.command(Command::new("SADD").arg(key).arg(member)).await?;
        expect_integer("SADD", reply)
    }

    /// SREM, returning the number of members removed
    pub async fn srem(&self, key: &str, member: &str) -> Result<i64> {
        let reply = self.command(Command::new("SREM").arg(key).arg(member)).await?;
        expect_integer("SREM", reply)
    }

    /// SMEMBERS
    pub async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        expect_strings("SMEMBERS", self.command(Command::new("SMEMBERS").arg(key)).await?)
    }
}

/// AUTH, SELECT, CLIENT SETNAME, then PING
async fn handshake(wire: &mut Wire, config: &ConnectionConfig) -> Result<ConnectionState> {
    let mut state = ConnectionState::Initial;

    if let Some(password) = &config.password {
        state.transition(ConnectionState::Authenticating)?;
        crate::metrics::counters::auth_attempted();

        let mut auth = Command::new("AUTH");
        if let Some(username) = &config.username {
            auth = auth.arg(username);
        }
        match wire.round_trip(&auth.arg(password)).await? {
            Frame::Simple(s) if s == "OK" => {
                tracing::debug!("authentication successful");
            }
            Frame::Error(message) => {
                crate::metrics::counters::auth_failed();
                return Err(Error::Authentication(message));
            }
            other => return Err(unexpected("AUTH", &other)),
        }
    } else if config.username.is_some() {
        return Err(Error::Config("a username requires a password".into()));
    }

    if config.database != 0 {
        let reply = wire
            .round_trip(&Command::new("SELECT").arg(config.database.to_string()))
            .await?;
        expect_ok("SELECT", server_error(reply)?)?;
    }

    if let Some(name) = &config.client_name {
        let reply = wire
            .round_trip(&Command::new("CLIENT").arg("SETNAME").arg(name))
            .await?;
        expect_ok("CLIENT SETNAME", server_error(reply)?)?;
    }

    match server_error(wire.round_trip(&Command::new("PING")).await?)? {
        Frame::Simple(s) if s == "PONG" => {}
        other => return Err(unexpected("PING", &other)),
    }

    state.transition(ConnectionState::Ready)?;
    tracing::debug!("handshake complete");
    Ok(state)
}

/// Driver loop: one command in flight at a time, socket watched while idle
async fn drive(
    mut wire: Wire,
    mut rx: mpsc::Receiver<Message>,
    shared: Arc<Shared>,
    response_timeout: Option<Duration>,
) {
    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Some(Message::Command { cmd, reply }) => {
                    crate::metrics::counters::command_sent();
                    let result = match response_timeout {
                        Some(limit) => tokio::time::timeout(limit, wire.round_trip(&cmd))
                            .await
                            .unwrap_or_else(|_| {
                                Err(Error::Timeout(format!(
                                    "no reply to {} within {:?}",
                                    cmd.name(),
                                    limit
                                )))
                            }),
                        None => wire.round_trip(&cmd).await,
                    };
                    let fatal = match &result {
                        Err(e) if is_fatal(e) => Some(e.clone()),
                        _ => None,
                    };
                    // The caller may have gone away; the reply is still consumed
                    let _ = reply.send(result);
                    if let Some(err) = fatal {
                        shared.fail(err);
                        break;
                    }
                }
                Some(Message::Quit(done)) => {
                    shared.mark_closed();
                    let result = wire.quit().await;
                    tracing::info!(connection_id = shared.id, "cache connection closed");
                    let _ = done.send(result);
                    break;
                }
                None => {
                    // Every handle dropped
                    shared.mark_closed();
                    let _ = wire.quit().await;
                    tracing::debug!(connection_id = shared.id, "cache connection dropped");
                    break;
                }
            },
            read = wire.transport.read_buf(&mut wire.read_buf) => {
                let err = match read {
                    Ok(0) => Error::ConnectionClosed,
                    Ok(_) => Error::Protocol(unsolicited(&wire.read_buf)),
                    Err(e) => e,
                };
                shared.fail(err);
                break;
            }
        }
    }

    // Anything still queued can never be answered
    rx.close();
    while let Ok(msg) = rx.try_recv() {
        match msg {
            Message::Command { reply, .. } => {
                let _ = reply.send(Err(Error::ConnectionClosed));
            }
            Message::Quit(done) => {
                let _ = done.send(Ok(()));
            }
        }
    }
}

// Errors after which the byte stream can no longer be trusted; a timed-out
// reply may still arrive and would be read as the answer to the next command
fn is_fatal(err: &Error) -> bool {
    matches!(
        err,
        Error::Io(_) | Error::ConnectionClosed | Error::Protocol(_) | Error::Timeout(_)
    )
}

fn unsolicited(buf: &BytesMut) -> String {
    match decode_frame(buf) {
        Ok((frame, _)) => format!("unsolicited reply while idle: {}", frame),
        Err(_) => format!("{} unsolicited bytes while idle", buf.len()),
    }
}

// Whole seconds, rounded up, within 1..=i64::MAX (the server's range)
fn ttl_seconds(ttl: Duration) -> u64 {
    let mut seconds = ttl.as_secs();
    if ttl.subsec_nanos() > 0 {
        seconds = seconds.saturating_add(1);
    }
    seconds.clamp(1, i64::MAX as u64)
}

fn server_error(frame: Frame) -> Result<Frame> {
    match frame {
        Frame::Error(message) => Err(Error::Server(message)),
        frame => Ok(frame),
    }
}

fn unexpected(cmd: &str, frame: &Frame) -> Error {
    Error::Protocol(format!("unexpected {} reply to {}: {}", frame.kind(), cmd, frame))
}

fn expect_ok(cmd: &str, frame: Frame) -> Result<()> {
    match frame {
        Frame::Simple(s) if s == "OK" => Ok(()),
        other => Err(unexpected(cmd, &other)),
    }
}

fn expect_integer(cmd: &str, frame: Frame) -> Result<i64> {
    match frame {
        Frame::Integer(n) => Ok(n),
        other => Err(unexpected(cmd, &other)),
    }
}

fn expect_strings(cmd: &str, frame: Frame) -> Result<Vec<String>> {
    match frame {
        Frame::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Frame::Bulk(data) => bytes_to_string(cmd, data),
                Frame::Simple(s) => Ok(s),
                other => Err(unexpected(cmd, &other)),
            })
            .collect(),
        Frame::NullArray => Ok(Vec::new()),
        other => Err(unexpected(cmd, &other)),
    }
}

fn bytes_to_string(cmd: &str, data: Bytes) -> Result<String> {
    String::from_utf8(data.to_vec())
        .map_err(|e| Error::Protocol(format!("invalid UTF-8 in {} reply: {}", cmd, e)))
}
