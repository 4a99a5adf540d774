//! In-process RESP2 server covering the commands the crate sends
//!
//! State is shared by every connection to the same server. Keys with an
//! expiry are dropped lazily when read.

use bytes::{Buf, Bytes, BytesMut};
use recipiece_cache::protocol::decode::is_incomplete;
use recipiece_cache::protocol::{decode_frame, encode_frame, Frame};
use std::collections::{BTreeSet, HashMap};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

#[derive(Default)]
struct Store {
    strings: HashMap<String, (Bytes, Option<Instant>)>,
    hashes: HashMap<String, HashMap<String, String>>,
    sets: HashMap<String, BTreeSet<String>>,
    ttls: HashMap<String, u64>,
}

impl Store {
    fn live_string(&mut self, key: &str) -> Option<Bytes> {
        match self.strings.get(key) {
            Some((_, Some(deadline))) if *deadline <= Instant::now() => {
                self.strings.remove(key);
                None
            }
            Some((value, _)) => Some(value.clone()),
            None => None,
        }
    }

    fn exists(&mut self, key: &str) -> bool {
        self.live_string(key).is_some()
            || self.hashes.contains_key(key)
            || self.sets.contains_key(key)
    }

    fn remove(&mut self, key: &str) -> bool {
        let string = self.live_string(key).is_some();
        self.strings.remove(key);
        let hash = self.hashes.remove(key).is_some();
        let set = self.sets.remove(key).is_some();
        string || hash || set
    }
}

struct ServerState {
    password: Option<String>,
    store: Mutex<Store>,
    accepted: AtomicUsize,
    commands: Mutex<Vec<Vec<String>>>,
    kill: broadcast::Sender<()>,
}

/// Handle to a running mock server; the server stops when the runtime does
pub struct MockServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
}

impl MockServer {
    /// Server without authentication
    pub async fn start() -> Self {
        Self::start_inner(None).await
    }

    /// Server requiring `AUTH <password>` before any other command
    pub async fn with_password(password: &str) -> Self {
        Self::start_inner(Some(password.to_string())).await
    }

    async fn start_inner(password: Option<String>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock server");
        let addr = listener.local_addr().expect("mock server address");
        let (kill, _) = broadcast::channel(4);
        let state = Arc::new(ServerState {
            password,
            store: Mutex::new(Store::default()),
            accepted: AtomicUsize::new(0),
            commands: Mutex::new(Vec::new()),
            kill,
        });

        let accept_state = state.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                accept_state.accepted.fetch_add(1, Ordering::SeqCst);
                let kill = accept_state.kill.subscribe();
                tokio::spawn(serve(socket, accept_state.clone(), kill));
            }
        });

        Self { addr, state }
    }

    /// `redis://` URL for this server
    pub fn url(&self) -> String {
        format!("redis://{}", self.addr)
    }

    /// `redis://` URL carrying a password
    pub fn url_with_password(&self, password: &str) -> String {
        format!("redis://:{}@{}", password, self.addr)
    }

    /// Number of TCP connections accepted so far
    pub fn accepted(&self) -> usize {
        self.state.accepted.load(Ordering::SeqCst)
    }

    /// Every command received, uppercased name first
    pub fn commands(&self) -> Vec<Vec<String>> {
        self.state.commands.lock().unwrap().clone()
    }

    /// Number of times a command name was received
    pub fn count(&self, name: &str) -> usize {
        self.commands()
            .iter()
            .filter(|cmd| cmd.first().map(String::as_str) == Some(name))
            .count()
    }

    /// Drop every open client socket without a reply
    pub fn kill_connections(&self) {
        let _ = self.state.kill.send(());
    }

    /// Whether a key currently exists
    pub fn contains(&self, key: &str) -> bool {
        self.state.store.lock().unwrap().exists(key)
    }

    /// Expiry in seconds last requested for a string key
    pub fn ttl(&self, key: &str) -> Option<u64> {
        self.state.store.lock().unwrap().ttls.get(key).copied()
    }

    /// Members of a set key
    pub fn members(&self, key: &str) -> BTreeSet<String> {
        self.state
            .store
            .lock()
            .unwrap()
            .sets
            .get(key)
            .cloned()
            .unwrap_or_default()
    }
}

async fn serve(mut socket: TcpStream, state: Arc<ServerState>, mut kill: broadcast::Receiver<()>) {
    let mut buf = BytesMut::with_capacity(4096);
    let mut authenticated = state.password.is_none();

    loop {
        // Answer every complete frame already buffered
        loop {
            let (frame, consumed) = match decode_frame(&buf) {
                Ok(decoded) => decoded,
                Err(e) if is_incomplete(&e) => break,
                Err(_) => return,
            };
            buf.advance(consumed);

            let args = match to_args(frame) {
                Some(args) if !args.is_empty() => args,
                _ => {
                    let _ = write(&mut socket, Frame::Error("ERR expected array of bulk strings".into())).await;
                    continue;
                }
            };
            state.commands.lock().unwrap().push(args.clone());

            let name = args[0].as_str();
            let reply = if name == "QUIT" {
                let _ = write(&mut socket, ok()).await;
                return;
            } else if name == "AUTH" {
                let (reply, accepted) = auth(&state, &args);
                authenticated |= accepted;
                reply
            } else if !authenticated {
                Frame::Error("NOAUTH Authentication required.".into())
            } else {
                execute(&state, &args)
            };

            if write(&mut socket, reply).await.is_err() {
                return;
            }
        }

        tokio::select! {
            read = socket.read_buf(&mut buf) => match read {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            },
            _ = kill.recv() => return,
        }
    }
}

async fn write(socket: &mut TcpStream, frame: Frame) -> std::io::Result<()> {
    socket.write_all(&encode_frame(&frame)).await
}

fn to_args(frame: Frame) -> Option<Vec<String>> {
    let Frame::Array(items) = frame else {
        return None;
    };
    let mut args = Vec::with_capacity(items.len());
    for (i, item) in items.into_iter().enumerate() {
        let Frame::Bulk(data) = item else {
            return None;
        };
        let text = String::from_utf8_lossy(&data).into_owned();
        args.push(if i == 0 { text.to_uppercase() } else { text });
    }
    Some(args)
}

fn auth(state: &ServerState, args: &[String]) -> (Frame, bool) {
    let supplied = match args.len() {
        2 => &args[1],
        3 => &args[2],
        _ => return (wrong_args("auth"), false),
    };
    match &state.password {
        None => (
            Frame::Error("ERR AUTH <password> called without any password configured".into()),
            false,
        ),
        Some(expected) if expected == supplied => (ok(), true),
        Some(_) => (
            Frame::Error("WRONGPASS invalid username-password pair or user is disabled.".into()),
            false,
        ),
    }
}

fn execute(state: &ServerState, args: &[String]) -> Frame {
    let mut store = state.store.lock().unwrap();
    let name = args[0].as_str();
    let rest = &args[1..];

    match (name, rest) {
        ("PING", []) => Frame::Simple("PONG".into()),
        ("PING", [message]) => Frame::Bulk(Bytes::from(message.clone())),
        ("SELECT", [db]) => match db.parse::<u32>() {
            Ok(n) if n < 16 => ok(),
            _ => Frame::Error("ERR DB index is out of range".into()),
        },
        ("CLIENT", [sub, _name]) if sub.eq_ignore_ascii_case("SETNAME") => ok(),
        ("GET", [key]) => match store.live_string(key) {
            Some(value) => Frame::Bulk(value),
            None => Frame::Null,
        },
        ("SET", [key, value]) => {
            store.strings.insert(key.clone(), (Bytes::from(value.clone()), None));
            store.ttls.remove(key);
            ok()
        }
        ("SET", [key, value, ex, seconds]) if ex.eq_ignore_ascii_case("EX") => {
            let Ok(seconds) = seconds.parse::<u64>() else {
                return Frame::Error("ERR value is not an integer or out of range".into());
            };
            if seconds == 0 {
                return Frame::Error("ERR invalid expire time in 'set' command".into());
            }
            let deadline = Instant::now() + Duration::from_secs(seconds);
            store
                .strings
                .insert(key.clone(), (Bytes::from(value.clone()), Some(deadline)));
            store.ttls.insert(key.clone(), seconds);
            ok()
        }
        ("DEL", keys) if !keys.is_empty() => {
            let removed = keys.iter().filter(|key| store.remove(key)).count();
            Frame::Integer(removed as i64)
        }
        ("EXISTS", keys) if !keys.is_empty() => {
            let present = keys.iter().filter(|key| store.exists(key)).count();
            Frame::Integer(present as i64)
        }
        ("EXPIRE", [key, seconds]) => {
            let Ok(seconds) = seconds.parse::<u64>() else {
                return Frame::Error("ERR value is not an integer or out of range".into());
            };
            let deadline = Instant::now() + Duration::from_secs(seconds);
            match store.strings.get_mut(key) {
                Some(entry) => {
                    entry.1 = Some(deadline);
                    store.ttls.insert(key.clone(), seconds);
                    Frame::Integer(1)
                }
                None => Frame::Integer(0),
            }
        }
        ("HSET", [key, pairs @ ..]) if !pairs.is_empty() && pairs.len() % 2 == 0 => {
            let hash = store.hashes.entry(key.clone()).or_default();
            let added = pairs
                .chunks(2)
                .filter(|pair| hash.insert(pair[0].clone(), pair[1].clone()).is_none())
                .count();
            Frame::Integer(added as i64)
        }
        ("HGETALL", [key]) => {
            let items = store
                .hashes
                .get(key)
                .map(|hash| {
                    hash.iter()
                        .flat_map(|(field, value)| [bulk(field), bulk(value)])
                        .collect()
                })
                .unwrap_or_default();
            Frame::Array(items)
        }
        ("SADD", [key, members @ ..]) if !members.is_empty() => {
            let set = store.sets.entry(key.clone()).or_default();
            let added = members.iter().filter(|m| set.insert((*m).clone())).count();
            Frame::Integer(added as i64)
        }
        ("SREM", [key, members @ ..]) if !members.is_empty() => {
            let Some(set) = store.sets.get_mut(key) else {
                return Frame::Integer(0);
            };
            let removed = members.iter().filter(|m| set.remove(m.as_str())).count();
            if set.is_empty() {
                store.sets.remove(key);
            }
            Frame::Integer(removed as i64)
        }
        ("SMEMBERS", [key]) => {
            let items = store
                .sets
                .get(key)
                .map(|set| set.iter().map(|m| bulk(m)).collect())
                .unwrap_or_default();
            Frame::Array(items)
        }
        (
            "PING" | "SELECT" | "CLIENT" | "GET" | "SET" | "DEL" | "EXISTS" | "EXPIRE" | "HSET"
            | "HGETALL" | "SADD" | "SREM" | "SMEMBERS",
            _,
        ) => wrong_args(&name.to_lowercase()),
        _ => Frame::Error(format!("ERR unknown command '{}'", name)),
    }
}

fn ok() -> Frame {
    Frame::Simple("OK".into())
}

fn bulk(text: &str) -> Frame {
    Frame::Bulk(Bytes::copy_from_slice(text.as_bytes()))
}

fn wrong_args(name: &str) -> Frame {
    Frame::Error(format!("ERR wrong number of arguments for '{}' command", name))
}
