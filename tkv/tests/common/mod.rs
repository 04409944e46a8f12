//! In-memory RESP2 store used by the integration tests.
//!
//! Implements the commands the façade issues, with per-database keyspaces,
//! pub/sub fan-out, an open-connection counter and a kill switch.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::thread;
use std::time::{Duration, Instant};

use tkv::ConnectionDescriptor;

/// Keys returned per SCAN/HSCAN page, independent of COUNT.
const PAGE: usize = 2;

static TRACING: Once = Once::new();

/// Routes `tracing` output through the test harness writer.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

enum Value {
    Str(Vec<u8>),
    Hash(BTreeMap<Vec<u8>, Vec<u8>>),
    Set(BTreeSet<Vec<u8>>),
    List(VecDeque<Vec<u8>>),
}

struct Entry {
    value: Value,
    expiry_ms: Option<i64>,
}

impl Entry {
    fn new(value: Value) -> Self {
        Entry { value, expiry_ms: None }
    }
}

type Keyspace = HashMap<Vec<u8>, Entry>;
type Writer = Arc<Mutex<TcpStream>>;

#[derive(Default)]
struct Shared {
    password: Option<String>,
    dbs: Mutex<HashMap<u32, Keyspace>>,
    channels: Mutex<HashMap<Vec<u8>, Vec<(u64, Writer)>>>,
    streams: Mutex<HashMap<u64, TcpStream>>,
    client_names: Mutex<Vec<String>>,
    selects: AtomicUsize,
    open: AtomicUsize,
    next_id: AtomicU64,
}

enum Reply {
    Simple(&'static str),
    Error(String),
    Int(i64),
    Bulk(Option<Vec<u8>>),
    Array(Vec<Reply>),
    /// Several frames written back to back.
    Frames(Vec<Reply>),
}

impl Reply {
    fn ok() -> Self {
        Reply::Simple("OK")
    }

    fn bool(value: bool) -> Self {
        Reply::Int(value as i64)
    }

    fn bulk(data: &[u8]) -> Self {
        Reply::Bulk(Some(data.to_vec()))
    }

    fn wrong_type() -> Self {
        Reply::Error(
            "WRONGTYPE Operation against a key holding the wrong kind of value".to_string(),
        )
    }

    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Reply::Simple(text) => out.extend_from_slice(format!("+{}\r\n", text).as_bytes()),
            Reply::Error(text) => out.extend_from_slice(format!("-{}\r\n", text).as_bytes()),
            Reply::Int(value) => out.extend_from_slice(format!(":{}\r\n", value).as_bytes()),
            Reply::Bulk(None) => out.extend_from_slice(b"$-1\r\n"),
            Reply::Bulk(Some(data)) => {
                out.extend_from_slice(format!("${}\r\n", data.len()).as_bytes());
                out.extend_from_slice(data);
                out.extend_from_slice(b"\r\n");
            }
            Reply::Array(items) => {
                out.extend_from_slice(format!("*{}\r\n", items.len()).as_bytes());
                for item in items {
                    item.encode(out);
                }
            }
            Reply::Frames(frames) => {
                for frame in frames {
                    frame.encode(out);
                }
            }
        }
    }
}

struct Session {
    id: u64,
    db: u32,
    authed: bool,
    subscriptions: HashSet<Vec<u8>>,
    writer: Writer,
}

/// Running fake store; lives until the test process exits.
pub struct FakeStore {
    addr: String,
    shared: Arc<Shared>,
}

impl FakeStore {
    pub fn start() -> Self {
        Self::launch(None)
    }

    pub fn with_password(password: &str) -> Self {
        Self::launch(Some(password.to_string()))
    }

    fn launch(password: Option<String>) -> Self {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr").to_string();
        let shared = Arc::new(Shared {
            password,
            ..Shared::default()
        });

        let accept = shared.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { return };
                let shared = accept.clone();
                thread::spawn(move || serve(shared, stream));
            }
        });

        FakeStore { addr, shared }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Descriptor pointing at this store with short timeouts.
    pub fn descriptor(&self) -> ConnectionDescriptor {
        let mut text = format!("{},name=tkv-test,connectTimeout=2,ioTimeout=2", self.addr);
        if let Some(password) = &self.shared.password {
            text.push_str(&format!(",password={}", password));
        }
        text.parse().expect("descriptor")
    }

    pub fn open_connections(&self) -> usize {
        self.shared.open.load(Ordering::SeqCst)
    }

    /// Polls until `expected` connections are open or two seconds passed.
    pub fn wait_for_connections(&self, expected: usize) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if self.open_connections() == expected {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        self.open_connections() == expected
    }

    /// Abruptly closes every client connection.
    pub fn kill_connections(&self) {
        for stream in self.shared.streams.lock().unwrap().values() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    pub fn client_names(&self) -> Vec<String> {
        self.shared.client_names.lock().unwrap().clone()
    }

    pub fn select_count(&self) -> usize {
        self.shared.selects.load(Ordering::SeqCst)
    }

    /// Stored string value, bypassing the façade.
    pub fn raw(&self, db: u32, key: &str) -> Option<Vec<u8>> {
        let dbs = self.shared.dbs.lock().unwrap();
        match dbs.get(&db).and_then(|keys| keys.get(key.as_bytes())) {
            Some(Entry { value: Value::Str(data), .. }) => Some(data.clone()),
            _ => None,
        }
    }

    pub fn put_raw(&self, db: u32, key: &str, data: &[u8]) {
        let mut dbs = self.shared.dbs.lock().unwrap();
        dbs.entry(db)
            .or_default()
            .insert(key.as_bytes().to_vec(), Entry::new(Value::Str(data.to_vec())));
    }

    pub fn put_raw_field(&self, db: u32, key: &str, field: &str, data: &[u8]) {
        let mut dbs = self.shared.dbs.lock().unwrap();
        let entry = dbs
            .entry(db)
            .or_default()
            .entry(key.as_bytes().to_vec())
            .or_insert_with(|| Entry::new(Value::Hash(BTreeMap::new())));
        if let Value::Hash(fields) = &mut entry.value {
            fields.insert(field.as_bytes().to_vec(), data.to_vec());
        }
    }

    /// Expiry recorded for `key`, in milliseconds (relative or absolute as sent).
    pub fn expiry_ms(&self, db: u32, key: &str) -> Option<i64> {
        let dbs = self.shared.dbs.lock().unwrap();
        dbs.get(&db)
            .and_then(|keys| keys.get(key.as_bytes()))
            .and_then(|entry| entry.expiry_ms)
    }

    pub fn key_count(&self, db: u32) -> usize {
        let dbs = self.shared.dbs.lock().unwrap();
        dbs.get(&db).map(HashMap::len).unwrap_or(0)
    }
}

fn serve(shared: Arc<Shared>, stream: TcpStream) {
    let id = shared.next_id.fetch_add(1, Ordering::SeqCst);
    let (Ok(write_half), Ok(kill_half)) = (stream.try_clone(), stream.try_clone()) else {
        return;
    };
    shared.open.fetch_add(1, Ordering::SeqCst);
    shared.streams.lock().unwrap().insert(id, kill_half);

    let mut session = Session {
        id,
        db: 0,
        authed: shared.password.is_none(),
        subscriptions: HashSet::new(),
        writer: Arc::new(Mutex::new(write_half)),
    };
    let mut reader = BufReader::new(stream);
    while let Ok(Some(args)) = read_command(&mut reader) {
        if args.is_empty() {
            continue;
        }
        let quit = args[0].eq_ignore_ascii_case(b"QUIT");
        let reply = execute(&shared, &mut session, &args);
        let mut buf = Vec::new();
        reply.encode(&mut buf);
        if session.writer.lock().unwrap().write_all(&buf).is_err() || quit {
            break;
        }
    }

    let mut channels = shared.channels.lock().unwrap();
    for channel in &session.subscriptions {
        if let Some(writers) = channels.get_mut(channel) {
            writers.retain(|(owner, _)| *owner != id);
        }
    }
    drop(channels);
    shared.streams.lock().unwrap().remove(&id);
    shared.open.fetch_sub(1, Ordering::SeqCst);
}

fn execute(shared: &Shared, session: &mut Session, args: &[Vec<u8>]) -> Reply {
    let command = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();
    let rest = &args[1..];

    if command == "AUTH" {
        let given = rest.first().map(|p| String::from_utf8_lossy(p).into_owned());
        return match (&shared.password, given) {
            (Some(expected), Some(given)) if *expected == given => {
                session.authed = true;
                Reply::ok()
            }
            (None, _) => Reply::Error("ERR Client sent AUTH, but no password is set".to_string()),
            _ => Reply::Error("WRONGPASS invalid username-password pair".to_string()),
        };
    }
    if !session.authed {
        return Reply::Error("NOAUTH Authentication required.".to_string());
    }

    match command.as_str() {
        "PING" => Reply::Simple("PONG"),
        "QUIT" => Reply::ok(),
        "CLIENT" => {
            if let Some(name) = rest.get(1) {
                shared
                    .client_names
                    .lock()
                    .unwrap()
                    .push(String::from_utf8_lossy(name).into_owned());
            }
            Reply::ok()
        }
        "SELECT" => match rest.first().and_then(|index| parse::<u32>(index)) {
            Some(index) => {
                shared.selects.fetch_add(1, Ordering::SeqCst);
                session.db = index;
                Reply::ok()
            }
            None => Reply::Error("ERR invalid DB index".to_string()),
        },
        "PUBLISH" => publish(shared, rest),
        "SUBSCRIBE" => subscribe(shared, session, rest),
        "UNSUBSCRIBE" => unsubscribe(shared, session, rest),
        _ => {
            let mut dbs = shared.dbs.lock().unwrap();
            let keys = dbs.entry(session.db).or_default();
            keyspace_command(keys, &command, rest)
        }
    }
}

fn keyspace_command(keys: &mut Keyspace, command: &str, args: &[Vec<u8>]) -> Reply {
    let arity_error = || {
        Reply::Error(format!(
            "ERR wrong number of arguments for '{}'",
            command.to_lowercase()
        ))
    };
    let Some(key) = args.first().cloned() else {
        return arity_error();
    };

    match command {
        // keys
        "DEL" => Reply::Int(args.iter().filter(|key| keys.remove(*key).is_some()).count() as i64),
        "EXISTS" => Reply::Int(args.iter().filter(|key| keys.contains_key(*key)).count() as i64),
        "EXPIRE" | "PEXPIRE" | "EXPIREAT" | "PEXPIREAT" => {
            let Some(amount) = args.get(1).and_then(|a| parse::<i64>(a)) else {
                return Reply::Error("ERR value is not an integer or out of range".to_string());
            };
            let millis = if command.starts_with('P') { amount } else { amount * 1000 };
            match keys.get_mut(&key) {
                Some(entry) => {
                    entry.expiry_ms = Some(millis);
                    Reply::Int(1)
                }
                None => Reply::Int(0),
            }
        }
        "PERSIST" => match keys.get_mut(&key) {
            Some(entry) => Reply::bool(entry.expiry_ms.take().is_some()),
            None => Reply::Int(0),
        },
        "DUMP" => match keys.get(&key) {
            Some(Entry { value: Value::Str(data), .. }) => {
                let mut dumped = b"\x00".to_vec();
                dumped.extend_from_slice(data);
                Reply::Bulk(Some(dumped))
            }
            Some(_) => Reply::bulk(b"\x04"),
            None => Reply::Bulk(None),
        },
        "SCAN" => {
            let cursor = parse::<usize>(&key).unwrap_or(0);
            let pattern = option_value(&args[1..], b"MATCH").unwrap_or(b"*".to_vec());
            let mut names: Vec<Vec<u8>> = keys.keys().cloned().collect();
            names.sort();
            scan_reply(cursor, &names, |name| {
                glob_match(&pattern, name).then(|| vec![Reply::bulk(name)])
            })
        }

        // strings
        "GET" => match keys.get(&key) {
            Some(Entry { value: Value::Str(data), .. }) => Reply::bulk(data),
            Some(_) => Reply::wrong_type(),
            None => Reply::Bulk(None),
        },
        "MGET" => Reply::Array(
            args.iter()
                .map(|key| match keys.get(key) {
                    Some(Entry { value: Value::Str(data), .. }) => Reply::bulk(data),
                    _ => Reply::Bulk(None),
                })
                .collect(),
        ),
        "SET" => {
            let Some(data) = args.get(1).cloned() else {
                return arity_error();
            };
            let mut expiry_ms = None;
            let mut nx = false;
            let mut xx = false;
            let mut options = args[2..].iter();
            while let Some(option) = options.next() {
                match String::from_utf8_lossy(option).to_ascii_uppercase().as_str() {
                    "NX" => nx = true,
                    "XX" => xx = true,
                    unit @ ("EX" | "PX") => {
                        let Some(amount) = options.next().and_then(|a| parse::<i64>(a)) else {
                            return Reply::Error("ERR syntax error".to_string());
                        };
                        expiry_ms = Some(if unit == "EX" { amount * 1000 } else { amount });
                    }
                    _ => return Reply::Error("ERR syntax error".to_string()),
                }
            }
            let exists = keys.contains_key(&key);
            if (nx && exists) || (xx && !exists) {
                return Reply::Bulk(None);
            }
            keys.insert(key, Entry { value: Value::Str(data), expiry_ms });
            Reply::ok()
        }
        "INCRBY" | "DECRBY" => {
            let Some(by) = args.get(1).and_then(|a| parse::<i64>(a)) else {
                return Reply::Error("ERR value is not an integer or out of range".to_string());
            };
            let by = if command == "DECRBY" { -by } else { by };
            let entry = keys.entry(key).or_insert_with(|| Entry::new(Value::Str(b"0".to_vec())));
            let Value::Str(data) = &mut entry.value else {
                return Reply::wrong_type();
            };
            let Some(current) = parse::<i64>(data) else {
                return Reply::Error("ERR value is not an integer or out of range".to_string());
            };
            let next = current + by;
            *data = next.to_string().into_bytes();
            Reply::Int(next)
        }

        // hashes
        "HSET" | "HSETNX" => {
            let pairs = &args[1..];
            if pairs.is_empty() || pairs.len() % 2 != 0 {
                return arity_error();
            }
            let entry = keys.entry(key).or_insert_with(|| Entry::new(Value::Hash(BTreeMap::new())));
            let Value::Hash(fields) = &mut entry.value else {
                return Reply::wrong_type();
            };
            if command == "HSETNX" {
                if fields.contains_key(&pairs[0]) {
                    return Reply::Int(0);
                }
                fields.insert(pairs[0].clone(), pairs[1].clone());
                return Reply::Int(1);
            }
            let mut created = 0;
            for pair in pairs.chunks(2) {
                if fields.insert(pair[0].clone(), pair[1].clone()).is_none() {
                    created += 1;
                }
            }
            Reply::Int(created)
        }
        "HGET" | "HMGET" | "HGETALL" | "HDEL" | "HEXISTS" | "HKEYS" | "HVALS" | "HLEN"
        | "HSCAN" => {
            let empty = BTreeMap::new();
            let fields = match keys.get(&key) {
                Some(Entry { value: Value::Hash(fields), .. }) => fields,
                Some(_) => return Reply::wrong_type(),
                None => &empty,
            };
            let field = args.get(1);
            match command {
                "HGET" => Reply::Bulk(field.and_then(|f| fields.get(f)).cloned()),
                "HMGET" => Reply::Array(
                    args[1..]
                        .iter()
                        .map(|f| Reply::Bulk(fields.get(f).cloned()))
                        .collect(),
                ),
                "HGETALL" => Reply::Array(
                    fields
                        .iter()
                        .flat_map(|(f, v)| [Reply::bulk(f), Reply::bulk(v)])
                        .collect(),
                ),
                "HEXISTS" => Reply::bool(field.map(|f| fields.contains_key(f)).unwrap_or(false)),
                "HKEYS" => Reply::Array(fields.keys().map(|f| Reply::bulk(f)).collect()),
                "HVALS" => Reply::Array(fields.values().map(|v| Reply::bulk(v)).collect()),
                "HLEN" => Reply::Int(fields.len() as i64),
                "HSCAN" => {
                    let cursor = field.and_then(|c| parse::<usize>(c)).unwrap_or(0);
                    let pattern = option_value(&args[1..], b"MATCH").unwrap_or(b"*".to_vec());
                    let names: Vec<Vec<u8>> = fields.keys().cloned().collect();
                    scan_reply(cursor, &names, |name| {
                        glob_match(&pattern, name)
                            .then(|| vec![Reply::bulk(name), Reply::bulk(&fields[name])])
                    })
                }
                _ => {
                    let removed = match keys.get_mut(&key) {
                        Some(Entry { value: Value::Hash(fields), .. }) => {
                            args[1..].iter().filter(|f| fields.remove(*f).is_some()).count()
                        }
                        _ => 0,
                    };
                    remove_if_empty(keys, &key);
                    Reply::Int(removed as i64)
                }
            }
        }
        "HINCRBY" | "HINCRBYFLOAT" => {
            let (Some(field), Some(by)) = (args.get(1).cloned(), args.get(2)) else {
                return arity_error();
            };
            let entry = keys.entry(key).or_insert_with(|| Entry::new(Value::Hash(BTreeMap::new())));
            let Value::Hash(fields) = &mut entry.value else {
                return Reply::wrong_type();
            };
            let current = fields.get(&field).cloned().unwrap_or_else(|| b"0".to_vec());
            if command == "HINCRBY" {
                let (Some(current), Some(by)) = (parse::<i64>(&current), parse::<i64>(by)) else {
                    return Reply::Error("ERR hash value is not an integer".to_string());
                };
                fields.insert(field, (current + by).to_string().into_bytes());
                Reply::Int(current + by)
            } else {
                let (Some(current), Some(by)) = (parse::<f64>(&current), parse::<f64>(by)) else {
                    return Reply::Error("ERR hash value is not a float".to_string());
                };
                let next = (current + by).to_string().into_bytes();
                fields.insert(field, next.clone());
                Reply::Bulk(Some(next))
            }
        }

        // sets
        "SADD" | "SREM" | "SCARD" | "SISMEMBER" | "SPOP" => {
            if command == "SADD" {
                let entry = keys
                    .entry(key.clone())
                    .or_insert_with(|| Entry::new(Value::Set(BTreeSet::new())));
                let Value::Set(members) = &mut entry.value else {
                    return Reply::wrong_type();
                };
                let added = args[1..].iter().filter(|m| members.insert((*m).clone())).count();
                return Reply::Int(added as i64);
            }
            let reply = match keys.get_mut(&key) {
                Some(Entry { value: Value::Set(members), .. }) => match command {
                    "SREM" => {
                        Reply::Int(args[1..].iter().filter(|m| members.remove(*m)).count() as i64)
                    }
                    "SCARD" => Reply::Int(members.len() as i64),
                    "SISMEMBER" => {
                        Reply::bool(args.get(1).map(|m| members.contains(m)).unwrap_or(false))
                    }
                    _ => Reply::Bulk(members.pop_first()),
                },
                Some(_) => return Reply::wrong_type(),
                None if command == "SPOP" => Reply::Bulk(None),
                None => Reply::Int(0),
            };
            remove_if_empty(keys, &key);
            reply
        }

        // lists
        "LPUSH" | "RPUSH" | "LPUSHX" | "RPUSHX" => {
            if command.ends_with('X') && !keys.contains_key(&key) {
                return Reply::Int(0);
            }
            let entry = keys.entry(key).or_insert_with(|| Entry::new(Value::List(VecDeque::new())));
            let Value::List(items) = &mut entry.value else {
                return Reply::wrong_type();
            };
            for item in &args[1..] {
                if command.starts_with('L') {
                    items.push_front(item.clone());
                } else {
                    items.push_back(item.clone());
                }
            }
            Reply::Int(items.len() as i64)
        }
        "LPOP" | "RPOP" => {
            let reply = match keys.get_mut(&key) {
                Some(Entry { value: Value::List(items), .. }) => Reply::Bulk(if command == "LPOP" {
                    items.pop_front()
                } else {
                    items.pop_back()
                }),
                Some(_) => return Reply::wrong_type(),
                None => Reply::Bulk(None),
            };
            remove_if_empty(keys, &key);
            reply
        }

        other => Reply::Error(format!("ERR unknown command '{}'", other.to_lowercase())),
    }
}

fn publish(shared: &Shared, args: &[Vec<u8>]) -> Reply {
    let (Some(channel), Some(payload)) = (args.first(), args.get(1)) else {
        return Reply::Error("ERR wrong number of arguments for 'publish'".to_string());
    };
    let mut frame = Vec::new();
    Reply::Array(vec![
        Reply::bulk(b"message"),
        Reply::bulk(channel),
        Reply::bulk(payload),
    ])
    .encode(&mut frame);

    let channels = shared.channels.lock().unwrap();
    let mut delivered = 0;
    for (_, writer) in channels.get(channel).into_iter().flatten() {
        if writer.lock().unwrap().write_all(&frame).is_ok() {
            delivered += 1;
        }
    }
    Reply::Int(delivered)
}

fn subscribe(shared: &Shared, session: &mut Session, args: &[Vec<u8>]) -> Reply {
    let mut channels = shared.channels.lock().unwrap();
    let mut acks = Vec::new();
    for channel in args {
        if session.subscriptions.insert(channel.clone()) {
            channels
                .entry(channel.clone())
                .or_default()
                .push((session.id, session.writer.clone()));
        }
        acks.push(Reply::Array(vec![
            Reply::bulk(b"subscribe"),
            Reply::bulk(channel),
            Reply::Int(session.subscriptions.len() as i64),
        ]));
    }
    Reply::Frames(acks)
}

fn unsubscribe(shared: &Shared, session: &mut Session, args: &[Vec<u8>]) -> Reply {
    let mut channels = shared.channels.lock().unwrap();
    let mut acks = Vec::new();
    for channel in args {
        if session.subscriptions.remove(channel) {
            if let Some(writers) = channels.get_mut(channel) {
                writers.retain(|(owner, _)| *owner != session.id);
            }
        }
        acks.push(Reply::Array(vec![
            Reply::bulk(b"unsubscribe"),
            Reply::bulk(channel),
            Reply::Int(session.subscriptions.len() as i64),
        ]));
    }
    Reply::Frames(acks)
}

/// Builds a `[cursor, items]` page over `names`, PAGE names at a time.
fn scan_reply<F>(cursor: usize, names: &[Vec<u8>], mut select: F) -> Reply
where
    F: FnMut(&Vec<u8>) -> Option<Vec<Reply>>,
{
    let end = (cursor + PAGE).min(names.len());
    let items = names
        .get(cursor..end)
        .unwrap_or(&[])
        .iter()
        .filter_map(&mut select)
        .flatten()
        .collect();
    let next = if end >= names.len() { 0 } else { end };
    Reply::Array(vec![Reply::bulk(next.to_string().as_bytes()), Reply::Array(items)])
}

fn remove_if_empty(keys: &mut Keyspace, key: &[u8]) {
    let empty = match keys.get(key) {
        Some(Entry { value: Value::Hash(fields), .. }) => fields.is_empty(),
        Some(Entry { value: Value::Set(members), .. }) => members.is_empty(),
        Some(Entry { value: Value::List(items), .. }) => items.is_empty(),
        _ => false,
    };
    if empty {
        keys.remove(key);
    }
}

fn option_value(args: &[Vec<u8>], name: &[u8]) -> Option<Vec<u8>> {
    args.windows(2)
        .find(|pair| pair[0].eq_ignore_ascii_case(name))
        .map(|pair| pair[1].clone())
}

/// Glob with `*` and `?`.
fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    match (pattern.first(), text.first()) {
        (None, None) => true,
        (Some(b'*'), _) => {
            glob_match(&pattern[1..], text)
                || (!text.is_empty() && glob_match(pattern, &text[1..]))
        }
        (Some(b'?'), Some(_)) => glob_match(&pattern[1..], &text[1..]),
        (Some(p), Some(t)) if p == t => glob_match(&pattern[1..], &text[1..]),
        _ => false,
    }
}

fn parse<T: std::str::FromStr>(data: &[u8]) -> Option<T> {
    std::str::from_utf8(data).ok()?.parse().ok()
}

fn read_command(reader: &mut BufReader<TcpStream>) -> io::Result<Option<Vec<Vec<u8>>>> {
    let mut line = Vec::new();
    if reader.read_until(b'\n', &mut line)? == 0 {
        return Ok(None);
    }
    let header = trim_crlf(&line);
    if header.first() != Some(&b'*') {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "expected array"));
    }
    let count = parse::<usize>(&header[1..])
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "count"))?;
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "eof"));
        }
        let header = trim_crlf(&line);
        if header.first() != Some(&b'$') {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "expected bulk"));
        }
        let len = parse::<usize>(&header[1..])
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "len"))?;
        let mut data = vec![0u8; len + 2];
        reader.read_exact(&mut data)?;
        data.truncate(len);
        args.push(data);
    }
    Ok(Some(args))
}

fn trim_crlf(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r\n").unwrap_or(line)
}
