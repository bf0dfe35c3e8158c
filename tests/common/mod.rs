//! In-process fake MongoDB server for integration tests
//!
//! Speaks just enough OP_MSG to exercise the client: `isMaster`, SCRAM-SHA-1 and
//! SCRAM-SHA-256 via `saslStart`/`saslContinue`, `createUser`, `dropUser` and
//! `usersInfo`. Users live
//! in memory and every command is logged so tests can assert on ordering.

#![allow(dead_code)]

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bytes::{Buf, BytesMut};
use hmac::{Hmac, Mac};
use mongo_user_admin::client::{ClientConfig, ServerAddress};
use mongo_user_admin::connection::{Dialer, MakeDialer, Transport};
use mongo_user_admin::protocol::{decode_message, encode_message, Bson, Document, OpMsg};
use mongo_user_admin::{Error, Result};
use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

type HmacSha1 = Hmac<Sha1>;
type HmacSha256 = Hmac<Sha256>;

const SALT: &[u8] = b"fake-mongod-salt";
const ITERATIONS: u32 = 4096;

/// Administrative login accepted by servers built with [`FakeOptions::with_admin`]
pub const ADMIN_USER: &str = "admin";
pub const ADMIN_PASSWORD: &str = "secret";

/// Path to a file under `tests/fixtures`
pub fn fixture(name: &str) -> String {
    format!("{}/tests/fixtures/{}", env!("CARGO_MANIFEST_DIR"), name)
}

/// How the fake server presents itself
#[derive(Debug, Clone)]
pub struct FakeOptions {
    pub admin: Option<(String, String)>,
    pub writable: bool,
    pub set_name: Option<String>,
    pub primary_hint: Option<String>,
    pub max_wire_version: i32,
    pub tls: bool,
    /// Listed in `saslSupportedMechs`; empty means the field is left out and only
    /// SCRAM-SHA-1 is accepted, like a pre-4.0 server
    pub mechanisms: Vec<String>,
    /// Read `saslStart` but never answer it
    pub stall_sasl: bool,
}

impl Default for FakeOptions {
    fn default() -> Self {
        Self {
            admin: None,
            writable: true,
            set_name: None,
            primary_hint: None,
            max_wire_version: 17,
            tls: false,
            mechanisms: vec!["SCRAM-SHA-1".to_string(), "SCRAM-SHA-256".to_string()],
            stall_sasl: false,
        }
    }
}

impl FakeOptions {
    pub fn with_admin(mut self) -> Self {
        self.admin = Some((ADMIN_USER.to_string(), ADMIN_PASSWORD.to_string()));
        self
    }

    pub fn secondary(mut self, primary_hint: Option<String>) -> Self {
        self.writable = false;
        self.primary_hint = primary_hint;
        self
    }

    pub fn set_name(mut self, name: &str) -> Self {
        self.set_name = Some(name.to_string());
        self
    }

    pub fn tls(mut self) -> Self {
        self.tls = true;
        self
    }

    pub fn mechanisms(mut self, mechanisms: &[&str]) -> Self {
        self.mechanisms = mechanisms.iter().map(|m| m.to_string()).collect();
        self
    }

    pub fn stall_sasl(mut self) -> Self {
        self.stall_sasl = true;
        self
    }
}

/// A user as stored by the fake server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredUser {
    pub password: String,
    pub roles: Vec<(String, String)>,
}

#[derive(Debug, Default)]
pub struct ServerState {
    /// (database, username) -> user
    pub users: BTreeMap<(String, String), StoredUser>,
    /// `"<command> <db>"` for every command received, in order
    pub log: Vec<String>,
    /// Mechanism named by every `saslStart`, in order
    pub sasl_mechanisms: Vec<String>,
    pub connections_opened: usize,
    pub connections_active: usize,
}

/// Handle to a running fake server
pub struct FakeServer {
    pub addr: SocketAddr,
    pub state: Arc<Mutex<ServerState>>,
    options: FakeOptions,
}

impl FakeServer {
    pub async fn start(options: FakeOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(ServerState::default()));
        let acceptor = options.tls.then(tls_acceptor);

        let task_state = state.clone();
        let task_options = options.clone();
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    return;
                };
                let state = task_state.clone();
                let options = task_options.clone();
                let acceptor = acceptor.clone();
                tokio::spawn(async move {
                    state.lock().unwrap().connections_opened += 1;
                    state.lock().unwrap().connections_active += 1;
                    match acceptor {
                        Some(acceptor) => {
                            if let Ok(stream) = acceptor.accept(socket).await {
                                serve(stream, &state, &options).await;
                            }
                        }
                        None => serve(socket, &state, &options).await,
                    }
                    state.lock().unwrap().connections_active -= 1;
                });
            }
        });

        Self {
            addr,
            state,
            options,
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// `mongodb://` URL with the admin login (if any), host `host`
    pub fn url_for(&self, host: &str) -> String {
        match &self.options.admin {
            Some((user, pass)) => {
                format!("mongodb://{}:{}@{}:{}/admin", user, pass, host, self.port())
            }
            None => format!("mongodb://{}:{}/admin", host, self.port()),
        }
    }

    pub fn url(&self) -> String {
        self.url_for("127.0.0.1")
    }

    pub fn seed_user(&self, database: &str, username: &str, password: &str) {
        self.state.lock().unwrap().users.insert(
            (database.to_string(), username.to_string()),
            StoredUser {
                password: password.to_string(),
                roles: vec![("readWrite".to_string(), database.to_string())],
            },
        );
    }

    pub fn user(&self, database: &str, username: &str) -> Option<StoredUser> {
        self.state
            .lock()
            .unwrap()
            .users
            .get(&(database.to_string(), username.to_string()))
            .cloned()
    }

    /// Logged commands, without handshake and SASL traffic
    pub fn user_commands(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .log
            .iter()
            .filter(|c| !c.starts_with("isMaster") && !c.starts_with("sasl"))
            .cloned()
            .collect()
    }

    pub fn log(&self) -> Vec<String> {
        self.state.lock().unwrap().log.clone()
    }

    pub fn sasl_mechanisms(&self) -> Vec<String> {
        self.state.lock().unwrap().sasl_mechanisms.clone()
    }

    pub fn connections_opened(&self) -> usize {
        self.state.lock().unwrap().connections_opened
    }

    /// Wait until every client connection has been closed
    pub async fn wait_idle(&self) -> bool {
        for _ in 0..100 {
            if self.state.lock().unwrap().connections_active == 0 {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

fn tls_acceptor() -> TlsAcceptor {
    let certs = rustls_pemfile::certs(&mut io::BufReader::new(
        std::fs::read(fixture("server.pem")).unwrap().as_slice(),
    ))
    .collect::<std::result::Result<Vec<_>, _>>()
    .unwrap();
    let key = rustls_pemfile::private_key(&mut io::BufReader::new(
        std::fs::read(fixture("server.key")).unwrap().as_slice(),
    ))
    .unwrap()
    .unwrap();

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .unwrap();
    TlsAcceptor::from(Arc::new(config))
}

/// Per-connection SASL progress
#[derive(Default)]
struct Conversation {
    mechanism: String,
    username: String,
    client_first_bare: String,
    server_first: String,
    combined_nonce: String,
    authenticated: bool,
}

async fn serve<S>(mut stream: S, state: &Arc<Mutex<ServerState>>, options: &FakeOptions)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = BytesMut::with_capacity(4096);
    let mut conversation = Conversation::default();
    let mut next_id = 1000;

    loop {
        let request = loop {
            match decode_message(&mut buf) {
                Ok((msg, consumed)) => {
                    buf.advance(consumed);
                    break msg;
                }
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {}
                Err(_) => return,
            }
            match stream.read_buf(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            }
        };

        if options.stall_sasl && request.body.first_key() == Some("saslStart") {
            state.lock().unwrap().log.push("saslStart (stalled)".to_string());
            while matches!(stream.read_buf(&mut buf).await, Ok(n) if n > 0) {}
            return;
        }

        let body = handle(&request.body, state, options, &mut conversation);
        next_id += 1;
        let reply = OpMsg::reply(next_id, request.request_id, body);
        let bytes = encode_message(&reply).unwrap();
        if stream.write_all(&bytes).await.is_err() {
            return;
        }
    }
}

fn handle(
    cmd: &Document,
    state: &Arc<Mutex<ServerState>>,
    options: &FakeOptions,
    conversation: &mut Conversation,
) -> Document {
    let name = cmd.first_key().unwrap_or("").to_string();
    let db = cmd.get_str("$db").unwrap_or("").to_string();
    state.lock().unwrap().log.push(format!("{} {}", name, db));

    match name.as_str() {
        "isMaster" | "hello" => hello_reply(cmd, options),
        "saslStart" => {
            let mechanism = cmd.get_str("mechanism").unwrap_or("").to_string();
            state.lock().unwrap().sasl_mechanisms.push(mechanism);
            sasl_start(cmd, options, conversation)
        }
        "saslContinue" => sasl_continue(cmd, options, conversation),
        "createUser" | "dropUser" | "usersInfo" => {
            if options.admin.is_some() && !conversation.authenticated {
                let message = format!("command {} requires authentication", name);
                return error(13, "Unauthorized", &message);
            }
            let mut state = state.lock().unwrap();
            match name.as_str() {
                "createUser" => create_user(cmd, &db, &mut state),
                "dropUser" => drop_user(cmd, &db, &mut state),
                _ => users_info(cmd, &db, &state),
            }
        }
        other => error(59, "CommandNotFound", &format!("no such command: '{}'", other)),
    }
}

fn hello_reply(cmd: &Document, options: &FakeOptions) -> Document {
    let mut reply = Document::new()
        .with("ismaster", options.writable)
        .with("isWritablePrimary", options.writable)
        .with("maxWireVersion", options.max_wire_version)
        .with("minWireVersion", 0i32);
    if let Some(name) = &options.set_name {
        reply.insert("setName", name.as_str());
    }
    if let Some(primary) = &options.primary_hint {
        reply.insert("primary", primary.as_str());
    }
    if cmd.contains_key("saslSupportedMechs") && !options.mechanisms.is_empty() {
        let mechs: Vec<Bson> = options.mechanisms.iter().map(|m| Bson::from(m.as_str())).collect();
        reply.insert("saslSupportedMechs", mechs);
    }
    reply.with("ok", 1.0)
}

fn sasl_start(cmd: &Document, options: &FakeOptions, conv: &mut Conversation) -> Document {
    let mechanism = cmd.get_str("mechanism").unwrap_or("");
    let accepted = if options.mechanisms.is_empty() {
        mechanism == "SCRAM-SHA-1"
    } else {
        options.mechanisms.iter().any(|m| m == mechanism)
    };
    if !accepted {
        return error(2, "BadValue", "unsupported mechanism");
    }
    let payload = String::from_utf8(cmd.get_binary("payload").unwrap_or_default().to_vec())
        .unwrap_or_default();
    let Some(bare) = payload.strip_prefix("n,,") else {
        return error(18, "AuthenticationFailed", "Authentication failed.");
    };

    let mut username = String::new();
    let mut client_nonce = String::new();
    for attr in bare.split(',') {
        if let Some(v) = attr.strip_prefix("n=") {
            username = v.replace("=2C", ",").replace("=3D", "=");
        } else if let Some(v) = attr.strip_prefix("r=") {
            client_nonce = v.to_string();
        }
    }

    match &options.admin {
        Some((user, _)) if *user == username => {}
        _ => return error(18, "AuthenticationFailed", "Authentication failed."),
    }

    conv.mechanism = mechanism.to_string();
    conv.username = username;
    conv.client_first_bare = bare.to_string();
    conv.combined_nonce = format!("{}fakeserver", client_nonce);
    conv.server_first = format!(
        "r={},s={},i={}",
        conv.combined_nonce,
        BASE64.encode(SALT),
        ITERATIONS
    );

    Document::new()
        .with("conversationId", 1i32)
        .with("done", false)
        .with("payload", binary(conv.server_first.as_bytes()))
        .with("ok", 1.0)
}

fn sasl_continue(cmd: &Document, options: &FakeOptions, conv: &mut Conversation) -> Document {
    let payload = String::from_utf8(cmd.get_binary("payload").unwrap_or_default().to_vec())
        .unwrap_or_default();

    if conv.authenticated {
        // Trailing empty round
        return Document::new()
            .with("conversationId", 1i32)
            .with("done", true)
            .with("payload", binary(b""))
            .with("ok", 1.0);
    }

    let Some((without_proof, proof)) = payload.rsplit_once(",p=") else {
        return error(18, "AuthenticationFailed", "Authentication failed.");
    };
    if without_proof != format!("c=biws,r={}", conv.combined_nonce) {
        return error(18, "AuthenticationFailed", "Authentication failed.");
    }

    let sha1 = conv.mechanism == "SCRAM-SHA-1";
    let password = options.admin.as_ref().map(|(_, p)| p.as_str()).unwrap_or("");
    let salted = salted_password(sha1, &conv.username, password);
    let client_key = hmac(sha1, &salted, b"Client Key");
    let stored_key = digest(sha1, &client_key);
    let server_key = hmac(sha1, &salted, b"Server Key");
    let auth_message = format!(
        "{},{},{}",
        conv.client_first_bare, conv.server_first, without_proof
    );
    let client_signature = hmac(sha1, &stored_key, auth_message.as_bytes());

    let Ok(proof) = BASE64.decode(proof) else {
        return error(18, "AuthenticationFailed", "Authentication failed.");
    };
    if proof.len() != client_signature.len() {
        return error(18, "AuthenticationFailed", "Authentication failed.");
    }
    let recovered: Vec<u8> = proof
        .iter()
        .zip(&client_signature)
        .map(|(a, b)| a ^ b)
        .collect();
    if digest(sha1, &recovered) != stored_key {
        return error(18, "AuthenticationFailed", "Authentication failed.");
    }

    conv.authenticated = true;
    let server_signature = hmac(sha1, &server_key, auth_message.as_bytes());
    let server_final = format!("v={}", BASE64.encode(server_signature));

    // Mimic servers that ignore skipEmptyExchange: one more round before done
    Document::new()
        .with("conversationId", 1i32)
        .with("done", false)
        .with("payload", binary(server_final.as_bytes()))
        .with("ok", 1.0)
}

fn create_user(cmd: &Document, db: &str, state: &mut ServerState) -> Document {
    let username = cmd.get_str("createUser").unwrap_or("").to_string();
    let key = (db.to_string(), username.clone());
    if state.users.contains_key(&key) {
        return error(
            51003,
            "Location51003",
            &format!("User \"{}@{}\" already exists", username, db),
        );
    }

    let roles = cmd
        .get_array("roles")
        .unwrap_or_default()
        .iter()
        .filter_map(Bson::as_document)
        .map(|r| {
            (
                r.get_str("role").unwrap_or("").to_string(),
                r.get_str("db").unwrap_or("").to_string(),
            )
        })
        .collect();
    state.users.insert(
        key,
        StoredUser {
            password: cmd.get_str("pwd").unwrap_or("").to_string(),
            roles,
        },
    );
    Document::new().with("ok", 1.0)
}

fn drop_user(cmd: &Document, db: &str, state: &mut ServerState) -> Document {
    let username = cmd.get_str("dropUser").unwrap_or("");
    match state.users.remove(&(db.to_string(), username.to_string())) {
        Some(_) => Document::new().with("ok", 1.0),
        None => error(
            11,
            "UserNotFound",
            &format!("User '{}@{}' not found", username, db),
        ),
    }
}

fn users_info(cmd: &Document, db: &str, state: &ServerState) -> Document {
    let username = cmd.get_str("usersInfo").unwrap_or("");
    let users: Vec<Bson> = state
        .users
        .get(&(db.to_string(), username.to_string()))
        .map(|user| {
            let roles: Vec<Bson> = user
                .roles
                .iter()
                .map(|(role, role_db)| {
                    Bson::Document(
                        Document::new()
                            .with("role", role.as_str())
                            .with("db", role_db.as_str()),
                    )
                })
                .collect();
            Bson::Document(
                Document::new()
                    .with("user", username)
                    .with("db", db)
                    .with("roles", roles),
            )
        })
        .into_iter()
        .collect();
    Document::new().with("users", users).with("ok", 1.0)
}

fn error(code: i32, code_name: &str, message: &str) -> Document {
    Document::new()
        .with("ok", 0.0)
        .with("errmsg", message)
        .with("code", code)
        .with("codeName", code_name)
}

fn binary(bytes: &[u8]) -> Bson {
    Bson::Binary {
        subtype: 0,
        bytes: bytes.to_vec(),
    }
}

/// SCRAM-SHA-1 runs PBKDF2 over `hex(md5("user:mongo:password"))`
fn salted_password(sha1: bool, username: &str, password: &str) -> Vec<u8> {
    if sha1 {
        let digest: String = Md5::digest(format!("{}:mongo:{}", username, password).as_bytes())
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect();
        let mut salted = [0u8; 20];
        pbkdf2::pbkdf2::<HmacSha1>(digest.as_bytes(), SALT, ITERATIONS, &mut salted).unwrap();
        salted.to_vec()
    } else {
        let mut salted = [0u8; 32];
        pbkdf2::pbkdf2::<HmacSha256>(password.as_bytes(), SALT, ITERATIONS, &mut salted).unwrap();
        salted.to_vec()
    }
}

fn digest(sha1: bool, data: &[u8]) -> Vec<u8> {
    if sha1 {
        Sha1::digest(data).to_vec()
    } else {
        Sha256::digest(data).to_vec()
    }
}

fn hmac(sha1: bool, key: &[u8], data: &[u8]) -> Vec<u8> {
    if sha1 {
        let mut mac = HmacSha1::new_from_slice(key).unwrap();
        mac.update(data);
        mac.finalize().into_bytes().to_vec()
    } else {
        let mut mac = HmacSha256::new_from_slice(key).unwrap();
        mac.update(data);
        mac.finalize().into_bytes().to_vec()
    }
}

/// Plain-TCP dialer for talking to non-TLS fake servers.
///
/// Dials share a counter with their factory; once `fail_from` dials have been made
/// every further dial fails with a connect error.
#[derive(Debug, Clone)]
pub struct PlainDialer {
    dials: Arc<AtomicUsize>,
    fail_from: Option<usize>,
}

impl Dialer for PlainDialer {
    async fn dial(&self, addr: &ServerAddress) -> Result<Transport> {
        let n = self.dials.fetch_add(1, Ordering::SeqCst);
        if self.fail_from.is_some_and(|limit| n >= limit) {
            return Err(Error::Connect(format!("{}: simulated outage", addr)));
        }
        Transport::connect_tcp(&addr.host, addr.port)
            .await
            .map_err(|e| Error::Connect(format!("{}: {}", addr, e)))
    }
}

/// Factory for [`PlainDialer`]s
#[derive(Debug, Clone, Default)]
pub struct PlainDialerFactory {
    pub dials: Arc<AtomicUsize>,
    pub fail_from: Option<usize>,
}

impl PlainDialerFactory {
    /// Every dial after the first `n` fails
    pub fn failing_after(n: usize) -> Self {
        Self {
            dials: Arc::default(),
            fail_from: Some(n),
        }
    }

    pub fn dial_count(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

impl MakeDialer for PlainDialerFactory {
    type Dialer = PlainDialer;

    fn make_dialer(&self, _config: &ClientConfig) -> PlainDialer {
        PlainDialer {
            dials: self.dials.clone(),
            fail_from: self.fail_from,
        }
    }
}

/// Log sink for capturing `tracing` output in tests
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    pub fn dispatch(&self) -> tracing::Dispatch {
        let sink = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(move || sink.clone())
            .finish();
        tracing::Dispatch::new(subscriber)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
