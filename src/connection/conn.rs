//! Core connection type
//!
//! A [`Connection`] owns one transport to one server and speaks OP_MSG over it:
//! the `isMaster` handshake, the SCRAM conversation and plain commands. It knows
//! nothing about topology; picking which server to talk to is the session's job.

use super::state::ConnectionState;
use super::transport::Transport;
use crate::auth::scram::{Mechanism, ScramClient};
use crate::client::ServerAddress;
use crate::protocol::constants::{flags, MIN_WIRE_VERSION};
use crate::protocol::{decode_message, encode_message, Bson, CommandError, Document, OpMsg};
use crate::{Error, Result};
use bytes::{Buf, BytesMut};
use std::io;
use tracing::Instrument;

/// Extra `saslContinue` rounds tolerated after the server signature was verified
const MAX_EMPTY_SASL_ROUNDS: usize = 2;

/// Driver name reported in handshake metadata
const DRIVER_NAME: &str = "mongo-user-admin";

/// Credentials for authenticating a connection
#[derive(Clone, PartialEq, Eq)]
pub struct AuthCredentials {
    /// Username
    pub username: String,
    /// Password
    pub password: String,
    /// Database the user is defined on
    pub source: String,
    /// Mechanism forced by `authMechanism`; negotiated when `None`
    pub mechanism: Option<Mechanism>,
}

impl std::fmt::Debug for AuthCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthCredentials")
            .field("username", &self.username)
            .field("password", &"***")
            .field("source", &self.source)
            .field("mechanism", &self.mechanism)
            .finish()
    }
}

/// What the server said about itself during the handshake
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HelloReply {
    /// Whether the server accepts writes (`ismaster` / `isWritablePrimary`)
    pub writable_primary: bool,
    /// Highest wire protocol version the server speaks
    pub max_wire_version: i64,
    /// Replica set name, if the server is a set member
    pub set_name: Option<String>,
    /// Current primary as seen by this server (`host:port`)
    pub primary: Option<String>,
    /// Whether the server is an arbiter
    pub arbiter_only: bool,
    /// Mechanisms available for the user named in `saslSupportedMechs`
    pub sasl_supported_mechs: Option<Vec<String>>,
}

impl HelloReply {
    fn from_document(doc: &Document) -> Self {
        let writable_primary = doc
            .get_bool("isWritablePrimary")
            .or_else(|| doc.get_bool("ismaster"))
            .unwrap_or(false);

        let sasl_supported_mechs = doc.get_array("saslSupportedMechs").map(|mechs| {
            mechs
                .iter()
                .filter_map(Bson::as_str)
                .map(str::to_string)
                .collect()
        });

        Self {
            writable_primary,
            max_wire_version: doc.get_i64("maxWireVersion").unwrap_or(0),
            set_name: doc.get_str("setName").map(str::to_string),
            primary: doc.get_str("primary").map(str::to_string),
            arbiter_only: doc.get_bool("arbiterOnly").unwrap_or(false),
            sasl_supported_mechs,
        }
    }
}

/// MongoDB connection
pub struct Connection {
    transport: Option<Transport>,
    state: ConnectionState,
    read_buf: BytesMut,
    address: ServerAddress,
    next_request_id: i32,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("address", &self.address)
            .field("state", &self.state)
            .finish()
    }
}

impl Connection {
    /// Create connection from transport
    pub fn new(transport: Transport, address: ServerAddress) -> Self {
        Self {
            transport: Some(transport),
            state: ConnectionState::Initial,
            read_buf: BytesMut::with_capacity(8192),
            address,
            next_request_id: 1,
        }
    }

    /// Get current connection state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Address this connection was dialed to
    pub fn address(&self) -> &ServerAddress {
        &self.address
    }

    /// Perform the `isMaster` handshake.
    ///
    /// When `credentials` are given the server is asked which SASL mechanisms it
    /// has for that user. Leaves the connection in `Ready` when `credentials` is
    /// `None`, otherwise in `Handshaking` awaiting [`Connection::authenticate`].
    pub async fn handshake(
        &mut self,
        app_name: Option<&str>,
        credentials: Option<&AuthCredentials>,
    ) -> Result<HelloReply> {
        let address = self.address.to_string();
        async {
            self.state.transition(ConnectionState::Handshaking)?;

            let mut command = Document::new()
                .with("isMaster", 1i32)
                .with("helloOk", true)
                .with("client", client_metadata(app_name));
            if let Some(creds) = credentials {
                command.insert(
                    "saslSupportedMechs",
                    format!("{}.{}", creds.source, creds.username),
                );
            }

            let reply = self.round_trip("admin", command).await?;
            if let Some(err) = CommandError::from_reply(&reply) {
                return Err(Error::Connect(format!("handshake rejected: {}", err)));
            }

            let hello = HelloReply::from_document(&reply);
            if hello.max_wire_version < i64::from(MIN_WIRE_VERSION) {
                return Err(Error::Connect(format!(
                    "server reports maxWireVersion {}, at least {} (MongoDB 3.6) is required",
                    hello.max_wire_version, MIN_WIRE_VERSION
                )));
            }

            tracing::debug!(
                writable_primary = hello.writable_primary,
                max_wire_version = hello.max_wire_version,
                set_name = hello.set_name.as_deref().unwrap_or(""),
                "handshake complete"
            );

            if credentials.is_none() {
                self.state.transition(ConnectionState::Ready)?;
            }
            Ok(hello)
        }
        .instrument(tracing::debug_span!("handshake", address = %address))
        .await
    }

    /// Authenticate over `saslStart` / `saslContinue`.
    ///
    /// `hello` is the handshake reply. The mechanism is the one named in the
    /// credentials, or else the strongest SCRAM variant the server lists for the
    /// user. A requested mechanism the server does not list is refused locally.
    pub async fn authenticate(
        &mut self,
        credentials: &AuthCredentials,
        hello: &HelloReply,
    ) -> Result<()> {
        async {
            self.state.transition(ConnectionState::Authenticating)?;
            let mechanism = select_mechanism(credentials, hello)?;
            let label = mechanism.metric_label();

            let auth_start = std::time::Instant::now();
            crate::metrics::counters::auth_attempted(label);

            match self.handle_sasl(credentials, mechanism).await {
                Ok(()) => {
                    crate::metrics::counters::auth_successful(label);
                    crate::metrics::histograms::auth_duration(
                        label,
                        auth_start.elapsed().as_millis() as u64,
                    );
                }
                Err(e) => {
                    let reason = match &e {
                        Error::Authentication(_) => "rejected",
                        Error::Protocol(_) => "protocol",
                        _ => "transport",
                    };
                    crate::metrics::counters::auth_failed(label, reason);
                    return Err(e);
                }
            }

            self.state.transition(ConnectionState::Ready)?;
            tracing::debug!(mechanism = %mechanism, "authentication successful");
            Ok(())
        }
        .instrument(tracing::debug_span!(
            "authenticate",
            user = %credentials.username,
            source = %credentials.source
        ))
        .await
    }

    /// Drive the SASL conversation
    async fn handle_sasl(
        &mut self,
        credentials: &AuthCredentials,
        mechanism: Mechanism,
    ) -> Result<()> {
        let mut scram = ScramClient::with_mechanism(
            mechanism,
            credentials.username.clone(),
            credentials.password.clone(),
        );
        let source = credentials.source.as_str();

        let start = Document::new()
            .with("saslStart", 1i32)
            .with("mechanism", mechanism.name())
            .with("payload", binary(scram.client_first().into_bytes()))
            .with("autoAuthorize", 1i32)
            .with("options", Document::new().with("skipEmptyExchange", true));
        let reply = self.sasl_round_trip(source, start).await?;
        let conversation_id = reply
            .get("conversationId")
            .cloned()
            .ok_or_else(|| Error::Protocol("saslStart reply without conversationId".into()))?;

        let server_first = sasl_payload(&reply)?;
        tracing::debug!("received SCRAM server first message");

        let (client_final, scram_state) = scram
            .client_final(&server_first)
            .map_err(|e| Error::Authentication(format!("SCRAM error: {}", e)))?;

        let continue_cmd = Document::new()
            .with("saslContinue", 1i32)
            .with("conversationId", conversation_id.clone())
            .with("payload", binary(client_final.into_bytes()));
        let mut reply = self.sasl_round_trip(source, continue_cmd).await?;

        let server_final = sasl_payload(&reply)?;
        scram
            .verify_server_final(&server_final, &scram_state)
            .map_err(|e| Error::Authentication(format!("SCRAM verification failed: {}", e)))?;

        // Servers that ignore skipEmptyExchange want one more empty round
        let mut rounds = 0;
        while !reply.get_bool("done").unwrap_or(false) {
            if rounds == MAX_EMPTY_SASL_ROUNDS {
                return Err(Error::Protocol("SASL conversation did not complete".into()));
            }
            rounds += 1;

            let empty = Document::new()
                .with("saslContinue", 1i32)
                .with("conversationId", conversation_id.clone())
                .with("payload", binary(Vec::new()));
            reply = self.sasl_round_trip(source, empty).await?;
        }

        Ok(())
    }

    /// Round trip for SASL commands; server failures become authentication errors
    async fn sasl_round_trip(&mut self, database: &str, command: Document) -> Result<Document> {
        let reply = self.round_trip(database, command).await?;
        match CommandError::from_reply(&reply) {
            Some(err) => Err(Error::Authentication(err.to_string())),
            None => Ok(reply),
        }
    }

    /// Run a command against `database` and return the reply body.
    ///
    /// Server-reported failures come back as errors classified by code (see
    /// [`Error`]). The connection must be `Ready`.
    pub async fn run_command(&mut self, database: &str, command: Document) -> Result<Document> {
        if self.state != ConnectionState::Ready {
            return Err(Error::InvalidState {
                expected: ConnectionState::Ready.to_string(),
                actual: self.state.to_string(),
            });
        }

        self.state.transition(ConnectionState::CommandInProgress)?;
        let reply = self.round_trip(database, command).await?;
        self.state.transition(ConnectionState::Ready)?;

        match CommandError::from_reply(&reply) {
            Some(err) => Err(Error::from(err)),
            None => Ok(reply),
        }
    }

    /// Send one command and wait for its reply
    async fn round_trip(&mut self, database: &str, mut command: Document) -> Result<Document> {
        let name = command.first_key().unwrap_or("").to_string();
        command.insert("$db", database);

        let request_id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1).max(1);

        tracing::trace!(command = %name, database, request_id, "sending command");
        self.send_message(&OpMsg::request(request_id, command)).await?;

        let reply = self.receive_message().await?;
        if reply.response_to != request_id {
            return Err(Error::Protocol(format!(
                "reply to request {} while waiting for {}",
                reply.response_to, request_id
            )));
        }
        if reply.flags & flags::MORE_TO_COME != 0 {
            return Err(Error::Protocol(
                "unexpected moreToCome flag on command reply".into(),
            ));
        }

        Ok(reply.body)
    }

    /// Send a message
    async fn send_message(&mut self, msg: &OpMsg) -> Result<()> {
        let buf = encode_message(msg)?;
        let transport = self.transport.as_mut().ok_or(Error::ConnectionClosed)?;
        transport.write_all(&buf).await?;
        transport.flush().await?;
        Ok(())
    }

    /// Receive a message
    async fn receive_message(&mut self) -> Result<OpMsg> {
        loop {
            match decode_message(&mut self.read_buf) {
                Ok((msg, consumed)) => {
                    self.read_buf.advance(consumed);
                    return Ok(msg);
                }
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {}
                Err(e) => return Err(Error::Protocol(e.to_string())),
            }

            // Need more data
            let transport = self.transport.as_mut().ok_or(Error::ConnectionClosed)?;
            let n = transport.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
        }
    }

    /// Close the connection
    pub async fn close(mut self) -> Result<()> {
        self.state.transition(ConnectionState::Closed)?;
        if let Some(mut transport) = self.transport.take() {
            transport.shutdown().await?;
        }
        Ok(())
    }
}

/// The credentials' mechanism if the server offers it, else the negotiated one
fn select_mechanism(credentials: &AuthCredentials, hello: &HelloReply) -> Result<Mechanism> {
    let offered = hello.sasl_supported_mechs.as_deref();
    match (credentials.mechanism, offered) {
        (Some(requested), Some(mechs)) if !mechs.iter().any(|m| m == requested.name()) => {
            Err(Error::Authentication(format!(
                "server does not offer {} for this user. Available: {}",
                requested,
                mechs.join(", ")
            )))
        }
        (Some(requested), _) => Ok(requested),
        (None, _) => Mechanism::negotiate(offered).ok_or_else(|| {
            Error::Authentication(format!(
                "server offers no SCRAM mechanism for this user. Available: {}",
                offered.map(|m| m.join(", ")).unwrap_or_default()
            ))
        }),
    }
}

fn binary(bytes: Vec<u8>) -> Bson {
    Bson::Binary {
        subtype: crate::protocol::constants::BINARY_SUBTYPE_GENERIC,
        bytes,
    }
}

fn sasl_payload(reply: &Document) -> Result<String> {
    let payload = reply
        .get_binary("payload")
        .ok_or_else(|| Error::Protocol("SASL reply without payload".into()))?;
    String::from_utf8(payload.to_vec())
        .map_err(|e| Error::Authentication(format!("invalid UTF-8 in SASL payload: {}", e)))
}

fn client_metadata(app_name: Option<&str>) -> Document {
    let mut metadata = Document::new()
        .with(
            "driver",
            Document::new()
                .with("name", DRIVER_NAME)
                .with("version", env!("CARGO_PKG_VERSION")),
        )
        .with(
            "os",
            Document::new()
                .with("type", std::env::consts::OS)
                .with("name", whoami::distro())
                .with("architecture", std::env::consts::ARCH),
        )
        .with("platform", "rust/tokio");

    if let Some(name) = app_name {
        metadata.insert("application", Document::new().with("name", name));
    }
    metadata
}
