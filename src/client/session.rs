//! Administrative session: one authenticated connection to the primary
//!
//! Opening a session walks the seed list in order, dialing each host through the
//! target's [`Dialer`], and keeps the first server that accepts writes. Commands on
//! a session run one at a time; the session is closed explicitly by its owner.

use super::connection_string::{DialTarget, ServerAddress};
use super::models::Credential;
use crate::connection::{AuthCredentials, Connection, Dialer, HelloReply};
use crate::protocol::{Bson, Document};
use crate::{Error, Result};
use std::collections::{HashSet, VecDeque};
use std::time::Instant;
use tracing::Instrument;

/// What dialing one seed-list host produced
enum HostOutcome {
    /// Authenticated connection to a writable server
    Usable(Connection),
    /// Reachable but ruled out, with the primary it reported, if any
    Skipped {
        reason: String,
        primary: Option<String>,
    },
}

/// An authenticated connection to a writable server
#[derive(Debug)]
pub struct Session {
    conn: Connection,
}

impl Session {
    /// Dial the target and return a session on its primary.
    ///
    /// An authentication failure ends the search immediately; any other per-host
    /// failure moves on to the next candidate.
    pub async fn open<D: Dialer>(target: &DialTarget<D>) -> Result<Self> {
        let start = Instant::now();
        let result = Self::select(target)
            .instrument(tracing::info_span!(
                "session_open",
                hosts = target.info.hosts.len(),
                direct = target.info.direct
            ))
            .await;

        match &result {
            Ok(session) => {
                crate::metrics::histograms::session_open_duration(
                    start.elapsed().as_millis() as u64,
                );
                tracing::debug!(address = %session.address(), "session open");
            }
            Err(e) => {
                crate::metrics::counters::connect_failed(e.kind().as_str());
            }
        }
        result
    }

    async fn select<D: Dialer>(target: &DialTarget<D>) -> Result<Self> {
        let info = &target.info;
        let credentials = info.credentials();

        let mut candidates: VecDeque<ServerAddress> = if info.direct {
            info.hosts.iter().take(1).cloned().collect()
        } else {
            info.hosts.iter().cloned().collect()
        };
        let mut seen: HashSet<ServerAddress> = candidates.iter().cloned().collect();
        let mut last_error = None;

        while let Some(addr) = candidates.pop_front() {
            match Self::connect(&addr, target, credentials.as_ref()).await {
                Ok(HostOutcome::Usable(conn)) => return Ok(Self { conn }),
                Ok(HostOutcome::Skipped { reason, primary }) => {
                    tracing::debug!(address = %addr, reason = %reason, "skipping host");
                    if let Some(primary) = primary.as_deref() {
                        match ServerAddress::parse(primary) {
                            Ok(primary) if seen.insert(primary.clone()) => {
                                candidates.push_back(primary)
                            }
                            Ok(_) => {}
                            Err(e) => tracing::debug!(error = %e, "ignoring primary hint"),
                        }
                    }
                    last_error = Some(Error::Connect(format!("{}: {}", addr, reason)));
                }
                Err(e) if e.kind() == crate::ErrorKind::Authentication => return Err(e),
                Err(e) => {
                    tracing::debug!(address = %addr, error = %e, "host unusable");
                    last_error = Some(e);
                }
            }
        }

        Err(match last_error {
            Some(Error::Connect(msg)) => Error::Connect(format!("no usable server: {}", msg)),
            Some(e) if e.kind() == crate::ErrorKind::Connect => e,
            Some(e) => Error::Connect(format!("no usable server: {}", e)),
            None => Error::Connect("no hosts to dial".into()),
        })
    }

    /// Dial, handshake and authenticate one host, all bounded by the connect timeout
    async fn connect<D: Dialer>(
        addr: &ServerAddress,
        target: &DialTarget<D>,
        credentials: Option<&AuthCredentials>,
    ) -> Result<HostOutcome> {
        let info = &target.info;
        let attempt = async {
            let transport = target.dialer.dial(addr).await?;
            let mut conn = Connection::new(transport, addr.clone());
            let hello = conn.handshake(info.app_name.as_deref(), credentials).await?;

            if !info.direct {
                if let Some(reason) = unusable_reason(&hello, info.replica_set.as_deref()) {
                    if let Err(e) = conn.close().await {
                        tracing::debug!(error = %e, "error closing skipped connection");
                    }
                    return Ok(HostOutcome::Skipped { reason, primary: hello.primary });
                }
            }

            if let Some(creds) = credentials {
                conn.authenticate(creds, &hello).await?;
            }
            Ok(HostOutcome::Usable(conn))
        };

        match info.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, attempt)
                .await
                .map_err(|_| Error::Timeout(limit))?,
            None => attempt.await,
        }
    }

    /// Address of the server this session talks to
    pub fn address(&self) -> &ServerAddress {
        self.conn.address()
    }

    /// Create `credential` on `database` (`createUser`).
    ///
    /// Fails with [`Error::UserAlreadyExists`] if the user is already defined.
    pub async fn create_user(&mut self, database: &str, credential: &Credential) -> Result<()> {
        let command = Document::new()
            .with("createUser", credential.username.as_str())
            .with("pwd", credential.password.as_str())
            .with("roles", credential.roles(database));

        self.conn
            .run_command(database, command)
            .await
            .map(drop)
            .map_err(|e| user_error(e, &credential.username, database))
    }

    /// Remove `username` from `database` (`dropUser`).
    ///
    /// Fails with [`Error::UserNotFound`] if there is no such user.
    pub async fn drop_user(&mut self, database: &str, username: &str) -> Result<()> {
        let command = Document::new().with("dropUser", username);

        self.conn
            .run_command(database, command)
            .await
            .map(drop)
            .map_err(|e| user_error(e, username, database))
    }

    /// Role names granted to `username` on `database`, or `None` if no such user
    pub async fn user_roles(
        &mut self,
        database: &str,
        username: &str,
    ) -> Result<Option<Vec<String>>> {
        let reply = self
            .conn
            .run_command(database, Document::new().with("usersInfo", username))
            .await?;

        let Some(user) = reply
            .get_array("users")
            .and_then(|users| users.first())
            .and_then(Bson::as_document)
        else {
            return Ok(None);
        };

        let roles = user
            .get_array("roles")
            .unwrap_or_default()
            .iter()
            .filter_map(Bson::as_document)
            .filter_map(|role| role.get_str("role"))
            .map(str::to_string)
            .collect();
        Ok(Some(roles))
    }

    /// Run an arbitrary command on `database`
    pub async fn run_command(&mut self, database: &str, command: Document) -> Result<Document> {
        self.conn.run_command(database, command).await
    }

    /// Close the session
    pub async fn close(self) -> Result<()> {
        self.conn.close().await
    }
}

/// Why a handshake reply rules the server out, if it does
fn unusable_reason(hello: &HelloReply, replica_set: Option<&str>) -> Option<String> {
    if let Some(expected) = replica_set {
        if hello.set_name.as_deref() != Some(expected) {
            return Some(format!(
                "member of replica set {:?}, expected {:?}",
                hello.set_name.as_deref().unwrap_or(""),
                expected
            ));
        }
    }
    if !hello.writable_primary {
        return Some("not a writable primary".to_string());
    }
    None
}

fn user_error(err: Error, username: &str, database: &str) -> Error {
    match err {
        Error::Command(cmd) => Error::from_command(cmd, username, database),
        other => other,
    }
}
