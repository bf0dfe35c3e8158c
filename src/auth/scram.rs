//! SCRAM authentication
//!
//! Client side of SCRAM-SHA-1 and SCRAM-SHA-256 (RFC 5802 / RFC 7677) in the form
//! MongoDB expects inside `saslStart` / `saslContinue` payloads. MongoDB does not
//! support channel binding, so the GS2 header is always `n,,`.
//!
//! The two mechanisms differ in what they feed to PBKDF2:
//! * SCRAM-SHA-256 uses the SASLprep-normalized password (RFC 4013).
//! * SCRAM-SHA-1 uses MongoDB's legacy digest `hex(md5("<user>:mongo:<password>"))`.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use md5::Md5;
use pbkdf2::pbkdf2;
use rand::Rng;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::fmt;

type HmacSha1 = Hmac<Sha1>;
type HmacSha256 = Hmac<Sha256>;

/// Servers must not ask for fewer PBKDF2 iterations than this
pub const MIN_ITERATIONS: u32 = 4096;

/// GS2 header without channel binding
const GS2_HEADER: &str = "n,,";

/// SASL mechanisms this client can run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mechanism {
    /// SCRAM-SHA-1 with MongoDB's password digest
    ScramSha1,
    /// SCRAM-SHA-256 with SASLprep
    ScramSha256,
}

impl Mechanism {
    /// Name as sent in `saslStart` and listed in `saslSupportedMechs`
    pub fn name(self) -> &'static str {
        match self {
            Mechanism::ScramSha1 => "SCRAM-SHA-1",
            Mechanism::ScramSha256 => "SCRAM-SHA-256",
        }
    }

    /// Value of the `mechanism` metrics label
    pub fn metric_label(self) -> &'static str {
        match self {
            Mechanism::ScramSha1 => crate::metrics::labels::MECHANISM_SCRAM_SHA1,
            Mechanism::ScramSha256 => crate::metrics::labels::MECHANISM_SCRAM_SHA256,
        }
    }

    /// Look up a mechanism by its SASL name
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "SCRAM-SHA-1" => Some(Mechanism::ScramSha1),
            "SCRAM-SHA-256" => Some(Mechanism::ScramSha256),
            _ => None,
        }
    }

    /// Pick a mechanism from the server's `saslSupportedMechs` answer.
    ///
    /// SCRAM-SHA-256 wins when offered. Servers that did not answer the question
    /// (pre-4.0) only speak SCRAM-SHA-1. `None` when the list names neither.
    pub fn negotiate(offered: Option<&[String]>) -> Option<Self> {
        let Some(offered) = offered else {
            return Some(Mechanism::ScramSha1);
        };
        [Mechanism::ScramSha256, Mechanism::ScramSha1]
            .into_iter()
            .find(|m| offered.iter().any(|o| o == m.name()))
    }

    fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            Mechanism::ScramSha1 => Sha1::digest(data).to_vec(),
            Mechanism::ScramSha256 => Sha256::digest(data).to_vec(),
        }
    }

    fn hmac(self, key: &[u8], data: &[u8]) -> Vec<u8> {
        match self {
            Mechanism::ScramSha1 => mac::<HmacSha1>(key, data),
            Mechanism::ScramSha256 => mac::<HmacSha256>(key, data),
        }
    }

    /// SaltedPassword := PBKDF2(password, salt, iterations, HMAC-H)
    fn salt_password(self, password: &[u8], salt: &[u8], iterations: u32) -> Vec<u8> {
        match self {
            Mechanism::ScramSha1 => {
                let mut salted = vec![0u8; 20];
                let _ = pbkdf2::<HmacSha1>(password, salt, iterations, &mut salted);
                salted
            }
            Mechanism::ScramSha256 => {
                let mut salted = vec![0u8; 32];
                let _ = pbkdf2::<HmacSha256>(password, salt, iterations, &mut salted);
                salted
            }
        }
    }
}

impl fmt::Display for Mechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// SCRAM authentication error types
#[derive(Debug, Clone)]
pub enum ScramError {
    /// Invalid proof from server
    InvalidServerProof(String),
    /// Invalid server message format
    InvalidServerMessage(String),
    /// Server reported an error in its final message (`e=`)
    ServerError(String),
    /// Base64 decoding error
    Base64Error(String),
    /// Password rejected by SASLprep
    InvalidPassword(String),
}

impl fmt::Display for ScramError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScramError::InvalidServerProof(msg) => write!(f, "invalid server proof: {}", msg),
            ScramError::InvalidServerMessage(msg) => write!(f, "invalid server message: {}", msg),
            ScramError::ServerError(msg) => write!(f, "server error: {}", msg),
            ScramError::Base64Error(msg) => write!(f, "Base64 error: {}", msg),
            ScramError::InvalidPassword(msg) => write!(f, "invalid password: {}", msg),
        }
    }
}

impl std::error::Error for ScramError {}

/// Internal state needed to verify the server's final message
#[derive(Clone, Debug)]
pub struct ScramState {
    /// Combined authentication message (for verification)
    auth_message: Vec<u8>,
    /// Server key (for verification calculation)
    server_key: Vec<u8>,
}

/// SCRAM client for one conversation
pub struct ScramClient {
    mechanism: Mechanism,
    username: String,
    password: String,
    nonce: String,
}

impl fmt::Debug for ScramClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScramClient")
            .field("mechanism", &self.mechanism)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl ScramClient {
    /// Create a SCRAM-SHA-256 client with a random nonce
    pub fn new(username: String, password: String) -> Self {
        Self::with_mechanism(Mechanism::ScramSha256, username, password)
    }

    /// Create a client for `mechanism` with a random nonce
    pub fn with_mechanism(mechanism: Mechanism, username: String, password: String) -> Self {
        let mut rng = rand::thread_rng();
        let nonce_bytes: Vec<u8> = (0..24).map(|_| rng.gen()).collect();
        let nonce = BASE64.encode(&nonce_bytes);

        Self {
            mechanism,
            username,
            password,
            nonce,
        }
    }

    #[cfg(test)]
    fn with_nonce(mechanism: Mechanism, username: &str, password: &str, nonce: &str) -> Self {
        Self {
            mechanism,
            username: username.to_string(),
            password: password.to_string(),
            nonce: nonce.to_string(),
        }
    }

    /// Mechanism this client runs
    pub fn mechanism(&self) -> Mechanism {
        self.mechanism
    }

    /// `client-first-message-bare`: `n=<saslname>,r=<nonce>`
    fn client_first_bare(&self) -> String {
        format!("n={},r={}", escape_username(&self.username), self.nonce)
    }

    /// Generate client first message
    pub fn client_first(&self) -> String {
        format!("{}{}", GS2_HEADER, self.client_first_bare())
    }

    /// The bytes PBKDF2 runs over
    fn prepared_password(&self) -> Result<String, ScramError> {
        match self.mechanism {
            Mechanism::ScramSha1 => Ok(mongo_password_digest(&self.username, &self.password)),
            Mechanism::ScramSha256 => stringprep::saslprep(&self.password)
                .map(|prepared| prepared.into_owned())
                .map_err(|e| ScramError::InvalidPassword(e.to_string())),
        }
    }

    /// Process server first message and generate client final message
    ///
    /// Returns (client_final_message, internal_state)
    pub fn client_final(&mut self, server_first: &str) -> Result<(String, ScramState), ScramError> {
        // Parse server first message: r=<client_nonce><server_nonce>,s=<salt>,i=<iterations>
        let (server_nonce, salt, iterations) = parse_server_first(server_first)?;

        // Verify server nonce extends our client nonce
        if !server_nonce.starts_with(&self.nonce) || server_nonce.len() == self.nonce.len() {
            return Err(ScramError::InvalidServerMessage(
                "server nonce doesn't extend client nonce".to_string(),
            ));
        }

        let salt_bytes = BASE64
            .decode(&salt)
            .map_err(|_| ScramError::Base64Error("invalid salt encoding".to_string()))?;
        let iterations = iterations
            .parse::<u32>()
            .map_err(|_| ScramError::InvalidServerMessage("invalid iteration count".to_string()))?;
        if iterations < MIN_ITERATIONS {
            return Err(ScramError::InvalidServerMessage(format!(
                "iteration count {} is below the minimum of {}",
                iterations, MIN_ITERATIONS
            )));
        }

        // c = base64("n,,")
        let channel_binding = BASE64.encode(GS2_HEADER.as_bytes());
        let client_final_without_proof = format!("c={},r={}", channel_binding, server_nonce);

        let auth_message = format!(
            "{},{},{}",
            self.client_first_bare(),
            server_first,
            client_final_without_proof
        );

        let mechanism = self.mechanism;
        let password = self.prepared_password()?;
        let salted_password = mechanism.salt_password(password.as_bytes(), &salt_bytes, iterations);
        let proof = calculate_client_proof(mechanism, &salted_password, auth_message.as_bytes());
        let server_key = mechanism.hmac(&salted_password, b"Server Key");

        let client_final = format!("{},p={}", client_final_without_proof, BASE64.encode(proof));

        let state = ScramState {
            auth_message: auth_message.into_bytes(),
            server_key,
        };

        Ok((client_final, state))
    }

    /// Verify server final message and confirm authentication
    pub fn verify_server_final(
        &self,
        server_final: &str,
        state: &ScramState,
    ) -> Result<(), ScramError> {
        if let Some(err) = server_final.strip_prefix("e=") {
            return Err(ScramError::ServerError(err.to_string()));
        }

        // Parse server final: v=<server_signature>[,extensions]
        let server_sig_encoded = server_final
            .split(',')
            .next()
            .and_then(|attr| attr.strip_prefix("v="))
            .ok_or_else(|| ScramError::InvalidServerMessage("missing 'v=' prefix".to_string()))?;

        let server_signature = BASE64.decode(server_sig_encoded).map_err(|_| {
            ScramError::Base64Error("invalid server signature encoding".to_string())
        })?;

        let expected_signature = self.mechanism.hmac(&state.server_key, &state.auth_message);

        if constant_time_compare(&server_signature, &expected_signature) {
            Ok(())
        } else {
            Err(ScramError::InvalidServerProof(
                "server signature verification failed".to_string(),
            ))
        }
    }
}

/// MongoDB's SCRAM-SHA-1 password: `hex(md5("<user>:mongo:<password>"))`
fn mongo_password_digest(username: &str, password: &str) -> String {
    Md5::digest(format!("{}:mongo:{}", username, password).as_bytes())
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Escape a username as an RFC 5802 `saslname`
fn escape_username(username: &str) -> String {
    username.replace('=', "=3D").replace(',', "=2C")
}

/// Parse server first message format: r=<nonce>,s=<salt>,i=<iterations>
fn parse_server_first(msg: &str) -> Result<(String, String, String), ScramError> {
    if msg.starts_with("m=") {
        return Err(ScramError::InvalidServerMessage(
            "mandatory extensions are not supported".to_string(),
        ));
    }

    let mut nonce = String::new();
    let mut salt = String::new();
    let mut iterations = String::new();

    for part in msg.split(',') {
        if let Some(value) = part.strip_prefix("r=") {
            nonce = value.to_string();
        } else if let Some(value) = part.strip_prefix("s=") {
            salt = value.to_string();
        } else if let Some(value) = part.strip_prefix("i=") {
            iterations = value.to_string();
        }
    }

    if nonce.is_empty() || salt.is_empty() || iterations.is_empty() {
        return Err(ScramError::InvalidServerMessage(
            "missing required fields in server first message".to_string(),
        ));
    }

    Ok((nonce, salt, iterations))
}

fn mac<M: Mac + hmac::digest::KeyInit>(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = <M as Mac>::new_from_slice(key).expect("HMAC key should be valid");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Calculate SCRAM client proof
fn calculate_client_proof(
    mechanism: Mechanism,
    salted_password: &[u8],
    auth_message: &[u8],
) -> Vec<u8> {
    // ClientKey := HMAC(SaltedPassword, "Client Key")
    let client_key = mechanism.hmac(salted_password, b"Client Key");

    // StoredKey := H(ClientKey)
    let stored_key = mechanism.digest(&client_key);

    // ClientSignature := HMAC(StoredKey, AuthMessage)
    let client_signature = mechanism.hmac(&stored_key, auth_message);

    // ClientProof := ClientKey XOR ClientSignature
    client_key
        .iter()
        .zip(client_signature.iter())
        .map(|(k, s)| k ^ s)
        .collect()
}

/// Constant-time comparison to prevent timing attacks
fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}
