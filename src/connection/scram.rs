// src/connection/scram.rs

//! SCRAM-SHA-256 client exchange (RFC 5802 / RFC 7677), channel binding
//! disabled. The flow is client-first → server-first → client-final →
//! server-final; the client proves password knowledge without sending it
//! and verifies the server's signature on the way back.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::errors::{PeridotError, Result};

type HmacSha256 = Hmac<Sha256>;

/// The mechanism name offered by the server.
pub const MECHANISM: &str = "SCRAM-SHA-256";

/// Channel binding is disabled; "biws" is base64("n,,").
const GS2_HEADER: &str = "n,,";
const CHANNEL_BINDING: &str = "biws";
const NONCE_LEN: usize = 18;

/// Client side of one SCRAM exchange. Single use: `client_first`, then
/// `client_final` with the server's first message, then `verify_final`.
pub struct ScramClient {
    user: String,
    password: String,
    client_nonce: String,
    client_first_bare: String,
    server_signature: Option<Vec<u8>>,
}

impl ScramClient {
    pub fn new(user: &str, password: &str) -> Self {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        Self::with_nonce(user, password, &BASE64.encode(nonce_bytes))
    }

    /// Deterministic construction for tests and test vectors.
    pub fn with_nonce(user: &str, password: &str, nonce: &str) -> Self {
        ScramClient {
            user: user.to_string(),
            password: password.to_string(),
            client_nonce: nonce.to_string(),
            client_first_bare: String::new(),
            server_signature: None,
        }
    }

    /// The `client-first-message`, including the gs2 header.
    pub fn client_first(&mut self) -> String {
        self.client_first_bare = format!(
            "n={},r={}",
            saslname_escape(&self.user),
            self.client_nonce
        );
        format!("{GS2_HEADER}{}", self.client_first_bare)
    }

    /// Consumes the `server-first-message` and produces the
    /// `client-final-message` carrying the proof.
    pub fn client_final(&mut self, server_first: &str) -> Result<String> {
        let attrs = parse_attributes(server_first)?;
        let combined_nonce = attrs
            .iter()
            .find(|(k, _)| *k == "r")
            .map(|(_, v)| *v)
            .ok_or_else(|| auth_error("server-first message lacks a nonce"))?;
        if !combined_nonce.starts_with(&self.client_nonce) {
            return Err(auth_error("server nonce does not extend the client nonce"));
        }
        let salt_b64 = attrs
            .iter()
            .find(|(k, _)| *k == "s")
            .map(|(_, v)| *v)
            .ok_or_else(|| auth_error("server-first message lacks a salt"))?;
        let salt = BASE64
            .decode(salt_b64)
            .map_err(|_| auth_error("salt is not valid base64"))?;
        let iterations: u32 = attrs
            .iter()
            .find(|(k, _)| *k == "i")
            .map(|(_, v)| *v)
            .ok_or_else(|| auth_error("server-first message lacks an iteration count"))?
            .parse()
            .map_err(|_| auth_error("iteration count is not a number"))?;
        if iterations == 0 {
            return Err(auth_error("iteration count must be positive"));
        }

        let salted_password = hi(self.password.as_bytes(), &salt, iterations);
        let client_key = hmac(&salted_password, b"Client Key");
        let stored_key = Sha256::digest(&client_key);

        let client_final_bare = format!("c={CHANNEL_BINDING},r={combined_nonce}");
        let auth_message = format!(
            "{},{server_first},{client_final_bare}",
            self.client_first_bare
        );

        let client_signature = hmac(&stored_key, auth_message.as_bytes());
        let proof: Vec<u8> = client_key
            .iter()
            .zip(&client_signature)
            .map(|(k, s)| k ^ s)
            .collect();

        let server_key = hmac(&salted_password, b"Server Key");
        self.server_signature = Some(hmac(&server_key, auth_message.as_bytes()));

        Ok(format!("{client_final_bare},p={}", BASE64.encode(proof)))
    }

    /// Checks the `server-final-message` signature, proving the server also
    /// knows the (salted) password.
    pub fn verify_final(&self, server_final: &str) -> Result<()> {
        let attrs = parse_attributes(server_final)?;
        if let Some((_, message)) = attrs.iter().find(|(k, _)| *k == "e") {
            return Err(auth_error(&format!("server rejected credentials: {message}")));
        }
        let verifier = attrs
            .iter()
            .find(|(k, _)| *k == "v")
            .map(|(_, v)| *v)
            .ok_or_else(|| auth_error("server-final message lacks a verifier"))?;
        let verifier = BASE64
            .decode(verifier)
            .map_err(|_| auth_error("server verifier is not valid base64"))?;
        let expected = self
            .server_signature
            .as_ref()
            .ok_or_else(|| auth_error("client-final was never produced"))?;
        if &verifier != expected {
            return Err(auth_error("server signature mismatch"));
        }
        Ok(())
    }
}

fn auth_error(message: &str) -> PeridotError {
    PeridotError::AuthenticationFailed(message.to_string())
}

/// `Hi(str, salt, i)`: PBKDF2-HMAC-SHA-256 with a single output block.
fn hi(password: &[u8], salt: &[u8], iterations: u32) -> Vec<u8> {
    let mut block = Vec::with_capacity(salt.len() + 4);
    block.extend_from_slice(salt);
    block.extend_from_slice(&1u32.to_be_bytes());

    let mut prev = hmac(password, &block);
    let mut result = prev.clone();
    for _ in 1..iterations {
        prev = hmac(password, &prev);
        for (acc, byte) in result.iter_mut().zip(&prev) {
            *acc ^= byte;
        }
    }
    result
}

fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// `=` and `,` are reserved in saslname; RFC 5802 escapes them.
fn saslname_escape(name: &str) -> String {
    name.replace('=', "=3D").replace(',', "=2C")
}

/// Splits `key=value` attributes. Values may themselves contain `=`.
fn parse_attributes(message: &str) -> Result<Vec<(&str, &str)>> {
    message
        .split(',')
        .map(|part| {
            part.split_once('=')
                .ok_or_else(|| auth_error(&format!("malformed SCRAM attribute '{part}'")))
        })
        .collect()
}
