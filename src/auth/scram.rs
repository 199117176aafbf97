//! SCRAM-SHA-256 authentication implementation
//!
//! Implements SCRAM-SHA-256 (RFC 5802, RFC 7677) as used by Postgres 10+,
//! including the `SCRAM-SHA-256-PLUS` variant with `tls-server-end-point`
//! channel binding.

use crate::protocol::constants::sasl;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2;
use rand::Rng;
use sha2::{Digest, Sha256};
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// SCRAM authentication error types
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScramError {
    /// Server signature did not match
    #[error("invalid server proof: {0}")]
    InvalidServerProof(String),
    /// Malformed server message
    #[error("invalid server message: {0}")]
    InvalidServerMessage(String),
    /// Base64 decoding error
    #[error("Base64 error: {0}")]
    Base64Error(String),
    /// Server aborted the exchange with `e=<reason>`
    #[error("server rejected SCRAM exchange: {0}")]
    ServerError(String),
}

/// Channel binding negotiated for the exchange
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelBinding {
    /// Client does not support channel binding (plain TCP, Unix socket)
    None,
    /// Client supports binding but the server did not offer `-PLUS`
    ClientSupported,
    /// tls-server-end-point: SHA-256 hash of the server's DER-encoded certificate
    TlsServerEndPoint(Vec<u8>),
}

impl ChannelBinding {
    /// Pick the binding for the advertised mechanisms and the transport's
    /// `tls-server-end-point` data, if any.
    pub fn negotiate(mechanisms: &[String], binding_data: Option<Vec<u8>>) -> Self {
        let offers_plus = mechanisms.iter().any(|m| m == sasl::SCRAM_SHA_256_PLUS);
        match binding_data {
            Some(data) if offers_plus => ChannelBinding::TlsServerEndPoint(data),
            Some(_) => ChannelBinding::ClientSupported,
            None => ChannelBinding::None,
        }
    }

    fn gs2_header(&self) -> &'static str {
        match self {
            ChannelBinding::None => "n,,",
            ChannelBinding::ClientSupported => "y,,",
            ChannelBinding::TlsServerEndPoint(_) => "p=tls-server-end-point,,",
        }
    }
}

/// Keys carried from the client-final step to server verification
#[derive(Clone, Debug)]
pub struct ScramState {
    auth_message: Vec<u8>,
    server_key: Vec<u8>,
}

/// SCRAM-SHA-256 client implementation
pub struct ScramClient {
    username: String,
    password: String,
    nonce: String,
    channel_binding: ChannelBinding,
}

impl ScramClient {
    /// Create a new SCRAM client without channel binding
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::with_channel_binding(username, password, ChannelBinding::None)
    }

    /// Create a new SCRAM client with channel binding
    pub fn with_channel_binding(
        username: impl Into<String>,
        password: impl Into<String>,
        channel_binding: ChannelBinding,
    ) -> Self {
        let nonce_bytes: [u8; 18] = rand::thread_rng().gen();
        Self {
            username: username.into(),
            password: password.into(),
            nonce: BASE64.encode(nonce_bytes),
            channel_binding,
        }
    }

    /// SASL mechanism name to announce in `SASLInitialResponse`
    pub fn mechanism(&self) -> &'static str {
        match self.channel_binding {
            ChannelBinding::TlsServerEndPoint(_) => sasl::SCRAM_SHA_256_PLUS,
            _ => sasl::SCRAM_SHA_256,
        }
    }

    fn client_first_bare(&self) -> String {
        // Postgres takes the role from the startup message; the name here is
        // informational but must still be escaped.
        let name = self.username.replace('=', "=3D").replace(',', "=2C");
        format!("n={},r={}", name, self.nonce)
    }

    /// Generate client first message
    pub fn client_first(&self) -> String {
        format!(
            "{}{}",
            self.channel_binding.gs2_header(),
            self.client_first_bare()
        )
    }

    /// Process server first message and generate client final message
    ///
    /// Returns (client_final_message, internal_state)
    pub fn client_final(&mut self, server_first: &str) -> Result<(String, ScramState), ScramError> {
        let (server_nonce, salt, iterations) = parse_server_first(server_first)?;

        if !server_nonce.starts_with(&self.nonce) {
            return Err(ScramError::InvalidServerMessage(
                "server nonce doesn't contain client nonce".to_string(),
            ));
        }

        let salt = BASE64
            .decode(salt)
            .map_err(|_| ScramError::Base64Error("invalid salt encoding".to_string()))?;
        let iterations = iterations
            .parse::<u32>()
            .map_err(|_| ScramError::InvalidServerMessage("invalid iteration count".to_string()))?;

        // c = base64(gs2-header [+ channel-binding-data])
        let mut cbind_input = self.channel_binding.gs2_header().as_bytes().to_vec();
        if let ChannelBinding::TlsServerEndPoint(data) = &self.channel_binding {
            cbind_input.extend_from_slice(data);
        }

        let client_final_without_proof =
            format!("c={},r={}", BASE64.encode(&cbind_input), server_nonce);
        let auth_message = format!(
            "{},{},{}",
            self.client_first_bare(),
            server_first,
            client_final_without_proof
        );

        let salted_password = salt_password(&self.password, &salt, iterations);
        let client_key = hmac(&salted_password, b"Client Key");
        let stored_key = Sha256::digest(&client_key);
        let client_signature = hmac(&stored_key, auth_message.as_bytes());

        let proof: Vec<u8> = client_key
            .iter()
            .zip(client_signature.iter())
            .map(|(k, s)| k ^ s)
            .collect();

        let client_final = format!("{},p={}", client_final_without_proof, BASE64.encode(proof));
        let state = ScramState {
            auth_message: auth_message.into_bytes(),
            server_key: hmac(&salted_password, b"Server Key"),
        };

        Ok((client_final, state))
    }

    /// Verify server final message and confirm authentication
    pub fn verify_server_final(
        &self,
        server_final: &str,
        state: &ScramState,
    ) -> Result<(), ScramError> {
        if let Some(reason) = server_final.strip_prefix("e=") {
            return Err(ScramError::ServerError(reason.to_string()));
        }

        let encoded = server_final
            .split(',')
            .next()
            .and_then(|attr| attr.strip_prefix("v="))
            .ok_or_else(|| ScramError::InvalidServerMessage("missing 'v=' prefix".to_string()))?;

        let server_signature = BASE64.decode(encoded).map_err(|_| {
            ScramError::Base64Error("invalid server signature encoding".to_string())
        })?;

        let expected = hmac(&state.server_key, &state.auth_message);

        if constant_time_compare(&server_signature, &expected) {
            Ok(())
        } else {
            Err(ScramError::InvalidServerProof(
                "server signature verification failed".to_string(),
            ))
        }
    }
}

/// Parse server first message format: r=<nonce>,s=<salt>,i=<iterations>
fn parse_server_first(msg: &str) -> Result<(&str, &str, &str), ScramError> {
    let mut nonce = "";
    let mut salt = "";
    let mut iterations = "";

    for part in msg.split(',') {
        if let Some(value) = part.strip_prefix("r=") {
            nonce = value;
        } else if let Some(value) = part.strip_prefix("s=") {
            salt = value;
        } else if let Some(value) = part.strip_prefix("i=") {
            iterations = value;
        } else if part.starts_with("m=") {
            return Err(ScramError::InvalidServerMessage(
                "unsupported mandatory extension".to_string(),
            ));
        }
    }

    if nonce.is_empty() || salt.is_empty() || iterations.is_empty() {
        return Err(ScramError::InvalidServerMessage(
            "missing required fields in server first message".to_string(),
        ));
    }

    Ok((nonce, salt, iterations))
}

/// SaltedPassword := PBKDF2(password, salt, iterations, HMAC-SHA256)
fn salt_password(password: &str, salt: &[u8], iterations: u32) -> [u8; 32] {
    let mut salted = [0u8; 32];
    // Output length is fixed at 32, the only way this can fail
    let _ = pbkdf2::<HmacSha256>(password.as_bytes(), salt, iterations, &mut salted);
    salted
}

fn hmac(key: &[u8], message: &[u8]) -> Vec<u8> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(message);
    mac.finalize().into_bytes().to_vec()
}

/// Constant-time comparison to prevent timing attacks
fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_with_nonce(user: &str, password: &str, nonce: &str) -> ScramClient {
        let mut client = ScramClient::new(user, password);
        client.nonce = nonce.to_string();
        client
    }

    // RFC 7677 section 3 example exchange
    #[test]
    fn test_rfc7677_exchange() {
        let mut client = client_with_nonce("user", "pencil", "rOprNGfwEbeRWgbNEkqO");
        assert_eq!(client.client_first(), "n,,n=user,r=rOprNGfwEbeRWgbNEkqO");

        let server_first = "r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,\
                            s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096";
        let (client_final, state) = client.client_final(server_first).unwrap();
        assert_eq!(
            client_final,
            "c=biws,r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,\
             p=dHzbZapWIk4jUhN+Ute9ytag9zjfMHgsqmmiz7AndVQ="
        );

        let server_final = "v=6rriTRBi23WpRR/wtup+mMhUZUn/dB5nLTJRsjl95G4=";
        assert!(client.verify_server_final(server_final, &state).is_ok());
    }

    #[test]
    fn test_client_first_escapes_username() {
        let client = client_with_nonce("a=b,c", "secret", "abc");
        assert_eq!(client.client_first(), "n,,n=a=3Db=2Cc,r=abc");
    }

    #[test]
    fn test_mechanism_follows_channel_binding() {
        let plain = ScramClient::new("u", "p");
        assert_eq!(plain.mechanism(), "SCRAM-SHA-256");

        let bound = ScramClient::with_channel_binding(
            "u",
            "p",
            ChannelBinding::TlsServerEndPoint(vec![1, 2, 3]),
        );
        assert_eq!(bound.mechanism(), "SCRAM-SHA-256-PLUS");
        assert!(bound.client_first().starts_with("p=tls-server-end-point,,n=u,r="));
    }

    #[test]
    fn test_negotiate_channel_binding() {
        let plus = vec!["SCRAM-SHA-256-PLUS".to_string(), "SCRAM-SHA-256".to_string()];
        let plain = vec!["SCRAM-SHA-256".to_string()];

        assert_eq!(
            ChannelBinding::negotiate(&plus, Some(vec![9])),
            ChannelBinding::TlsServerEndPoint(vec![9])
        );
        assert_eq!(
            ChannelBinding::negotiate(&plain, Some(vec![9])),
            ChannelBinding::ClientSupported
        );
        assert_eq!(ChannelBinding::negotiate(&plus, None), ChannelBinding::None);
    }

    #[test]
    fn test_client_final_with_channel_binding() {
        let binding_data = vec![0xDE, 0xAD, 0xBE, 0xEF];
        let mut client = ScramClient::with_channel_binding(
            "user",
            "password",
            ChannelBinding::TlsServerEndPoint(binding_data.clone()),
        );

        let server_first = format!("r={}srv,s={},i=4096", client.nonce, BASE64.encode(b"salty"));
        let (client_final, _state) = client.client_final(&server_first).unwrap();

        let c_value = client_final
            .split(',')
            .find_map(|s| s.strip_prefix("c="))
            .unwrap();
        let decoded = BASE64.decode(c_value).unwrap();
        let header = b"p=tls-server-end-point,,";
        assert!(decoded.starts_with(header));
        assert_eq!(&decoded[header.len()..], &binding_data);
    }

    #[test]
    fn test_parse_server_first_valid() {
        let (nonce, salt, iterations) =
            parse_server_first("r=client_nonce_server_nonce,s=aW1hZ2luYXJ5c2FsdA==,i=4096")
                .unwrap();
        assert_eq!(nonce, "client_nonce_server_nonce");
        assert_eq!(salt, "aW1hZ2luYXJ5c2FsdA==");
        assert_eq!(iterations, "4096");
    }

    #[test]
    fn test_parse_server_first_missing_fields() {
        for msg in ["s=c2FsdA==,i=4096", "r=nonce,i=4096", "r=nonce,s=c2FsdA==", "", "r=,s=,i="] {
            assert!(
                matches!(parse_server_first(msg), Err(ScramError::InvalidServerMessage(_))),
                "accepted {:?}",
                msg
            );
        }
    }

    #[test]
    fn test_parse_server_first_rejects_mandatory_extension() {
        let result = parse_server_first("m=ext,r=nonce,s=c2FsdA==,i=4096");
        assert!(matches!(result, Err(ScramError::InvalidServerMessage(_))));
    }

    #[test]
    fn test_client_final_nonce_prefix_mismatch() {
        let mut client = ScramClient::new("user", "pass");
        let server_first = format!("r=TAMPERED_server_ext,s={},i=4096", BASE64.encode(b"salty"));
        let result = client.client_final(&server_first);
        assert!(matches!(result, Err(ScramError::InvalidServerMessage(_))));
    }

    #[test]
    fn test_client_final_invalid_salt_and_iterations() {
        let mut client = ScramClient::new("user", "pass");

        let bad_salt = format!("r={}ext,s=!!!not-base64!!!,i=4096", client.nonce);
        assert!(matches!(
            client.client_final(&bad_salt),
            Err(ScramError::Base64Error(_))
        ));

        let bad_iter = format!("r={}ext,s={},i=abc", client.nonce, BASE64.encode(b"salty"));
        assert!(matches!(
            client.client_final(&bad_iter),
            Err(ScramError::InvalidServerMessage(_))
        ));
    }

    #[test]
    fn test_verify_server_final_error_attribute() {
        let client = ScramClient::new("user", "pass");
        let state = ScramState {
            auth_message: b"dummy".to_vec(),
            server_key: vec![0; 32],
        };
        let result = client.verify_server_final("e=invalid-proof", &state);
        assert_eq!(
            result,
            Err(ScramError::ServerError("invalid-proof".to_string()))
        );
    }

    #[test]
    fn test_verify_server_final_wrong_signature() {
        let client = ScramClient::new("user", "pass");
        let state = ScramState {
            auth_message: b"auth_msg".to_vec(),
            server_key: vec![0x42; 32],
        };
        let wrong_sig = BASE64.encode(vec![0xFF; 32]);
        let result = client.verify_server_final(&format!("v={}", wrong_sig), &state);
        assert!(matches!(result, Err(ScramError::InvalidServerProof(_))));

        let result = client.verify_server_final("v=!!!invalid!!!", &state);
        assert!(matches!(result, Err(ScramError::Base64Error(_))));

        let result = client.verify_server_final("not_a_valid_response", &state);
        assert!(matches!(result, Err(ScramError::InvalidServerMessage(_))));
    }

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare(b"test_value", b"test_value"));
        assert!(!constant_time_compare(b"test_value", b"test_wrong"));
        assert!(!constant_time_compare(b"test", b"test_longer"));
        assert!(constant_time_compare(&[], &[]));

        let a = vec![0b1010_1010; 32];
        let mut b = a.clone();
        b[15] ^= 0b0000_0001;
        assert!(!constant_time_compare(&a, &b));
    }

    #[test]
    fn test_client_final_unicode_credentials() {
        let mut client = ScramClient::new("héllo", "pässwörd™");
        let server_first = format!("r={}ext,s={},i=4096", client.nonce, BASE64.encode(b"salty"));
        assert!(client.client_final(&server_first).is_ok());
    }
}
