//! Authentication handling for Exasol connections.
//!
//! This module provides secure credential management and builds the two login
//! payloads: the RSA-encrypted username/password payload and the token payload.

use crate::error::ExasolError;
use crate::transport::messages::{
    Attributes, ClientInfo, CredentialsPayload, PublicKeyResponse, TokenPayload,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rsa::{BigUint, Pkcs1v15Encrypt, RsaPublicKey};
use std::fmt;
use std::ops::Deref;

use super::params::DriverConfig;

/// Runtime reported to the server at login.
pub const CLIENT_RUNTIME: &str = "Rust";

/// Driver identification reported to the server at login.
pub fn driver_name() -> String {
    format!("exadriver {}", env!("CARGO_PKG_VERSION"))
}

/// Credential set selected for the handshake.
///
/// This type ensures secrets are never accidentally logged or displayed.
#[derive(Clone)]
pub enum Credentials {
    /// Basic authentication with an RSA-encrypted password
    Password {
        username: String,
        password: SecureString,
    },
    /// Token authentication; a refresh token takes precedence
    Token {
        access_token: Option<SecureString>,
        refresh_token: Option<SecureString>,
    },
}

impl Credentials {
    pub fn password(username: String, password: String) -> Self {
        Credentials::Password {
            username,
            password: SecureString::new(password),
        }
    }

    pub fn token(access_token: Option<String>, refresh_token: Option<String>) -> Self {
        Credentials::Token {
            access_token: access_token.map(SecureString::new),
            refresh_token: refresh_token.map(SecureString::new),
        }
    }

    pub fn is_basic(&self) -> bool {
        matches!(self, Credentials::Password { .. })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Password { username, .. } => f
                .debug_struct("Password")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Credentials::Token {
                access_token,
                refresh_token,
            } => f
                .debug_struct("Token")
                .field("access_token", &access_token.is_some())
                .field("refresh_token", &refresh_token.is_some())
                .finish(),
        }
    }
}

/// Secret string that never displays its contents.
///
/// Only `Debug` output is redacted; the value is copied freely with its
/// `DriverConfig` and is not wiped from memory.
#[derive(Clone, PartialEq, Eq)]
pub struct SecureString(String);

impl SecureString {
    pub fn new(s: String) -> Self {
        Self(s)
    }
}

impl Deref for SecureString {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecureString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecureString(<redacted>)")
    }
}

/// Encrypt `password` with the server's public key.
///
/// Modulus and exponent arrive hex-encoded. The ciphertext is PKCS#1 v1.5
/// padded and returned base64-encoded.
pub fn encrypt_password(password: &str, key: &PublicKeyResponse) -> Result<String, ExasolError> {
    let modulus = parse_hex_uint(&key.public_key_modulus, "modulus")?;
    let exponent = parse_hex_uint(&key.public_key_exponent, "exponent")?;

    let public_key = RsaPublicKey::new(modulus, exponent)
        .map_err(|e| ExasolError::Authentication(format!("Invalid public key: {}", e)))?;

    let mut rng = rand::thread_rng();
    let ciphertext = public_key
        .encrypt(&mut rng, Pkcs1v15Encrypt, password.as_bytes())
        .map_err(|e| ExasolError::Authentication(format!("Password encryption failed: {}", e)))?;

    Ok(STANDARD.encode(ciphertext))
}

fn parse_hex_uint(hex_digits: &str, what: &str) -> Result<BigUint, ExasolError> {
    let digits = hex_digits.trim();
    let padded = if digits.len() % 2 == 1 {
        format!("0{}", digits)
    } else {
        digits.to_string()
    };
    let bytes = hex::decode(padded).map_err(|e| {
        ExasolError::Authentication(format!("Invalid public key {}: {}", what, e))
    })?;
    Ok(BigUint::from_bytes_be(&bytes))
}

/// Client identification and session attributes sent with either payload.
pub fn client_info(config: &DriverConfig, compression_enabled: bool) -> ClientInfo {
    ClientInfo {
        use_compression: false,
        client_name: config.client_name.clone(),
        driver_name: driver_name(),
        client_os: std::env::consts::OS.to_string(),
        client_version: config.client_version.clone(),
        client_runtime: CLIENT_RUNTIME.to_string(),
        attributes: Attributes {
            autocommit: Some(config.autocommit),
            current_schema: config.schema.clone(),
            compression_enabled: Some(compression_enabled),
            ..Default::default()
        },
    }
}

/// Username/password payload.
///
/// Compression is always advertised as disabled here, regardless of the
/// configured flag.
pub fn credentials_payload(
    username: &str,
    encrypted_password: String,
    config: &DriverConfig,
) -> CredentialsPayload {
    CredentialsPayload {
        username: username.to_string(),
        password: encrypted_password,
        client: client_info(config, false),
    }
}

/// Token payload carrying either the refresh or the access token.
pub fn token_payload(
    access_token: Option<&str>,
    refresh_token: Option<&str>,
    config: &DriverConfig,
) -> TokenPayload {
    let (access_token, refresh_token) = match refresh_token {
        Some(refresh) => (None, Some(refresh.to_string())),
        None => (access_token.map(str::to_string), None),
    };

    TokenPayload {
        access_token,
        refresh_token,
        client: client_info(config, config.compression),
    }
}
