//! Common test utilities for exadriver integration tests.
//!
//! Two kinds of tests share these helpers:
//!
//! - `fake_server` tests run against the in-memory [`emulator`] and need
//!   nothing but the test binary.
//! - `integration_tests` require a running Exasol database instance. The
//!   recommended approach is to use the Exasol Docker image:
//!
//! ```bash
//! docker run -d --name exasol-test \
//!   -p 8563:8563 \
//!   --privileged \
//!   exasol/docker-db:latest
//! ```
//!
//! # Configuration
//!
//! Live tests use the following defaults which can be overridden via
//! environment variables:
//!
//! | Default Constant   | Environment Variable | Default Value |
//! |--------------------|----------------------|---------------|
//! | `DEFAULT_HOST`     | `EXASOL_HOST`        | "localhost"   |
//! | `DEFAULT_PORT`     | `EXASOL_PORT`        | 8563          |
//! | `DEFAULT_USER`     | `EXASOL_USER`        | "sys"         |
//! | `DEFAULT_PASSWORD` | `EXASOL_PASSWORD`    | "exasol"      |
//!
//! Live tests skip automatically when Exasol is not reachable at the
//! configured host and port.

#![allow(dead_code)]

pub mod emulator;

use exadriver::{Driver, DriverConfig, ExasolError};
use std::env;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Default host for Exasol database connection.
pub const DEFAULT_HOST: &str = "localhost";

/// Default port for Exasol database connection.
pub const DEFAULT_PORT: u16 = 8563;

/// Default username for Exasol database connection.
pub const DEFAULT_USER: &str = "sys";

/// Default password for Exasol database connection.
pub const DEFAULT_PASSWORD: &str = "exasol";

const ENV_EXASOL_HOST: &str = "EXASOL_HOST";
const ENV_EXASOL_PORT: &str = "EXASOL_PORT";
const ENV_EXASOL_USER: &str = "EXASOL_USER";
const ENV_EXASOL_PASSWORD: &str = "EXASOL_PASSWORD";

/// Get the Exasol host from environment or use default.
pub fn get_host() -> String {
    env::var(ENV_EXASOL_HOST).unwrap_or_else(|_| DEFAULT_HOST.to_string())
}

/// Get the Exasol port from environment or use default.
///
/// An unparsable port falls back to the default.
pub fn get_port() -> u16 {
    env::var(ENV_EXASOL_PORT)
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_PORT)
}

pub fn get_user() -> String {
    env::var(ENV_EXASOL_USER).unwrap_or_else(|_| DEFAULT_USER.to_string())
}

pub fn get_password() -> String {
    env::var(ENV_EXASOL_PASSWORD).unwrap_or_else(|_| DEFAULT_PASSWORD.to_string())
}

/// Build a connection string from the current configuration.
///
/// Certificate validation is disabled since Exasol Docker uses self-signed
/// certificates.
pub fn get_test_connection_string() -> String {
    format!(
        "exasol://{}:{}@{}:{}?encryption=true&validate_certificate=false",
        get_user(),
        get_password(),
        get_host(),
        get_port()
    )
}

pub fn get_test_config() -> Result<DriverConfig, ExasolError> {
    Ok(get_test_connection_string().parse()?)
}

/// Connect a driver to the configured database.
pub async fn get_test_driver() -> Result<Driver, ExasolError> {
    let driver = Driver::new(get_test_config()?);
    driver.connect().await?;
    Ok(driver)
}

/// Check if Exasol is reachable at the configured host and port.
///
/// Only network connectivity is checked, not authentication.
pub fn is_exasol_available() -> bool {
    let addr = format!("{}:{}", get_host(), get_port());

    let socket_addrs: Vec<_> = match addr.to_socket_addrs() {
        Ok(addrs) => addrs.collect(),
        Err(_) => return false,
    };

    socket_addrs
        .iter()
        .any(|socket_addr| TcpStream::connect_timeout(socket_addr, Duration::from_secs(2)).is_ok())
}

/// Skip a test if Exasol is not available.
#[macro_export]
macro_rules! skip_if_no_exasol {
    () => {
        if !$crate::common::is_exasol_available() {
            eprintln!(
                "Skipping test: Exasol not available at {}:{}",
                $crate::common::get_host(),
                $crate::common::get_port()
            );
            return;
        }
    };
}

/// Generate a unique test schema name.
pub fn generate_test_schema_name() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards")
        .as_millis();

    format!("TEST_EXADRIVER_{}", timestamp)
}
