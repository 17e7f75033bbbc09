use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::HeaderMap;

use crate::discovery::{Server, ServerPool, SrvResolver, discover_servers};
use crate::rpc::{PWCHANGE_POLICY_ERROR_HEADER, PWCHANGE_RESULT_HEADER, REJECTION_REASON_HEADER};
use crate::{BlockingIpaClient, ClientError, IpaClient, LoginRejection, ipa_api_version};

/// Configuration shared by [`IpaClient`] and [`BlockingIpaClient`].
///
/// ```no_run
/// # fn main() -> Result<(), freeipa_client::ClientError> {
/// let client = freeipa_client::IpaClient::builder("ipa.example.test")
///     .with_verify_ssl(false)
///     .with_fallback_servers(["ipa2.example.test"])
///     .build()?;
/// # let _ = client;
/// # Ok(())
/// # }
/// ```
pub struct IpaClientBuilder {
    host: String,
    fallback_servers: Vec<String>,
    version: String,
    verify_ssl: bool,
    timeout: Option<Duration>,
    resolver: Option<Box<dyn SrvResolver>>,
}

impl IpaClientBuilder {
    /// Starts a configuration for `host`: a host name, an absolute URL, or a
    /// DNS domain when combined with [`Self::with_dns_discovery`].
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            fallback_servers: Vec::new(),
            version: ipa_api_version().to_owned(),
            verify_ssl: true,
            timeout: None,
            resolver: None,
        }
    }

    /// Overrides the API version sent with every command.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Disables TLS certificate verification when `false`.
    #[must_use]
    pub fn with_verify_ssl(mut self, verify_ssl: bool) -> Self {
        self.verify_ssl = verify_ssl;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Appends servers to try, in order, when the primary ones are unreachable.
    #[must_use]
    pub fn with_fallback_servers<I, S>(mut self, servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fallback_servers
            .extend(servers.into_iter().map(Into::into));
        self
    }

    /// Treats the configured host as a DNS domain and looks up its servers
    /// through `resolver` when the client is built.
    #[must_use]
    pub fn with_dns_discovery(mut self, resolver: impl SrvResolver + 'static) -> Self {
        self.resolver = Some(Box::new(resolver));
        self
    }

    /// Builds an async client.
    pub fn build(self) -> Result<IpaClient, ClientError> {
        let mut http = reqwest::Client::builder().cookie_store(true);
        if !self.verify_ssl {
            http = http.danger_accept_invalid_certs(true);
        }
        if let Some(timeout) = self.timeout {
            http = http.timeout(timeout);
        }
        let http = http.build()?;
        Ok(IpaClient::from_parts(http, Arc::new(self.into_state()?)))
    }

    /// Builds a blocking client.
    pub fn build_blocking(self) -> Result<BlockingIpaClient, ClientError> {
        let mut http = reqwest::blocking::Client::builder().cookie_store(true);
        if !self.verify_ssl {
            http = http.danger_accept_invalid_certs(true);
        }
        if let Some(timeout) = self.timeout {
            http = http.timeout(timeout);
        }
        let http = http.build()?;
        Ok(BlockingIpaClient::from_parts(
            http,
            Arc::new(self.into_state()?),
        ))
    }

    fn into_state(self) -> Result<SessionState, ClientError> {
        let mut servers = match &self.resolver {
            Some(resolver) => discover_servers(&self.host, resolver.as_ref())?,
            None => vec![Server::parse(&self.host)?],
        };
        for host in &self.fallback_servers {
            let server = Server::parse(host)?;
            if !servers.contains(&server) {
                servers.push(server);
            }
        }

        Ok(SessionState {
            servers: ServerPool::new(servers)?,
            version: self.version,
            credentials: Mutex::new(None),
        })
    }
}

/// State shared by all clones of a client.
#[derive(Debug)]
pub(crate) struct SessionState {
    pub(crate) servers: ServerPool,
    pub(crate) version: String,
    credentials: Mutex<Option<Credentials>>,
}

impl SessionState {
    pub(crate) fn credentials(&self) -> Option<Credentials> {
        self.credentials
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_credentials(&self, credentials: Option<Credentials>) {
        *self
            .credentials
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = credentials;
    }
}

/// Password login kept to re-open the session on another server.
#[derive(Clone)]
pub(crate) struct Credentials {
    pub(crate) user: String,
    pub(crate) password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Interprets the response of `login_password`.
pub(crate) fn check_login(
    status: StatusCode,
    headers: &HeaderMap,
    body: String,
) -> Result<(), ClientError> {
    if status.is_success() {
        return Ok(());
    }
    if status == StatusCode::UNAUTHORIZED {
        let reason = header_str(headers, REJECTION_REASON_HEADER);
        return Err(ClientError::LoginRejected(LoginRejection::from_header(
            reason,
        )));
    }
    Err(ClientError::HttpStatus { status, body })
}

/// Interprets the response of `change_password`.
pub(crate) fn check_password_change(
    status: StatusCode,
    headers: &HeaderMap,
    body: String,
) -> Result<(), ClientError> {
    if !status.is_success() {
        return Err(ClientError::HttpStatus { status, body });
    }
    match header_str(headers, PWCHANGE_RESULT_HEADER) {
        Some("ok") => Ok(()),
        result => Err(ClientError::PasswordChange {
            result: result.unwrap_or("unknown").to_owned(),
            policy_error: header_str(headers, PWCHANGE_POLICY_ERROR_HEADER).map(str::to_owned),
        }),
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}
