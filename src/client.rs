use std::sync::Arc;

use reqwest::header::{ACCEPT, REFERER};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::command::{self, CommandDefinition, Params, RpcCall, marshal};
use crate::discovery::Server;
use crate::rpc::{build_envelope, decode_response};
use crate::session::{self, Credentials, SessionState};
use crate::{ClientError, IpaClientBuilder};

/// Async FreeIPA JSON-RPC client.
///
/// Every command of the generated catalog is available as a method of the same
/// name (`user_add`, `dnsrecord_find`, ...). Clones share the HTTP connection
/// pool, the session cookie and the active server.
#[derive(Clone, Debug)]
pub struct IpaClient {
    http: reqwest::Client,
    state: Arc<SessionState>,
}

impl IpaClient {
    /// Creates a client for a single server with default settings.
    pub fn new(host: impl Into<String>) -> Result<Self, ClientError> {
        IpaClientBuilder::new(host).build()
    }

    /// Starts a client configuration; finish it with [`IpaClientBuilder::build`].
    pub fn builder(host: impl Into<String>) -> IpaClientBuilder {
        IpaClientBuilder::new(host)
    }

    pub(crate) fn from_parts(http: reqwest::Client, state: Arc<SessionState>) -> Self {
        Self { http, state }
    }

    /// Returns all commands of the generated catalog.
    pub fn commands() -> &'static [CommandDefinition] {
        command::commands()
    }

    /// API version sent with every command.
    pub fn version(&self) -> &str {
        &self.state.version
    }

    /// Candidate servers in failover order.
    pub fn servers(&self) -> &[Server] {
        self.state.servers.servers()
    }

    /// Server requests are currently sent to.
    pub fn active_server(&self) -> &Server {
        self.state.servers.active()
    }

    /// User of the last successful password login, if any.
    pub fn current_user(&self) -> Option<String> {
        self.state.credentials().map(|credentials| credentials.user)
    }

    /// Opens a session with a user name and password.
    ///
    /// The session cookie is kept by the client; the credentials are kept to
    /// re-open the session if the client fails over to another server.
    pub async fn login(&self, user: &str, password: &str) -> Result<(), ClientError> {
        let credentials = Credentials {
            user: user.to_owned(),
            password: password.to_owned(),
        };

        let mut failover = self.state.servers.failover();
        loop {
            match self.login_at(failover.server(), &credentials).await {
                Ok(()) => break,
                Err(error) => failover.recover(error)?,
            }
        }

        info!(user, server = %failover.server(), "logged in to FreeIPA");
        self.state.set_credentials(Some(credentials));
        Ok(())
    }

    /// Ends the server-side session and forgets the stored credentials.
    pub async fn logout(&self) -> Result<(), ClientError> {
        let outcome = self.call_raw("session_logout", Vec::new(), Map::new()).await;
        self.state.set_credentials(None);
        outcome?;
        info!("logged out of FreeIPA");
        Ok(())
    }

    /// Changes a user's password through the `change_password` form endpoint.
    ///
    /// This does not need an open session.
    pub async fn change_password(
        &self,
        user: &str,
        old_password: &str,
        new_password: &str,
        otp: Option<&str>,
    ) -> Result<(), ClientError> {
        let mut form = vec![
            ("user", user),
            ("old_password", old_password),
            ("new_password", new_password),
        ];
        if let Some(otp) = otp {
            form.push(("otp", otp));
        }

        let mut failover = self.state.servers.failover();
        loop {
            match self.change_password_at(failover.server(), &form).await {
                Ok(()) => break,
                Err(error) => failover.recover(error)?,
            }
        }

        info!(user, "password changed");
        Ok(())
    }

    /// Calls a catalog command by name.
    ///
    /// Positional `args` follow the command's declaration order; `params` is
    /// merged with the schema defaults as described in [`crate::marshal`].
    pub async fn call_command(
        &self,
        name: &str,
        args: Vec<Value>,
        params: Params,
    ) -> Result<Value, ClientError> {
        self.call_generated(name, args.into_iter().map(Some).collect(), params)
            .await
    }

    /// Sends a command without consulting the catalog.
    ///
    /// No defaults are added and no argument checks are made; only the API
    /// `version` is filled in.
    pub async fn call_raw(
        &self,
        method: &str,
        args: Vec<Value>,
        params: Map<String, Value>,
    ) -> Result<Value, ClientError> {
        self.send(RpcCall {
            method: method.to_owned(),
            args,
            params,
        })
        .await
    }

    pub(crate) async fn call_generated(
        &self,
        name: &str,
        args: Vec<Option<Value>>,
        params: Params,
    ) -> Result<Value, ClientError> {
        let command = command::find_command(name)?;
        self.send(marshal(command, args, params)?).await
    }

    async fn send(&self, call: RpcCall) -> Result<Value, ClientError> {
        let envelope = build_envelope(&call, &self.state.version);

        let mut failover = self.state.servers.failover();
        loop {
            let server = failover.server();
            let attempt = if failover.is_retry() {
                self.resume_session(server).await
            } else {
                Ok(())
            };
            let attempt = match attempt {
                Ok(()) => self.post_rpc(server, &call.method, &envelope).await,
                Err(error) => Err(error),
            };
            match attempt {
                Ok(result) => return Ok(result),
                Err(error) => failover.recover(error)?,
            }
        }
    }

    async fn resume_session(&self, server: &Server) -> Result<(), ClientError> {
        match self.state.credentials() {
            Some(credentials) => self.login_at(server, &credentials).await,
            None => Ok(()),
        }
    }

    async fn change_password_at(
        &self,
        server: &Server,
        form: &[(&str, &str)],
    ) -> Result<(), ClientError> {
        debug!(server = %server, "password change");
        let response = self
            .http
            .post(server.change_password_url().clone())
            .header(REFERER, server.referer())
            .header(ACCEPT, "text/plain")
            .form(form)
            .send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await?;
        session::check_password_change(status, &headers, body)
    }

    async fn login_at(&self, server: &Server, credentials: &Credentials) -> Result<(), ClientError> {
        debug!(server = %server, user = %credentials.user, "password login");
        let response = self
            .http
            .post(server.login_url().clone())
            .header(REFERER, server.referer())
            .header(ACCEPT, "text/plain")
            .form(&[
                ("user", credentials.user.as_str()),
                ("password", credentials.password.as_str()),
            ])
            .send()
            .await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await?;
        session::check_login(status, &headers, body)
    }

    async fn post_rpc(
        &self,
        server: &Server,
        method: &str,
        envelope: &Value,
    ) -> Result<Value, ClientError> {
        debug!(server = %server, method, "sending JSON-RPC request");
        let response = self
            .http
            .post(server.rpc_url().clone())
            .header(REFERER, server.referer())
            .header(ACCEPT, "application/json")
            .json(envelope)
            .send()
            .await?;
        let status = response.status();
        let payload = response.text().await?;
        decode_response(method, status, &payload)
    }
}

// Generated file contract (`$OUT_DIR/ipa_async_methods.rs`):
// one `impl IpaClient` block with an async method per catalog command, taking
// the command's positional arguments followed by `params: Params`, and
// forwarding to `IpaClient::call_generated`.
include!(concat!(env!("OUT_DIR"), "/ipa_async_methods.rs"));
