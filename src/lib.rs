//! Rust and Python-facing client library for the FreeIPA JSON-RPC API.
//!
//! Public API layers:
//! - [`IpaClient`]/[`BlockingIpaClient`]: session clients with one method per
//!   FreeIPA command (`user_add`, `dnsrecord_find`, `sudorule_mod`, ...).
//! - [`IpaClientBuilder`]: server list, DNS discovery, TLS and API version.
//! - [`marshal`]/[`Params`]: the schema-driven packing shared by every command.
//! - [`ClientError`]: unified error type used by all clients.
//!
//! The command catalog and the per-command methods are generated at build
//! time from `schema/commands.json`.
//!
//! ```no_run
//! use freeipa_client::{BlockingIpaClient, Params};
//!
//! # fn main() -> Result<(), freeipa_client::ClientError> {
//! let client = BlockingIpaClient::new("ipa.example.test")?;
//! client.login("admin", "Secret123")?;
//! let user = client.user_add("jdoe", "John", "Doe", Params::new().with("cn", "John Doe"))?;
//! println!("{}", user["summary"]);
//! # Ok(())
//! # }
//! ```

mod blocking_client;
mod client;
mod command;
mod discovery;
mod error;
mod rpc;
mod session;

/// Blocking FreeIPA client.
pub use blocking_client::BlockingIpaClient;
/// Async FreeIPA client.
pub use client::IpaClient;
pub use command::{
    ArgDefinition, CommandDefinition, DefaultValue, OptionDefinition, Params, RpcCall, commands,
    find_command, ipa_api_version, marshal,
};
#[cfg(feature = "dns-discovery")]
pub use discovery::SystemResolver;
pub use discovery::{Server, SrvRecord, SrvResolver, StaticResolver, discover_servers};
/// Error types returned by all client operations.
pub use error::{ClientError, IpaError, IpaErrorKind, LoginRejection};
pub use rpc::build_envelope;
pub use session::IpaClientBuilder;

#[cfg(feature = "python")]
mod python;
