use std::fmt;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Errors returned by FreeIPA client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// A server address is neither a host name nor a valid absolute URL.
    #[error("invalid server URL '{0}'")]
    InvalidServerUrl(String),

    /// No server is left to talk to after configuration and discovery.
    #[error("no FreeIPA server configured")]
    NoServers,

    /// DNS SRV lookup failed.
    #[error("server discovery failed for '{domain}': {reason}")]
    Discovery { domain: String, reason: String },

    /// The requested command is not present in the generated catalog.
    #[error("unknown FreeIPA command '{0}'")]
    UnknownCommand(String),

    /// A required positional argument or option was not provided.
    #[error("missing required argument '{argument}' for command '{command}'")]
    MissingArgument { command: String, argument: String },

    /// More positional arguments were given than the command declares.
    #[error("command '{command}' takes at most {expected} positional arguments, {given} given")]
    TooManyArguments {
        command: String,
        expected: usize,
        given: usize,
    },

    /// HTTP transport-layer request failure.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Response body could not be parsed as JSON.
    #[error("failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Non-success HTTP status with response payload.
    #[error("server returned status {status}: {body}")]
    HttpStatus {
        status: reqwest::StatusCode,
        body: String,
    },

    /// The session is missing or expired.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Password login was refused by the server.
    #[error("login rejected: {0}")]
    LoginRejected(LoginRejection),

    /// Password change did not succeed.
    #[error("password change failed ({result}): {}", .policy_error.as_deref().unwrap_or("no details"))]
    PasswordChange {
        result: String,
        policy_error: Option<String>,
    },

    /// JSON-RPC response did not have the expected shape.
    #[error("invalid JSON-RPC response: {0}")]
    InvalidResponse(String),

    /// Error object returned by the FreeIPA server.
    #[error(transparent)]
    Ipa(#[from] IpaError),
}

impl ClientError {
    /// Returns `true` when no connection to the server could be established,
    /// connect timeouts included.
    ///
    /// These are the failures that move the client on to the next server. A
    /// request that timed out after connecting may already have been applied,
    /// so it is not one of them.
    pub fn is_connection_failure(&self) -> bool {
        match self {
            Self::Request(error) => error.is_connect(),
            _ => false,
        }
    }

    /// Returns the server-side error, if this is one.
    pub fn ipa_error(&self) -> Option<&IpaError> {
        match self {
            Self::Ipa(error) => Some(error),
            _ => None,
        }
    }
}

/// Reason reported in the `X-IPA-Rejection-Reason` header of a failed login.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoginRejection {
    PasswordExpired,
    InvalidPassword,
    PrincipalExpired,
    UserLocked,
    /// No or unrecognized rejection reason.
    Other(String),
}

impl LoginRejection {
    /// Maps a header value to a rejection reason.
    pub fn from_header(value: Option<&str>) -> Self {
        match value {
            Some("password-expired") => Self::PasswordExpired,
            Some("invalid-password") => Self::InvalidPassword,
            Some("krbprincipal-expired") => Self::PrincipalExpired,
            Some("user-locked") => Self::UserLocked,
            Some(other) => Self::Other(other.to_owned()),
            None => Self::Other("denied".to_owned()),
        }
    }
}

impl fmt::Display for LoginRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PasswordExpired => f.write_str("password expired"),
            Self::InvalidPassword => f.write_str("invalid password"),
            Self::PrincipalExpired => f.write_str("principal expired"),
            Self::UserLocked => f.write_str("user locked"),
            Self::Other(reason) => f.write_str(reason),
        }
    }
}

/// JSON-RPC error object returned by FreeIPA.
#[derive(Clone, Debug, Deserialize, Error)]
#[error("{name} ({code}): {message}")]
pub struct IpaError {
    pub code: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: Value,
}

impl IpaError {
    /// Classifies the error code.
    pub fn kind(&self) -> IpaErrorKind {
        IpaErrorKind::from_code(self.code)
    }
}

/// Classification of FreeIPA public error codes.
///
/// Well-known codes get their own variant; everything else falls into the
/// category of its code range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IpaErrorKind {
    VersionError,
    InternalError,
    CommandError,
    RefererError,
    InvalidSessionPassword,
    PasswordExpired,
    PrincipalExpired,
    UserLocked,
    AciError,
    RequirementError,
    ConversionError,
    ValidationError,
    NotFound,
    DuplicateEntry,
    AlreadyActive,
    AlreadyInactive,
    NotGroupMember,
    AlreadyGroupMember,
    EmptyModlist,
    LimitsExceeded,
    /// Other 1xxx codes.
    Authentication,
    /// Other 2xxx codes.
    Authorization,
    /// Other 3xxx codes.
    Invocation,
    /// Other 4xxx codes.
    Execution,
    Other,
}

impl IpaErrorKind {
    pub fn from_code(code: i64) -> Self {
        match code {
            901 => Self::VersionError,
            903 => Self::InternalError,
            905 => Self::CommandError,
            911 => Self::RefererError,
            1109 => Self::InvalidSessionPassword,
            1110 => Self::PasswordExpired,
            1111 => Self::PrincipalExpired,
            1112 => Self::UserLocked,
            2100 => Self::AciError,
            3007 => Self::RequirementError,
            3008 => Self::ConversionError,
            3009 => Self::ValidationError,
            4001 => Self::NotFound,
            4002 => Self::DuplicateEntry,
            4009 => Self::AlreadyActive,
            4010 => Self::AlreadyInactive,
            4012 => Self::NotGroupMember,
            4014 => Self::AlreadyGroupMember,
            4201 => Self::LimitsExceeded,
            4202 => Self::EmptyModlist,
            1000..=1999 => Self::Authentication,
            2000..=2999 => Self::Authorization,
            3000..=3999 => Self::Invocation,
            4000..=4999 => Self::Execution,
            _ => Self::Other,
        }
    }
}
