//! FreeIPA server addresses, DNS SRV discovery and failover between servers.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use reqwest::Url;
use tracing::warn;

use crate::ClientError;
use crate::rpc::{CHANGE_PASSWORD_PATH, JSON_PATH, LOGIN_PATH, REFERER_PATH};

/// One FreeIPA server and the session endpoints derived from it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Server {
    base_url: Url,
    rpc_url: Url,
    login_url: Url,
    change_password_url: Url,
    referer: String,
}

impl Server {
    /// Parses a bare host name (`ipa.example.test`, HTTPS assumed) or an
    /// absolute URL (`http://127.0.0.1:8080`).
    pub fn parse(host: &str) -> Result<Self, ClientError> {
        let host = host.trim();
        if host.is_empty() {
            return Err(ClientError::InvalidServerUrl(host.to_owned()));
        }
        let raw = if host.contains("://") {
            host.to_owned()
        } else {
            format!("https://{host}")
        };
        let parsed = Url::parse(&raw)
            .ok()
            .filter(Url::has_host)
            .ok_or_else(|| ClientError::InvalidServerUrl(host.to_owned()))?;
        let base_url = ensure_trailing_slash(parsed);

        let join = |path: &str| {
            base_url
                .join(path)
                .map_err(|_| ClientError::InvalidServerUrl(host.to_owned()))
        };
        Ok(Self {
            rpc_url: join(JSON_PATH)?,
            login_url: join(LOGIN_PATH)?,
            change_password_url: join(CHANGE_PASSWORD_PATH)?,
            referer: join(REFERER_PATH)?.to_string(),
            base_url,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub(crate) fn rpc_url(&self) -> &Url {
        &self.rpc_url
    }

    pub(crate) fn login_url(&self) -> &Url {
        &self.login_url
    }

    pub(crate) fn change_password_url(&self) -> &Url {
        &self.change_password_url
    }

    /// Value of the `Referer` header FreeIPA requires on session requests.
    pub(crate) fn referer(&self) -> &str {
        &self.referer
    }
}

impl fmt::Display for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.base_url.as_str())
    }
}

fn ensure_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let mut path = url.path().to_owned();
        path.push('/');
        url.set_path(&path);
    }
    url
}

/// Ordered candidate servers plus the index of the one currently in use.
#[derive(Debug)]
pub(crate) struct ServerPool {
    servers: Vec<Server>,
    active: AtomicUsize,
}

impl ServerPool {
    pub(crate) fn new(servers: Vec<Server>) -> Result<Self, ClientError> {
        if servers.is_empty() {
            return Err(ClientError::NoServers);
        }
        Ok(Self {
            servers,
            active: AtomicUsize::new(0),
        })
    }

    pub(crate) fn servers(&self) -> &[Server] {
        &self.servers
    }

    pub(crate) fn active(&self) -> &Server {
        &self.servers[self.active.load(Ordering::Acquire) % self.servers.len()]
    }

    /// Starts a request that may fail over across the pool.
    pub(crate) fn failover(&self) -> Failover<'_> {
        Failover {
            pool: self,
            index: self.active.load(Ordering::Acquire) % self.servers.len(),
            attempts: 1,
        }
    }

    /// Moves the active server past `failed`, unless another request already did.
    fn advance_from(&self, failed: usize) -> usize {
        let next = (failed + 1) % self.servers.len();
        match self
            .active
            .compare_exchange(failed, next, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => next,
            Err(current) => current % self.servers.len(),
        }
    }
}

/// Cursor over the servers tried by a single request.
#[derive(Debug)]
pub(crate) struct Failover<'a> {
    pool: &'a ServerPool,
    index: usize,
    attempts: usize,
}

impl<'a> Failover<'a> {
    pub(crate) fn server(&self) -> &'a Server {
        &self.pool.servers[self.index]
    }

    /// Whether the current attempt is on a server other than the first one tried.
    pub(crate) fn is_retry(&self) -> bool {
        self.attempts > 1
    }

    /// Decides what to do with a failed attempt.
    ///
    /// Connection failures move on to the next server while untried servers
    /// remain; anything else is returned to the caller.
    pub(crate) fn recover(&mut self, error: ClientError) -> Result<(), ClientError> {
        if !error.is_connection_failure() || self.attempts >= self.pool.servers.len() {
            return Err(error);
        }
        let failed = self.server().clone();
        self.index = self.pool.advance_from(self.index);
        self.attempts += 1;
        warn!(
            failed = %failed,
            next = %self.server(),
            error = %error,
            "FreeIPA server unreachable, failing over"
        );
        Ok(())
    }
}

/// One DNS SRV record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SrvRecord {
    pub priority: u16,
    pub weight: u16,
    pub port: u16,
    pub target: String,
}

/// Source of DNS SRV records.
pub trait SrvResolver: Send + Sync {
    /// Returns the SRV records for `name`; an empty list when none exist.
    fn lookup_srv(&self, name: &str) -> Result<Vec<SrvRecord>, ClientError>;
}

/// Resolver answering from a fixed table, keyed by full SRV name.
#[derive(Clone, Debug, Default)]
pub struct StaticResolver {
    records: HashMap<String, Vec<SrvRecord>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_record(mut self, name: impl Into<String>, record: SrvRecord) -> Self {
        self.records.entry(name.into()).or_default().push(record);
        self
    }
}

impl SrvResolver for StaticResolver {
    fn lookup_srv(&self, name: &str) -> Result<Vec<SrvRecord>, ClientError> {
        Ok(self.records.get(name).cloned().unwrap_or_default())
    }
}

/// Resolver backed by the system DNS configuration.
#[cfg(feature = "dns-discovery")]
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemResolver;

#[cfg(feature = "dns-discovery")]
impl SrvResolver for SystemResolver {
    fn lookup_srv(&self, name: &str) -> Result<Vec<SrvRecord>, ClientError> {
        use hickory_resolver::Resolver;
        use hickory_resolver::error::ResolveErrorKind;

        let query = name.to_owned();
        // The synchronous resolver drives its own runtime, so it must not run on
        // a thread that is already inside one.
        let outcome = std::thread::spawn(move || -> Result<Vec<SrvRecord>, String> {
            let resolver = Resolver::from_system_conf().map_err(|e| e.to_string())?;
            match resolver.srv_lookup(query) {
                Ok(lookup) => Ok(lookup
                    .iter()
                    .map(|srv| SrvRecord {
                        priority: srv.priority(),
                        weight: srv.weight(),
                        port: srv.port(),
                        target: srv.target().to_utf8(),
                    })
                    .collect()),
                Err(error) if matches!(error.kind(), ResolveErrorKind::NoRecordsFound { .. }) => {
                    Ok(Vec::new())
                }
                Err(error) => Err(error.to_string()),
            }
        })
        .join()
        .map_err(|_| "resolver thread panicked".to_owned())
        .and_then(|result| result);

        outcome.map_err(|reason| ClientError::Discovery {
            domain: name.to_owned(),
            reason,
        })
    }
}

/// Finds the FreeIPA servers of `domain` through its `_ldap._tcp` SRV records.
///
/// Servers are ordered by ascending priority, then descending weight. When the
/// domain publishes no records, the domain itself is used as the only server.
pub fn discover_servers(
    domain: &str,
    resolver: &dyn SrvResolver,
) -> Result<Vec<Server>, ClientError> {
    let domain = domain.trim().trim_end_matches('.');
    let mut records = resolver.lookup_srv(&format!("_ldap._tcp.{domain}"))?;
    if records.is_empty() {
        warn!(domain, "no _ldap._tcp SRV records found, using the domain as server");
        return Ok(vec![Server::parse(domain)?]);
    }

    records.sort_by(|left, right| {
        left.priority
            .cmp(&right.priority)
            .then(right.weight.cmp(&left.weight))
    });

    let mut servers: Vec<Server> = Vec::with_capacity(records.len());
    for record in records {
        let target = record.target.trim_end_matches('.');
        if target.is_empty() {
            continue;
        }
        let server = Server::parse(target)?;
        if !servers.contains(&server) {
            servers.push(server);
        }
    }
    if servers.is_empty() {
        return Err(ClientError::Discovery {
            domain: domain.to_owned(),
            reason: "SRV records carry no usable target".to_owned(),
        });
    }
    Ok(servers)
}

#[cfg(test)]
mod tests {
    use super::{Server, ServerPool, SrvRecord, StaticResolver, discover_servers};
    use crate::ClientError;

    fn record(priority: u16, weight: u16, target: &str) -> SrvRecord {
        SrvRecord {
            priority,
            weight,
            port: 389,
            target: target.to_owned(),
        }
    }

    #[test]
    fn bare_host_gets_https_endpoints() {
        let server = Server::parse("ipa.example.test").expect("valid host");
        assert_eq!(server.base_url().as_str(), "https://ipa.example.test/");
        assert_eq!(
            server.rpc_url().as_str(),
            "https://ipa.example.test/ipa/session/json"
        );
        assert_eq!(server.referer(), "https://ipa.example.test/ipa");
    }

    #[test]
    fn url_prefix_is_preserved() {
        let server = Server::parse("http://127.0.0.1:8080/proxy").expect("valid url");
        assert_eq!(
            server.login_url().as_str(),
            "http://127.0.0.1:8080/proxy/ipa/session/login_password"
        );
    }

    #[test]
    fn empty_host_is_rejected() {
        assert!(matches!(
            Server::parse("  "),
            Err(ClientError::InvalidServerUrl(_))
        ));
    }

    #[test]
    fn srv_records_are_ordered_by_priority_then_weight() {
        let name = "_ldap._tcp.example.test";
        let resolver = StaticResolver::new()
            .with_record(name, record(10, 0, "ipa3.example.test."))
            .with_record(name, record(0, 10, "ipa2.example.test."))
            .with_record(name, record(0, 50, "ipa1.example.test."))
            .with_record(name, record(10, 5, "ipa1.example.test."));

        let servers = discover_servers("example.test", &resolver).expect("discovers");
        let hosts: Vec<_> = servers.iter().map(ToString::to_string).collect();
        assert_eq!(
            hosts,
            vec![
                "https://ipa1.example.test/",
                "https://ipa2.example.test/",
                "https://ipa3.example.test/",
            ]
        );
    }

    #[test]
    fn domain_without_records_is_used_directly() {
        let servers = discover_servers("example.test", &StaticResolver::new()).expect("falls back");
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].to_string(), "https://example.test/");
    }

    #[test]
    fn non_connection_errors_are_not_retried() {
        let pool = ServerPool::new(vec![
            Server::parse("ipa1.example.test").expect("valid"),
            Server::parse("ipa2.example.test").expect("valid"),
        ])
        .expect("non-empty");

        let mut failover = pool.failover();
        assert!(!failover.is_retry());
        // Non-connection errors are never retried.
        let error = failover
            .recover(ClientError::NoServers)
            .expect_err("not a connection failure");
        assert!(matches!(error, ClientError::NoServers));
        assert_eq!(pool.active().to_string(), "https://ipa1.example.test/");
    }

    #[test]
    fn empty_pool_is_rejected() {
        assert!(matches!(ServerPool::new(Vec::new()), Err(ClientError::NoServers)));
    }
}
