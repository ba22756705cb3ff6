//! Name-resolution probes.

use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use domain::base::iana::Rtype;
use domain::base::name::Name;
use domain::resolv::StubResolver;
use domain::resolv::stub::conf::{ResolvConf, ServerConf, Transport};
use rand::Rng;
use rand::distributions::Alphanumeric;

use crate::error::{MonitorError, ProbeFailure};

/// Length of the random label prepended to every probed name.
pub const LABEL_LEN: usize = 10;

/// Resolver trait for latency probes
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Resolve the A record of `query_name` once and return how long the
    /// round trip took, in milliseconds.
    async fn probe(&self, query_name: &str) -> Result<f64, ProbeFailure>;
}

/// Fresh random alphanumeric label.
pub fn cache_busting_label() -> String {
    rand::thread_rng().sample_iter(&Alphanumeric).take(LABEL_LEN).map(char::from).collect()
}

/// `<random label>.<domain>`: a name no resolver on the path can have
/// cached, so every probe reaches the authoritative servers.
pub fn query_name(domain: &str) -> String {
    format!("{}.{}", cache_busting_label(), domain.trim_end_matches('.'))
}

/// Check that `domain` can be turned into a query name at all.
pub fn validate_target(domain: &str) -> Result<(), ProbeFailure> {
    let domain = domain.trim_end_matches('.');
    if domain.is_empty() {
        return Err(ProbeFailure::InvalidName(domain.to_string()));
    }
    let sample = format!("{}.{}", "a".repeat(LABEL_LEN), domain);
    parse_name(&sample).map(|_| ())
}

fn parse_name(query_name: &str) -> Result<Name<Vec<u8>>, ProbeFailure> {
    Name::<Vec<u8>>::from_str(query_name).map_err(|_| ProbeFailure::InvalidName(query_name.to_string()))
}

/// Knobs handed to the stub resolver.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolverSettings {
    /// Per-request timeout.
    pub timeout: Duration,
    /// Attempts per server before a probe is given up.
    pub attempts: usize,
    /// Upstream servers; empty means the system configuration.
    pub nameservers: Vec<SocketAddr>,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self { timeout: Duration::from_secs(5), attempts: 2, nameservers: Vec::new() }
    }
}

/// Probe that sends a recursive `A IN` query through a stub resolver.
///
/// Any response counts as a measurement, NXDOMAIN included, since that is
/// what a random label normally gets back. Timeouts and transport errors
/// are probe failures.
pub struct StubProbe {
    resolver: StubResolver,
}

impl StubProbe {
    pub fn new(settings: &ResolverSettings) -> Result<Self, MonitorError> {
        let conf = resolv_conf(settings, Path::new(SYSTEM_RESOLV_CONF))?;

        tracing::debug!(
            servers = ?conf.servers.iter().map(|s| s.addr).collect::<Vec<_>>(),
            "stub resolver configured"
        );

        Ok(Self { resolver: StubResolver::from_conf(conf) })
    }
}

/// System resolver configuration, read when no nameserver is given.
pub const SYSTEM_RESOLV_CONF: &str = "/etc/resolv.conf";

/// Stub resolver configuration from explicit nameservers, or from `system`
/// when there are none.
///
/// Ending up without any server is a connectivity error. `finalize` would
/// otherwise fall back to 127.0.0.1:53, so the check runs before it.
fn resolv_conf(settings: &ResolverSettings, system: &Path) -> Result<ResolvConf, MonitorError> {
    let mut conf = ResolvConf::new();
    if settings.nameservers.is_empty() {
        conf.parse_file(system).map_err(|e| {
            MonitorError::Connectivity(format!("cannot read resolver configuration {}: {}", system.display(), e))
        })?;
    } else {
        for addr in &settings.nameservers {
            conf.servers.push(ServerConf::new(*addr, Transport::UdpTcp));
        }
    }

    if conf.servers.is_empty() {
        return Err(MonitorError::Connectivity(format!("no nameservers configured in {}", system.display())));
    }

    conf.options.timeout = settings.timeout;
    conf.options.attempts = settings.attempts;
    conf.options.recurse = true;
    conf.finalize();
    Ok(conf)
}

#[async_trait]
impl Resolver for StubProbe {
    async fn probe(&self, query_name: &str) -> Result<f64, ProbeFailure> {
        let name = parse_name(query_name)?;

        let start = Instant::now();
        let answer = self.resolver.query((name, Rtype::A)).await;
        let elapsed = start.elapsed();

        match answer {
            Ok(_) => Ok(elapsed.as_secs_f64() * 1000.0),
            Err(source) => Err(ProbeFailure::Transport { name: query_name.to_string(), source }),
        }
    }
}
