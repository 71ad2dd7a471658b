//! The collaborator contracts the core consumes (spec §6.2). Production
//! code wires [`StdCollaborators`] in; tests substitute fakes.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::Resolver as TrustDnsResolver;

use crate::error::ConfigError;
use crate::model::CertKeyHandle;

/// Blocking hostname resolution, used for upstream server-list entries that
/// are not IP literals (spec §4.6 step 4).
pub trait Resolver: Send + Sync {
    fn resolve_v4(&self, name: &str) -> Result<Ipv4Addr, ConfigError>;
}

/// Wraps `trust-dns-resolver`'s synchronous client — no suspension points,
/// so it's safe to call from `parser::Parser` without an async runtime
/// (spec §5).
pub struct StdResolver;

impl Resolver for StdResolver {
    fn resolve_v4(&self, name: &str) -> Result<Ipv4Addr, ConfigError> {
        let resolver = TrustDnsResolver::new(ResolverConfig::default(), ResolverOpts::default())
            .map_err(|e| ConfigError::network(name, e))?;
        let response = resolver
            .lookup_ip(name)
            .map_err(|e| ConfigError::network(name, e))?;
        response
            .iter()
            .find_map(|ip| match ip {
                std::net::IpAddr::V4(v4) => Some(v4),
                std::net::IpAddr::V6(_) => None,
            })
            .ok_or_else(|| ConfigError::network(name, "no A record"))
    }
}

/// Reads certificate/key file pairs into an opaque handle (spec §6.2,
/// §6.3). Out of scope: the actual TLS material handling belongs to the
/// dispatcher; the core only records paths.
pub trait CertKeyStore: Send + Sync {
    fn read_file(
        &self,
        cert_paths: &[String],
        key_path: &str,
    ) -> Result<CertKeyHandle, ConfigError>;
}

pub struct StdCertKeyStore;

impl CertKeyStore for StdCertKeyStore {
    fn read_file(
        &self,
        cert_paths: &[String],
        key_path: &str,
    ) -> Result<CertKeyHandle, ConfigError> {
        for p in cert_paths {
            if !PathBuf::from(p).is_file() {
                return Err(ConfigError::resource(p, "certificate file not found"));
            }
        }
        if !PathBuf::from(key_path).is_file() {
            return Err(ConfigError::resource(key_path, "key file not found"));
        }
        Ok(CertKeyHandle {
            cert_paths: cert_paths.iter().map(PathBuf::from).collect(),
            key_path: PathBuf::from(key_path),
        })
    }
}

/// Spawns an external program referenced by a `proxy.server.list` line and
/// tees its stdout/stderr into the log. The spawned process is a detached
/// background task: the core never awaits it (spec §5).
pub trait ProcessRunner: Send + Sync {
    fn spawn(&self, command_line: &str) -> Result<(), ConfigError>;
}

pub struct StdProcessRunner;

impl ProcessRunner for StdProcessRunner {
    fn spawn(&self, command_line: &str) -> Result<(), ConfigError> {
        let mut parts = command_line.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| ConfigError::validation("empty upstream program command line"))?;
        let args: Vec<&str> = parts.collect();
        let mut child = Command::new(program)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ConfigError::resource(program, e))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let program_name = program.to_string();

        std::thread::spawn(move || {
            use std::io::{BufRead, BufReader};
            if let Some(out) = stdout {
                for line in BufReader::new(out).lines().map_while(Result::ok) {
                    tracing::info!("[{program_name}] {line}");
                }
            }
        });
        if let Some(err) = stderr {
            let program_name = program.to_string();
            std::thread::spawn(move || {
                use std::io::{BufRead, BufReader};
                for line in BufReader::new(err).lines().map_while(Result::ok) {
                    tracing::warn!("[{program_name}] {line}");
                }
            });
        }

        let program_name = program.to_string();
        std::thread::spawn(move || match child.wait() {
            Ok(status) => tracing::info!("[{program_name}] exited with {status}"),
            Err(e) => tracing::warn!("[{program_name}] wait failed: {e}"),
        });
        Ok(())
    }
}

/// A `ProcessRunner` that does nothing; used in tests where no
/// `proxy.server.list` line carries an external program template.
pub struct NoopProcessRunner;

impl ProcessRunner for NoopProcessRunner {
    fn spawn(&self, _command_line: &str) -> Result<(), ConfigError> {
        Ok(())
    }
}

/// A blocking GET response, just enough of it for ABP list fetching
/// (spec §6.2 "HTTP client").
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Blocking HTTP client contract. `resource::load_remote` is the core's one
/// caller; kept as its own trait (rather than folded into `ResourceLoader`)
/// because the spec names it as a separate collaborator.
pub trait HttpClient: Send + Sync {
    fn get(&self, url: &str) -> Result<HttpResponse, ConfigError>;
}

pub struct StdHttpClient;

impl HttpClient for StdHttpClient {
    fn get(&self, url: &str) -> Result<HttpResponse, ConfigError> {
        let client = reqwest::blocking::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| ConfigError::network(url, e))?;
        let resp = client
            .get(url)
            .send()
            .map_err(|e| ConfigError::network(url, e))?;
        let status = resp.status().as_u16();
        let body = resp
            .bytes()
            .map_err(|e| ConfigError::network(url, e))?
            .to_vec();
        Ok(HttpResponse { status, body })
    }
}

/// Bundle of default, blocking collaborator implementations, analogous to
/// how `boltconn`'s `main.rs` wires concrete resolvers/dispatchers into the
/// core at startup.
pub struct StdCollaborators {
    pub resolver: StdResolver,
    pub cert_key_store: StdCertKeyStore,
    pub process_runner: StdProcessRunner,
}

impl Default for StdCollaborators {
    fn default() -> Self {
        StdCollaborators {
            resolver: StdResolver,
            cert_key_store: StdCertKeyStore,
            process_runner: StdProcessRunner,
        }
    }
}
