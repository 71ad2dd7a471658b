//! The in-memory configuration model (spec §3). Built once by
//! [`crate::parser`], checked by [`crate::validate`], then frozen and handed
//! to [`crate::policy::Policy`].

use std::collections::HashMap;
use std::path::PathBuf;

use linked_hash_map::LinkedHashMap;

use crate::matcher::Matcher;

/// `proxy_relay`'s tri-state: `Auto` is resolved lazily at classify time
/// (see spec Design Note on lazy resolution) rather than at parse time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Tri {
    On,
    Off,
    #[default]
    Auto,
}

#[derive(Clone, Debug, Default)]
pub struct CertKeyHandle {
    pub cert_paths: Vec<PathBuf>,
    pub key_path: PathBuf,
}

/// One `websocks://...` line inside a `proxy.server.list` block.
#[derive(Clone, Debug)]
pub struct ServerEntry {
    /// The original line, scheme stripped — used as identity.
    pub raw_id: String,
    pub host: String,
    pub port: u16,
    pub use_ssl: bool,
    pub use_kcp: bool,
    pub upstream_program: Option<String>,
    /// The address the dispatcher should actually dial: the spawned
    /// program's loopback port, the host if it's already an IP literal, or
    /// the result of a synchronous DNS resolution (spec §4.6 step 4).
    pub resolved_addr: std::net::SocketAddr,
}

#[derive(Clone, Copy, Debug)]
pub struct HealthCheckConfig {
    pub initial_delay_ms: u32,
    pub period_ms: u32,
    pub up: u32,
    pub down: u32,
    pub enabled: bool,
}

impl HealthCheckConfig {
    pub fn fixed(enabled: bool) -> Self {
        HealthCheckConfig {
            initial_delay_ms: 5000,
            period_ms: 30000,
            up: 1,
            down: 2,
            enabled,
        }
    }
}

/// An opaque upstream server group handle (spec: "opaque handle created
/// through the described collaborator factories").
#[derive(Clone, Debug)]
pub struct ServerGroup {
    pub alias: String,
    pub entries: Vec<ServerEntry>,
    pub health_check: HealthCheckConfig,
}

impl ServerGroup {
    pub fn new(alias: impl Into<String>, health_check: HealthCheckConfig) -> Self {
        ServerGroup {
            alias: alias.into(),
            entries: Vec::new(),
            health_check,
        }
    }
}

pub const DEFAULT_ALIAS: &str = "DEFAULT";

/// Ordered alias -> matcher-list mapping where, at iteration time only,
/// `DEFAULT` (if present) is yielded last. Insertion order is otherwise
/// preserved — this is a read-time transformation, not a write-time one
/// (spec Design Note).
#[derive(Clone, Debug, Default)]
pub struct GroupedMatchers {
    lists: LinkedHashMap<String, Vec<Matcher>>,
}

impl GroupedMatchers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(&mut self, alias: &str) -> &mut Vec<Matcher> {
        if !self.lists.contains_key(alias) {
            self.lists.insert(alias.to_string(), Vec::new());
        }
        self.lists.get_mut(alias).unwrap()
    }

    pub fn aliases(&self) -> impl Iterator<Item = &String> {
        self.lists.keys()
    }

    /// Iterate `(alias, matchers)` pairs with `DEFAULT` moved to the end.
    pub fn iter_default_last(&self) -> impl Iterator<Item = (&String, &Vec<Matcher>)> {
        let (default, rest): (Vec<_>, Vec<_>) = self
            .lists
            .iter()
            .partition(|(alias, _)| alias.as_str() == DEFAULT_ALIAS);
        rest.into_iter().chain(default)
    }

    pub fn get(&self, alias: &str) -> Option<&Vec<Matcher>> {
        self.lists.get(alias)
    }

    pub fn is_empty(&self) -> bool {
        self.lists.values().all(|v| v.is_empty())
    }
}

/// The root, immutable-after-construction configuration model.
#[derive(Clone, Debug)]
pub struct Config {
    pub socks5_port: u16,
    pub http_connect_port: u16,
    pub ss_port: u16,
    pub dns_port: u16,
    pub pac_port: u16,

    pub ss_password: String,

    pub gateway: bool,
    pub direct_relay: bool,
    pub verify_cert: bool,
    pub strict_mode: bool,
    pub no_health_check: bool,
    pub proxy_https_relay_domain_merge: bool,

    pub proxy_relay: Tri,

    pub user: String,
    pub pass: String,

    pub cacerts_path: Option<String>,
    pub cacerts_pswd: Option<String>,

    pub pool_size: u32,

    pub auto_sign_cert: Option<PathBuf>,
    pub auto_sign_key: Option<PathBuf>,
    pub auto_sign_work_dir: Option<PathBuf>,
    /// Set when `auto_sign_work_dir` was allocated by the parser itself
    /// rather than supplied in the file; such a directory is ephemeral and
    /// scoped to process lifetime (spec §5/§6.3).
    pub auto_sign_work_dir_is_ephemeral: bool,

    pub groups: LinkedHashMap<String, ServerGroup>,

    pub domains: GroupedMatchers,
    pub proxy_resolves: GroupedMatchers,
    pub no_proxy_domains: GroupedMatchers,

    pub https_relay_domains: Vec<Matcher>,
    pub proxy_https_relay_domains: Vec<Matcher>,
    pub https_relay_cert_keys: Vec<CertKeyHandle>,

    /// Raw `<cert1> [<cert2> ...] <key>` lines queued for resolution by the
    /// validator (spec §4.7 step 2).
    pub(crate) https_relay_cert_key_files: Vec<Vec<String>>,

    pub source_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            socks5_port: 0,
            http_connect_port: 0,
            ss_port: 0,
            dns_port: 0,
            pac_port: 0,
            ss_password: String::new(),
            gateway: false,
            direct_relay: false,
            verify_cert: true,
            strict_mode: false,
            no_health_check: false,
            proxy_https_relay_domain_merge: false,
            proxy_relay: Tri::Auto,
            user: String::new(),
            pass: String::new(),
            cacerts_path: None,
            cacerts_pswd: None,
            pool_size: 10,
            auto_sign_cert: None,
            auto_sign_key: None,
            auto_sign_work_dir: None,
            auto_sign_work_dir_is_ephemeral: false,
            groups: LinkedHashMap::new(),
            domains: GroupedMatchers::new(),
            proxy_resolves: GroupedMatchers::new(),
            no_proxy_domains: GroupedMatchers::new(),
            https_relay_domains: Vec::new(),
            proxy_https_relay_domains: Vec::new(),
            https_relay_cert_keys: Vec::new(),
            https_relay_cert_key_files: Vec::new(),
            source_path: None,
        }
    }
}

impl Config {
    pub fn resolved_proxy_relay(&self) -> bool {
        match self.proxy_relay {
            Tri::On => true,
            Tri::Off => false,
            Tri::Auto => !self.https_relay_domains.is_empty(),
        }
    }
}

/// RAII handle for the auto-sign working directory the parser allocates
/// under `std::env::temp_dir()` (spec §5: "scoped to process lifetime and
/// cleaned up on normal shutdown"). Deliberately not `Clone` — `Config`
/// itself is cloned freely, but only one guard should ever own the removal,
/// so callers hold this alongside the loaded `Policy` rather than inside
/// `Config`.
pub struct AutoSignWorkDirGuard {
    path: Option<PathBuf>,
}

impl AutoSignWorkDirGuard {
    /// Build a guard for `config`'s auto-sign directory. A no-op guard if
    /// the directory was supplied explicitly in the file (not ours to
    /// remove) or no auto-sign directory was ever allocated.
    pub fn for_config(config: &Config) -> Self {
        let path = if config.auto_sign_work_dir_is_ephemeral {
            config.auto_sign_work_dir.clone()
        } else {
            None
        };
        AutoSignWorkDirGuard { path }
    }
}

impl Drop for AutoSignWorkDirGuard {
    fn drop(&mut self) {
        if let Some(path) = &self.path {
            let _ = std::fs::remove_dir_all(path);
        }
    }
}

#[cfg(test)]
mod auto_sign_guard_tests {
    use super::*;

    #[test]
    fn ephemeral_dir_is_removed_on_drop() {
        let dir = std::env::temp_dir().join(format!(
            "wsx-agent-test-autosign-{}-{}",
            std::process::id(),
            "ephemeral_dir_is_removed_on_drop"
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let mut cfg = Config::default();
        cfg.auto_sign_work_dir = Some(dir.clone());
        cfg.auto_sign_work_dir_is_ephemeral = true;

        let guard = AutoSignWorkDirGuard::for_config(&cfg);
        assert!(dir.is_dir());
        drop(guard);
        assert!(!dir.exists());
    }

    #[test]
    fn explicit_dir_is_left_alone() {
        let dir = std::env::temp_dir().join(format!(
            "wsx-agent-test-autosign-{}-{}",
            std::process::id(),
            "explicit_dir_is_left_alone"
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let mut cfg = Config::default();
        cfg.auto_sign_work_dir = Some(dir.clone());
        cfg.auto_sign_work_dir_is_ephemeral = false;

        let guard = AutoSignWorkDirGuard::for_config(&cfg);
        drop(guard);
        assert!(dir.is_dir());
        std::fs::remove_dir_all(&dir).unwrap();
    }
}

/// The only decision shape the dispatcher needs (spec §4.8).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    Direct,
    HttpsRelay { group_alias: String },
    NoProxy { group_alias: String },
    Proxy {
        group_alias: String,
        resolve_at_upstream: bool,
        https_relay: bool,
    },
}

pub type Groups = HashMap<String, ServerGroup>;
