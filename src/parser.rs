//! Line-oriented state machine over the configuration grammar (spec §4.6).

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use crate::collaborators::{ProcessRunner, Resolver};
use crate::error::ConfigError;
use crate::group;
use crate::model::{Config, ServerEntry, Tri};
use crate::resource::ResourceLoader;
use crate::rulebuilder::build_matcher;

#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    TopLevel,
    ServerList,
    DomainList,
    ResolveList,
    NoProxyList,
    HttpsRelayDomain,
    HttpsRelayCertKey,
    ProxyHttpsRelayDomain,
}

/// Matches `line` against `"<prefix>.start"` optionally followed by a
/// whitespace-separated alias token. Returns `None` if the line isn't a
/// start directive for this prefix.
fn match_start<'a>(line: &'a str, prefix: &str) -> Option<Option<&'a str>> {
    let start_kw = format!("{prefix}.start");
    if line == start_kw {
        return Some(None);
    }
    if let Some(rest) = line.strip_prefix(&format!("{start_kw} ")) {
        let alias = rest.trim();
        if alias.is_empty() || alias.split_whitespace().count() != 1 {
            return None;
        }
        return Some(Some(alias));
    }
    None
}

fn match_end(line: &str, prefix: &str) -> bool {
    line == format!("{prefix}.end")
}

/// All block prefixes recognized at `TopLevel`. Used to reject a line that
/// opens another block while one is already active (spec §4.6: "encountering
/// a list-start while already in a non-`TopLevel` state... should be
/// rejected as `ParseError`").
const LIST_START_PREFIXES: &[&str] = &[
    "proxy.server.list",
    "proxy.domain.list",
    "proxy.resolve.list",
    "no-proxy.domain.list",
    "https-relay.domain.list",
    "proxy.https-relay.domain.list",
    "agent.https-relay.cert-key.list",
];

fn is_list_start(line: &str) -> bool {
    LIST_START_PREFIXES
        .iter()
        .any(|prefix| match_start(line, prefix).is_some())
}

pub struct Parser<'a> {
    config: Config,
    state: State,
    current_alias: Option<String>,
    loader: &'a dyn ResourceLoader,
    process_runner: &'a dyn ProcessRunner,
    resolver: &'a dyn Resolver,
    line_no: usize,
}

impl<'a> Parser<'a> {
    pub fn new(loader: &'a dyn ResourceLoader, process_runner: &'a dyn ProcessRunner) -> Self {
        Self::with_resolver(loader, process_runner, &crate::collaborators::StdResolver)
    }

    pub fn with_resolver(
        loader: &'a dyn ResourceLoader,
        process_runner: &'a dyn ProcessRunner,
        resolver: &'a dyn Resolver,
    ) -> Self {
        Parser {
            config: Config::default(),
            state: State::TopLevel,
            current_alias: None,
            loader,
            process_runner,
            resolver,
            line_no: 0,
        }
    }

    pub fn parse(mut self, text: &str, source_path: Option<PathBuf>) -> Result<Config, ConfigError> {
        self.config.source_path = source_path;
        for raw_line in text.lines() {
            self.line_no += 1;
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            self.process_line(line)?;
        }
        if self.state != State::TopLevel {
            return Err(ConfigError::parse(
                self.line_no,
                "configuration file ended inside an open list block",
            ));
        }
        Ok(self.config)
    }

    fn process_line(&mut self, line: &str) -> Result<(), ConfigError> {
        match self.state {
            State::TopLevel => self.process_top_level(line),
            State::ServerList => {
                if match_end(line, "proxy.server.list") {
                    self.state = State::TopLevel;
                    self.current_alias = None;
                    Ok(())
                } else {
                    self.reject_nested_list_start(line)?;
                    self.process_server_line(line)
                }
            }
            State::DomainList => self.process_list_line(line, "proxy.domain.list", |c| &mut c.domains),
            State::ResolveList => {
                self.process_list_line(line, "proxy.resolve.list", |c| &mut c.proxy_resolves)
            }
            State::NoProxyList => {
                self.process_list_line(line, "no-proxy.domain.list", |c| &mut c.no_proxy_domains)
            }
            State::HttpsRelayDomain => {
                if match_end(line, "https-relay.domain.list") {
                    self.state = State::TopLevel;
                    Ok(())
                } else {
                    self.reject_nested_list_start(line)?;
                    let m = build_matcher(line, self.line_no, self.loader)?;
                    self.config.https_relay_domains.push(m);
                    Ok(())
                }
            }
            State::ProxyHttpsRelayDomain => {
                if match_end(line, "proxy.https-relay.domain.list") {
                    self.state = State::TopLevel;
                    Ok(())
                } else {
                    self.reject_nested_list_start(line)?;
                    let m = build_matcher(line, self.line_no, self.loader)?;
                    self.config.proxy_https_relay_domains.push(m);
                    Ok(())
                }
            }
            State::HttpsRelayCertKey => {
                if match_end(line, "agent.https-relay.cert-key.list") {
                    self.state = State::TopLevel;
                    Ok(())
                } else {
                    self.reject_nested_list_start(line)?;
                    let tokens: Vec<String> = line.split_whitespace().map(String::from).collect();
                    if tokens.len() < 2 {
                        return Err(ConfigError::parse(
                            self.line_no,
                            format!("cert-key line needs at least one cert and a key: {line}"),
                        ));
                    }
                    self.config.https_relay_cert_key_files.push(tokens);
                    Ok(())
                }
            }
        }
    }

    /// A line that would otherwise open another block is never a valid rule
    /// line, port rule, or cert-key entry while already inside one.
    fn reject_nested_list_start(&self, line: &str) -> Result<(), ConfigError> {
        if is_list_start(line) {
            return Err(ConfigError::parse(
                self.line_no,
                format!("nested list-start while a block is already open: {line}"),
            ));
        }
        Ok(())
    }

    fn process_list_line(
        &mut self,
        line: &str,
        prefix: &str,
        select: impl Fn(&mut Config) -> &mut crate::model::GroupedMatchers,
    ) -> Result<(), ConfigError> {
        if match_end(line, prefix) {
            self.state = State::TopLevel;
            self.current_alias = None;
            return Ok(());
        }
        self.reject_nested_list_start(line)?;
        let m = build_matcher(line, self.line_no, self.loader)?;
        let alias = group::normalize_alias(self.current_alias.as_deref()).to_string();
        select(&mut self.config).entry(&alias).push(m);
        Ok(())
    }

    fn process_top_level(&mut self, line: &str) -> Result<(), ConfigError> {
        if let Some(alias) = match_start(line, "proxy.server.list") {
            self.state = State::ServerList;
            self.current_alias = alias.map(str::to_string);
            group::get_or_create(
                &mut self.config.groups,
                self.current_alias.as_deref(),
                self.config.no_health_check,
            );
            return Ok(());
        }
        if let Some(alias) = match_start(line, "proxy.domain.list") {
            self.state = State::DomainList;
            self.current_alias = alias.map(str::to_string);
            return Ok(());
        }
        if let Some(alias) = match_start(line, "proxy.resolve.list") {
            self.state = State::ResolveList;
            self.current_alias = alias.map(str::to_string);
            return Ok(());
        }
        if let Some(alias) = match_start(line, "no-proxy.domain.list") {
            self.state = State::NoProxyList;
            self.current_alias = alias.map(str::to_string);
            return Ok(());
        }
        if match_start(line, "https-relay.domain.list").is_some() {
            self.state = State::HttpsRelayDomain;
            return Ok(());
        }
        if match_start(line, "proxy.https-relay.domain.list").is_some() {
            self.state = State::ProxyHttpsRelayDomain;
            return Ok(());
        }
        if match_start(line, "agent.https-relay.cert-key.list").is_some() {
            self.state = State::HttpsRelayCertKey;
            return Ok(());
        }
        self.process_directive(line)
    }

    fn process_directive(&mut self, line: &str) -> Result<(), ConfigError> {
        let mut parts = line.splitn(2, char::is_whitespace);
        let key = parts.next().unwrap_or_default();
        let rest = parts.next().unwrap_or("").trim();
        let values: Vec<&str> = rest.split_whitespace().collect();

        macro_rules! need_one {
            () => {{
                if values.len() != 1 {
                    return Err(self.bad_directive(line));
                }
                values[0]
            }};
        }
        macro_rules! port_value {
            () => {{
                let v = need_one!();
                self.parse_port(v, line)?
            }};
        }
        macro_rules! on_off {
            () => {{
                match need_one!() {
                    "on" => true,
                    "off" => false,
                    _ => return Err(self.bad_directive(line)),
                }
            }};
        }

        match key {
            "agent.listen" | "agent.socks5.listen" => {
                self.config.socks5_port = port_value!();
            }
            "agent.httpconnect.listen" => {
                self.config.http_connect_port = port_value!();
            }
            "agent.ss.listen" => {
                self.config.ss_port = port_value!();
            }
            "agent.ss.password" => {
                self.config.ss_password = need_one!().to_string();
            }
            "agent.dns.listen" => {
                self.config.dns_port = port_value!();
            }
            "agent.gateway" => {
                self.config.gateway = on_off!();
            }
            "agent.direct-relay" => {
                self.config.direct_relay = on_off!();
            }
            "agent.proxy-relay" => {
                self.config.proxy_relay = match need_one!() {
                    "on" => Tri::On,
                    "off" => Tri::Off,
                    "auto" => Tri::Auto,
                    _ => return Err(self.bad_directive(line)),
                };
            }
            "proxy.server.auth" => {
                let v = need_one!();
                let (user, pass) = v
                    .split_once(':')
                    .ok_or_else(|| self.bad_directive(line))?;
                if user.is_empty() || pass.is_empty() {
                    return Err(self.bad_directive(line));
                }
                self.config.user = user.to_string();
                self.config.pass = pass.to_string();
            }
            "proxy.server.hc" => {
                self.config.no_health_check = !on_off!();
            }
            "agent.cacerts.path" => {
                let v = need_one!();
                if v.is_empty() {
                    return Err(self.bad_directive(line));
                }
                self.config.cacerts_path = Some(v.to_string());
            }
            "agent.cacerts.pswd" => {
                let v = need_one!();
                if v.is_empty() {
                    return Err(self.bad_directive(line));
                }
                self.config.cacerts_pswd = Some(v.to_string());
            }
            "agent.cert.verify" => {
                self.config.verify_cert = on_off!();
            }
            "agent.strict" => {
                self.config.strict_mode = on_off!();
            }
            "agent.pool" => {
                let v = need_one!();
                self.config.pool_size = v
                    .parse()
                    .map_err(|_| self.bad_directive(line))?;
            }
            "agent.gateway.pac.listen" => {
                self.config.pac_port = port_value!();
            }
            "agent.auto-sign" => {
                if values.len() < 2 || values.len() > 3 {
                    return Err(self.bad_directive(line));
                }
                let cert = PathBuf::from(values[0]);
                let key = PathBuf::from(values[1]);
                if !cert.is_file() {
                    return Err(ConfigError::parse(
                        self.line_no,
                        format!("auto-sign cert not found: {}", values[0]),
                    ));
                }
                if !key.is_file() {
                    return Err(ConfigError::parse(
                        self.line_no,
                        format!("auto-sign key not found: {}", values[1]),
                    ));
                }
                let (dir, ephemeral) = if let Some(dir) = values.get(2) {
                    let dir_path = PathBuf::from(dir);
                    if !dir_path.is_dir() {
                        return Err(ConfigError::parse(
                            self.line_no,
                            format!("auto-sign dir not found: {dir}"),
                        ));
                    }
                    (dir_path, false)
                } else {
                    let dir_path = std::env::temp_dir().join(format!(
                        "wsx-agent-autosign-{}",
                        std::process::id()
                    ));
                    std::fs::create_dir_all(&dir_path)
                        .map_err(|e| ConfigError::resource(&dir_path, e))?;
                    (dir_path, true)
                };
                self.config.auto_sign_cert = Some(cert);
                self.config.auto_sign_key = Some(key);
                self.config.auto_sign_work_dir = Some(dir);
                self.config.auto_sign_work_dir_is_ephemeral = ephemeral;
            }
            "proxy.https-relay.domain.merge" => {
                self.config.proxy_https_relay_domain_merge = on_off!();
            }
            _ => {
                return Err(ConfigError::parse(
                    self.line_no,
                    format!("unknown directive: {key}"),
                ));
            }
        }
        Ok(())
    }

    fn bad_directive(&self, line: &str) -> ConfigError {
        ConfigError::parse(self.line_no, format!("malformed directive: {line}"))
    }

    fn parse_port(&self, v: &str, line: &str) -> Result<u16, ConfigError> {
        let port: u32 = v.parse().map_err(|_| self.bad_directive(line))?;
        if port == 0 || port > 65535 {
            return Err(ConfigError::parse(
                self.line_no,
                format!("port out of range 1-65535: {v}"),
            ));
        }
        Ok(port as u16)
    }

    fn process_server_line(&mut self, line: &str) -> Result<(), ConfigError> {
        let (scheme, rest) = line
            .split_once("://")
            .ok_or_else(|| ConfigError::parse(self.line_no, format!("bad server line: {line}")))?;
        let (use_ssl, use_kcp) = match scheme {
            "websocks" => (false, false),
            "websockss" => (true, false),
            "websocks:kcp" => (false, true),
            "websockss:kcp" => (true, true),
            _ => {
                return Err(ConfigError::parse(
                    self.line_no,
                    format!("unknown scheme: {scheme}"),
                ))
            }
        };

        // An optional space-separated program template follows host:port.
        let (addr_part, program_part) = match rest.find(' ') {
            Some(idx) => (&rest[..idx], Some(rest[idx + 1..].trim())),
            None => (rest, None),
        };

        // Split at the LAST colon: supports no bracket handling for IPv6
        // literals, a known source quirk the spec asks us to preserve.
        let colon_idx = addr_part
            .rfind(':')
            .ok_or_else(|| ConfigError::parse(self.line_no, format!("missing port: {line}")))?;
        let host = &addr_part[..colon_idx];
        let port_str = &addr_part[colon_idx + 1..];
        if host.is_empty() {
            return Err(ConfigError::parse(self.line_no, format!("empty host: {line}")));
        }
        let port: u32 = port_str
            .parse()
            .map_err(|_| ConfigError::parse(self.line_no, format!("bad port: {line}")))?;
        if port == 0 || port > 65535 {
            return Err(ConfigError::parse(
                self.line_no,
                format!("port out of range 1-65535: {line}"),
            ));
        }

        let mut upstream_program = None;
        let local_port = 30000 + (self.line_no as u32 * 7919) % 10000;
        let resolved_addr = if let Some(template) = program_part {
            if !template.is_empty() {
                let expanded = expand_program_template(template, host, port_str, local_port);
                self.process_runner.spawn(&expanded)?;
                upstream_program = Some(expanded);
            }
            SocketAddr::new(IpAddr::V4(std::net::Ipv4Addr::LOCALHOST), local_port as u16)
        } else if let Ok(ip) = host.parse::<IpAddr>() {
            SocketAddr::new(ip, port as u16)
        } else {
            let ip = self.resolver.resolve_v4(host).map_err(|e| {
                ConfigError::parse(self.line_no, format!("failed to resolve {host}: {e}"))
            })?;
            SocketAddr::new(IpAddr::V4(ip), port as u16)
        };

        let entry = ServerEntry {
            raw_id: rest.to_string(),
            host: host.to_string(),
            port: port as u16,
            use_ssl,
            use_kcp,
            upstream_program,
            resolved_addr,
        };

        let alias = self.current_alias.clone();
        let group = group::get_or_create(
            &mut self.config.groups,
            alias.as_deref(),
            self.config.no_health_check,
        );
        group.entries.push(entry);
        Ok(())
    }
}

fn expand_program_template(template: &str, host: &str, port: &str, local_port: u32) -> String {
    let mut out = template.to_string();
    if let Some(rest) = out.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            out = format!("{}{}", home.display(), rest);
        }
    }
    out = out.replace("$LOCAL_PORT", &local_port.to_string());
    out = out.replace("$SERVER_IP", host);
    out = out.replace("$SERVER_PORT", port);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::ProcessRunner;
    use crate::resource::ResourceLoader;

    struct NoopLoader;
    impl ResourceLoader for NoopLoader {
        fn load(&self, _reference: &str) -> Result<Vec<u8>, ConfigError> {
            Err(ConfigError::resource("<noop>", "no loader configured"))
        }
    }

    struct NoopRunner;
    impl ProcessRunner for NoopRunner {
        fn spawn(&self, _command_line: &str) -> Result<(), ConfigError> {
            Ok(())
        }
    }

    fn parse(text: &str) -> Result<Config, ConfigError> {
        Parser::new(&NoopLoader, &NoopRunner).parse(text, None)
    }

    #[test]
    fn basic_directives_and_server_list() {
        let cfg = parse(
            "agent.listen 11080\n\
             proxy.server.auth alice:pasSw0rD\n\
             agent.strict off\n\
             agent.pool 10\n\
             proxy.server.list.start\n\
             websocks://127.0.0.1:18686\n\
             proxy.server.list.end\n\
             proxy.domain.list.start\n\
             /.*google\\.com.*/\n\
             216.58.200.46\n\
             youtube.com\n\
             proxy.domain.list.end\n",
        )
        .unwrap();
        assert_eq!(cfg.socks5_port, 11080);
        assert_eq!(cfg.user, "alice");
        assert_eq!(cfg.pass, "pasSw0rD");
        assert!(!cfg.strict_mode);
        assert_eq!(cfg.pool_size, 10);
        assert_eq!(cfg.groups.get("DEFAULT").unwrap().entries.len(), 1);
        assert_eq!(cfg.domains.get("DEFAULT").unwrap().len(), 3);
    }

    #[test]
    fn unknown_directive_is_parse_error() {
        let err = parse("bogus.directive value\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn alias_with_whitespace_rejected() {
        let err = parse("proxy.server.list.start not an alias\nproxy.server.list.end\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn unterminated_block_is_error() {
        let err = parse("proxy.domain.list.start\nyoutube.com\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn nested_list_start_inside_domain_list_is_rejected() {
        let err = parse(
            "proxy.domain.list.start\n\
             youtube.com\n\
             no-proxy.domain.list.start\n\
             proxy.domain.list.end\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn nested_list_start_with_alias_inside_cert_key_list_is_rejected() {
        let err = parse(
            "agent.https-relay.cert-key.list.start\n\
             proxy.domain.list.start groupA\n\
             agent.https-relay.cert-key.list.end\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn server_entry_last_colon_split_and_ssl_kcp_flags() {
        struct FakeResolver;
        impl crate::collaborators::Resolver for FakeResolver {
            fn resolve_v4(&self, _name: &str) -> Result<std::net::Ipv4Addr, ConfigError> {
                Ok(std::net::Ipv4Addr::new(93, 184, 216, 34))
            }
        }
        let cfg = Parser::with_resolver(&NoopLoader, &NoopRunner, &FakeResolver)
            .parse(
                "proxy.server.list.start\n\
                 websockss:kcp://example.com:443\n\
                 proxy.server.list.end\n",
                None,
            )
            .unwrap();
        let entry = &cfg.groups.get("DEFAULT").unwrap().entries[0];
        assert_eq!(entry.host, "example.com");
        assert_eq!(entry.port, 443);
        assert!(entry.use_ssl);
        assert!(entry.use_kcp);
    }

    #[test]
    fn aliased_group_blocks() {
        let cfg = parse(
            "proxy.server.list.start groupA\n\
             websocks://10.0.0.1:1234\n\
             proxy.server.list.end\n\
             proxy.domain.list.start groupA\n\
             foo.com\n\
             proxy.domain.list.end\n",
        )
        .unwrap();
        assert!(cfg.groups.contains_key("groupA"));
        assert_eq!(cfg.domains.get("groupA").unwrap().len(), 1);
    }

    #[test]
    fn proxy_relay_auto_is_accepted() {
        let cfg = parse("agent.proxy-relay auto\n").unwrap();
        assert_eq!(cfg.proxy_relay, Tri::Auto);
    }
}
