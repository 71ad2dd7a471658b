//! The policy query facade (spec §4.8) — the only surface the dispatcher
//! sees. Immutable and safely shareable across threads once built.

use crate::model::{Config, Decision};

/// A frozen, validated configuration exposing `classify`. Cheap to clone
/// (wraps an `Arc` internally would be the caller's choice; the facade
/// itself holds no interior mutability).
pub struct Policy {
    config: Config,
}

impl Policy {
    pub fn new(config: Config) -> Self {
        Policy { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Decide what to do with an outgoing `(host, port)` connection.
    /// Algorithm, in order (spec §4.8):
    /// 1. direct_relay + https_relay_domains match -> HttpsRelay
    /// 2. no_proxy_domains match (group-by-group) -> NoProxy
    /// 3. domains match (group-by-group) -> candidate Proxy group
    /// 4. no domains match -> Direct
    /// 5. otherwise compute resolve_at_upstream / https_relay bits
    pub fn classify(&self, host: &str, port: u16) -> Decision {
        if self.config.direct_relay
            && self
                .config
                .https_relay_domains
                .iter()
                .any(|m| m.matches(host, port))
        {
            return Decision::HttpsRelay {
                group_alias: "DEFAULT".to_string(),
            };
        }

        for (alias, matchers) in self.config.no_proxy_domains.iter_default_last() {
            if matchers.iter().any(|m| m.matches(host, port)) {
                return Decision::NoProxy {
                    group_alias: alias.clone(),
                };
            }
        }

        let mut candidate: Option<String> = None;
        for (alias, matchers) in self.config.domains.iter_default_last() {
            if matchers.iter().any(|m| m.matches(host, port)) {
                candidate = Some(alias.clone());
                break;
            }
        }

        let Some(group_alias) = candidate else {
            return Decision::Direct;
        };

        let resolve_at_upstream = self
            .config
            .proxy_resolves
            .get(&group_alias)
            .map(|ms| ms.iter().any(|m| m.matches(host, port)))
            .unwrap_or(false);

        let https_relay = self.config.resolved_proxy_relay()
            && self
                .config
                .proxy_https_relay_domains
                .iter()
                .any(|m| m.matches(host, port));

        Decision::Proxy {
            group_alias,
            resolve_at_upstream,
            https_relay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{NoopProcessRunner, StdCertKeyStore};
    use crate::resource::StdResourceLoader;

    fn build(text: &str) -> Policy {
        let config = crate::parser::Parser::new(&StdResourceLoader, &NoopProcessRunner)
            .parse(text, None)
            .expect("parse");
        let config = crate::validate::validate(config, &StdCertKeyStore).expect("validate");
        Policy::new(config)
    }

    #[test]
    fn scenario_1_proxy_then_direct() {
        let policy = build(
            "agent.listen 11080\n\
             proxy.server.auth alice:pasSw0rD\n\
             proxy.server.list.start\n\
             websocks://127.0.0.1:18686\n\
             proxy.server.list.end\n\
             proxy.domain.list.start\n\
             youtube.com\n\
             proxy.domain.list.end\n",
        );
        assert_eq!(
            policy.classify("www.youtube.com", 443),
            Decision::Proxy {
                group_alias: "DEFAULT".to_string(),
                resolve_at_upstream: false,
                https_relay: false,
            }
        );
        assert_eq!(policy.classify("example.com", 443), Decision::Direct);
    }

    #[test]
    fn scenario_2_resolve_at_upstream() {
        let policy = build(
            "agent.listen 11080\n\
             proxy.server.auth alice:pasSw0rD\n\
             proxy.server.list.start\n\
             websocks://127.0.0.1:18686\n\
             proxy.server.list.end\n\
             proxy.resolve.list.start\n\
             /.*google\\.com.*/\n\
             proxy.resolve.list.end\n\
             proxy.domain.list.start\n\
             /.*google\\.com.*/\n\
             proxy.domain.list.end\n",
        );
        assert_eq!(
            policy.classify("maps.google.com", 80),
            Decision::Proxy {
                group_alias: "DEFAULT".to_string(),
                resolve_at_upstream: true,
                https_relay: false,
            }
        );
    }

    #[test]
    fn scenario_5_non_default_group_wins() {
        let policy = build(
            "agent.listen 11080\n\
             proxy.server.auth alice:pasSw0rD\n\
             proxy.server.list.start A\n\
             websocks://127.0.0.1:18686\n\
             proxy.server.list.end\n\
             proxy.server.list.start\n\
             websocks://127.0.0.1:18687\n\
             proxy.server.list.end\n\
             proxy.domain.list.start A\n\
             foo.com\n\
             proxy.domain.list.end\n\
             proxy.domain.list.start\n\
             foo.com\n\
             proxy.domain.list.end\n",
        );
        match policy.classify("foo.com", 443) {
            Decision::Proxy { group_alias, .. } => assert_eq!(group_alias, "A"),
            other => panic!("unexpected decision: {other:?}"),
        }
    }

    #[test]
    fn scenario_6_port_rule() {
        let policy = build(
            "agent.listen 11080\n\
             proxy.server.auth alice:pasSw0rD\n\
             proxy.server.list.start\n\
             websocks://127.0.0.1:18686\n\
             proxy.server.list.end\n\
             proxy.domain.list.start\n\
             :22\n\
             proxy.domain.list.end\n",
        );
        assert!(matches!(policy.classify("anything", 22), Decision::Proxy { .. }));
        assert_eq!(policy.classify("anything", 80), Decision::Direct);
    }

    #[test]
    fn scenario_3_https_relay() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("c.crt");
        let key = dir.path().join("c.key");
        std::fs::write(&cert, b"cert").unwrap();
        std::fs::write(&key, b"key").unwrap();
        let text = format!(
            "agent.listen 11080\n\
             proxy.server.auth alice:pasSw0rD\n\
             agent.direct-relay on\n\
             proxy.server.list.start\n\
             websocks://127.0.0.1:18686\n\
             proxy.server.list.end\n\
             https-relay.domain.list.start\n\
             youtube.com\n\
             https-relay.domain.list.end\n\
             agent.https-relay.cert-key.list.start\n\
             {} {}\n\
             agent.https-relay.cert-key.list.end\n",
            cert.display(),
            key.display()
        );
        let policy = build(&text);
        assert!(matches!(
            policy.classify("youtube.com", 443),
            Decision::HttpsRelay { .. }
        ));
    }

    #[test]
    fn scenario_7_missing_auth_is_validation_error() {
        let config = crate::parser::Parser::new(&StdResourceLoader, &NoopProcessRunner)
            .parse(
                "agent.listen 11080\n\
                 proxy.server.list.start\n\
                 websocks://127.0.0.1:18686\n\
                 proxy.server.list.end\n",
                None,
            )
            .unwrap();
        let err = crate::validate::validate(config, &StdCertKeyStore).unwrap_err();
        assert!(matches!(err, crate::error::ConfigError::Validation { .. }));
    }
}
