//! End-to-end tests driving the full parse -> validate -> classify pipeline
//! through the crate's public API only, the way an external dispatcher
//! would consume it.

use wsx_agent_core::collaborators::{NoopProcessRunner, StdCertKeyStore};
use wsx_agent_core::model::Decision;
use wsx_agent_core::parser::Parser;
use wsx_agent_core::policy::Policy;
use wsx_agent_core::resource::StdResourceLoader;
use wsx_agent_core::validate;

fn build(text: &str) -> Policy {
    let config = Parser::new(&StdResourceLoader, &NoopProcessRunner)
        .parse(text, None)
        .expect("parse");
    let config = validate::validate(config, &StdCertKeyStore).expect("validate");
    Policy::new(config)
}

#[test]
fn no_proxy_list_wins_over_domain_list() {
    let policy = build(
        "agent.listen 11080\n\
         proxy.server.auth alice:pasSw0rD\n\
         proxy.server.list.start\n\
         websocks://127.0.0.1:18686\n\
         proxy.server.list.end\n\
         proxy.domain.list.start\n\
         example.com\n\
         proxy.domain.list.end\n\
         no-proxy.domain.list.start\n\
         example.com\n\
         no-proxy.domain.list.end\n",
    );
    match policy.classify("example.com", 443) {
        Decision::NoProxy { group_alias } => assert_eq!(group_alias, "DEFAULT"),
        other => panic!("unexpected decision: {other:?}"),
    }
}

#[test]
fn unmatched_host_is_direct() {
    let policy = build(
        "agent.listen 11080\n\
         proxy.server.auth alice:pasSw0rD\n\
         proxy.server.list.start\n\
         websocks://127.0.0.1:18686\n\
         proxy.server.list.end\n\
         proxy.domain.list.start\n\
         example.com\n\
         proxy.domain.list.end\n",
    );
    assert_eq!(policy.classify("unrelated.test", 80), Decision::Direct);
}

#[test]
fn proxy_https_relay_flag_set_when_proxy_relay_on() {
    let policy = build(
        "agent.listen 11080\n\
         proxy.server.auth alice:pasSw0rD\n\
         agent.proxy-relay on\n\
         proxy.server.list.start\n\
         websocks://127.0.0.1:18686\n\
         proxy.server.list.end\n\
         proxy.domain.list.start\n\
         example.com\n\
         proxy.domain.list.end\n\
         proxy.https-relay.domain.list.start\n\
         example.com\n\
         proxy.https-relay.domain.list.end\n",
    );
    assert_eq!(
        policy.classify("example.com", 443),
        Decision::Proxy {
            group_alias: "DEFAULT".to_string(),
            resolve_at_upstream: false,
            https_relay: true,
        }
    );
}

#[test]
fn merge_flag_folds_domain_list_into_proxy_https_relay() {
    let dir = tempfile::tempdir().unwrap();
    let cert = dir.path().join("c.crt");
    let key = dir.path().join("c.key");
    std::fs::write(&cert, b"cert").unwrap();
    std::fs::write(&key, b"key").unwrap();
    let text = format!(
        "agent.listen 11080\n\
         proxy.server.auth alice:pasSw0rD\n\
         agent.direct-relay on\n\
         agent.proxy-relay on\n\
         proxy.https-relay.domain.merge on\n\
         proxy.server.list.start\n\
         websocks://127.0.0.1:18686\n\
         proxy.server.list.end\n\
         proxy.domain.list.start\n\
         example.com\n\
         proxy.domain.list.end\n\
         https-relay.domain.list.start\n\
         other.test\n\
         https-relay.domain.list.end\n\
         agent.https-relay.cert-key.list.start\n\
         {} {}\n\
         agent.https-relay.cert-key.list.end\n",
        cert.display(),
        key.display()
    );
    let policy = build(&text);
    assert_eq!(
        policy.classify("example.com", 443),
        Decision::Proxy {
            group_alias: "DEFAULT".to_string(),
            resolve_at_upstream: false,
            https_relay: true,
        }
    );
}
