//! Cross-field validator (spec §4.7). Runs once, after parsing completes,
//! and never hands back a partially-valid [`Config`].

use crate::collaborators::CertKeyStore;
use crate::error::ConfigError;
use crate::model::{Config, Tri};

pub fn validate(mut config: Config, cert_key_store: &dyn CertKeyStore) -> Result<Config, ConfigError> {
    // 1. Merge every per-group domain matcher into the global
    //    proxy_https_relay_domains list, preserving order, if requested.
    if config.proxy_https_relay_domain_merge {
        for (_, matchers) in config.domains.iter_default_last() {
            config
                .proxy_https_relay_domains
                .extend(matchers.iter().cloned());
        }
    }

    // 2. Resolve queued cert-key file references.
    let queued = std::mem::take(&mut config.https_relay_cert_key_files);
    for tokens in &queued {
        let (key, certs) = tokens.split_last().expect("non-empty, checked at parse time");
        let handle = cert_key_store.read_file(certs, key)?;
        config.https_relay_cert_keys.push(handle);
    }
    if config.https_relay_cert_keys.is_empty() && config.auto_sign_cert.is_none() {
        if !config.https_relay_domains.is_empty() {
            return Err(ConfigError::validation(
                "https_relay_domains must be empty without a cert-key or auto-sign cert",
            ));
        }
        if config.direct_relay {
            return Err(ConfigError::validation(
                "direct_relay requires a cert-key or an auto-sign cert",
            ));
        }
        if config.proxy_relay == Tri::On {
            return Err(ConfigError::validation(
                "proxy_relay cannot be explicitly on without a cert-key or an auto-sign cert",
            ));
        }
    }

    // 3. direct_relay == false implies no HTTPS relay configuration at all.
    if !config.direct_relay {
        if !config.https_relay_domains.is_empty() {
            return Err(ConfigError::validation(
                "https_relay_domains must be empty when direct_relay is off",
            ));
        }
        if !config.proxy_https_relay_domains.is_empty() {
            return Err(ConfigError::validation(
                "proxy_https_relay_domains must be empty when direct_relay is off",
            ));
        }
        if config.proxy_https_relay_domain_merge {
            return Err(ConfigError::validation(
                "proxy.https-relay.domain.merge requires direct_relay on",
            ));
        }
    }

    // 4. Every alias used in the per-group matcher mappings must exist in groups.
    for aliases in [
        config.domains.aliases().cloned().collect::<Vec<_>>(),
        config.proxy_resolves.aliases().cloned().collect::<Vec<_>>(),
        config.no_proxy_domains.aliases().cloned().collect::<Vec<_>>(),
    ] {
        for alias in aliases {
            if !config.groups.contains_key(&alias) {
                return Err(ConfigError::validation(format!(
                    "alias '{alias}' is used but no matching group exists"
                )));
            }
        }
    }

    // 5. pac_port requires at least one of socks5_port/http_connect_port.
    if config.pac_port != 0 && config.socks5_port == 0 && config.http_connect_port == 0 {
        return Err(ConfigError::validation(
            "agent.gateway.pac.listen requires socks5 or http-connect to be enabled",
        ));
    }

    // 6. ss_port requires a non-empty password.
    if config.ss_port != 0 && config.ss_password.is_empty() {
        return Err(ConfigError::validation(
            "agent.ss.listen requires agent.ss.password to be set",
        ));
    }

    if config.user.is_empty() || config.pass.is_empty() {
        return Err(ConfigError::validation(
            "proxy.server.auth must be set with a non-empty user and password",
        ));
    }

    for group in config.groups.values() {
        for entry in &group.entries {
            if entry.port == 0 {
                return Err(ConfigError::validation(format!(
                    "server entry {} has an invalid port",
                    entry.raw_id
                )));
            }
        }
    }

    // 7. Scan the auto-sign working directory for <domain>.crt/<domain>.key pairs.
    if let Some(dir) = config.auto_sign_work_dir.clone() {
        let mut pairs: std::collections::HashMap<String, (bool, bool)> =
            std::collections::HashMap::new();
        if let Ok(entries) = std::fs::read_dir(&dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                match path.extension().and_then(|e| e.to_str()) {
                    Some("crt") => pairs.entry(stem.to_string()).or_default().0 = true,
                    Some("key") => pairs.entry(stem.to_string()).or_default().1 = true,
                    _ => {}
                }
            }
        }
        for (domain, (has_crt, has_key)) in pairs {
            if has_crt && has_key {
                let handle = cert_key_store.read_file(
                    &[dir.join(format!("{domain}.crt")).display().to_string()],
                    dir.join(format!("{domain}.key")).to_str().unwrap_or_default(),
                )?;
                config.https_relay_cert_keys.push(handle);
            }
        }
    }

    Ok(config)
}
