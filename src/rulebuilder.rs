//! Turns one trimmed, non-empty, non-comment configuration line into
//! exactly one [`Matcher`], per spec §4.4.

use std::sync::Arc;

use regex::Regex;

use crate::abp::AbpList;
use crate::error::ConfigError;
use crate::matcher::Matcher;
use crate::resource::ResourceLoader;

pub fn build_matcher(
    line: &str,
    line_no: usize,
    loader: &dyn ResourceLoader,
) -> Result<Matcher, ConfigError> {
    let line = line.trim();
    if let Some(rest) = line.strip_prefix(':') {
        let port: u16 = rest
            .parse()
            .map_err(|_| ConfigError::parse(line_no, format!("invalid port rule: {line}")))?;
        if port == 0 {
            return Err(ConfigError::parse(line_no, format!("invalid port rule: {line}")));
        }
        return Ok(Matcher::Port(port));
    }
    if line.len() >= 2 && line.starts_with('/') && line.ends_with('/') {
        let body = &line[1..line.len() - 1];
        let re = Regex::new(body)
            .map_err(|e| ConfigError::parse(line_no, format!("invalid regex {body}: {e}")))?;
        return Ok(Matcher::Pattern(Arc::new(re)));
    }
    if line.len() >= 2 && line.starts_with('[') && line.ends_with(']') {
        let reference = &line[1..line.len() - 1];
        let raw = loader.load(reference).map_err(|e| match e {
            ConfigError::Resource { cause, .. } => {
                ConfigError::parse(line_no, format!("failed to load {reference}: {cause}"))
            }
            ConfigError::Network { detail, .. } => {
                ConfigError::parse(line_no, format!("failed to fetch {reference}: {detail}"))
            }
            other => other,
        })?;
        let text = String::from_utf8(raw).map_err(|e| {
            ConfigError::parse(line_no, format!("{reference} is not valid UTF-8: {e}"))
        })?;
        // Source lines are stripped of newlines and concatenated before
        // base64-decoding, per spec §4.2; accept either a raw base64 blob
        // or plain ABP text (the latter is re-encoded for uniform handling).
        let concatenated: String = text.split_whitespace().collect();
        let list = AbpList::from_base64(&concatenated).or_else(|_| {
            use base64::Engine;
            let encoded = base64::engine::general_purpose::STANDARD.encode(text.as_bytes());
            AbpList::from_base64(&encoded)
        })?;
        return Ok(Matcher::Abp(Arc::new(list)));
    }
    if line.is_empty() {
        return Err(ConfigError::parse(line_no, "empty rule line"));
    }
    Ok(Matcher::Suffix(line.to_string()))
}
