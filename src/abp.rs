//! A minimal, hostname-centric Adblock-Plus filter-list interpreter.
//!
//! Only enough of ABP syntax is implemented to answer "does this host match"
//! queries; full ABP conformance (URL paths, element hiding, options) is
//! intentionally out of scope per the spec's own design note.

use base64::Engine;
use regex::Regex;

use crate::error::ConfigError;

/// One compiled ABP rule. `Glob` is the fallback for anything containing
/// `*` or `^` that isn't one of the two structured forms below.
#[derive(Debug, Clone)]
enum AbpRule {
    /// `||host^` — host equals `host`, or has it as a dot-suffix.
    DomainAnchor(String),
    /// `|scheme://host...` — compared against the query host only.
    UrlAnchor(String),
    /// Plain substring rule.
    Substring(String),
    /// `*`/`^`-glob compiled to a regex; `^` is treated as end-of-host for
    /// hostname-only queries (see spec §4.2).
    Glob(Regex),
}

impl AbpRule {
    fn matches(&self, host: &str) -> bool {
        match self {
            AbpRule::DomainAnchor(d) => host == d || host.ends_with(&format!(".{d}")),
            AbpRule::UrlAnchor(d) => host == d,
            AbpRule::Substring(s) => host.contains(s.as_str()),
            AbpRule::Glob(re) => re.is_match(host),
        }
    }

    fn compile(rule_text: &str) -> Option<AbpRule> {
        let rule_text = rule_text.trim();
        if rule_text.is_empty() {
            return None;
        }
        if let Some(rest) = rule_text.strip_prefix("||") {
            let host = rest.trim_end_matches('^');
            // Anything past the host part (path/options) is irrelevant for
            // hostname-only matching; keep up to the first separator.
            let host = host
                .split(|c| c == '/' || c == '^' || c == '?')
                .next()
                .unwrap_or(host);
            return Some(AbpRule::DomainAnchor(host.to_string()));
        }
        if let Some(rest) = rule_text.strip_prefix('|') {
            if let Some(idx) = rest.find("://") {
                let after_scheme = &rest[idx + 3..];
                let host = after_scheme
                    .split(|c| c == '/' || c == '^' || c == '?' || c == ':')
                    .next()
                    .unwrap_or(after_scheme);
                return Some(AbpRule::UrlAnchor(host.to_string()));
            }
        }
        if rule_text.contains('*') || rule_text.contains('^') {
            let mut pattern = String::from("^");
            let mut literal = String::new();
            let flush = |literal: &mut String, pattern: &mut String| {
                if !literal.is_empty() {
                    pattern.push_str(&regex::escape(literal));
                    literal.clear();
                }
            };
            for ch in rule_text.chars() {
                match ch {
                    '*' => {
                        flush(&mut literal, &mut pattern);
                        pattern.push_str(".*");
                    }
                    '^' => {
                        flush(&mut literal, &mut pattern);
                        pattern.push_str(r"($|[/?:=&])");
                    }
                    c => literal.push(c),
                }
            }
            flush(&mut literal, &mut pattern);
            pattern.push('$');
            return Regex::new(&pattern).ok().map(AbpRule::Glob);
        }
        Some(AbpRule::Substring(rule_text.to_string()))
    }
}

/// A compiled filter list: an ordered set of include rules and an ordered
/// set of exception (`@@`) rules that veto an otherwise-positive match.
#[derive(Debug)]
pub struct AbpList {
    include: Vec<AbpRule>,
    exceptions: Vec<AbpRule>,
}

impl AbpList {
    /// Decode a base64-encoded, newline-delimited Adblock-Plus list and
    /// compile every rule.
    pub fn from_base64(payload: &str) -> Result<AbpList, ConfigError> {
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(payload.trim())
            .map_err(|e| ConfigError::resource("<abp payload>", e))?;
        let text = String::from_utf8(decoded)
            .map_err(|e| ConfigError::resource("<abp payload>", e))?;
        Ok(Self::from_text(&text))
    }

    fn from_text(text: &str) -> AbpList {
        let mut include = Vec::new();
        let mut exceptions = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('!') || line.starts_with('[') {
                continue;
            }
            if let Some(rest) = line.strip_prefix("@@") {
                if let Some(rule) = AbpRule::compile(rest) {
                    exceptions.push(rule);
                }
            } else if let Some(rule) = AbpRule::compile(line) {
                include.push(rule);
            }
        }
        AbpList {
            include,
            exceptions,
        }
    }

    /// A host matches if any include rule matches and no exception matches.
    pub fn matches(&self, host: &str) -> bool {
        self.include.iter().any(|r| r.matches(host))
            && !self.exceptions.iter().any(|r| r.matches(host))
    }
}
