use std::sync::Arc;

use regex::Regex;

use crate::abp::AbpList;

/// A single compiled domain/port rule. Closed sum type rather than an open
/// trait — the grammar in `parser.rs` can only ever produce one of these
/// four shapes (see spec Design Note on tagged unions vs. virtual dispatch).
#[derive(Clone, Debug)]
pub enum Matcher {
    Suffix(String),
    Pattern(Arc<Regex>),
    Port(u16),
    Abp(Arc<AbpList>),
}

impl Matcher {
    /// ASCII, case-sensitive suffix match: exact host or `.`-suffix of host.
    pub fn matches(&self, host: &str, port: u16) -> bool {
        match self {
            Matcher::Suffix(s) => host == s || host.ends_with(&format!(".{s}")),
            Matcher::Pattern(re) => re.is_match(host),
            Matcher::Port(p) => port == *p,
            Matcher::Abp(list) => list.matches(host),
        }
    }
}
