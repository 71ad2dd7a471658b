//! Group alias registry (spec §4.5): lazy creation, `DEFAULT` as the
//! reserved fallback alias.

use linked_hash_map::LinkedHashMap;

use crate::model::{HealthCheckConfig, ServerGroup, DEFAULT_ALIAS};

pub fn normalize_alias(alias: Option<&str>) -> &str {
    match alias {
        None => DEFAULT_ALIAS,
        Some(a) if a.is_empty() => DEFAULT_ALIAS,
        Some(a) => a,
    }
}

/// Returns a mutable reference to the group for `alias`, creating it with
/// the spec-fixed health-check defaults if it doesn't exist yet.
pub fn get_or_create<'a>(
    groups: &'a mut LinkedHashMap<String, ServerGroup>,
    alias: Option<&str>,
    no_health_check: bool,
) -> &'a mut ServerGroup {
    let alias = normalize_alias(alias).to_string();
    if !groups.contains_key(&alias) {
        groups.insert(
            alias.clone(),
            ServerGroup::new(alias.clone(), HealthCheckConfig::fixed(!no_health_check)),
        );
    }
    groups.get_mut(&alias).unwrap()
}
