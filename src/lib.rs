//! Configuration and routing-policy core of a WebSocks proxy agent.
//!
//! This crate parses a line-oriented declarative configuration into an
//! in-memory model, compiles domain-matching rules, validates
//! cross-section consistency, and exposes a `classify(host, port)` lookup
//! for a (separately implemented) dispatcher. See `SPEC_FULL.md` for the
//! full requirements this crate implements.

pub mod abp;
pub mod collaborators;
pub mod error;
pub mod group;
pub mod matcher;
pub mod model;
pub mod parser;
pub mod policy;
pub mod resource;
pub mod rulebuilder;
pub mod validate;

use std::path::Path;

use crate::collaborators::StdCollaborators;
use crate::error::ConfigError;
use crate::policy::Policy;
use crate::resource::StdResourceLoader;

/// Parse, validate, and build a [`Policy`] from a configuration file at
/// `path`, using the standard (blocking, real-filesystem/network) set of
/// collaborators.
pub fn load(path: &Path) -> Result<Policy, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|e| ConfigError::resource(path, e))?;
    let collaborators = StdCollaborators::default();
    let loader = StdResourceLoader;
    let config = parser::Parser::with_resolver(
        &loader,
        &collaborators.process_runner,
        &collaborators.resolver,
    )
    .parse(&text, Some(path.to_path_buf()))?;
    let config = validate::validate(config, &collaborators.cert_key_store)?;
    Ok(Policy::new(config))
}
