//! Zone record model and per-query evaluation
//!
//! A record's identity is its key `(name-or-pattern, class, type)`. Names
//! are either literal fully-qualified names (matched case-insensitively)
//! or `/pattern/` regexes tested against the origin-qualified query name.
//! A record carries exactly one payload: static data parsed from the zone
//! file, a compiled script that computes data per query, or the synthetic
//! group wrapping several matches of one query.

use std::net::SocketAddr;
use std::sync::Arc;

use lazy_static::lazy_static;
use regex::{Regex, RegexBuilder};
use thiserror::Error;

use crate::message::Query;
use crate::rdata::Rdata;
use crate::script::{Script, ScriptContext};
use crate::types::{RecordClass, RecordType};

lazy_static! {
    static ref PATTERN_FORM: Regex = Regex::new(r"^/[^/]+/$").unwrap();
}

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("invalid name pattern '{0}': {1}")]
    InvalidPattern(String, regex::Error),
}

/// Qualifies `name` against the zone origin the way the zone store and the
/// record constructors both expect: a trailing dot marks an already
/// fully-qualified name, a name already ending in the origin stays as-is,
/// anything else gets the origin appended.
pub fn qualify_name(origin: &str, name: &str) -> String {
    if let Some(stripped) = name.strip_suffix('.') {
        stripped.to_string()
    } else if name.to_ascii_lowercase().ends_with(&origin.to_ascii_lowercase()) {
        name.to_string()
    } else {
        format!("{}.{}", name, origin)
    }
}

/// Cache and uniqueness key, unique per (name, class, type).
pub fn record_key(fqname: &str, class: RecordClass, rtype: RecordType) -> String {
    format!("{}:{}:{}", fqname.to_ascii_lowercase(), class.name(), rtype.name())
}

pub enum RecordName {
    Literal(String),
    Pattern { raw: String, expr: Regex },
}

enum Payload {
    Data(Rdata),
    Script(Arc<dyn Script>),
    Group(Vec<Arc<Record>>),
}

pub struct Record {
    pub key: String,
    pub name: RecordName,
    pub class: RecordClass,
    pub rtype: RecordType,
    /// 0 means "inherit the zone default"
    ttl: u32,
    payload: Payload,
}

impl Record {
    /// Record with a static payload parsed from the zone file.
    pub fn new(
        origin: &str,
        name: &str,
        class: RecordClass,
        rtype: RecordType,
        ttl: u32,
        rdata: Rdata,
    ) -> Result<Record, RecordError> {
        Record::build(origin, name, class, rtype, ttl, Payload::Data(rdata))
    }

    /// Record whose payload is computed by a script on every query.
    pub fn scripted(
        origin: &str,
        name: &str,
        class: RecordClass,
        rtype: RecordType,
        ttl: u32,
        script: Arc<dyn Script>,
    ) -> Result<Record, RecordError> {
        Record::build(origin, name, class, rtype, ttl, Payload::Script(script))
    }

    /// Synthetic non-unique record aggregating several matches for one
    /// query; never stored in a zone.
    pub fn group(class: RecordClass, rtype: RecordType, members: Vec<Arc<Record>>) -> Record {
        Record {
            key: record_key("", class, rtype),
            name: RecordName::Literal(String::new()),
            class,
            rtype,
            ttl: 0,
            payload: Payload::Group(members),
        }
    }

    fn build(
        origin: &str,
        name: &str,
        class: RecordClass,
        rtype: RecordType,
        ttl: u32,
        payload: Payload,
    ) -> Result<Record, RecordError> {
        let record_name = if PATTERN_FORM.is_match(name) {
            let inner = &name[1..name.len() - 1];
            let suffix = regex::escape(&format!(".{}", origin));
            // 末尾的 $ 锚点移到 origin 后缀之后, 否则永远匹配不上
            let full = match inner.strip_suffix('$') {
                Some(head) => format!("{}{}$", head, suffix),
                None => format!("{}{}", inner, suffix),
            };
            let expr = RegexBuilder::new(&full)
                .case_insensitive(true)
                .build()
                .map_err(|e| RecordError::InvalidPattern(name.to_string(), e))?;
            RecordName::Pattern { raw: name.to_string(), expr }
        } else {
            RecordName::Literal(qualify_name(origin, name))
        };

        let key = match &record_name {
            RecordName::Literal(fqname) => record_key(fqname, class, rtype),
            RecordName::Pattern { raw, .. } => record_key(raw, class, rtype),
        };

        Ok(Record { key, name: record_name, class, rtype, ttl, payload })
    }

    /// Whether this record answers the given origin-qualified name.
    pub fn can_answer(&self, qname: &str) -> bool {
        match &self.name {
            RecordName::Literal(fqname) => fqname.eq_ignore_ascii_case(qname),
            RecordName::Pattern { expr, .. } => expr.is_match(qname),
        }
    }

    /// Only the synthetic group is non-unique.
    pub fn is_unique(&self) -> bool {
        !matches!(self.payload, Payload::Group(_))
    }

    pub fn is_script(&self) -> bool {
        matches!(self.payload, Payload::Script(_))
    }

    pub fn effective_ttl(&self, zone_default: u32) -> u32 {
        if self.ttl == 0 {
            zone_default
        } else {
            self.ttl
        }
    }

    /// Produces the resource record payloads for one query. Static records
    /// expose their data directly, groups concatenate their members in
    /// declaration order, and scripts run fresh on every call. Script
    /// failures (runtime errors, bad output shapes, unknown response
    /// types) are logged and produce nothing; they never fail the query.
    pub fn evaluate(&self, query: &Query, remote: &SocketAddr) -> Vec<Rdata> {
        match &self.payload {
            Payload::Data(rdata) => vec![rdata.clone()],
            Payload::Group(members) => members
                .iter()
                .flat_map(|member| member.evaluate(query, remote))
                .collect(),
            Payload::Script(script) => self.run_script(script.as_ref(), query, remote),
        }
    }

    fn run_script(&self, script: &dyn Script, query: &Query, remote: &SocketAddr) -> Vec<Rdata> {
        tracing::info!("[zone] Running script for record '{}'", self.key);

        let mut ctx = ScriptContext {
            remote_address: remote.ip().to_string(),
            remote_port: remote.port().to_string(),
            request_name: query.name.clone(),
            response_type: self.rtype.name().to_string(),
        };

        let output = match script.call(&mut ctx) {
            Ok(output) => output,
            Err(e) => {
                tracing::error!("[zone] Error '{}' running script for record '{}'", e, self.key);
                return Vec::new();
            }
        };

        let response_type = match RecordType::from_name(&ctx.response_type) {
            Some(rtype) => rtype,
            None => {
                tracing::error!(
                    "[zone] Script for record '{}' set unknown response type '{}'",
                    self.key,
                    ctx.response_type
                );
                return Vec::new();
            }
        };
        if response_type != query.rtype {
            tracing::info!(
                "[zone] Script changed response type from '{}' to '{}'",
                query.rtype.name(),
                response_type.name()
            );
        }

        let mut records = Vec::new();
        for result in output.into_results() {
            match Rdata::parse_from_text(response_type, &result) {
                Ok(rdata) => records.push(rdata),
                Err(e) => {
                    tracing::error!(
                        "[zone] Invalid script output for record '{}': {}",
                        self.key,
                        e
                    );
                    return Vec::new();
                }
            }
        }
        records
    }
}
