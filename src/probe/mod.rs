//! Diagnostic Probes
//!
//! This module defines the closed set of probes a client may request and the
//! strongly-typed parameters each one runs with.
//!
//! # Security Model
//!
//! - **Closed variant set**: only `ping` and `dig` exist; a new probe means a
//!   new `ProbeRequest` variant, never an ad hoc string switch.
//! - **Typed at the boundary**: the untyped JSON parameter bag is converted into
//!   `PingParams`/`DigParams` by the validator. The executor only ever sees
//!   these types, so nothing from the raw bag reaches the spawned process.
//! - **List invocation**: argument vectors are built from validated fields and
//!   passed to the binary directly, never through a shell.
//!
//! # Architecture
//!
//! - `validator.rs`: pure policy checks (`ProbeRequest::validate`)
//! - `executor.rs`: binary lookup, process lifecycle, chunked output streaming

mod executor;
#[cfg(test)]
mod proptests;
mod validator;

pub use executor::{ExecutorConfig, OutputSink, ProbeExecutor, ProbeOutcome, CHUNK_SIZE};
pub use validator::{
    validate_count, validate_dig_flags, validate_domain, validate_host, validate_record_type,
    MAX_DOMAIN_LENGTH, MAX_LABEL_LENGTH, MAX_PING_COUNT, MIN_PING_COUNT,
};

use crate::error::ValidationError;
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Kind of probe named by the request's `type` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeKind {
    /// Reachability check (`ping`)
    Ping,
    /// Name-resolution lookup (`dig`)
    Dig,
}

impl ProbeKind {
    /// Parse the wire name of a probe kind
    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            "ping" => Some(ProbeKind::Ping),
            "dig" => Some(ProbeKind::Dig),
            _ => None,
        }
    }

    /// Wire name, also the name of the host binary
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeKind::Ping => "ping",
            ProbeKind::Dig => "dig",
        }
    }
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated parameters for a reachability check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingParams {
    target: String,
    count: u8,
}

impl PingParams {
    /// IPv4 address or hostname to probe
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Number of echo requests, within `[1, 30]`
    pub fn count(&self) -> u8 {
        self.count
    }
}

/// DNS record types a lookup may ask for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    A,
    Aaaa,
    Mx,
    Ns,
    Txt,
    Cname,
    Soa,
    Ptr,
}

impl RecordType {
    pub const ALL: [RecordType; 8] = [
        RecordType::A,
        RecordType::Aaaa,
        RecordType::Mx,
        RecordType::Ns,
        RecordType::Txt,
        RecordType::Cname,
        RecordType::Soa,
        RecordType::Ptr,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::A => "A",
            RecordType::Aaaa => "AAAA",
            RecordType::Mx => "MX",
            RecordType::Ns => "NS",
            RecordType::Txt => "TXT",
            RecordType::Cname => "CNAME",
            RecordType::Soa => "SOA",
            RecordType::Ptr => "PTR",
        }
    }
}

impl FromStr for RecordType {
    type Err = ();

    /// Case-insensitive parse against the fixed whitelist
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RecordType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or(())
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whitelisted `dig` query options.
///
/// Declaration order is the canonical order in which they are passed to the
/// binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DigFlag {
    Short,
    Trace,
    Answer,
}

impl DigFlag {
    pub const ALL: [DigFlag; 3] = [DigFlag::Short, DigFlag::Trace, DigFlag::Answer];

    /// Look up a flag by its wire name; `None` for anything off the allow-list
    pub fn from_name(name: &str) -> Option<Self> {
        DigFlag::ALL.into_iter().find(|f| f.name() == name)
    }

    pub fn name(&self) -> &'static str {
        match self {
            DigFlag::Short => "short",
            DigFlag::Trace => "trace",
            DigFlag::Answer => "answer",
        }
    }
}

/// Validated parameters for a name lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigParams {
    domain: String,
    record_type: RecordType,
    nameserver: Option<String>,
    flags: BTreeSet<DigFlag>,
}

impl DigParams {
    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn record_type(&self) -> RecordType {
        self.record_type
    }

    pub fn nameserver(&self) -> Option<&str> {
        self.nameserver.as_deref()
    }

    /// Enabled flags in canonical order
    pub fn flags(&self) -> impl Iterator<Item = DigFlag> + '_ {
        self.flags.iter().copied()
    }
}

/// A policy-compliant probe, ready to execute
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeRequest {
    Ping(PingParams),
    Dig(DigParams),
}

impl ProbeRequest {
    /// Convert an untyped parameter bag into a typed request for `kind`.
    ///
    /// `kind` alone decides which schema applies. Pure and deterministic.
    pub fn validate(kind: ProbeKind, parameters: &Value) -> Result<Self, ValidationError> {
        match kind {
            ProbeKind::Ping => validator::validate_ping(parameters).map(ProbeRequest::Ping),
            ProbeKind::Dig => validator::validate_dig(parameters).map(ProbeRequest::Dig),
        }
    }

    pub fn kind(&self) -> ProbeKind {
        match self {
            ProbeRequest::Ping(_) => ProbeKind::Ping,
            ProbeRequest::Dig(_) => ProbeKind::Dig,
        }
    }

    /// Argument vector passed to the host binary
    pub fn arguments(&self) -> Vec<String> {
        match self {
            ProbeRequest::Ping(p) => vec!["-c".to_string(), p.count.to_string(), p.target.clone()],
            ProbeRequest::Dig(d) => {
                let mut args = Vec::with_capacity(3 + d.flags.len());
                if let Some(ns) = &d.nameserver {
                    args.push(format!("@{}", ns));
                }
                args.push(d.domain.clone());
                args.push(d.record_type.to_string());
                args.extend(d.flags.iter().map(|f| format!("+{}", f.name())));
                args
            }
        }
    }
}
