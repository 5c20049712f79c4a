//! Parameter Validation Module
//!
//! Converts untyped JSON parameter bags into typed probe parameters.
//! Whitelist approach throughout: anything not explicitly allowed is rejected,
//! never silently dropped.

use super::{DigFlag, DigParams, PingParams, RecordType};
use crate::error::ValidationError;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::net::Ipv4Addr;

/// Maximum total length of a domain name
pub const MAX_DOMAIN_LENGTH: usize = 253;

/// Maximum length of a single DNS label
pub const MAX_LABEL_LENGTH: usize = 63;

/// Ping count bounds (inclusive)
pub const MIN_PING_COUNT: i64 = 1;
pub const MAX_PING_COUNT: i64 = 30;

const PING_FIELDS: &[&str] = &["target", "count"];
const DIG_FIELDS: &[&str] = &["domain", "recordType", "nameserver", "parameters"];

/// Validate a `ping` parameter bag
pub(super) fn validate_ping(parameters: &Value) -> Result<PingParams, ValidationError> {
    let bag = parameter_bag(parameters, PING_FIELDS)?;

    let target = required_str(bag, "target")?;
    let target = validate_host("target", target)?;
    let count = validate_count(bag.get("count"))?;

    Ok(PingParams { target, count })
}

/// Validate a `dig` parameter bag
pub(super) fn validate_dig(parameters: &Value) -> Result<DigParams, ValidationError> {
    let bag = parameter_bag(parameters, DIG_FIELDS)?;

    let domain = validate_domain("domain", required_str(bag, "domain")?)?;
    let record_type = validate_record_type(required_str(bag, "recordType")?)?;

    let nameserver = match bag.get("nameserver") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.is_empty() => None,
        Some(Value::String(s)) => Some(validate_host("nameserver", s)?),
        Some(_) => {
            return Err(ValidationError::new(
                "nameserver",
                "nameserver must be a string",
            ))
        }
    };

    let flags = validate_dig_flags(bag.get("parameters"))?;

    Ok(DigParams {
        domain,
        record_type,
        nameserver,
        flags,
    })
}

/// Check that `parameters` is an object holding only known keys
fn parameter_bag<'a>(
    parameters: &'a Value,
    allowed: &[&str],
) -> Result<&'a Map<String, Value>, ValidationError> {
    let bag = parameters
        .as_object()
        .ok_or_else(|| ValidationError::new("parameters", "parameters must be an object"))?;

    if let Some(unknown) = bag.keys().find(|k| !allowed.contains(&k.as_str())) {
        return Err(ValidationError::new(
            "parameters",
            format!("unknown parameter '{}'", unknown),
        ));
    }

    Ok(bag)
}

fn required_str<'a>(bag: &'a Map<String, Value>, field: &str) -> Result<&'a str, ValidationError> {
    match bag.get(field) {
        None | Some(Value::Null) => Err(ValidationError::new(
            field,
            format!("{} is required", field),
        )),
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(ValidationError::new(
            field,
            format!("{} must be a string", field),
        )),
    }
}

/// Validate a domain name against the RFC 1035 label grammar.
///
/// Returns the name with one trailing dot removed.
pub fn validate_domain(field: &str, domain: &str) -> Result<String, ValidationError> {
    if domain.is_empty() {
        return Err(ValidationError::new(
            field,
            format!("{} cannot be empty", field),
        ));
    }

    if domain.len() > MAX_DOMAIN_LENGTH {
        return Err(ValidationError::new(
            field,
            format!(
                "domain name length cannot exceed {} characters",
                MAX_DOMAIN_LENGTH
            ),
        ));
    }

    let trimmed = domain.strip_suffix('.').unwrap_or(domain);
    let labels: Vec<&str> = trimmed.split('.').collect();
    if labels.len() < 2 {
        return Err(ValidationError::new(
            field,
            "domain must have at least one dot separator",
        ));
    }

    for label in labels {
        if label.len() > MAX_LABEL_LENGTH {
            return Err(ValidationError::new(
                field,
                format!("label length cannot exceed {} characters", MAX_LABEL_LENGTH),
            ));
        }
        if !is_valid_label(label) {
            return Err(ValidationError::new(field, "invalid label format"));
        }
    }

    Ok(trimmed.to_string())
}

/// `[A-Za-z0-9]([A-Za-z0-9-]*[A-Za-z0-9])?`
fn is_valid_label(label: &str) -> bool {
    let bytes = label.as_bytes();
    match (bytes.first(), bytes.last()) {
        (Some(first), Some(last)) => {
            first.is_ascii_alphanumeric()
                && last.is_ascii_alphanumeric()
                && bytes.iter().all(|b| b.is_ascii_alphanumeric() || *b == b'-')
        }
        _ => false,
    }
}

/// Accept an IPv4 address or a valid domain name
pub fn validate_host(field: &str, value: &str) -> Result<String, ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::new(
            field,
            format!("{} cannot be empty", field),
        ));
    }

    if value.parse::<Ipv4Addr>().is_ok() {
        return Ok(value.to_string());
    }

    validate_domain(field, value)
}

/// Validate the ping count: an integer (or decimal string) in `[1, 30]`
pub fn validate_count(value: Option<&Value>) -> Result<u8, ValidationError> {
    let bounds = || {
        ValidationError::new(
            "count",
            format!(
                "count must be between {} and {}",
                MIN_PING_COUNT, MAX_PING_COUNT
            ),
        )
    };
    let format = || ValidationError::new("count", "count must be a whole number");

    let count = match value {
        None | Some(Value::Null) => {
            return Err(ValidationError::new("count", "count is required"));
        }
        Some(Value::Number(n)) => {
            if let Some(i) = n.as_i64() {
                i
            } else if n.is_u64() {
                return Err(bounds());
            } else {
                match n.as_f64() {
                    Some(f) if f.is_finite() && f.fract() == 0.0 => {
                        if f < MIN_PING_COUNT as f64 || f > MAX_PING_COUNT as f64 {
                            return Err(bounds());
                        }
                        f as i64
                    }
                    _ => return Err(format()),
                }
            }
        }
        Some(Value::String(s)) => s.trim().parse::<i64>().map_err(|_| format())?,
        Some(_) => return Err(format()),
    };

    if !(MIN_PING_COUNT..=MAX_PING_COUNT).contains(&count) {
        return Err(bounds());
    }

    u8::try_from(count).map_err(|_| bounds())
}

/// Case-insensitive membership in the record type whitelist
pub fn validate_record_type(value: &str) -> Result<RecordType, ValidationError> {
    value
        .parse()
        .map_err(|_| ValidationError::new("recordType", "invalid DNS record type"))
}

/// Validate the `dig` option bag.
///
/// Every key must be on the allow-list, whatever its value; a disallowed flag
/// fails the whole request.
pub fn validate_dig_flags(value: Option<&Value>) -> Result<BTreeSet<DigFlag>, ValidationError> {
    let bag = match value {
        None | Some(Value::Null) => return Ok(BTreeSet::new()),
        Some(Value::Object(bag)) => bag,
        Some(_) => {
            return Err(ValidationError::new(
                "parameters",
                "parameters must be an object",
            ))
        }
    };

    let mut flags = BTreeSet::new();
    for (name, enabled) in bag {
        let flag = DigFlag::from_name(name).ok_or_else(|| {
            ValidationError::new("parameters", format!("parameter '{}' is not allowed", name))
        })?;
        match enabled {
            Value::Bool(true) => {
                flags.insert(flag);
            }
            Value::Bool(false) => {}
            _ => {
                return Err(ValidationError::new(
                    "parameters",
                    format!("parameter '{}' must be true or false", name),
                ))
            }
        }
    }

    Ok(flags)
}
