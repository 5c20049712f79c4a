//! Property-Based Tests for Probe Validation
//!
//! # Running the Tests
//!
//! ```bash
//! cargo test --lib probe::proptests
//! ```

use proptest::prelude::*;
use serde_json::json;

use crate::probe::{
    validate_count, validate_dig_flags, validate_domain, DigFlag, ProbeKind, ProbeRequest,
    RecordType,
};

// Helper: a label matching [A-Za-z0-9]([A-Za-z0-9-]*[A-Za-z0-9])? of 1..=63 chars
fn arb_label() -> impl Strategy<Value = String> {
    prop_oneof![
        "[A-Za-z0-9]",
        "[A-Za-z0-9][A-Za-z0-9-]{0,61}[A-Za-z0-9]",
    ]
}

// Helper: a domain of 2..=4 valid labels, at most 253 characters
fn arb_domain() -> impl Strategy<Value = String> {
    prop::collection::vec(arb_label(), 2..=4)
        .prop_map(|labels| labels.join("."))
        .prop_filter("within 253 characters", |d| d.len() <= 253)
}

proptest! {
    #[test]
    fn prop_valid_domains_accepted(domain in arb_domain()) {
        prop_assert!(validate_domain("domain", &domain).is_ok());
    }

    #[test]
    fn prop_oversized_label_rejected(
        label in "[a-z]{64,80}",
        rest in arb_label(),
    ) {
        let domain = format!("{}.{}", label, rest);
        prop_assert!(validate_domain("domain", &domain).is_err());
    }

    #[test]
    fn prop_boundary_hyphen_rejected(
        label in arb_label(),
        rest in arb_label(),
        leading in any::<bool>(),
    ) {
        let bad = if leading { format!("-{}", label) } else { format!("{}-", label) };
        let domain = format!("{}.{}", bad, rest);
        prop_assert!(validate_domain("domain", &domain).is_err());
    }

    #[test]
    fn prop_count_accepted_iff_in_range(n in any::<i64>()) {
        let result = validate_count(Some(&json!(n)));
        prop_assert_eq!(result.is_ok(), (1..=30).contains(&n));
    }

    #[test]
    fn prop_record_type_case_insensitive(index in 0usize..8, lower in any::<bool>()) {
        let name = RecordType::ALL[index].as_str();
        let input = if lower { name.to_lowercase() } else { name.to_string() };
        prop_assert_eq!(input.parse::<RecordType>(), Ok(RecordType::ALL[index]));
    }

    #[test]
    fn prop_unknown_dig_flag_always_rejected(
        name in "[a-z]{1,12}",
        value in any::<bool>(),
    ) {
        prop_assume!(DigFlag::from_name(&name).is_none());
        let mut bag = serde_json::Map::new();
        bag.insert(name, json!(value));
        bag.insert("short".to_string(), json!(true));
        prop_assert!(validate_dig_flags(Some(&serde_json::Value::Object(bag))).is_err());
    }

    /// Only whitelisted `+flag` tokens follow the domain and record type
    #[test]
    fn prop_dig_arguments_are_whitelisted(
        domain in arb_domain(),
        index in 0usize..8,
        short in any::<bool>(),
        trace in any::<bool>(),
        answer in any::<bool>(),
    ) {
        let request = ProbeRequest::validate(ProbeKind::Dig, &json!({
            "domain": domain,
            "recordType": RecordType::ALL[index].as_str(),
            "parameters": {"short": short, "trace": trace, "answer": answer},
        })).unwrap();

        let args = request.arguments();
        let allowed: Vec<String> = DigFlag::ALL.iter().map(|f| format!("+{}", f.name())).collect();
        prop_assert_eq!(args.len(), 2 + [short, trace, answer].iter().filter(|b| **b).count());
        for extra in &args[2..] {
            prop_assert!(allowed.contains(extra));
        }
    }
}
