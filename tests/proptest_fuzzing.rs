//! Property tests: parsers must never panic, hashes must be stable.

use proptest::prelude::*;

use autopr::ingress::signature::{sign_hex, verify_signature};
use autopr::util::canon::{canonical_json, content_key};
use autopr::workflow::{parse_duration, Expr, WorkflowSpec};

proptest! {
    /// The expression parser returns Ok or Err, never panics.
    #[test]
    fn expr_parse_never_panics(input in ".{0,128}") {
        let _ = Expr::parse(&input);
    }

    /// Duration parsing never panics and accepts the documented forms.
    #[test]
    fn duration_parse_never_panics(input in ".{0,32}") {
        let _ = parse_duration(&input);
    }

    #[test]
    fn duration_parse_accepts_units(value in 0u64..100_000, unit in prop::sample::select(vec!["ms", "s", "m", "h", ""])) {
        let input = format!("{}{}", value, unit);
        prop_assert!(parse_duration(&input).is_ok());
    }

    /// Workflow YAML parsing never panics on arbitrary input.
    #[test]
    fn workflow_parse_never_panics(input in ".{0,256}") {
        let _ = WorkflowSpec::from_yaml(&input);
    }

    /// Signature verification never panics, and only the matching secret
    /// verifies.
    #[test]
    fn signature_roundtrip(secret in prop::collection::vec(any::<u8>(), 1..64),
                           body in prop::collection::vec(any::<u8>(), 0..256)) {
        let sig = sign_hex(&secret, &body);
        prop_assert!(verify_signature(&secret, &body, &sig).is_ok());

        let mut other = secret.clone();
        other.push(0x01);
        prop_assert!(verify_signature(&other, &body, &sig).is_err());
    }

    #[test]
    fn verify_never_panics_on_garbage(sig in ".{0,128}") {
        let _ = verify_signature(b"secret", b"body", &sig);
    }

    /// Canonical JSON is insensitive to object key insertion order.
    #[test]
    fn canonical_json_ignores_key_order(
        keys in prop::collection::hash_set("[a-z]{1,8}", 1..8),
    ) {
        let keys: Vec<String> = keys.into_iter().collect();
        let mut forward = serde_json::Map::new();
        for (i, k) in keys.iter().enumerate() {
            forward.insert(k.clone(), serde_json::json!(i));
        }
        let mut reverse = serde_json::Map::new();
        for (i, k) in keys.iter().enumerate().rev() {
            reverse.insert(k.clone(), serde_json::json!(i));
        }
        let a = serde_json::Value::Object(forward);
        let b = serde_json::Value::Object(reverse);
        prop_assert_eq!(canonical_json(&a), canonical_json(&b));
        prop_assert_eq!(content_key("ns", 1, &a), content_key("ns", 1, &b));
    }
}
