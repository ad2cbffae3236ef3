//! Assertions over pipeline contexts.

use crate::context::Context;

/// Asserts that `key` holds `expected`.
pub fn assert_context_value(ctx: &Context, key: &str, expected: &serde_json::Value) {
    let actual = ctx.get(key);
    assert_eq!(
        actual,
        Some(expected),
        "Expected value {:?} for key '{}', got {:?}",
        expected,
        key,
        actual
    );
}

/// Asserts that the context holds exactly `expected` keys, in any order.
pub fn assert_context_keys(ctx: &Context, expected: &[&str]) {
    let mut actual = ctx.keys();
    actual.sort();
    let mut expected: Vec<String> = expected.iter().map(|k| (*k).to_string()).collect();
    expected.sort();
    assert_eq!(
        actual, expected,
        "Context keys differ: got {actual:?}, expected {expected:?}"
    );
}
