// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! `dedup` extension function
//!
//! Canonicalizes a comma-joined list of `key=value` label tokens: one token
//! per key (the last one wins), sorted by full token text.

use anyhow::{Result, bail};
use regorus::Value;
use std::collections::HashMap;

/// Name the function is registered under inside the policy
pub const NAME: &str = "dedup";

/// Number of arguments the function takes
pub const ARITY: u8 = 1;

/// Deduplicate label tokens by key.
///
/// Keys are split off at the first `=` only, so values may contain `=`.
/// A token without `=` is a key with an empty value.
pub fn dedup(input: &str) -> String {
    let mut seen: HashMap<&str, &str> = HashMap::new();
    for token in input.split(',') {
        let key = token.split_once('=').map_or(token, |(key, _)| key);
        seen.insert(key, token);
    }

    // Sorting the full token text makes the output independent of map order
    let mut deduped: Vec<&str> = seen.into_values().collect();
    deduped.sort_unstable();
    deduped.join(",")
}

/// Adapter from the Rego calling convention to [`dedup`]
pub fn extension(params: Vec<Value>) -> Result<Value> {
    let [arg] = params.as_slice() else {
        bail!("{NAME}: expected {ARITY} argument, got {}", params.len());
    };
    let Value::String(labels) = arg else {
        bail!("{NAME}: expected a string argument");
    };
    Ok(Value::from(dedup(labels)))
}
