//! N-gram word prediction model.
//!
//! The model is built offline and served read-only:
//! - Raw counts for every order (`NGramCounts`)
//! - Thresholding and normalization into probabilities (`optimize`)
//! - The persisted, immutable probability table (`ProbabilityTable`)
//! - Longest-context-first lookup (`Predictor`)

/// Raw n-gram counting over a token stream.
///
/// Supports sequential and multithreaded counting, merging of partial
/// counts and the persisted JSON count format.
pub mod counts;

/// Conversion of raw counts into a probability table.
pub mod optimizer;

/// Read-only backoff predictor over a shared probability table.
pub mod predictor;

/// Probability table, its invariants and its JSON / binary persistence.
pub mod table;

/// Text normalization shared by training and querying.
pub mod tokenizer;

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer};

use crate::error::ModelError;

/// Parses a persisted order key (`"1"`, `"2"`, ...).
pub(crate) fn parse_order(key: &str) -> Result<usize, String> {
	match key.trim().parse::<usize>() {
		Ok(0) => Err("order 0 is not a valid n-gram order".to_owned()),
		Ok(n) => Ok(n),
		Err(_) => Err(format!("order key must be a positive integer, got {key:?}")),
	}
}

/// Reports a model error from inside a serde visitor.
pub(crate) fn de_error<E: de::Error>(e: ModelError) -> E {
	match e {
		ModelError::MalformedInput(message) => E::custom(message),
		other => E::custom(other),
	}
}

/// String-keyed map that fails on a repeated key instead of keeping the
/// last value.
pub(crate) struct UniqueKeys<V>(pub(crate) HashMap<String, V>);

impl<'de, V: Deserialize<'de>> Deserialize<'de> for UniqueKeys<V> {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		deserializer.deserialize_map(UniqueKeysVisitor(PhantomData))
	}
}

struct UniqueKeysVisitor<V>(PhantomData<V>);

impl<'de, V: Deserialize<'de>> Visitor<'de> for UniqueKeysVisitor<V> {
	type Value = UniqueKeys<V>;

	fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
		f.write_str("a map with unique keys")
	}

	fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
		let mut entries = HashMap::with_capacity(map.size_hint().unwrap_or(0));
		while let Some(key) = map.next_key::<String>()? {
			if entries.contains_key(&key) {
				return Err(de::Error::custom(format!("duplicate key {key:?}")));
			}
			let value = map.next_value()?;
			entries.insert(key, value);
		}
		Ok(UniqueKeys(entries))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_parse_order() {
		assert_eq!(parse_order("1"), Ok(1));
		assert_eq!(parse_order("5"), Ok(5));
		assert!(parse_order("0").is_err());
		assert!(parse_order("-2").is_err());
		assert!(parse_order("bigram").is_err());
	}

	#[test]
	fn test_unique_keys() {
		let map: UniqueKeys<u64> = serde_json::from_str(r#"{"ez": 1, "im": 2}"#).unwrap();
		assert_eq!(map.0.len(), 2);

		let repeated: std::result::Result<UniqueKeys<u64>, _> = serde_json::from_str(r#"{"ez": 1, "ez": 2}"#);
		assert!(repeated.is_err());
	}
}
