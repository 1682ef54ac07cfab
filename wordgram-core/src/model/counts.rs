use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::mpsc;
use std::thread;

use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::{UniqueKeys, de_error, parse_order};
use super::tokenizer::context_key;
use crate::error::{ModelError, Result};
use crate::io;

/// Raw occurrence counts for a single n-gram order.
///
/// Order 1 has no context and maps words directly to counts; every higher
/// order maps a context key (`n-1` joined tokens) to its next-word counts.
#[derive(Clone, Debug, PartialEq)]
pub enum OrderCounts {
	/// Order 1: word → count.
	Unigram(HashMap<String, u64>),
	/// Order n > 1: context → (word → count).
	Contextual(HashMap<String, HashMap<String, u64>>),
}

impl OrderCounts {
	/// Empty counts with the shape matching order `n`.
	fn empty_for(n: usize) -> Self {
		if n == 1 {
			OrderCounts::Unigram(HashMap::new())
		} else {
			OrderCounts::Contextual(HashMap::new())
		}
	}

	/// Number of words (order 1) or contexts (order n > 1).
	pub fn len(&self) -> usize {
		match self {
			OrderCounts::Unigram(words) => words.len(),
			OrderCounts::Contextual(contexts) => contexts.len(),
		}
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Records one occurrence of `window` (its last token is the target word).
	fn record<S: AsRef<str>>(&mut self, window: &[S]) {
		let Some((word, context)) = window.split_last() else {
			return;
		};
		let word = word.as_ref();
		match self {
			OrderCounts::Unigram(words) => increment(words, word, 1),
			OrderCounts::Contextual(contexts) => {
				let next_words = contexts.entry(context_key(context)).or_default();
				increment(next_words, word, 1);
			}
		}
	}

	/// Sums `other` into this one.
	///
	/// # Errors
	/// Returns `MalformedInput` if the shapes differ.
	fn merge(&mut self, other: &Self) -> Result<()> {
		match (self, other) {
			(OrderCounts::Unigram(words), OrderCounts::Unigram(other_words)) => {
				for (word, count) in other_words {
					increment(words, word, *count);
				}
			}
			(OrderCounts::Contextual(contexts), OrderCounts::Contextual(other_contexts)) => {
				for (context, other_words) in other_contexts {
					let words = contexts.entry(context.clone()).or_default();
					for (word, count) in other_words {
						increment(words, word, *count);
					}
				}
			}
			_ => return Err(ModelError::malformed("cannot merge unigram and context counts")),
		}
		Ok(())
	}

	/// Keeps only the entries whose count reaches `threshold`.
	///
	/// Contexts left without candidates are removed. Zero counts never
	/// survive. Applying the same threshold twice is a no-op.
	pub fn thresholded(&self, threshold: u64) -> Self {
		match self {
			OrderCounts::Unigram(words) => OrderCounts::Unigram(surviving(words, threshold).collect()),
			OrderCounts::Contextual(contexts) => OrderCounts::Contextual(
				contexts
					.iter()
					.filter_map(|(context, words)| {
						let kept: HashMap<String, u64> = surviving(words, threshold).collect();
						(!kept.is_empty()).then(|| (context.clone(), kept))
					})
					.collect(),
			),
		}
	}
}

fn increment(words: &mut HashMap<String, u64>, word: &str, count: u64) {
	match words.get_mut(word) {
		Some(existing) => *existing += count,
		None => {
			words.insert(word.to_owned(), count);
		}
	}
}

/// Iterates over the candidates of a count map that pass `threshold`.
pub(crate) fn surviving(
	words: &HashMap<String, u64>,
	threshold: u64,
) -> impl Iterator<Item = (String, u64)> + '_ {
	words
		.iter()
		.filter(move |(_, count)| **count >= threshold && **count > 0)
		.map(|(word, count)| (word.clone(), *count))
}

/// Raw n-gram counts for every order from 1 to `max_order`.
///
/// Produced in one pass over a token stream; no filtering or normalization
/// happens here.
///
/// # Invariants
/// - `max_order >= 1`
/// - every order in `1..=max_order` is present
#[derive(Clone, Debug, PartialEq)]
pub struct NGramCounts {
	max_order: usize,
	orders: BTreeMap<usize, OrderCounts>,
}

impl NGramCounts {
	/// Creates empty counts for orders `1..=max_order`.
	///
	/// # Errors
	/// Returns `InvalidConfig` if `max_order == 0`.
	pub fn new(max_order: usize) -> Result<Self> {
		if max_order == 0 {
			return Err(ModelError::InvalidConfig("max_order must be >= 1".to_owned()));
		}
		Ok(Self::empty(max_order))
	}

	/// Builds counts from per-order data, filling in absent orders.
	///
	/// The shape of each order is not checked against its number here; the
	/// optimizer rejects inconsistent data.
	///
	/// # Errors
	/// Returns `MalformedInput` if `orders` is empty or contains order 0.
	pub fn from_orders(mut orders: BTreeMap<usize, OrderCounts>) -> Result<Self> {
		if orders.contains_key(&0) {
			return Err(ModelError::malformed("order 0 is not a valid n-gram order"));
		}
		let max_order = match orders.keys().next_back() {
			Some(n) => *n,
			None => return Err(ModelError::malformed("count table has no orders")),
		};
		for n in 1..=max_order {
			orders.entry(n).or_insert_with(|| OrderCounts::empty_for(n));
		}
		Ok(Self { max_order, orders })
	}

	/// Counts all n-grams of a token sequence.
	pub fn from_tokens<S: AsRef<str>>(tokens: &[S], max_order: usize) -> Result<Self> {
		let mut counts = Self::new(max_order)?;
		counts.add_tokens(tokens);
		Ok(counts)
	}

	/// Counts all n-grams of a token sequence using every available core.
	///
	/// The stream is split into chunks; each chunk is extended by
	/// `max_order - 1` tokens so windows crossing a boundary are seen, but a
	/// worker only counts windows that start inside its own chunk. Partial
	/// counts are merged, giving exactly the sequential result.
	pub fn from_tokens_parallel<S: AsRef<str> + Sync>(tokens: &[S], max_order: usize) -> Result<Self> {
		let mut final_counts = Self::new(max_order)?;
		if tokens.is_empty() {
			return Ok(final_counts);
		}

		let chunks = num_cpus::get() * 8;
		let chunk_size = tokens.len().div_ceil(chunks).max(1);

		let (tx, rx) = mpsc::channel();
		thread::scope(|scope| {
			for start in (0..tokens.len()).step_by(chunk_size) {
				let tx = tx.clone();
				let owned = chunk_size.min(tokens.len() - start);
				let end = (start + owned + max_order - 1).min(tokens.len());
				let slice = &tokens[start..end];

				scope.spawn(move || {
					let mut partial = Self::empty(max_order);
					partial.add_windows(slice, owned);
					tx.send(partial).expect("receiver outlives the worker scope");
				});
			}
		});
		drop(tx);

		for partial in rx.iter() {
			final_counts.merge(&partial)?;
		}
		Ok(final_counts)
	}

	fn empty(max_order: usize) -> Self {
		let orders = (1..=max_order).map(|n| (n, OrderCounts::empty_for(n))).collect();
		Self { max_order, orders }
	}

	/// Adds every n-gram window of `tokens`, for each order.
	///
	/// A sequence shorter than `n` contributes nothing to order `n`.
	pub fn add_tokens<S: AsRef<str>>(&mut self, tokens: &[S]) {
		self.add_windows(tokens, tokens.len());
	}

	/// Counts the windows of `tokens` starting at positions `< starts`.
	fn add_windows<S: AsRef<str>>(&mut self, tokens: &[S], starts: usize) {
		for (n, counts) in self.orders.iter_mut() {
			let n = *n;
			if tokens.len() < n {
				continue;
			}
			for window in tokens.windows(n).take(starts) {
				counts.record(window);
			}
		}
	}

	/// Merges another set of counts into this one.
	///
	/// # Errors
	/// Returns `InvalidConfig` if the maximum orders differ.
	pub fn merge(&mut self, other: &Self) -> Result<()> {
		if self.max_order != other.max_order {
			return Err(ModelError::InvalidConfig(format!(
				"max_order mismatch: {} vs {}",
				self.max_order, other.max_order
			)));
		}
		for (n, counts) in &other.orders {
			match self.orders.get_mut(n) {
				Some(existing) => existing.merge(counts)?,
				None => {
					self.orders.insert(*n, counts.clone());
				}
			}
		}
		Ok(())
	}

	/// Applies [`OrderCounts::thresholded`] to every order.
	pub fn thresholded(&self, threshold: u64) -> Self {
		Self {
			max_order: self.max_order,
			orders: self.orders.iter().map(|(n, c)| (*n, c.thresholded(threshold))).collect(),
		}
	}

	pub fn max_order(&self) -> usize {
		self.max_order
	}

	/// Counts of a single order, if present.
	pub fn order(&self, n: usize) -> Option<&OrderCounts> {
		self.orders.get(&n)
	}

	/// Iterates over `(order, counts)` in ascending order.
	pub fn orders(&self) -> impl Iterator<Item = (usize, &OrderCounts)> {
		self.orders.iter().map(|(n, c)| (*n, c))
	}

	/// Raw count of a single word.
	pub fn unigram_count(&self, word: &str) -> u64 {
		match self.orders.get(&1) {
			Some(OrderCounts::Unigram(words)) => words.get(word).copied().unwrap_or(0),
			_ => 0,
		}
	}

	/// Raw count of `word` following `context` (order = context length + 1).
	pub fn count<S: AsRef<str>>(&self, context: &[S], word: &str) -> u64 {
		if context.is_empty() {
			return self.unigram_count(word);
		}
		match self.orders.get(&(context.len() + 1)) {
			Some(OrderCounts::Contextual(contexts)) => contexts
				.get(&context_key(context))
				.and_then(|words| words.get(word))
				.copied()
				.unwrap_or(0),
			_ => 0,
		}
	}

	/// Number of tokens counted (sum of order-1 counts).
	pub fn total_tokens(&self) -> u64 {
		match self.orders.get(&1) {
			Some(OrderCounts::Unigram(words)) => words.values().sum(),
			_ => 0,
		}
	}

	/// Loads raw counts from their JSON file.
	///
	/// # Errors
	/// - `NotFound` if the file does not exist
	/// - `MalformedInput` for a wrong shape, a negative or non-integer count,
	///   a non-numeric order or an empty context above order 1
	pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
		let counts: Self = io::read_json(path.as_ref())?;
		log::info!(
			"loaded raw counts up to order {} from {}",
			counts.max_order,
			path.as_ref().display()
		);
		Ok(counts)
	}

	/// Writes raw counts as JSON (orders, contexts and words sorted).
	pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
		io::write_json(path.as_ref(), self)?;
		log::info!("saved raw counts to {}", path.as_ref().display());
		Ok(())
	}
}

fn sorted<V>(map: &HashMap<String, V>) -> BTreeMap<&str, &V> {
	map.iter().map(|(k, v)| (k.as_str(), v)).collect()
}

impl Serialize for OrderCounts {
	fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
		match self {
			OrderCounts::Unigram(words) => sorted(words).serialize(serializer),
			OrderCounts::Contextual(contexts) => contexts
				.iter()
				.map(|(context, words)| (context.as_str(), sorted(words)))
				.collect::<BTreeMap<_, _>>()
				.serialize(serializer),
		}
	}
}

impl Serialize for NGramCounts {
	fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
		let mut map = serializer.serialize_map(Some(self.orders.len()))?;
		for (n, counts) in &self.orders {
			map.serialize_entry(&n.to_string(), counts)?;
		}
		map.end()
	}
}

impl<'de> Deserialize<'de> for NGramCounts {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
		deserializer.deserialize_map(CountsVisitor)
	}
}

struct CountsVisitor;

impl<'de> Visitor<'de> for CountsVisitor {
	type Value = NGramCounts;

	fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
		f.write_str("a map from n-gram order to raw counts")
	}

	fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<Self::Value, A::Error> {
		let mut orders = BTreeMap::new();

		while let Some(key) = map.next_key::<String>()? {
			let n = parse_order(&key).map_err(de::Error::custom)?;
			// The expected shape is decided by the order number, so a mixed
			// layout surfaces as a type error here.
			let counts = if n == 1 {
				OrderCounts::Unigram(map.next_value::<UniqueKeys<u64>>()?.0)
			} else {
				let contexts: UniqueKeys<UniqueKeys<u64>> = map.next_value()?;
				if contexts.0.contains_key("") {
					return Err(de::Error::custom(format!("order {n}: empty context")));
				}
				let contexts = contexts.0.into_iter().map(|(context, words)| (context, words.0));
				OrderCounts::Contextual(contexts.collect())
			};
			if orders.insert(n, counts).is_some() {
				return Err(de::Error::custom(format!("duplicate order {n}")));
			}
		}

		NGramCounts::from_orders(orders).map_err(de_error)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::model::tokenizer::tokenize;

	#[test]
	fn test_counts_every_order() {
		let tokens = tokenize("ez im xwendekar ez im mamoste");
		let counts = NGramCounts::from_tokens(&tokens, 3).unwrap();

		assert_eq!(counts.unigram_count("ez"), 2);
		assert_eq!(counts.unigram_count("mamoste"), 1);
		assert_eq!(counts.count(&["ez"], "im"), 2);
		assert_eq!(counts.count(&["ez", "im"], "xwendekar"), 1);
		assert_eq!(counts.count(&["ez", "im"], "mamoste"), 1);
		assert_eq!(counts.count(&["xwendekar", "ez"], "im"), 1);
		assert_eq!(counts.total_tokens(), 6);
	}

	#[test]
	fn test_short_sequence_skips_high_orders() {
		let counts = NGramCounts::from_tokens(&["ez", "im"], 5).unwrap();
		assert_eq!(counts.count(&["ez"], "im"), 1);
		for n in 3..=5 {
			assert!(counts.order(n).unwrap().is_empty());
		}
	}

	#[test]
	fn test_zero_order_rejected() {
		assert!(matches!(NGramCounts::new(0), Err(ModelError::InvalidConfig(_))));
	}

	#[test]
	fn test_parallel_matches_sequential() {
		let vocabulary = ["ez", "tu", "em", "im", "in", "xwendekar", "mamoste", "malê", "çû"];
		let tokens: Vec<String> = (0..5000usize)
			.map(|i| vocabulary[(i * 7 + i / 3) % vocabulary.len()].to_owned())
			.collect();

		let sequential = NGramCounts::from_tokens(&tokens, 5).unwrap();
		let parallel = NGramCounts::from_tokens_parallel(&tokens, 5).unwrap();
		assert_eq!(sequential, parallel);
	}

	#[test]
	fn test_parallel_tiny_input() {
		let tokens = ["ez", "im"];
		let parallel = NGramCounts::from_tokens_parallel(&tokens, 5).unwrap();
		assert_eq!(parallel, NGramCounts::from_tokens(&tokens, 5).unwrap());

		let empty: [&str; 0] = [];
		assert_eq!(NGramCounts::from_tokens_parallel(&empty, 5).unwrap().total_tokens(), 0);
	}

	#[test]
	fn test_merge_sums_counts() {
		let mut a = NGramCounts::from_tokens(&["ez", "im"], 2).unwrap();
		let b = NGramCounts::from_tokens(&["ez", "im", "ez"], 2).unwrap();
		a.merge(&b).unwrap();
		assert_eq!(a.count(&["ez"], "im"), 2);
		assert_eq!(a.count(&["im"], "ez"), 1);
		assert_eq!(a.unigram_count("ez"), 3);
	}

	#[test]
	fn test_merge_order_mismatch() {
		let mut a = NGramCounts::new(2).unwrap();
		let b = NGramCounts::new(3).unwrap();
		assert!(matches!(a.merge(&b), Err(ModelError::InvalidConfig(_))));
	}

	#[test]
	fn test_thresholded_is_idempotent() {
		let tokens = tokenize("a b a b a c a b d d d");
		let counts = NGramCounts::from_tokens(&tokens, 3).unwrap();
		let once = counts.thresholded(2);
		assert_eq!(once.thresholded(2), once);
		assert_eq!(once.unigram_count("c"), 0);
		assert_eq!(once.count(&["a"], "b"), 3);
		assert_eq!(once.count(&["a"], "c"), 0);
	}

	#[test]
	fn test_thresholded_drops_empty_contexts() {
		let counts = NGramCounts::from_tokens(&["x", "y"], 2).unwrap();
		let filtered = counts.thresholded(2);
		assert!(filtered.order(2).unwrap().is_empty());
	}

	#[test]
	fn test_parse_raw_json() {
		let json = r#"{"1": {"ez": 2, "im": 2}, "2": {"ez": {"im": 2}}}"#;
		let counts: NGramCounts = serde_json::from_str(json).unwrap();
		assert_eq!(counts.max_order(), 2);
		assert_eq!(counts.count(&["ez"], "im"), 2);
	}

	#[test]
	fn test_parse_fills_missing_orders() {
		let json = r#"{"3": {"ez im": {"xwendekar": 5}}}"#;
		let counts: NGramCounts = serde_json::from_str(json).unwrap();
		assert_eq!(counts.max_order(), 3);
		assert!(counts.order(1).unwrap().is_empty());
		assert!(counts.order(2).unwrap().is_empty());
	}

	#[test]
	fn test_parse_rejects_malformed() {
		let cases = [
			r#"{"1": {"ez": -1}}"#,
			r#"{"1": {"ez": 1.5}}"#,
			r#"{"1": {"ez": {"im": 1}}}"#,
			r#"{"2": {"ez": 3}}"#,
			r#"{"2": {"": {"xwendekar": 5}}}"#,
			r#"{"1": {"ez": 1, "ez": 2}}"#,
			r#"{"2": {"ez": {"im": 1}, "ez": {"tu": 1}}}"#,
			r#"{"2": {"ez": {"im": 1, "im": 4}}}"#,
			r#"{"two": {"ez": {"im": 1}}}"#,
			r#"{"0": {}}"#,
			r#"{}"#,
			r#"[1, 2]"#,
		];
		for case in cases {
			let result: std::result::Result<NGramCounts, _> = serde_json::from_str(case);
			assert!(result.is_err(), "accepted {case}");
		}
	}

	#[test]
	fn test_save_and_load() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("counts.json");
		let counts = NGramCounts::from_tokens(&tokenize("ser navê min ser navê te"), 3).unwrap();

		counts.save(&path).unwrap();
		assert_eq!(NGramCounts::load(&path).unwrap(), counts);
	}

	#[test]
	fn test_load_errors() {
		let dir = tempfile::tempdir().unwrap();
		let missing = dir.path().join("missing.json");
		assert!(matches!(NGramCounts::load(&missing), Err(ModelError::NotFound(_))));

		let bad = dir.path().join("bad.json");
		std::fs::write(&bad, r#"{"1": {"ez": -4}}"#).unwrap();
		assert!(matches!(NGramCounts::load(&bad), Err(ModelError::MalformedInput(_))));
	}
}
