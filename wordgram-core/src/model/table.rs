use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::Path;

use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::{UniqueKeys, de_error, parse_order};
use crate::error::{ModelError, Result};
use crate::io::{self, FileStamp};

/// Allowed drift of a context's probability sum away from 1.0 on load.
const SUM_TOLERANCE: f64 = 1e-6;

/// A suggested next word with its conditional probability.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct Candidate {
	pub word: String,
	pub probability: f64,
}

/// Candidates of one context, most probable first.
///
/// Serialized as an ordered map `word → probability`; deserialization keeps
/// the document order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Candidates(Vec<Candidate>);

impl Candidates {
	pub(crate) fn from_vec(candidates: Vec<Candidate>) -> Self {
		Self(candidates)
	}

	pub fn as_slice(&self) -> &[Candidate] {
		&self.0
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// Checks probability range, ordering, uniqueness and normalization.
	fn validate(&self, location: &dyn fmt::Display) -> Result<()> {
		let mut seen = HashSet::new();
		let mut previous = f64::INFINITY;
		let mut sum = 0.0;

		for candidate in &self.0 {
			let p = candidate.probability;
			if !p.is_finite() || p <= 0.0 || p > 1.0 {
				return Err(ModelError::malformed(format!(
					"{location}: probability of {:?} out of (0, 1]: {p}",
					candidate.word
				)));
			}
			if p > previous {
				return Err(ModelError::malformed(format!(
					"{location}: candidates not sorted by descending probability at {:?}",
					candidate.word
				)));
			}
			if !seen.insert(candidate.word.as_str()) {
				return Err(ModelError::malformed(format!(
					"{location}: duplicate candidate {:?}",
					candidate.word
				)));
			}
			previous = p;
			sum += p;
		}

		if !self.0.is_empty() && (sum - 1.0).abs() > SUM_TOLERANCE {
			return Err(ModelError::malformed(format!("{location}: probabilities sum to {sum}")));
		}
		Ok(())
	}
}

/// Probabilities of a single order.
#[derive(Clone, Debug, PartialEq)]
pub enum OrderTable {
	/// Order 1: unconditional word probabilities.
	Unigram(Candidates),
	/// Order n > 1: context → candidates.
	Contextual(HashMap<String, Candidates>),
}

impl OrderTable {
	/// Number of contexts (1 for a non-empty unigram order).
	pub fn contexts(&self) -> usize {
		match self {
			OrderTable::Unigram(candidates) => usize::from(!candidates.is_empty()),
			OrderTable::Contextual(contexts) => contexts.len(),
		}
	}

	/// Total number of stored (context, word) pairs.
	pub fn candidates(&self) -> usize {
		match self {
			OrderTable::Unigram(candidates) => candidates.len(),
			OrderTable::Contextual(contexts) => contexts.values().map(Candidates::len).sum(),
		}
	}
}

/// Summary of one order, used for logging and reporting.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct OrderStats {
	pub order: usize,
	pub contexts: usize,
	pub candidates: usize,
}

/// Immutable probability table served by the predictor.
///
/// # Invariants
/// - probabilities lie in (0, 1] and sum to 1.0 per context
/// - candidates are sorted by descending probability
/// - no context is stored without candidates
/// - order 1 is `Unigram`, higher orders are `Contextual` with non-empty keys
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProbabilityTable {
	orders: BTreeMap<usize, OrderTable>,
}

impl ProbabilityTable {
	pub(crate) fn from_orders(orders: BTreeMap<usize, OrderTable>) -> Self {
		Self { orders }
	}

	/// Highest order present, 0 for an empty table.
	pub fn max_order(&self) -> usize {
		self.orders.keys().next_back().copied().unwrap_or(0)
	}

	/// Iterates over `(order, table)` in ascending order.
	pub fn orders(&self) -> impl Iterator<Item = (usize, &OrderTable)> {
		self.orders.iter().map(|(n, t)| (*n, t))
	}

	/// Candidates stored for `context` under `order`.
	///
	/// Order 1 is addressed with the empty context. Returns `None` when the
	/// pair is absent.
	pub fn lookup(&self, order: usize, context: &str) -> Option<&[Candidate]> {
		let candidates = match self.orders.get(&order)? {
			OrderTable::Unigram(candidates) if context.is_empty() => candidates,
			OrderTable::Unigram(_) => return None,
			OrderTable::Contextual(contexts) => contexts.get(context)?,
		};
		(!candidates.is_empty()).then(|| candidates.as_slice())
	}

	/// Unconditional word probabilities (empty if order 1 is absent).
	pub fn unigrams(&self) -> &[Candidate] {
		match self.orders.get(&1) {
			Some(OrderTable::Unigram(candidates)) => candidates.as_slice(),
			_ => &[],
		}
	}

	pub fn stats(&self) -> Vec<OrderStats> {
		self.orders
			.iter()
			.map(|(n, table)| OrderStats {
				order: *n,
				contexts: table.contexts(),
				candidates: table.candidates(),
			})
			.collect()
	}

	/// Checks every table invariant.
	///
	/// # Errors
	/// Returns `MalformedInput` describing the first violation.
	pub fn validate(&self) -> Result<()> {
		for (n, table) in &self.orders {
			match (*n, table) {
				(0, _) => return Err(ModelError::malformed("order 0 is not a valid n-gram order")),
				(1, OrderTable::Unigram(candidates)) => candidates.validate(&"order 1")?,
				(n, OrderTable::Contextual(contexts)) if n > 1 => {
					for (context, candidates) in contexts {
						let location = format!("order {n}, context {context:?}");
						if context.is_empty() {
							return Err(ModelError::malformed(format!("order {n}: empty context")));
						}
						if candidates.is_empty() {
							return Err(ModelError::malformed(format!("{location}: no candidates")));
						}
						candidates.validate(&location)?;
					}
				}
				(1, _) => return Err(ModelError::malformed("order 1 must map words to probabilities")),
				(n, _) => {
					return Err(ModelError::malformed(format!(
						"order {n} must map contexts to candidates"
					)));
				}
			}
		}
		Ok(())
	}

	/// Loads the table, preferring a binary cache built from the same file.
	///
	/// The cache lives next to the JSON file with a `.bin` extension and
	/// records the size and modification time of the JSON file it was built
	/// from. When it is missing, unreadable or built from another version of
	/// the JSON file, the JSON file is loaded and the cache rewritten; a
	/// failure to write it is only logged.
	pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
		let path = path.as_ref();
		let binary_path = io::build_output_path(path, "bin")?;
		let source = io::stamp(path);

		if let Some(source) = source {
			match Self::load_cache(&binary_path, source) {
				Ok(Some(table)) => return Ok(table),
				Ok(None) => log::info!(
					"binary cache {} does not match {}, reloading",
					binary_path.display(),
					path.display()
				),
				Err(ModelError::NotFound(_)) => {}
				Err(e) => log::warn!("ignoring binary cache {}: {e}", binary_path.display()),
			}
		}

		let table = Self::load_json(path)?;
		if let Some(source) = source {
			if let Err(e) = table.write_cache(&binary_path, source) {
				log::warn!("failed to write binary cache {}: {e}", binary_path.display());
			}
		}
		Ok(table)
	}

	/// Validates the table, then writes the JSON file and its binary cache.
	///
	/// # Errors
	/// Returns `MalformedInput` without touching the files if an invariant is
	/// broken.
	pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
		self.validate()?;
		let path = path.as_ref();
		self.save_json(path)?;

		let binary_path = io::build_output_path(path, "bin")?;
		match io::stamp(path) {
			Some(source) => self.write_cache(&binary_path, source),
			None => {
				log::warn!("cannot stamp {}, binary cache not written", path.display());
				Ok(())
			}
		}
	}

	/// Reads the cache, `None` if it was built from a different source file.
	fn load_cache(path: &Path, source: FileStamp) -> Result<Option<Self>> {
		let bytes = io::read_bytes(path)?;
		let (built_from, table): (FileStamp, Self) = postcard::from_bytes(&bytes)?;
		if built_from != source {
			return Ok(None);
		}
		log::info!("loaded probability table from cache {}", path.display());
		Ok(Some(table))
	}

	fn write_cache(&self, path: &Path, source: FileStamp) -> Result<()> {
		let bytes = postcard::to_stdvec(&(source, self))?;
		io::write_bytes(path, &bytes)
	}

	/// Loads and validates a JSON table.
	///
	/// # Errors
	/// - `NotFound` if the file does not exist
	/// - `MalformedInput` for a wrong shape, a non-numeric probability or any
	///   broken invariant
	pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
		let table: Self = io::read_json(path.as_ref())?;
		log::info!("loaded probability table from {}", path.as_ref().display());
		Ok(table)
	}

	pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
		io::write_json(path.as_ref(), self)?;
		log::info!("saved probability table to {}", path.as_ref().display());
		Ok(())
	}

	/// Loads and validates a postcard-encoded table.
	pub fn load_binary<P: AsRef<Path>>(path: P) -> Result<Self> {
		let bytes = io::read_bytes(path.as_ref())?;
		let table = postcard::from_bytes(&bytes)?;
		log::info!("loaded probability table from {}", path.as_ref().display());
		Ok(table)
	}

	pub fn save_binary<P: AsRef<Path>>(&self, path: P) -> Result<()> {
		let bytes = postcard::to_stdvec(self)?;
		io::write_bytes(path.as_ref(), &bytes)
	}
}

impl Serialize for Candidates {
	fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
		let mut map = serializer.serialize_map(Some(self.0.len()))?;
		for candidate in &self.0 {
			map.serialize_entry(&candidate.word, &candidate.probability)?;
		}
		map.end()
	}
}

impl<'de> Deserialize<'de> for Candidates {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
		deserializer.deserialize_map(CandidatesVisitor)
	}
}

struct CandidatesVisitor;

impl<'de> Visitor<'de> for CandidatesVisitor {
	type Value = Candidates;

	fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
		f.write_str("a map from word to probability")
	}

	fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<Self::Value, A::Error> {
		let mut candidates = Vec::with_capacity(map.size_hint().unwrap_or(0));
		while let Some((word, probability)) = map.next_entry::<String, f64>()? {
			candidates.push(Candidate { word, probability });
		}
		Ok(Candidates(candidates))
	}
}

impl Serialize for ProbabilityTable {
	fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
		let mut map = serializer.serialize_map(Some(self.orders.len()))?;
		for (n, table) in &self.orders {
			let key = n.to_string();
			match table {
				OrderTable::Unigram(candidates) => map.serialize_entry(&key, candidates)?,
				OrderTable::Contextual(contexts) => {
					let sorted: BTreeMap<&str, &Candidates> =
						contexts.iter().map(|(c, v)| (c.as_str(), v)).collect();
					map.serialize_entry(&key, &sorted)?
				}
			}
		}
		map.end()
	}
}

impl<'de> Deserialize<'de> for ProbabilityTable {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
		deserializer.deserialize_map(TableVisitor)
	}
}

struct TableVisitor;

impl<'de> Visitor<'de> for TableVisitor {
	type Value = ProbabilityTable;

	fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
		f.write_str("a map from n-gram order to probabilities")
	}

	fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<Self::Value, A::Error> {
		let mut orders = BTreeMap::new();

		while let Some(key) = map.next_key::<String>()? {
			let n = parse_order(&key).map_err(de::Error::custom)?;
			let table = if n == 1 {
				OrderTable::Unigram(map.next_value()?)
			} else {
				OrderTable::Contextual(map.next_value::<UniqueKeys<Candidates>>()?.0)
			};
			if orders.insert(n, table).is_some() {
				return Err(de::Error::custom(format!("duplicate order {n}")));
			}
		}

		let table = ProbabilityTable { orders };
		table.validate().map_err(de_error)?;
		Ok(table)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn candidates(pairs: &[(&str, f64)]) -> Candidates {
		Candidates::from_vec(
			pairs
				.iter()
				.map(|(word, probability)| Candidate { word: (*word).to_owned(), probability: *probability })
				.collect(),
		)
	}

	fn sample_table() -> ProbabilityTable {
		let mut orders = BTreeMap::new();
		orders.insert(1, OrderTable::Unigram(candidates(&[("ez", 0.5), ("im", 0.25), ("xwendekar", 0.25)])));
		orders.insert(
			2,
			OrderTable::Contextual(HashMap::from([("ez".to_owned(), candidates(&[("im", 1.0)]))])),
		);
		orders.insert(
			3,
			OrderTable::Contextual(HashMap::from([(
				"ez im".to_owned(),
				candidates(&[("xwendekar", 0.6), ("mamoste", 0.2), ("kurd", 0.2)]),
			)])),
		);
		ProbabilityTable::from_orders(orders)
	}

	#[test]
	fn test_lookup() {
		let table = sample_table();
		assert_eq!(table.max_order(), 3);
		assert_eq!(table.lookup(3, "ez im").unwrap()[0].word, "xwendekar");
		assert!(table.lookup(3, "im").is_none());
		assert!(table.lookup(4, "a b c").is_none());
		assert_eq!(table.lookup(1, "").unwrap().len(), 3);
		assert!(table.lookup(1, "ez").is_none());
		assert_eq!(table.unigrams()[0].word, "ez");
	}

	#[test]
	fn test_stats() {
		let stats = sample_table().stats();
		assert_eq!(stats[0], OrderStats { order: 1, contexts: 1, candidates: 3 });
		assert_eq!(stats[2], OrderStats { order: 3, contexts: 1, candidates: 3 });
	}

	#[test]
	fn test_json_keeps_candidate_order() {
		let json = serde_json::to_string(&sample_table()).unwrap();
		assert!(json.contains(r#""ez im":{"xwendekar":0.6,"mamoste":0.2,"kurd":0.2}"#));

		let back: ProbabilityTable = serde_json::from_str(&json).unwrap();
		let words: Vec<&str> = back.lookup(3, "ez im").unwrap().iter().map(|c| c.word.as_str()).collect();
		assert_eq!(words, vec!["xwendekar", "mamoste", "kurd"]);
	}

	#[test]
	fn test_binary_round_trip() {
		let table = sample_table();
		let bytes = postcard::to_stdvec(&table).unwrap();
		let back: ProbabilityTable = postcard::from_bytes(&bytes).unwrap();
		assert_eq!(back, table);
	}

	#[test]
	fn test_rejects_malformed_tables() {
		let cases = [
			// non-numeric probability
			r#"{"2": {"ez": {"im": "high"}}}"#,
			// probability out of range
			r#"{"2": {"ez": {"im": 1.5}}}"#,
			r#"{"2": {"ez": {"im": 0.0, "tu": 1.0}}}"#,
			// not normalized
			r#"{"2": {"ez": {"im": 0.5}}}"#,
			// not sorted
			r#"{"2": {"ez": {"im": 0.25, "tu": 0.75}}}"#,
			// empty context
			r#"{"2": {"ez": {}}}"#,
			// empty context above order 1
			r#"{"2": {"": {"im": 1.0}}}"#,
			// order 1 with nested contexts
			r#"{"1": {"ez": {"im": 1.0}}}"#,
			// order > 1 with direct probabilities
			r#"{"2": {"ez": 1.0}}"#,
			r#"{"x": {}}"#,
		];
		for case in cases {
			let result: std::result::Result<ProbabilityTable, _> = serde_json::from_str(case);
			assert!(result.is_err(), "accepted {case}");
		}
	}

	#[test]
	fn test_accepts_empty_orders() {
		let table: ProbabilityTable = serde_json::from_str(r#"{"1": {}, "2": {}, "5": {}}"#).unwrap();
		assert_eq!(table.max_order(), 5);
		assert!(table.lookup(5, "a b c d").is_none());
	}

	#[test]
	fn test_save_and_load_with_cache() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("model.json");
		let table = sample_table();

		table.save(&path).unwrap();
		assert!(dir.path().join("model.bin").exists());
		assert_eq!(ProbabilityTable::load(&path).unwrap(), table);
		assert_eq!(ProbabilityTable::load_json(&path).unwrap(), table);
	}

	#[test]
	fn test_load_rebuilds_missing_cache() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("model.json");
		sample_table().save_json(&path).unwrap();

		let table = ProbabilityTable::load(&path).unwrap();
		assert_eq!(table, sample_table());
		assert!(dir.path().join("model.bin").exists());
	}

	#[test]
	fn test_load_errors() {
		let dir = tempfile::tempdir().unwrap();
		let missing = dir.path().join("missing.json");
		assert!(matches!(ProbabilityTable::load(&missing), Err(ModelError::NotFound(_))));

		let bad = dir.path().join("bad.json");
		std::fs::write(&bad, r#"{"2": {"ez": {"im": "often"}}}"#).unwrap();
		assert!(matches!(ProbabilityTable::load(&bad), Err(ModelError::MalformedInput(_))));
	}

	#[test]
	fn test_rejects_duplicate_contexts() {
		let json = r#"{"2": {"ez": {"im": 1.0}, "ez": {"tu": 1.0}}}"#;
		let result: std::result::Result<ProbabilityTable, _> = serde_json::from_str(json);
		let err = ModelError::from(result.unwrap_err());
		assert!(matches!(err, ModelError::MalformedInput(message) if message.contains("duplicate")));
	}

	#[test]
	fn test_save_rejects_invalid_table() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("model.json");
		let mut orders = BTreeMap::new();
		orders.insert(
			2,
			OrderTable::Contextual(HashMap::from([("ez".to_owned(), candidates(&[("im", 4.5), ("tu", 1.25)]))])),
		);
		let table = ProbabilityTable::from_orders(orders);

		assert!(matches!(table.save(&path), Err(ModelError::MalformedInput(_))));
		assert!(!path.exists());
		assert!(!dir.path().join("model.bin").exists());
	}

	#[test]
	fn test_replaced_json_invalidates_cache() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("model.json");
		sample_table().save(&path).unwrap();

		// a replacement carrying an older timestamp, as `cp -p` leaves it
		let replacement: ProbabilityTable = serde_json::from_str(r#"{"2": {"tu": {"yî": 1.0}}}"#).unwrap();
		replacement.save_json(&path).unwrap();
		let old = std::time::UNIX_EPOCH + std::time::Duration::from_secs(1_000_000);
		std::fs::File::options().write(true).open(&path).unwrap().set_modified(old).unwrap();

		assert_eq!(ProbabilityTable::load(&path).unwrap(), replacement);
		// the rewritten cache now serves the replacement
		assert_eq!(ProbabilityTable::load(&path).unwrap(), replacement);
	}
}
