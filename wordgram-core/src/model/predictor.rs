use std::sync::Arc;

use serde::Serialize;

use super::table::{Candidate, ProbabilityTable};
use super::tokenizer::{context_key, tokenize};

/// A successful context match.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct Match<'a> {
	/// Order of the table the candidates came from.
	pub order: usize,
	/// Context key that matched (`order - 1` tokens).
	pub context: String,
	/// Candidates in stored order, most probable first.
	pub candidates: &'a [Candidate],
}

/// Next-word predictor using longest-context-first backoff.
///
/// Holds the probability table behind an `Arc`: cloning a predictor shares
/// the table, and any number of threads may query it concurrently without
/// locking since nothing mutates it after construction.
#[derive(Clone, Debug)]
pub struct Predictor {
	table: Arc<ProbabilityTable>,
}

impl Predictor {
	pub fn new(table: ProbabilityTable) -> Self {
		Self::from_shared(Arc::new(table))
	}

	pub fn from_shared(table: Arc<ProbabilityTable>) -> Self {
		Self { table }
	}

	pub fn table(&self) -> &ProbabilityTable {
		&self.table
	}

	/// Finds the longest context of `history` with stored candidates.
	///
	/// Orders are scanned from the highest present in the table down to 2.
	/// Order `n` uses the last `n-1` tokens of `history`; the first order
	/// with candidates wins and no lower order is consulted. Unigrams are
	/// never used as a fallback.
	///
	/// `history` must already be normalized the way the training corpus was
	/// (see [`tokenize`]).
	pub fn lookup<S: AsRef<str>>(&self, history: &[S]) -> Option<Match<'_>> {
		for n in (2..=self.table.max_order()).rev() {
			let required = n - 1;
			if history.len() < required {
				continue;
			}

			let context = context_key(&history[history.len() - required..]);
			if let Some(candidates) = self.table.lookup(n, &context) {
				log::trace!("matched {n}-gram context {context:?}");
				return Some(Match { order: n, context, candidates });
			}
		}
		None
	}

	/// Ranked next-word candidates for `history`.
	///
	/// Returns an empty slice for an empty history or when no context
	/// matches at any order.
	pub fn predict<S: AsRef<str>>(&self, history: &[S]) -> &[Candidate] {
		self.lookup(history).map(|m| m.candidates).unwrap_or(&[])
	}

	/// At most `k` leading candidates for `history`.
	pub fn top<S: AsRef<str>>(&self, history: &[S], k: usize) -> &[Candidate] {
		let candidates = self.predict(history);
		&candidates[..k.min(candidates.len())]
	}

	/// Tokenizes raw typed text, then looks it up.
	pub fn lookup_text(&self, text: &str) -> Option<Match<'_>> {
		self.lookup(&tokenize(text))
	}

	/// Tokenizes raw typed text, then predicts.
	pub fn predict_text(&self, text: &str) -> &[Candidate] {
		self.predict(&tokenize(text))
	}
}
