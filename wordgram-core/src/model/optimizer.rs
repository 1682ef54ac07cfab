use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::mpsc;
use std::thread;

use super::counts::{NGramCounts, OrderCounts, surviving};
use super::table::{Candidate, Candidates, OrderTable, ProbabilityTable};
use crate::error::{ModelError, Result};

/// Turns raw counts into a probability table.
///
/// For every order, candidates whose count is below `threshold` are removed,
/// contexts left empty are dropped, and the remaining counts are divided by
/// the sum of the *surviving* counts of their context. Candidates are sorted
/// by descending probability, equal probabilities by word.
///
/// Orders are independent and processed on separate threads; the result does
/// not depend on scheduling. A threshold of 0 keeps every non-zero count.
///
/// # Errors
/// Returns `MalformedInput` if order 1 holds context counts, a higher order
/// holds direct word counts, or the counts of one context overflow when
/// summed.
pub fn optimize(counts: &NGramCounts, threshold: u64) -> Result<ProbabilityTable> {
	let (tx, rx) = mpsc::channel();
	thread::scope(|scope| {
		for (n, order_counts) in counts.orders() {
			let tx = tx.clone();
			scope.spawn(move || {
				let result = optimize_order(n, order_counts, threshold);
				tx.send((n, result)).expect("receiver outlives the worker scope");
			});
		}
	});
	drop(tx);

	let mut orders = BTreeMap::new();
	for (n, result) in rx.iter() {
		let table = result?;
		orders.insert(n, table);
	}

	for (n, table) in &orders {
		log::info!(
			"order {n}: kept {} context(s), {} candidate(s) (threshold {threshold})",
			table.contexts(),
			table.candidates()
		);
	}

	Ok(ProbabilityTable::from_orders(orders))
}

fn optimize_order(n: usize, counts: &OrderCounts, threshold: u64) -> Result<OrderTable> {
	match (n, counts) {
		(1, OrderCounts::Unigram(words)) => {
			Ok(OrderTable::Unigram(normalize(words, threshold, &"order 1")?.unwrap_or_default()))
		}
		(n, OrderCounts::Contextual(contexts)) if n > 1 => {
			let mut kept = HashMap::with_capacity(contexts.len());
			for (context, words) in contexts {
				let location = format!("order {n}, context {context:?}");
				if let Some(candidates) = normalize(words, threshold, &location)? {
					kept.insert(context.clone(), candidates);
				}
			}
			Ok(OrderTable::Contextual(kept))
		}
		(1, _) => Err(ModelError::malformed(
			"order 1 must map words to counts, found a context map",
		)),
		(n, _) => Err(ModelError::malformed(format!(
			"order {n} must map contexts to candidate counts, found direct word counts"
		))),
	}
}

/// Normalizes one context; `None` when no candidate survives.
///
/// # Errors
/// Returns `MalformedInput` if the surviving counts do not fit in a `u64`.
fn normalize(
	words: &HashMap<String, u64>,
	threshold: u64,
	location: &dyn fmt::Display,
) -> Result<Option<Candidates>> {
	let mut kept: Vec<(String, u64)> = surviving(words, threshold).collect();
	if kept.is_empty() {
		return Ok(None);
	}

	let total = kept
		.iter()
		.try_fold(0u64, |total, (_, count)| total.checked_add(*count))
		.ok_or_else(|| ModelError::malformed(format!("{location}: total count overflows u64")))?;

	// Same denominator for the whole context: ordering by count is ordering by
	// probability, without float ties.
	kept.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

	let candidates = kept
		.into_iter()
		.map(|(word, count)| Candidate {
			word,
			probability: count as f64 / total as f64,
		})
		.collect();
	Ok(Some(Candidates::from_vec(candidates)))
}
