//! Offline batch jobs and model loading.
//!
//! `train` and `optimize_file` run once, to completion, before any serving
//! begins. Each is fully re-runnable; any failure aborts the whole run.

use crate::config::Config;
use crate::error::Result;
use crate::io;
use crate::model::counts::NGramCounts;
use crate::model::optimizer::optimize;
use crate::model::predictor::Predictor;
use crate::model::table::ProbabilityTable;
use crate::model::tokenizer::tokenize;

/// Counts n-grams of the configured corpus and writes the raw count file.
///
/// # Errors
/// `NotFound` if the corpus does not exist.
pub fn train(config: &Config) -> Result<NGramCounts> {
	config.validate()?;
	let corpus = &config.paths.corpus;

	log::info!("reading corpus from {}", corpus.display());
	let text = io::read_file(corpus)?;
	let tokens = tokenize(&text);

	log::info!(
		"counting n-grams up to order {} over {} token(s)",
		config.model.max_order,
		tokens.len()
	);
	let counts = NGramCounts::from_tokens_parallel(&tokens, config.model.max_order)?;

	counts.save(&config.paths.raw_model)?;
	Ok(counts)
}

/// Loads the raw count file, optimizes it and writes the probability table
/// (JSON plus binary cache).
///
/// # Errors
/// `NotFound` if the raw count file does not exist, `MalformedInput` if it
/// cannot be parsed.
pub fn optimize_file(config: &Config) -> Result<ProbabilityTable> {
	config.validate()?;
	let counts = NGramCounts::load(&config.paths.raw_model)?;

	log::info!("optimizing with threshold {}", config.model.threshold);
	let table = optimize(&counts, config.model.threshold)?;

	table.save(&config.paths.optimized_model)?;
	Ok(table)
}

/// Runs `train` then optimizes the fresh counts without reloading them.
pub fn build(config: &Config) -> Result<ProbabilityTable> {
	let counts = train(config)?;
	let table = optimize(&counts, config.model.threshold)?;
	table.save(&config.paths.optimized_model)?;
	Ok(table)
}

/// Loads the optimized table once and wraps it for serving.
pub fn load_predictor(config: &Config) -> Result<Predictor> {
	let table = ProbabilityTable::load(&config.paths.optimized_model)?;
	for stats in table.stats() {
		log::info!(
			"order {}: {} context(s), {} candidate(s)",
			stats.order,
			stats.contexts,
			stats.candidates
		);
	}
	Ok(Predictor::new(table))
}
