use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use wordgram_core::pipeline;
use wordgram_core::{Config, Predictor};

/// Number of suggestions shown when `--limit` is not given.
const DEFAULT_LIMIT: usize = 3;

#[derive(Parser, Debug)]
#[command(name = "wordgram")]
#[command(about = "Build and query an n-gram next-word prediction model")]
#[command(version)]
struct Cli {
	/// Configuration file (defaults to $WORDGRAM_CONFIG, then ./wordgram.toml)
	#[arg(short, long, global = true)]
	config: Option<PathBuf>,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Count n-grams of the corpus and write the raw count file
	Train,
	/// Threshold and normalize the raw counts into the probability table
	Optimize {
		/// Override the configured minimum count
		#[arg(short, long)]
		threshold: Option<u64>,
	},
	/// Train then optimize in one run
	Build {
		/// Override the configured minimum count
		#[arg(short, long)]
		threshold: Option<u64>,
	},
	/// Predict the next word after the given text
	Predict {
		/// Already typed text
		text: Vec<String>,
		#[arg(short, long, default_value_t = DEFAULT_LIMIT)]
		limit: usize,
	},
	/// Type phrases interactively and see suggestions
	Repl {
		#[arg(short, long, default_value_t = DEFAULT_LIMIT)]
		limit: usize,
	},
}

fn main() -> Result<()> {
	env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

	let cli = Cli::parse();
	let mut config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;

	match cli.command {
		Command::Train => {
			let counts = pipeline::train(&config).context("training failed")?;
			println!(
				"Counted {} token(s) up to order {} into {}",
				counts.total_tokens(),
				counts.max_order(),
				config.paths.raw_model.display()
			);
		}
		Command::Optimize { threshold } => {
			if let Some(threshold) = threshold {
				config.model.threshold = threshold;
			}
			pipeline::optimize_file(&config).context("optimization failed")?;
			println!("Optimized model written to {}", config.paths.optimized_model.display());
		}
		Command::Build { threshold } => {
			if let Some(threshold) = threshold {
				config.model.threshold = threshold;
			}
			pipeline::build(&config).context("build failed")?;
			println!("Optimized model written to {}", config.paths.optimized_model.display());
		}
		Command::Predict { text, limit } => {
			let predictor = load(&config)?;
			print_suggestions(&predictor, &text.join(" "), limit, &mut io::stdout().lock())?;
		}
		Command::Repl { limit } => {
			let predictor = load(&config)?;
			repl(&predictor, limit)?;
		}
	}

	Ok(())
}

fn load(config: &Config) -> Result<Predictor> {
	pipeline::load_predictor(config).with_context(|| {
		format!(
			"failed to load {} (run `wordgram build` first?)",
			config.paths.optimized_model.display()
		)
	})
}

/// Reads phrases from stdin until EOF, `exit` or `quit`.
fn repl(predictor: &Predictor, limit: usize) -> Result<()> {
	let stdin = io::stdin();
	let mut stdout = io::stdout().lock();

	writeln!(stdout, "Type a phrase and press Enter. Type 'exit' to quit.")?;
	loop {
		write!(stdout, "> ")?;
		stdout.flush()?;

		let mut line = String::new();
		if stdin.lock().read_line(&mut line)? == 0 {
			break;
		}
		let input = line.trim();
		if input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit") {
			break;
		}

		print_suggestions(predictor, input, limit, &mut stdout)?;
	}
	Ok(())
}

fn print_suggestions<W: Write>(predictor: &Predictor, text: &str, limit: usize, out: &mut W) -> Result<()> {
	match predictor.lookup_text(text) {
		Some(found) => {
			log::debug!(
				"{:?} matched at order {} of {}",
				text,
				found.order,
				predictor.table().max_order()
			);
			writeln!(out, "matched {}-gram context '{}'", found.order, found.context)?;
			for (i, candidate) in found.candidates.iter().take(limit).enumerate() {
				writeln!(out, "  {}. {}\t({:.1}%)", i + 1, candidate.word, candidate.probability * 100.0)?;
			}
		}
		None => writeln!(out, "no prediction (sequence is rare or unknown)")?,
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use clap::CommandFactory;

	fn predictor() -> Predictor {
		Predictor::new(serde_json::from_str(r#"{"2": {"ez": {"im": 0.75, "çûm": 0.25}}}"#).unwrap())
	}

	#[test]
	fn test_cli_definition() {
		Cli::command().debug_assert();
	}

	#[test]
	fn test_parse_predict() {
		let cli = Cli::try_parse_from(["wordgram", "predict", "ez", "im", "--limit", "5"]).unwrap();
		match cli.command {
			Command::Predict { text, limit } => {
				assert_eq!(text, vec!["ez", "im"]);
				assert_eq!(limit, 5);
			}
			other => panic!("unexpected command {other:?}"),
		}
	}

	#[test]
	fn test_print_suggestions() {
		let mut out = Vec::new();
		print_suggestions(&predictor(), "Ez", 1, &mut out).unwrap();
		let text = String::from_utf8(out).unwrap();
		assert!(text.contains("matched 2-gram context 'ez'"));
		assert!(text.contains("1. im\t(75.0%)"));
		assert!(!text.contains("çûm"));
	}

	#[test]
	fn test_print_no_match() {
		let mut out = Vec::new();
		print_suggestions(&predictor(), "zzz_unseen_token", 3, &mut out).unwrap();
		assert!(String::from_utf8(out).unwrap().starts_with("no prediction"));
	}
}
