/// Separator joining context tokens into a single key.
///
/// Tokens are produced by splitting on whitespace, so they never contain it.
pub const CONTEXT_SEPARATOR: char = ' ';

/// Normalizes raw text into word tokens.
///
/// Trims, lowercases and splits on Unicode whitespace. Training and querying
/// both go through this function so that contexts match exactly.
pub fn tokenize(text: &str) -> Vec<String> {
	text.trim()
		.to_lowercase()
		.split_whitespace()
		.map(str::to_owned)
		.collect()
}

/// Joins context tokens into their canonical key.
pub fn context_key<S: AsRef<str>>(tokens: &[S]) -> String {
	let mut key = String::new();
	for (i, token) in tokens.iter().enumerate() {
		if i > 0 {
			key.push(CONTEXT_SEPARATOR);
		}
		key.push_str(token.as_ref());
	}
	key
}
