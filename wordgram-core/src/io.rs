use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};

/// Opens a file, reporting a missing file as `ModelError::NotFound`.
fn open<P: AsRef<Path>>(path: P) -> Result<File> {
	let path = path.as_ref();
	File::open(path).map_err(|e| match e.kind() {
		io::ErrorKind::NotFound => ModelError::NotFound(path.to_path_buf()),
		_ => ModelError::Io(e),
	})
}

/// Reads a whole text file into memory.
pub(crate) fn read_file<P: AsRef<Path>>(filename: P) -> Result<String> {
	let mut contents = String::new();
	open(filename)?.read_to_string(&mut contents)?;
	Ok(contents)
}

/// Reads raw bytes (binary table cache).
pub(crate) fn read_bytes<P: AsRef<Path>>(filename: P) -> Result<Vec<u8>> {
	let mut bytes = Vec::new();
	open(filename)?.read_to_end(&mut bytes)?;
	Ok(bytes)
}

/// Deserializes a JSON document from a file.
pub(crate) fn read_json<T: DeserializeOwned, P: AsRef<Path>>(filename: P) -> Result<T> {
	let reader = BufReader::new(open(filename)?);
	Ok(serde_json::from_reader(reader)?)
}

/// Serializes a value as compact JSON, creating parent directories if needed.
pub(crate) fn write_json<T: Serialize, P: AsRef<Path>>(filename: P, value: &T) -> Result<()> {
	let mut writer = BufWriter::new(create(filename)?);
	serde_json::to_writer(&mut writer, value)?;
	writer.flush()?;
	Ok(())
}

/// Writes raw bytes, creating parent directories if needed.
pub(crate) fn write_bytes<P: AsRef<Path>>(filename: P, bytes: &[u8]) -> Result<()> {
	create(filename)?.write_all(bytes)?;
	Ok(())
}

fn create<P: AsRef<Path>>(filename: P) -> Result<File> {
	let path = filename.as_ref();
	if let Some(parent) = path.parent() {
		if !parent.as_os_str().is_empty() {
			fs::create_dir_all(parent)?;
		}
	}
	Ok(File::create(path)?)
}

/// Builds an output path based on an input path and a new extension.
///
/// Example:
/// `data/ngram_model.json` + `"bin"` → `data/ngram_model.bin`
pub(crate) fn build_output_path<P: AsRef<Path>>(
	input_path: P,
	output_extension: &str,
) -> Result<PathBuf> {
	let input_path = input_path.as_ref();

	let parent = input_path.parent().unwrap_or_else(|| Path::new("."));
	let file_stem = input_path
		.file_stem()
		.ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "Input path has no filename"))?;

	let mut output = PathBuf::from(parent);
	output.push(file_stem);
	output.set_extension(output_extension);

	Ok(output)
}

/// Size and modification time of a file, recorded in a derived file to tell
/// whether its source changed since.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct FileStamp {
	len: u64,
	/// Seconds and nanoseconds since the Unix epoch.
	modified: Option<(u64, u32)>,
}

/// Reads the stamp of `path`, `None` if its metadata is unavailable.
pub(crate) fn stamp<P: AsRef<Path>>(path: P) -> Option<FileStamp> {
	let metadata = fs::metadata(path).ok()?;
	let modified = metadata
		.modified()
		.ok()
		.and_then(|time| time.duration_since(UNIX_EPOCH).ok())
		.map(|since| (since.as_secs(), since.subsec_nanos()));
	Some(FileStamp { len: metadata.len(), modified })
}
