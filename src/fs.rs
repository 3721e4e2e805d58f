use crate::error::{ErrorKind, FsError, FsResult};
use crate::paths::{display, ensure_parents};
use chrono::{DateTime, SecondsFormat, Utc};
use filetime::{set_file_times, FileTime};
use serde::Serialize;
use serde_json::{json, Value};
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::SystemTime;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Encoding {
	#[serde(rename = "utf-8")]
	Utf8,
	#[serde(rename = "latin-1")]
	Latin1,
}

/// Encodings tried, in order, when the caller does not name one.
/// Latin-1 maps every byte to a char, so the chain always ends in a decode.
pub const DETECTION_ORDER: [Encoding; 2] = [Encoding::Utf8, Encoding::Latin1];

impl Encoding {
	pub fn parse(label: &str) -> FsResult<Self> {
		match label.trim()
			.to_ascii_lowercase()
			.replace('_', "-")
			.as_str() {
			"utf-8" | "utf8" => Ok(Encoding::Utf8),
			"latin-1" | "latin1" | "iso-8859-1" => Ok(Encoding::Latin1),
			_ => Err(FsError::invalid(format!("unsupported encoding: {}", label))),
		}
	}

	pub fn label(self) -> &'static str {
		match self {
			Encoding::Utf8 => "utf-8",
			Encoding::Latin1 => "latin-1",
		}
	}

	fn decode(self, bytes: Vec<u8>) -> Result<String, Vec<u8>> {
		match self {
			Encoding::Utf8 => String::from_utf8(bytes).map_err(|err| err.into_bytes()),
			Encoding::Latin1 => Ok(bytes.iter()
				.map(|&byte| char::from(byte))
				.collect()),
		}
	}
}

/// Decodes with `requested` alone, or with [`DETECTION_ORDER`] when `None`.
pub fn decode_text(bytes: Vec<u8>, requested: Option<Encoding>) -> Option<(String, Encoding)> {
	let candidates: &[Encoding] = match &requested {
		Some(encoding) => std::slice::from_ref(encoding),
		None => &DETECTION_ORDER,
	};
	let mut bytes = bytes;
	for &encoding in candidates {
		match encoding.decode(bytes) {
			Ok(text) => return Some((text, encoding)),
			Err(rest) => bytes = rest,
		}
	}
	None
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadOutput {
	pub content: String,
	pub encoding: Encoding,
	pub size_bytes: u64,
}

pub async fn read_file(path: &Path, encoding: Option<Encoding>) -> FsResult<ReadOutput> {
	let meta = stat("read", path).await?;
	if meta.is_dir() {
		return Err(FsError::at(
			ErrorKind::IsADirectory,
			format!("read {}: is a directory", path.display()),
			path
		));
	}
	let bytes = fs::read(path)
		.await
		.map_err(|err| FsError::io("read", path, &err))?;
	let size_bytes = bytes.len() as u64;
	let Some((content, encoding)) = decode_text(bytes, encoding) else {
		let expected = encoding.map(Encoding::label).unwrap_or("text");
		return Err(FsError::at(
			ErrorKind::EncodingError,
			format!("read {}: content is not valid {}", path.display(), expected),
			path
		));
	};
	Ok(ReadOutput {
		content,
		encoding,
		size_bytes
	})
}

pub async fn write_file(path: &Path, content: &str, overwrite: bool) -> FsResult<Value> {
	if !overwrite && fs::symlink_metadata(path).await.is_ok() {
		return Err(FsError::at(
			ErrorKind::AlreadyExists,
			format!("write {}: file exists and overwrite is false", path.display()),
			path
		));
	}
	ensure_parents(path).await?;
	let mut options = fs::OpenOptions::new();
	options.write(true);
	if overwrite {
		options.create(true).truncate(true);
	}
	else {
		options.create_new(true);
	}
	let mut file = options.open(path)
		.await
		.map_err(|err| FsError::io("write", path, &err))?;
	file.write_all(content.as_bytes())
		.await
		.map_err(|err| FsError::io("write", path, &err))?;
	file.flush()
		.await
		.map_err(|err| FsError::io("write", path, &err))?;
	Ok(json!({
		"path": display(path),
		"bytesWritten": content.len(),
	}))
}

pub async fn append_file(path: &Path, content: &str) -> FsResult<Value> {
	ensure_parents(path).await?;
	let mut file = fs::OpenOptions::new()
		.append(true)
		.create(true)
		.open(path)
		.await
		.map_err(|err| FsError::io("append to", path, &err))?;
	file.write_all(content.as_bytes())
		.await
		.map_err(|err| FsError::io("append to", path, &err))?;
	file.flush()
		.await
		.map_err(|err| FsError::io("append to", path, &err))?;
	Ok(json!({
		"path": display(path),
		"bytesAppended": content.len(),
	}))
}

pub async fn delete_file(path: &Path) -> FsResult<Value> {
	let meta = fs::symlink_metadata(path)
		.await
		.map_err(|err| FsError::io("delete", path, &err))?;
	if meta.is_dir() {
		return Err(FsError::at(
			ErrorKind::IsADirectory,
			format!("delete {}: is a directory, use delete_folder", path.display()),
			path
		));
	}
	fs::remove_file(path)
		.await
		.map_err(|err| FsError::io("delete", path, &err))?;
	Ok(json!({
		"deleted": display(path)
	}))
}

/// Copies file bytes, always replacing `destination`. Timestamps are kept when possible.
pub async fn copy_file(source: &Path, destination: &Path) -> FsResult<Value> {
	let meta = stat("copy", source).await?;
	if meta.is_dir() {
		return Err(FsError::at(
			ErrorKind::IsADirectory,
			format!("copy {}: is a directory", source.display()),
			source
		));
	}
	if same_file(source, destination).await {
		return Err(FsError::at(
			ErrorKind::InvalidArgument,
			format!("copy {}: source and destination are the same file", source.display()),
			source
		));
	}
	ensure_parents(destination).await?;
	fs::copy(source, destination)
		.await
		.map_err(|err| FsError::io_pair("copy", source, destination, &err))?;
	preserve_times(&meta, destination);
	Ok(json!({
		"copiedFrom": display(source),
		"copiedTo": display(destination),
	}))
}

/// Renames `source` onto `destination`. Across filesystems it copies, checks the
/// copy, then removes the source; the source is never removed before that.
pub async fn move_file(source: &Path, destination: &Path) -> FsResult<Value> {
	let meta = fs::symlink_metadata(source)
		.await
		.map_err(|err| FsError::io("move", source, &err))?;
	ensure_parents(destination).await?;
	match fs::rename(source, destination).await {
		Ok(()) => return Ok(moved(source, destination)),
		Err(err) => {
			if !is_cross_device(&err) {
				return Err(FsError::io_pair("move", source, destination, &err));
			}
		}
	}
	debug!(
		source = %source.display(),
		destination = %destination.display(),
		"rename crossed filesystems, falling back to copy"
	);
	let is_dir = meta.is_dir();
	if is_dir && fs::symlink_metadata(destination).await.is_ok() {
		return Err(FsError::at(
			ErrorKind::AlreadyExists,
			format!("move {} to {}: destination exists", source.display(), destination.display()),
			source
		));
	}
	if let Err(err) = copy_entry(source.to_path_buf(), destination.to_path_buf(), meta).await {
		discard_partial(destination, is_dir).await;
		return Err(FsError::at(
			ErrorKind::MoveFailed,
			format!(
				"move {} to {}: copy failed, source left in place: {}",
				source.display(),
				destination.display(),
				err
			),
			source
		));
	}
	let removed = if is_dir {
		fs::remove_dir_all(source).await
	}
	else {
		fs::remove_file(source).await
	};
	if let Err(err) = removed {
		return Err(FsError::at(
			ErrorKind::MoveFailed,
			format!(
				"move {} to {}: copied but source could not be removed: {}",
				source.display(),
				destination.display(),
				err
			),
			source
		));
	}
	Ok(moved(source, destination))
}

fn moved(source: &Path, destination: &Path) -> Value {
	json!({
		"movedFrom": display(source),
		"movedTo": display(destination),
	})
}

/// Copies one entry without following symlinks; `meta` must come from `symlink_metadata`.
fn copy_entry(from: PathBuf, to: PathBuf, meta: std::fs::Metadata) -> Pin<Box<dyn Future<Output = io::Result<()>> + Send>> {
	Box::pin(
		async move {
			let ftype = meta.file_type();
			if ftype.is_symlink() {
				return copy_link(&from, &to).await;
			}
			if !ftype.is_dir() {
				return copy_file_checked(&from, &to, &meta).await;
			}
			fs::create_dir_all(&to).await?;
			let mut entries = fs::read_dir(&from).await?;
			while let Some(entry) = entries.next_entry().await? {
				let child_meta = fs::symlink_metadata(entry.path()).await?;
				copy_entry(entry.path(), to.join(entry.file_name()), child_meta).await?;
			}
			fs::set_permissions(&to, meta.permissions()).await?;
			preserve_times(&meta, &to);
			Ok(())
		}
	)
}

async fn copy_file_checked(from: &Path, to: &Path, meta: &std::fs::Metadata) -> io::Result<()> {
	let copied = fs::copy(from, to).await?;
	if copied != meta.len() {
		return Err(io::Error::new(
			io::ErrorKind::Other,
			format!("copied {} of {} bytes", copied, meta.len())
		));
	}
	preserve_times(meta, to);
	Ok(())
}

#[cfg(unix)]
async fn copy_link(from: &Path, to: &Path) -> io::Result<()> {
	let target = fs::read_link(from).await?;
	fs::symlink(target, to).await
}

#[cfg(not(unix))]
async fn copy_link(from: &Path, _to: &Path) -> io::Result<()> {
	Err(io::Error::new(
		io::ErrorKind::Unsupported,
		format!("cannot recreate symlink {}", from.display())
	))
}

async fn discard_partial(destination: &Path, is_dir: bool) {
	let result = if is_dir {
		fs::remove_dir_all(destination).await
	}
	else {
		fs::remove_file(destination).await
	};
	if let Err(err) = result {
		if err.kind() != io::ErrorKind::NotFound {
			warn!(path = %destination.display(), error = %err, "could not remove partial move target");
		}
	}
}

fn preserve_times(meta: &std::fs::Metadata, to: &Path) {
	let atime = FileTime::from_last_access_time(meta);
	let mtime = FileTime::from_last_modification_time(meta);
	if let Err(err) = set_file_times(to, atime, mtime) {
		warn!(path = %to.display(), error = %err, "could not preserve file times");
	}
}

async fn same_file(a: &Path, b: &Path) -> bool {
	match (fs::canonicalize(a).await, fs::canonicalize(b).await) {
		(Ok(a), Ok(b)) => a == b,
		_ => false,
	}
}

fn is_cross_device(err: &io::Error) -> bool {
	err.raw_os_error() == Some(libc::EXDEV)
}

pub async fn read_json_file(path: &Path) -> FsResult<Value> {
	let read = read_file(path, None).await?;
	let text = read.content.trim_start_matches('\u{feff}');
	serde_json::from_str(text).map_err(|err| {
		FsError::at(
			ErrorKind::ParseError,
			format!("parse {}: invalid JSON: {}", path.display(), err),
			path
		)
	})
}

/// Pretty-prints `value` with two-space indentation, keeping its key order.
pub async fn write_json_file(path: &Path, value: &Value, overwrite: bool) -> FsResult<Value> {
	let text = serde_json::to_string_pretty(value).map_err(|err| FsError::invalid(format!("failed to serialize JSON: {}", err)))?;
	write_file(path, &text, overwrite).await
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
	File,
	Directory,
}

impl EntryKind {
	fn of(meta: &std::fs::Metadata) -> Self {
		if meta.is_dir() {
			EntryKind::Directory
		}
		else {
			EntryKind::File
		}
	}
}

/// One child of a listed directory. `size_bytes` is omitted for directories.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
	pub name: String,
	pub kind: EntryKind,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub size_bytes: Option<u64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub modified_at: Option<String>,
	pub path: String,
}

/// Immediate children of `path`, sorted by name.
pub async fn list_directory(path: &Path) -> FsResult<Vec<FileEntry>> {
	let meta = stat("list", path).await?;
	if !meta.is_dir() {
		return Err(FsError::at(
			ErrorKind::NotADirectory,
			format!("list {}: not a directory", path.display()),
			path
		));
	}
	let mut reader = fs::read_dir(path)
		.await
		.map_err(|err| FsError::io("list", path, &err))?;
	let mut entries = Vec::new();
	while let Some(entry) = reader.next_entry()
		.await
		.map_err(|err| FsError::io("list", path, &err))? {
		let entry_path = entry.path();
		// Broken links have no target metadata; fall back to the link itself.
		let meta = match fs::metadata(&entry_path).await {
			Ok(meta) => meta,
			Err(_) => match entry.metadata().await {
				Ok(meta) => meta,
				Err(err) => {
					debug!(path = %entry_path.display(), error = %err, "skipping entry without metadata");
					continue;
				}
			},
		};
		let kind = EntryKind::of(&meta);
		entries.push(FileEntry {
			name: entry.file_name().to_string_lossy().to_string(),
			kind,
			size_bytes: size_for(kind, &meta),
			modified_at: timestamp(meta.modified()),
			path: display(&entry_path)
		});
	}
	entries.sort_by(|a, b| a.name.cmp(&b.name));
	Ok(entries)
}

pub async fn create_folder(path: &Path) -> FsResult<Value> {
	if let Ok(meta) = fs::metadata(path).await {
		if !meta.is_dir() {
			return Err(FsError::at(
				ErrorKind::AlreadyExists,
				format!("create folder {}: a file already exists at this path", path.display()),
				path
			));
		}
	}
	fs::create_dir_all(path)
		.await
		.map_err(|err| FsError::io("create folder", path, &err))?;
	Ok(json!({
		"created": display(path)
	}))
}

pub async fn delete_folder(path: &Path, recursive: bool) -> FsResult<Value> {
	let meta = fs::symlink_metadata(path)
		.await
		.map_err(|err| FsError::io("delete folder", path, &err))?;
	if !meta.is_dir() {
		return Err(FsError::at(
			ErrorKind::NotADirectory,
			format!("delete folder {}: not a directory", path.display()),
			path
		));
	}
	if recursive {
		fs::remove_dir_all(path)
			.await
			.map_err(|err| FsError::io("delete folder", path, &err))?;
	}
	else {
		let mut reader = fs::read_dir(path)
			.await
			.map_err(|err| FsError::io("delete folder", path, &err))?;
		let has_children = reader.next_entry()
			.await
			.map_err(|err| FsError::io("delete folder", path, &err))?
			.is_some();
		if has_children {
			return Err(FsError::at(
				ErrorKind::DirectoryNotEmpty,
				format!("delete folder {}: directory not empty, pass recursive to remove contents", path.display()),
				path
			));
		}
		fs::remove_dir(path)
			.await
			.map_err(|err| FsError::io("delete folder", path, &err))?;
	}
	Ok(json!({
		"deleted": display(path),
		"recursive": recursive,
	}))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
	pub path: String,
	pub kind: EntryKind,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub size_bytes: Option<u64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub created_at: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub modified_at: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub accessed_at: Option<String>,
	pub is_readable: bool,
	pub is_writable: bool,
	pub is_symlink: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub extension: Option<String>,
}

/// Metadata for a file or directory. Symlinks report their target when it exists.
pub async fn get_file_info(path: &Path) -> FsResult<FileInfo> {
	let link_meta = fs::symlink_metadata(path)
		.await
		.map_err(|err| FsError::io("stat", path, &err))?;
	let is_symlink = link_meta.file_type().is_symlink();
	let meta = if is_symlink {
		fs::metadata(path).await.unwrap_or(link_meta)
	}
	else {
		link_meta
	};
	let kind = EntryKind::of(&meta);
	let (is_readable, is_writable) = check_access(path, &meta);
	Ok(FileInfo {
		path: display(path),
		kind,
		size_bytes: size_for(kind, &meta),
		created_at: timestamp(meta.created()),
		modified_at: timestamp(meta.modified()),
		accessed_at: timestamp(meta.accessed()),
		is_readable,
		is_writable,
		is_symlink,
		extension: path.extension().map(|ext| ext.to_string_lossy().to_string())
	})
}

#[cfg(unix)]
fn check_access(path: &Path, _meta: &std::fs::Metadata) -> (bool, bool) {
	use rustix::fs::{access, Access};
	(access(path, Access::READ_OK).is_ok(), access(path, Access::WRITE_OK).is_ok())
}

#[cfg(not(unix))]
fn check_access(_path: &Path, meta: &std::fs::Metadata) -> (bool, bool) {
	(true, !meta.permissions().readonly())
}

fn size_for(kind: EntryKind, meta: &std::fs::Metadata) -> Option<u64> {
	match kind {
		EntryKind::File => Some(meta.len()),
		EntryKind::Directory => None,
	}
}

fn timestamp(time: io::Result<SystemTime>) -> Option<String> {
	time.ok().map(|time| DateTime::<Utc>::from(time).to_rfc3339_opts(SecondsFormat::Millis, true))
}

async fn stat(action: &str, path: &Path) -> FsResult<std::fs::Metadata> {
	fs::metadata(path)
		.await
		.map_err(|err| FsError::io(action, path, &err))
}

#[cfg(test)]
mod tests {
	use super::*;

	fn text(path: &Path) -> String {
		std::fs::read_to_string(path).expect("read back")
	}

	#[tokio::test]
	async fn write_then_read_round_trips() {
		let root = tempfile::tempdir().expect("tempdir");
		let path = root.path().join("deep/nested/notes.txt");
		let content = "first line\r\nsecond ß ünïcödé\n\nlast";
		write_file(&path, content, true).await.expect("write");
		let read = read_file(&path, None).await.expect("read");
		assert_eq!(read.content, content);
		assert_eq!(read.encoding, Encoding::Utf8);
		assert_eq!(read.size_bytes, content.len() as u64);
	}

	#[tokio::test]
	async fn overwrite_guard_keeps_first_content() {
		let root = tempfile::tempdir().expect("tempdir");
		let path = root.path().join("guarded.txt");
		write_file(&path, "a", false).await.expect("first write");
		let err = write_file(&path, "b", false).await.expect_err("second write");
		assert_eq!(err.kind, ErrorKind::AlreadyExists);
		assert_eq!(text(&path), "a");
	}

	#[tokio::test]
	async fn write_truncates_existing_content() {
		let root = tempfile::tempdir().expect("tempdir");
		let path = root.path().join("short.txt");
		write_file(&path, "a much longer first version", true).await.expect("first");
		write_file(&path, "short", true).await.expect("second");
		assert_eq!(text(&path), "short");
	}

	#[tokio::test]
	async fn append_creates_then_extends() {
		let root = tempfile::tempdir().expect("tempdir");
		let path = root.path().join("log/app.log");
		let out = append_file(&path, "one\n").await.expect("create");
		assert_eq!(out.get("bytesAppended").and_then(Value::as_u64), Some(4));
		append_file(&path, "two\n").await.expect("append");
		assert_eq!(text(&path), "one\ntwo\n");
	}

	#[tokio::test]
	async fn read_missing_and_directory() {
		let root = tempfile::tempdir().expect("tempdir");
		let missing = read_file(&root.path().join("nope.txt"), None).await.expect_err("missing");
		assert_eq!(missing.kind, ErrorKind::NotFound);
		let dir = read_file(root.path(), None).await.expect_err("dir");
		assert_eq!(dir.kind, ErrorKind::IsADirectory);
	}

	#[tokio::test]
	async fn latin1_fallback_and_strict_utf8() {
		let root = tempfile::tempdir().expect("tempdir");
		let path = root.path().join("legacy.txt");
		std::fs::write(&path, [b'c', b'a', b'f', 0xe9]).expect("seed");
		let read = read_file(&path, None).await.expect("auto");
		assert_eq!(read.content, "café");
		assert_eq!(read.encoding, Encoding::Latin1);
		let err = read_file(&path, Some(Encoding::Utf8)).await.expect_err("strict");
		assert_eq!(err.kind, ErrorKind::EncodingError);
	}

	#[test]
	fn encoding_labels_parse() {
		assert_eq!(Encoding::parse("UTF8").expect("utf8"), Encoding::Utf8);
		assert_eq!(Encoding::parse("iso-8859-1").expect("latin"), Encoding::Latin1);
		assert_eq!(Encoding::parse("ebcdic").expect_err("bad").kind, ErrorKind::InvalidArgument);
	}

	#[tokio::test]
	async fn delete_file_rules() {
		let root = tempfile::tempdir().expect("tempdir");
		let missing = delete_file(&root.path().join("ghost")).await.expect_err("missing");
		assert_eq!(missing.kind, ErrorKind::NotFound);
		let dir = delete_file(root.path()).await.expect_err("dir");
		assert_eq!(dir.kind, ErrorKind::IsADirectory);
		let path = root.path().join("doomed.txt");
		std::fs::write(&path, "x").expect("seed");
		delete_file(&path).await.expect("delete");
		assert!(!path.exists());
	}

	#[tokio::test]
	async fn copy_overwrites_destination() {
		let root = tempfile::tempdir().expect("tempdir");
		let src = root.path().join("src.bin");
		let dst = root.path().join("out/dst.bin");
		std::fs::write(&src, [0u8, 1, 2, 255]).expect("seed");
		std::fs::create_dir_all(dst.parent().expect("parent")).expect("mkdir");
		std::fs::write(&dst, "old and longer").expect("seed dst");
		copy_file(&src, &dst).await.expect("copy");
		assert_eq!(std::fs::read(&dst).expect("read"), vec![0u8, 1, 2, 255]);
		assert!(src.exists());
	}

	#[tokio::test]
	async fn copy_refuses_same_file_and_missing_source() {
		let root = tempfile::tempdir().expect("tempdir");
		let src = root.path().join("same.txt");
		std::fs::write(&src, "keep me").expect("seed");
		let err = copy_file(&src, &src).await.expect_err("same");
		assert_eq!(err.kind, ErrorKind::InvalidArgument);
		assert_eq!(text(&src), "keep me");
		let missing = copy_file(&root.path().join("none"), &root.path().join("x")).await.expect_err("missing");
		assert_eq!(missing.kind, ErrorKind::NotFound);
	}

	#[tokio::test]
	async fn move_renames_and_creates_parents() {
		let root = tempfile::tempdir().expect("tempdir");
		let src = root.path().join("a.txt");
		let dst = root.path().join("archive/2024/a.txt");
		std::fs::write(&src, "payload").expect("seed");
		let out = move_file(&src, &dst).await.expect("move");
		assert_eq!(out.get("movedTo").and_then(Value::as_str), Some(display(&dst).as_str()));
		assert!(!src.exists());
		assert_eq!(text(&dst), "payload");
	}

	#[tokio::test]
	async fn move_missing_source_is_not_found() {
		let root = tempfile::tempdir().expect("tempdir");
		let err = move_file(&root.path().join("gone"), &root.path().join("there")).await.expect_err("missing");
		assert_eq!(err.kind, ErrorKind::NotFound);
		assert!(!root.path().join("there").exists());
	}

	/// A scratch directory on a different filesystem, when the host has one.
	#[cfg(unix)]
	fn other_volume(near: &Path) -> Option<tempfile::TempDir> {
		use std::os::unix::fs::MetadataExt;
		let shm = Path::new("/dev/shm");
		if !shm.is_dir() {
			return None;
		}
		let other = tempfile::tempdir_in(shm).ok()?;
		let here = std::fs::metadata(near).ok()?.dev();
		let there = std::fs::metadata(other.path()).ok()?.dev();
		if here == there {
			return None;
		}
		Some(other)
	}

	#[cfg(unix)]
	#[tokio::test]
	async fn move_across_volumes_copies_then_removes_file() {
		let root = tempfile::tempdir().expect("tempdir");
		let Some(other) = other_volume(root.path()) else {
			eprintln!("no second filesystem, skipping");
			return;
		};
		let src = root.path().join("a.txt");
		let dst = other.path().join("nested/a.txt");
		std::fs::write(&src, "payload").expect("seed");
		move_file(&src, &dst).await.expect("move");
		assert!(!src.exists());
		assert_eq!(text(&dst), "payload");
	}

	#[cfg(unix)]
	#[tokio::test]
	async fn move_across_volumes_keeps_symlinks_as_links() {
		let root = tempfile::tempdir().expect("tempdir");
		let Some(other) = other_volume(root.path()) else {
			eprintln!("no second filesystem, skipping");
			return;
		};
		let src = root.path().join("tree");
		std::fs::create_dir_all(src.join("sub")).expect("mkdir");
		std::fs::write(src.join("a.txt"), "a").expect("seed");
		std::fs::write(src.join("sub/b.txt"), "b").expect("seed");
		std::os::unix::fs::symlink(".", src.join("self")).expect("loop link");
		std::os::unix::fs::symlink("missing", src.join("dangling")).expect("dangling link");
		std::os::unix::fs::symlink("a.txt", src.join("alias.txt")).expect("file link");
		let dst = other.path().join("tree");
		move_file(&src, &dst).await.expect("move");
		assert!(!src.exists());
		assert_eq!(text(&dst.join("sub/b.txt")), "b");
		for (name, target) in [("self", "."), ("dangling", "missing"), ("alias.txt", "a.txt")] {
			let meta = std::fs::symlink_metadata(dst.join(name)).expect("link");
			assert!(meta.file_type().is_symlink(), "{}", name);
			assert_eq!(std::fs::read_link(dst.join(name)).expect("read link"), PathBuf::from(target));
		}
	}

	#[cfg(unix)]
	#[tokio::test]
	async fn failed_cross_volume_move_keeps_source() {
		use std::os::unix::fs::PermissionsExt;
		let root = tempfile::tempdir().expect("tempdir");
		let Some(other) = other_volume(root.path()) else {
			eprintln!("no second filesystem, skipping");
			return;
		};
		let src = root.path().join("tree");
		std::fs::create_dir_all(&src).expect("mkdir");
		std::fs::write(src.join("ok.txt"), "ok").expect("seed");
		let secret = src.join("secret.txt");
		std::fs::write(&secret, "hidden").expect("seed");
		std::fs::set_permissions(&secret, std::fs::Permissions::from_mode(0o000)).expect("chmod");
		if std::fs::File::open(&secret).is_ok() {
			eprintln!("running with elevated privileges, skipping");
			return;
		}
		let dst = other.path().join("tree");
		let err = move_file(&src, &dst).await.expect_err("unreadable file");
		assert_eq!(err.kind, ErrorKind::MoveFailed);
		assert!(err.message.contains("source left in place"));
		assert!(!dst.exists());
		assert_eq!(text(&src.join("ok.txt")), "ok");
		std::fs::set_permissions(&secret, std::fs::Permissions::from_mode(0o644)).expect("chmod back");
		assert_eq!(text(&secret), "hidden");
	}

	#[tokio::test]
	async fn json_round_trip_keeps_key_order() {
		let root = tempfile::tempdir().expect("tempdir");
		let path = root.path().join("config.json");
		let value = json!({ "zeta": 1, "alpha": [true, null, 2.5], "mid": { "b": "x", "a": "y" } });
		write_json_file(&path, &value, true).await.expect("write json");
		let raw = text(&path);
		assert!(raw.starts_with("{\n  \"zeta\": 1,"));
		assert!(raw.find("\"zeta\"") < raw.find("\"alpha\""));
		let read = read_json_file(&path).await.expect("read json");
		assert_eq!(read, value);
	}

	#[tokio::test]
	async fn malformed_json_is_parse_error() {
		let root = tempfile::tempdir().expect("tempdir");
		let path = root.path().join("broken.json");
		std::fs::write(&path, "{\"a\": 1,").expect("seed");
		let err = read_json_file(&path).await.expect_err("parse");
		assert_eq!(err.kind, ErrorKind::ParseError);
		assert!(err.message.contains("line 1"));
	}

	#[tokio::test]
	async fn list_is_sorted_and_shallow() {
		let root = tempfile::tempdir().expect("tempdir");
		std::fs::write(root.path().join("b.txt"), "bb").expect("b");
		std::fs::write(root.path().join("a.txt"), "a").expect("a");
		std::fs::create_dir_all(root.path().join("c/inner")).expect("c");
		let entries = list_directory(root.path()).await.expect("list");
		let names: Vec<&str> = entries.iter().map(|entry| entry.name.as_str()).collect();
		assert_eq!(names, vec!["a.txt", "b.txt", "c"]);
		assert_eq!(entries[1].size_bytes, Some(2));
		assert_eq!(entries[2].kind, EntryKind::Directory);
		assert_eq!(entries[2].size_bytes, None);
		assert!(entries[0].modified_at.is_some());
	}

	#[tokio::test]
	async fn list_rejects_files_and_missing() {
		let root = tempfile::tempdir().expect("tempdir");
		let file = root.path().join("f.txt");
		std::fs::write(&file, "x").expect("seed");
		assert_eq!(list_directory(&file).await.expect_err("file").kind, ErrorKind::NotADirectory);
		assert_eq!(list_directory(&root.path().join("nope")).await.expect_err("missing").kind, ErrorKind::NotFound);
	}

	#[tokio::test]
	async fn create_folder_is_idempotent() {
		let root = tempfile::tempdir().expect("tempdir");
		let path = root.path().join("x/y/z");
		create_folder(&path).await.expect("first");
		create_folder(&path).await.expect("second");
		assert!(path.is_dir());
	}

	#[tokio::test]
	async fn delete_folder_guards_non_empty() {
		let root = tempfile::tempdir().expect("tempdir");
		let dir = root.path().join("full");
		std::fs::create_dir_all(dir.join("sub")).expect("mkdir");
		std::fs::write(dir.join("sub/file.txt"), "x").expect("seed");
		let err = delete_folder(&dir, false).await.expect_err("not empty");
		assert_eq!(err.kind, ErrorKind::DirectoryNotEmpty);
		assert!(dir.join("sub/file.txt").exists());
		delete_folder(&dir, true).await.expect("recursive");
		assert!(!dir.exists());
	}

	#[tokio::test]
	async fn delete_folder_missing_and_empty() {
		let root = tempfile::tempdir().expect("tempdir");
		let err = delete_folder(&root.path().join("nope"), false).await.expect_err("missing");
		assert_eq!(err.kind, ErrorKind::NotFound);
		let empty = root.path().join("empty");
		std::fs::create_dir(&empty).expect("mkdir");
		delete_folder(&empty, false).await.expect("delete empty");
		assert!(!empty.exists());
	}

	#[tokio::test]
	async fn info_for_file_and_directory() {
		let root = tempfile::tempdir().expect("tempdir");
		let file = root.path().join("report.csv");
		std::fs::write(&file, "a,b\n").expect("seed");
		let info = get_file_info(&file).await.expect("file info");
		assert_eq!(info.kind, EntryKind::File);
		assert_eq!(info.size_bytes, Some(4));
		assert_eq!(info.extension.as_deref(), Some("csv"));
		assert!(info.is_readable);
		assert!(info.modified_at.is_some());
		let dir = get_file_info(root.path()).await.expect("dir info");
		assert_eq!(dir.kind, EntryKind::Directory);
		assert_eq!(dir.size_bytes, None);
		let missing = get_file_info(&root.path().join("nope")).await.expect_err("missing");
		assert_eq!(missing.kind, ErrorKind::NotFound);
	}

	#[cfg(unix)]
	#[tokio::test]
	async fn info_reports_access_for_read_only_file() {
		use std::os::unix::fs::PermissionsExt;
		let root = tempfile::tempdir().expect("tempdir");
		let path = root.path().join("frozen.txt");
		std::fs::write(&path, "x").expect("seed");
		let info = get_file_info(&path).await.expect("info");
		assert!(info.is_readable);
		assert!(info.is_writable);
		std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o444)).expect("chmod");
		if std::fs::OpenOptions::new().write(true).open(&path).is_ok() {
			eprintln!("running with elevated privileges, skipping");
			return;
		}
		let info = get_file_info(&path).await.expect("info");
		assert!(info.is_readable);
		assert!(!info.is_writable);
	}
}
