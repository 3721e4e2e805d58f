use crate::error::{ErrorKind, FsError, FsResult};
use crate::fs::decode_text;
use crate::paths::display;
use globset::{GlobBuilder, GlobMatcher};
use ignore::WalkBuilder;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchedLine {
	pub line_number: usize,
	pub text: String,
}

#[derive(Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchMatch {
	pub path: String,
	pub matched_lines: Vec<MatchedLine>,
}

/// Files under `root` whose name matches `pattern`, in sorted pre-order.
pub async fn find_files(pattern: &str, root: &Path, cancel: &CancellationToken) -> FsResult<Vec<String>> {
	let matcher = build_name_matcher(pattern)?;
	check_root(root).await?;
	let root = root.to_path_buf();
	let cancel = cancel.clone();
	let files = run_blocking(move || walk_files(&root, &matcher, &cancel)).await?;
	Ok(files.iter()
		.map(|path| display(path))
		.collect())
}

/// Case-sensitive substring scan of every file `find_files` would return for `file_pattern`.
pub async fn search_in_files(
	term: &str,
	file_pattern: &str,
	root: &Path,
	cancel: &CancellationToken) -> FsResult<Vec<SearchMatch>> {
	if term.is_empty() {
		return Err(FsError::invalid("term must not be empty"));
	}
	let matcher = build_name_matcher(file_pattern)?;
	check_root(root).await?;
	let root = root.to_path_buf();
	let term = term.to_string();
	let cancel = cancel.clone();
	run_blocking(
		move || {
			let files = walk_files(&root, &matcher, &cancel)?;
			let mut results = Vec::new();
			for file in files {
				if cancel.is_cancelled() {
					return Err(cancelled(&root));
				}
				if let Some(found) = scan_file(&file, &term) {
					results.push(found);
				}
			}
			Ok(results)
		}
	).await
}

pub fn build_name_matcher(pattern: &str) -> FsResult<GlobMatcher> {
	if pattern.is_empty() {
		return Err(FsError::invalid("pattern must not be empty"));
	}
	let glob = GlobBuilder::new(pattern)
		.literal_separator(true)
		.backslash_escape(true)
		.build()
		.map_err(|err| FsError::invalid(format!("invalid glob {}: {}", pattern, err.kind())))?;
	Ok(glob.compile_matcher())
}

/// Walks `root` depth-first with siblings sorted by name. Unreadable entries are skipped.
fn walk_files(root: &Path, matcher: &GlobMatcher, cancel: &CancellationToken) -> FsResult<Vec<PathBuf>> {
	let mut builder = WalkBuilder::new(root);
	builder.standard_filters(false);
	builder.follow_links(false);
	builder.sort_by_file_name(|a, b| a.cmp(b));
	let mut files = Vec::new();
	for entry in builder.build() {
		if cancel.is_cancelled() {
			return Err(cancelled(root));
		}
		let entry = match entry {
			Ok(entry) => entry,
			Err(err) => {
				debug!(root = %root.display(), error = %err, "skipping unreadable entry");
				continue;
			}
		};
		if entry.depth() == 0 || !is_file_entry(&entry) {
			continue;
		}
		let Some(name) = entry.path().file_name() else {
			continue;
		};
		if matcher.is_match(name) {
			files.push(entry.into_path());
		}
	}
	Ok(files)
}

fn scan_file(path: &Path, term: &str) -> Option<SearchMatch> {
	let bytes = match std::fs::read(path) {
		Ok(bytes) => bytes,
		Err(err) => {
			debug!(path = %path.display(), error = %err, "skipping unreadable file");
			return None;
		}
	};
	if bytes.contains(&0) {
		debug!(path = %path.display(), "skipping binary file");
		return None;
	}
	let Some((text, _)) = decode_text(bytes, None) else {
		debug!(path = %path.display(), "skipping undecodable file");
		return None;
	};
	let matched_lines: Vec<MatchedLine> = text.lines()
		.enumerate()
		.filter(|(_, line)| line.contains(term))
		.map(|(index, line)| MatchedLine {
			line_number: index + 1,
			text: line.to_string()
		})
		.collect();
	if matched_lines.is_empty() {
		return None;
	}
	Some(SearchMatch {
		path: display(path),
		matched_lines
	})
}

fn is_file_entry(entry: &ignore::DirEntry) -> bool {
	let ftype = entry.file_type();
	if ftype.map(|t| t.is_file()).unwrap_or(false) {
		return true;
	}
	if ftype.map(|t| t.is_symlink()).unwrap_or(false) {
		if let Ok(meta) = std::fs::metadata(entry.path()) {
			return meta.is_file();
		}
	}
	false
}

async fn check_root(root: &Path) -> FsResult<()> {
	let meta = tokio::fs::metadata(root)
		.await
		.map_err(|err| FsError::io("search", root, &err))?;
	if !meta.is_dir() {
		return Err(FsError::at(
			ErrorKind::NotADirectory,
			format!("search {}: not a directory", root.display()),
			root
		));
	}
	Ok(())
}

async fn run_blocking<T, F>(job: F) -> FsResult<T>
where
	F: FnOnce() -> FsResult<T> + Send + 'static,
	T: Send + 'static, {
	tokio::task::spawn_blocking(job)
		.await
		.map_err(|err| FsError::new(ErrorKind::Unknown, format!("search worker failed: {}", err)))?
}

fn cancelled(root: &Path) -> FsError {
	FsError::at(
		ErrorKind::Cancelled,
		format!("search {}: cancelled", root.display()),
		root
	)
}
