use crate::error::{ErrorKind, FsError, FsResult};
use std::path::{Component, Path, PathBuf};
use tokio::fs;

/// Turns a caller-supplied path into an absolute, lexically normalized one.
/// Relative paths are joined onto `base`. The target need not exist.
pub fn resolve(base: &Path, raw: &str) -> PathBuf {
	let raw = normalize_separators(raw.trim());
	let raw_path = Path::new(raw.as_str());
	let candidate = if raw_path.is_absolute() {
		raw_path.to_path_buf()
	}
	else {
		base.join(raw_path)
	};
	normalize_path(&candidate)
}

#[cfg(windows)]
fn normalize_separators(raw: &str) -> String {
	raw.to_string()
}

#[cfg(not(windows))]
fn normalize_separators(raw: &str) -> String {
	raw.replace('\\', "/")
}

pub fn normalize_path(path: &Path) -> PathBuf {
	let mut stack: Vec<std::ffi::OsString> = Vec::new();
	let mut prefix: Option<std::ffi::OsString> = None;
	let mut absolute = false;
	for component in path.components() {
		match component {
			Component::Prefix(prefix_component) => {
				prefix = Some(prefix_component.as_os_str().to_os_string());
			}
			Component::RootDir => {
				absolute = true;
				stack.clear();
			}
			Component::CurDir => {}
			Component::ParentDir => {
				if !stack.is_empty() {
					stack.pop();
				}
				else if !absolute {
					stack.push(std::ffi::OsString::from(".."));
				}
			}
			Component::Normal(part) => stack.push(part.to_os_string()),
		}
	}
	let mut out = PathBuf::new();
	if let Some(prefix) = prefix {
		out.push(prefix);
	}
	if absolute {
		out.push(Path::new("/"));
	}
	for part in stack {
		out.push(part);
	}
	out
}

/// Creates every missing ancestor of `path`. Succeeds when they already exist.
pub async fn ensure_parents(path: &Path) -> FsResult<()> {
	let Some(parent) = path.parent() else {
		return Ok(());
	};
	if parent.as_os_str().is_empty() {
		return Ok(());
	}
	match fs::create_dir_all(parent).await {
		Ok(()) => Ok(()),
		Err(err) => match blocking_ancestor(parent).await {
			Some(blocker) => Err(FsError::at(
				ErrorKind::NotADirectory,
				format!("create parent directories for {}: {} is not a directory", path.display(), blocker.display()),
				&blocker
			)),
			None => Err(FsError::io("create parent directories for", path, &err)),
		},
	}
}

/// Nearest existing ancestor of `dir` (inclusive) that is not a directory.
async fn blocking_ancestor(dir: &Path) -> Option<PathBuf> {
	for ancestor in dir.ancestors() {
		if let Ok(meta) = fs::metadata(ancestor).await {
			if meta.is_dir() {
				return None;
			}
			return Some(ancestor.to_path_buf());
		}
	}
	None
}

/// Display form of a path as reported back to callers.
pub fn display(path: &Path) -> String {
	path.to_string_lossy().to_string()
}
