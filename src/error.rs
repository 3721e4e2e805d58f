use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};

/// Closed set of failure kinds reported to callers. Widen only, never remap.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
	NotFound,
	AlreadyExists,
	IsADirectory,
	NotADirectory,
	DirectoryNotEmpty,
	PermissionDenied,
	EncodingError,
	ParseError,
	MoveFailed,
	InvalidArgument,
	Cancelled,
	Unknown,
}

impl ErrorKind {
	pub fn from_io(err: &io::Error) -> Self {
		match err.kind() {
			io::ErrorKind::NotFound => return ErrorKind::NotFound,
			io::ErrorKind::PermissionDenied => return ErrorKind::PermissionDenied,
			io::ErrorKind::AlreadyExists => return ErrorKind::AlreadyExists,
			io::ErrorKind::InvalidData => return ErrorKind::EncodingError,
			_ => {}
		}
		match err.raw_os_error() {
			Some(libc::EISDIR) => ErrorKind::IsADirectory,
			Some(libc::ENOTDIR) => ErrorKind::NotADirectory,
			Some(libc::ENOTEMPTY) => ErrorKind::DirectoryNotEmpty,
			_ => ErrorKind::Unknown,
		}
	}
}

#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct FsError {
	pub kind: ErrorKind,
	pub message: String,
	pub path: Option<PathBuf>,
}

pub type FsResult<T> = std::result::Result<T, FsError>;

impl FsError {
	pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
		Self {
			kind,
			message: message.into(),
			path: None
		}
	}

	pub fn at(kind: ErrorKind, message: impl Into<String>, path: &Path) -> Self {
		Self {
			kind,
			message: message.into(),
			path: Some(path.to_path_buf())
		}
	}

	pub fn invalid(message: impl Into<String>) -> Self {
		Self::new(ErrorKind::InvalidArgument, message)
	}

	/// Converts an OS error raised while performing `action` on `path`.
	pub fn io(action: &str, path: &Path, err: &io::Error) -> Self {
		let kind = ErrorKind::from_io(err);
		Self::at(kind, format!("{} {}: {}", action, path.display(), reason(kind, err)), path)
	}

	/// Like [`FsError::io`] for operations with a source and a destination.
	pub fn io_pair(action: &str, from: &Path, to: &Path, err: &io::Error) -> Self {
		let kind = ErrorKind::from_io(err);
		let message = format!(
			"{} {} to {}: {}",
			action,
			from.display(),
			to.display(),
			reason(kind, err)
		);
		Self::at(kind, message, from)
	}
}

fn reason(kind: ErrorKind, err: &io::Error) -> String {
	match kind {
		ErrorKind::NotFound => "not found".to_string(),
		ErrorKind::PermissionDenied => "permission denied".to_string(),
		ErrorKind::AlreadyExists => "already exists".to_string(),
		ErrorKind::IsADirectory => "is a directory".to_string(),
		ErrorKind::NotADirectory => "not a directory".to_string(),
		ErrorKind::DirectoryNotEmpty => "directory not empty".to_string(),
		_ => err.to_string(),
	}
}
