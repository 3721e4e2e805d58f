use crate::error::{ErrorKind, FsError, FsResult};
use serde::Serialize;
use serde_json::Value;
use std::path::Path;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ErrorInfo {
	pub kind: ErrorKind,
	pub message: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub path: Option<String>,
}

/// Uniform outcome of every tool call: `data` is set on success, `error` on failure.
#[derive(Clone, Debug, Serialize)]
pub struct Envelope {
	success: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	data: Option<Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	error: Option<ErrorInfo>,
}

impl Envelope {
	pub fn ok(value: impl Serialize) -> Self {
		match serde_json::to_value(value) {
			Ok(data) => Self {
				success: true,
				data: Some(data),
				error: None
			},
			Err(err) => Self::fail(ErrorKind::Unknown, format!("failed to serialize result: {}", err), None),
		}
	}

	pub fn fail(kind: ErrorKind, message: impl Into<String>, path: Option<&Path>) -> Self {
		Self {
			success: false,
			data: None,
			error: Some(ErrorInfo {
				kind,
				message: message.into(),
				path: path.map(|p| p.display().to_string())
			})
		}
	}

	pub fn from_result<T: Serialize>(result: FsResult<T>) -> Self {
		match result {
			Ok(value) => Self::ok(value),
			Err(err) => err.into(),
		}
	}

	pub fn is_success(&self) -> bool {
		self.success
	}

	pub fn data(&self) -> Option<&Value> {
		self.data.as_ref()
	}

	pub fn error(&self) -> Option<&ErrorInfo> {
		self.error.as_ref()
	}
}

impl From<FsError> for Envelope {
	fn from(err: FsError) -> Self {
		Self::fail(err.kind, err.message, err.path.as_deref())
	}
}
