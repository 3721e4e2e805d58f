use crate::envelope::Envelope;
use crate::error::{ErrorKind, FsError, FsResult};
use crate::fs::{self, Encoding};
use crate::paths::resolve;
use crate::search;
use serde::Serialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// Every operation exposed over `tools/call`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tool {
	ReadFile,
	WriteFile,
	AppendFile,
	DeleteFile,
	CopyFile,
	MoveFile,
	ReadJsonFile,
	WriteJsonFile,
	ListDirectory,
	CreateFolder,
	DeleteFolder,
	FindFiles,
	SearchInFiles,
	GetFileInfo,
}

impl Tool {
	pub const ALL: [Tool; 14] = [
		Tool::ReadFile,
		Tool::WriteFile,
		Tool::AppendFile,
		Tool::DeleteFile,
		Tool::CopyFile,
		Tool::MoveFile,
		Tool::ReadJsonFile,
		Tool::WriteJsonFile,
		Tool::ListDirectory,
		Tool::CreateFolder,
		Tool::DeleteFolder,
		Tool::FindFiles,
		Tool::SearchInFiles,
		Tool::GetFileInfo,
	];

	pub fn from_name(name: &str) -> Option<Tool> {
		Tool::ALL
			.iter()
			.copied()
			.find(|tool| tool.name() == name)
	}

	pub fn name(self) -> &'static str {
		match self {
			Tool::ReadFile => "read_file",
			Tool::WriteFile => "write_file",
			Tool::AppendFile => "append_file",
			Tool::DeleteFile => "delete_file",
			Tool::CopyFile => "copy_file",
			Tool::MoveFile => "move_file",
			Tool::ReadJsonFile => "read_json_file",
			Tool::WriteJsonFile => "write_json_file",
			Tool::ListDirectory => "list_directory",
			Tool::CreateFolder => "create_folder",
			Tool::DeleteFolder => "delete_folder",
			Tool::FindFiles => "find_files",
			Tool::SearchInFiles => "search_in_files",
			Tool::GetFileInfo => "get_file_info",
		}
	}

	fn description(self) -> &'static str {
		match self {
			Tool::ReadFile => "read a text file; tries utf-8 then latin-1 unless an encoding is given",
			Tool::WriteFile => "write text to a file, creating parent directories; overwrite=false refuses existing files",
			Tool::AppendFile => "append text to a file, creating it and its parent directories if needed",
			Tool::DeleteFile => "delete a single file (use delete_folder for directories); cannot be undone",
			Tool::CopyFile => "copy a file, creating destination parents and replacing an existing destination",
			Tool::MoveFile => "move or rename a file or directory, creating destination parents",
			Tool::ReadJsonFile => "read and parse a JSON file",
			Tool::WriteJsonFile => "write a JSON value as indented text, keeping key order",
			Tool::ListDirectory => "list the immediate children of a directory, sorted by name",
			Tool::CreateFolder => "create a directory and any missing parents; succeeds if it already exists",
			Tool::DeleteFolder => "delete a directory; recursive=true also removes its contents",
			Tool::FindFiles => "recursively find files whose name matches a glob (*, ?, [...])",
			Tool::SearchInFiles => "recursively search files matching a glob for a case-sensitive substring",
			Tool::GetFileInfo => "size, timestamps, type and access flags for a file or directory",
		}
	}

	fn input_schema(self) -> Value {
		let path = json!({ "type": "string", "description": "Absolute path, or relative to the server root." });
		let (properties, required) = match self {
			Tool::ReadFile => (
				json!({
					"path": path,
					"encoding": { "type": "string", "enum": ["utf-8", "latin-1"], "description": "Decode strictly with this encoding." }
				}),
				vec!["path"],
			),
			Tool::WriteFile => (
				json!({
					"path": path,
					"content": { "type": "string" },
					"overwrite": { "type": "boolean", "default": true }
				}),
				vec!["path", "content"],
			),
			Tool::AppendFile => (
				json!({
					"path": path,
					"content": { "type": "string" }
				}),
				vec!["path", "content"],
			),
			Tool::CopyFile | Tool::MoveFile => (
				json!({
					"source": path,
					"destination": path
				}),
				vec!["source", "destination"],
			),
			Tool::WriteJsonFile => (
				json!({
					"path": path,
					"value": { "description": "Any JSON value." },
					"overwrite": { "type": "boolean", "default": true }
				}),
				vec!["path", "value"],
			),
			Tool::DeleteFolder => (
				json!({
					"path": path,
					"recursive": { "type": "boolean", "default": false }
				}),
				vec!["path"],
			),
			Tool::FindFiles => (
				json!({
					"pattern": { "type": "string", "description": "Glob matched against file names, e.g. *.txt" },
					"root": path
				}),
				vec!["pattern", "root"],
			),
			Tool::SearchInFiles => (
				json!({
					"term": { "type": "string", "description": "Literal, case-sensitive text." },
					"file_pattern": { "type": "string", "description": "Glob selecting which files to scan." },
					"root": path
				}),
				vec!["term", "file_pattern", "root"],
			),
			Tool::DeleteFile | Tool::ReadJsonFile | Tool::ListDirectory | Tool::CreateFolder | Tool::GetFileInfo => (
				json!({
					"path": path
				}),
				vec!["path"],
			),
		};
		json!({
			"type": "object",
			"properties": properties,
			"required": required,
			"additionalProperties": false
		})
	}

	pub fn definition(self) -> Value {
		json!({
			"name": self.name(),
			"description": self.description(),
			"annotations": {
				"group": "filesystem",
				"readOnlyHint": self.is_read_only()
			},
			"inputSchema": self.input_schema()
		})
	}

	pub fn is_read_only(self) -> bool {
		matches!(
			self,
			Tool::ReadFile | Tool::ReadJsonFile | Tool::ListDirectory | Tool::FindFiles | Tool::SearchInFiles | Tool::GetFileInfo
		)
	}

	/// Runs the tool. Never fails: every outcome is folded into the envelope.
	pub async fn call(self, base: &Path, args: &Value, cancel: &CancellationToken) -> Envelope {
		Envelope::from_result(self.dispatch(base, args, cancel).await)
	}

	async fn dispatch(self, base: &Path, args: &Value, cancel: &CancellationToken) -> FsResult<Value> {
		match self {
			Tool::ReadFile => {
				let path = path_arg(base, args, "path")?;
				let encoding = match optional_str(args, "encoding")? {
					Some(label) => Some(Encoding::parse(label)?),
					None => None,
				};
				to_value(fs::read_file(&path, encoding).await?)
			}
			Tool::WriteFile => {
				let path = path_arg(base, args, "path")?;
				let content = required_str(args, "content")?;
				let overwrite = optional_bool(args, "overwrite", true)?;
				fs::write_file(&path, content, overwrite).await
			}
			Tool::AppendFile => {
				let path = path_arg(base, args, "path")?;
				let content = required_str(args, "content")?;
				fs::append_file(&path, content).await
			}
			Tool::DeleteFile => fs::delete_file(&path_arg(base, args, "path")?).await,
			Tool::CopyFile => {
				let source = path_arg(base, args, "source")?;
				let destination = path_arg(base, args, "destination")?;
				fs::copy_file(&source, &destination).await
			}
			Tool::MoveFile => {
				let source = path_arg(base, args, "source")?;
				let destination = path_arg(base, args, "destination")?;
				fs::move_file(&source, &destination).await
			}
			Tool::ReadJsonFile => fs::read_json_file(&path_arg(base, args, "path")?).await,
			Tool::WriteJsonFile => {
				let path = path_arg(base, args, "path")?;
				let value = args.get("value").ok_or_else(|| FsError::invalid("value is required"))?;
				let overwrite = optional_bool(args, "overwrite", true)?;
				fs::write_json_file(&path, value, overwrite).await
			}
			Tool::ListDirectory => to_value(fs::list_directory(&path_arg(base, args, "path")?).await?),
			Tool::CreateFolder => fs::create_folder(&path_arg(base, args, "path")?).await,
			Tool::DeleteFolder => {
				let path = path_arg(base, args, "path")?;
				let recursive = optional_bool(args, "recursive", false)?;
				fs::delete_folder(&path, recursive).await
			}
			Tool::FindFiles => {
				let pattern = required_str(args, "pattern")?;
				let root = path_arg(base, args, "root")?;
				to_value(search::find_files(pattern, &root, cancel).await?)
			}
			Tool::SearchInFiles => {
				let term = required_str(args, "term")?;
				let file_pattern = required_str(args, "file_pattern")?;
				let root = path_arg(base, args, "root")?;
				to_value(search::search_in_files(term, file_pattern, &root, cancel).await?)
			}
			Tool::GetFileInfo => to_value(fs::get_file_info(&path_arg(base, args, "path")?).await?),
		}
	}
}

pub fn tool_definitions() -> Vec<Value> {
	Tool::ALL
		.iter()
		.map(|tool| tool.definition())
		.collect()
}

fn to_value(value: impl Serialize) -> FsResult<Value> {
	serde_json::to_value(value).map_err(|err| FsError::new(ErrorKind::Unknown, format!("failed to serialize result: {}", err)))
}

fn path_arg(base: &Path, args: &Value, key: &str) -> FsResult<PathBuf> {
	let raw = required_str(args, key)?;
	if raw.trim().is_empty() {
		return Err(FsError::invalid(format!("{} must not be empty", key)));
	}
	Ok(resolve(base, raw))
}

fn required_str<'a>(args: &'a Value, key: &str) -> FsResult<&'a str> {
	optional_str(args, key)?.ok_or_else(|| FsError::invalid(format!("{} is required", key)))
}

fn optional_str<'a>(args: &'a Value, key: &str) -> FsResult<Option<&'a str>> {
	match args.get(key) {
		None | Some(Value::Null) => Ok(None),
		Some(Value::String(text)) => Ok(Some(text.as_str())),
		Some(_) => Err(FsError::invalid(format!("{} must be a string", key))),
	}
}

fn optional_bool(args: &Value, key: &str, default: bool) -> FsResult<bool> {
	match args.get(key) {
		None | Some(Value::Null) => Ok(default),
		Some(Value::Bool(flag)) => Ok(*flag),
		Some(_) => Err(FsError::invalid(format!("{} must be a boolean", key))),
	}
}
