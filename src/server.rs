use crate::envelope::Envelope;
use crate::paths::normalize_path;
use crate::protocol::{Request, Response};
use crate::tools::{tool_definitions, Tool};
use anyhow::{anyhow, Result};
use opentelemetry::global;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::resource::Resource;
use opentelemetry_sdk::trace as sdktrace;
use opentelemetry_semantic_conventions::resource as semconv;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument, Span};
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const DEFAULT_PROTOCOL_VERSION: &str = "2024-11-05";

#[derive(Debug)]
struct ProtocolError {
	code: i64,
	message: String,
}

impl ProtocolError {
	fn new(code: i64, message: impl Into<String>) -> Self {
		Self {
			code,
			message: message.into()
		}
	}
}

impl std::fmt::Display for ProtocolError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.message)
	}
}

impl std::error::Error for ProtocolError {}

#[derive(Clone, Debug)]
pub struct Config {
	/// Base directory for relative paths. Absolute paths are used as given.
	pub root: PathBuf,
	pub otel_enabled: bool,
	pub otel_endpoint: String,
	pub otel_service_name: String,
	pub session_id: String,
}

pub fn load_config() -> Result<Config> {
	let mut root: Option<String> = None;
	let mut config_path: Option<String> = None;
	let mut otel_enabled: Option<bool> = None;
	let mut otel_endpoint: Option<String> = None;
	let mut otel_service_name: Option<String> = None;
	let mut print_schema = false;
	let mut args = std::env::args().skip(1);
	while let Some(arg) = args.next() {
		match arg.as_str() {
			"--root" => {
				let value = args.next().ok_or_else(|| anyhow!("--root requires a value"))?;
				root = Some(value);
			}
			"--config" => {
				let value = args.next().ok_or_else(|| anyhow!("--config requires a value"))?;
				config_path = Some(value);
			}
			"--print-config-schema" => {
				print_schema = true;
			}
			"--otel-enabled" => {
				let value = args.next().ok_or_else(|| anyhow!("--otel-enabled requires a value"))?;
				otel_enabled = Some(parse_bool(&value, "--otel-enabled")?);
			}
			"--otel-endpoint" => {
				let value = args.next().ok_or_else(|| anyhow!("--otel-endpoint requires a value"))?;
				otel_endpoint = Some(value);
			}
			"--otel-service-name" => {
				let value = args.next().ok_or_else(|| anyhow!("--otel-service-name requires a value"))?;
				otel_service_name = Some(value);
			}
			_ => return Err(anyhow!("unknown argument: {}", arg)),
		}
	}
	if print_schema {
		let payload = serde_json::to_string_pretty(&config_schema())?;
		println!("{}", payload);
		std::process::exit(0);
	}
	let root = root.or_else(|| env_value("MCP_ROOT"));
	let config_path = config_path.or_else(|| env_value("MCP_CONFIG"));
	let otel_enabled = match otel_enabled {
		Some(enabled) => enabled,
		None => match env_value("MCP_OTEL_ENABLED") {
			Some(value) => parse_bool(&value, "MCP_OTEL_ENABLED")?,
			None => false,
		},
	};
	let otel_endpoint = otel_endpoint
		.or_else(|| env_value("MCP_OTEL_ENDPOINT"))
		.unwrap_or_else(|| String::from("http://127.0.0.1:4317"));
	let otel_service_name = otel_service_name
		.or_else(|| env_value("MCP_OTEL_SERVICE_NAME"))
		.unwrap_or_else(|| String::from("mcp-fm"));
	let cwd = std::env::current_dir()?;
	let root = match root {
		Some(value) => normalize_root_path(&value, &cwd)?,
		None => cwd.clone(),
	};
	let base = Config {
		root,
		otel_enabled,
		otel_endpoint,
		otel_service_name,
		session_id: uuid::Uuid::new_v4().to_string(),
	};
	if let Some(path) = config_path {
		let override_value = load_config_value(&path)?;
		return apply_config_override(base, &override_value, &cwd);
	}
	Ok(base)
}

fn env_value(key: &str) -> Option<String> {
	std::env::var(key)
		.ok()
		.filter(|value| !value.trim().is_empty())
}

pub fn init_tracing(config: &Config) {
	let _ = global::set_error_handler(|_| {});
	let resource = Resource::new(
		vec![
		opentelemetry::KeyValue::new(semconv::SERVICE_NAME, config.otel_service_name.clone()),
		opentelemetry::KeyValue::new(semconv::SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
		opentelemetry::KeyValue::new("mcp.session_id", config.session_id.clone()),
		opentelemetry::KeyValue::new("mcp.root", config.root.display().to_string()),
		]
	);
	let tracing_layer = if config.otel_enabled {
		let exporter = opentelemetry_otlp::new_exporter().tonic().with_endpoint(config.otel_endpoint.clone());
		let provider = opentelemetry_otlp::new_pipeline()
			.tracing()
			.with_exporter(exporter)
			.with_trace_config(sdktrace::Config::default().with_resource(resource))
			.install_batch(opentelemetry_sdk::runtime::Tokio)
			.ok();
		if let Some(provider) = provider {
			let tracer = provider.tracer(config.otel_service_name.clone());
			global::set_tracer_provider(provider);
			Some(OpenTelemetryLayer::new(tracer))
		}
		else {
			None
		}
	}
	else {
		None
	};
	// stdout carries the protocol, so logs go to stderr.
	let fmt_layer = tracing_subscriber::fmt::layer()
		.with_target(false)
		.with_writer(std::io::stderr);
	let subscriber = tracing_subscriber::registry().with(fmt_layer);
	if let Some(layer) = tracing_layer {
		subscriber.with(layer).init();
	}
	else {
		subscriber.init();
	}
}

type InFlight = Arc<Mutex<HashMap<String, CancellationToken>>>;

/// Reads line-delimited JSON-RPC from stdin. Each request runs in its own task;
/// a single writer task serializes responses onto stdout.
pub async fn run(config: Config) -> Result<()> {
	let stdin = io::stdin();
	let mut reader = BufReader::new(stdin).lines();
	let (tx, mut rx) = mpsc::unbounded_channel::<Response>();
	let writer_task = tokio::spawn(
		async move {
			let mut writer = io::BufWriter::new(io::stdout());
			while let Some(resp) = rx.recv().await {
				write_response(&mut writer, resp).await?;
			}
			Ok::<(), anyhow::Error>(())
		}
	);
	let inflight: InFlight = Arc::new(Mutex::new(HashMap::new()));
	let mut config = Arc::new(config);
	let mut tasks = JoinSet::new();
	while let Some(line) = reader.next_line().await? {
		if line.trim().is_empty() {
			continue;
		}
		let req: Request = match serde_json::from_str(&line) {
			Ok(req) => req,
			Err(err) => {
				let _ = tx.send(Response::err(Value::Null, -32700, err.to_string()));
				continue;
			}
		};
		if req.is_notification() {
			if req.method == "notifications/cancelled" {
				cancel_request(&inflight, &req.params);
			}
			continue;
		}
		if req.method == "initialize" {
			if let Err(err) = apply_initialize_config(Arc::make_mut(&mut config), &req) {
				let resp = match err.downcast_ref::<ProtocolError>() {
					Some(protocol) => Response::err(req.id.clone(), protocol.code, protocol.message.clone()),
					None => Response::err(req.id.clone(), -32000, err.to_string()),
				};
				let _ = tx.send(resp);
				continue;
			}
		}
		let key = req.id.to_string();
		let token = CancellationToken::new();
		lock(&inflight).insert(key.clone(), token.clone());
		let tx = tx.clone();
		let config = Arc::clone(&config);
		let inflight = Arc::clone(&inflight);
		tasks.spawn(
			async move {
				let resp = handle_request(&config, req, &token).await;
				lock(&inflight).remove(&key);
				let _ = tx.send(resp);
			}
		);
		while tasks.try_join_next().is_some() {}
	}
	while tasks.join_next().await.is_some() {}
	drop(tx);
	writer_task.await??;
	Ok(())
}

fn lock(inflight: &InFlight) -> std::sync::MutexGuard<'_, HashMap<String, CancellationToken>> {
	inflight.lock().unwrap_or_else(PoisonError::into_inner)
}

fn cancel_request(inflight: &InFlight, params: &Value) {
	let Some(request_id) = params.get("requestId") else {
		return;
	};
	let key = request_id.to_string();
	if let Some(token) = lock(inflight).get(&key) {
		debug!(request_id = %key, "cancelling request");
		token.cancel();
	}
}

fn apply_initialize_config(config: &mut Config, req: &Request) -> Result<()> {
	let Some(value) = req.params
		.get("capabilities")
		.and_then(|caps| caps.get("experimental"))
		.and_then(|exp| exp.get("configuration")) else {
		return Ok(());
	};
	let cwd = std::env::current_dir()?;
	let updated = apply_config_override(config.clone(), value, &cwd)
		.map_err(|err| ProtocolError::new(-32602, err.to_string()))?;
	*config = updated;
	Ok(())
}

async fn handle_request(config: &Config, req: Request, cancel: &CancellationToken) -> Response {
	let tool_name = extract_tool_name(&req.method, &req.params);
	let span = info_span!(
		"mcp.request",
		"mcp.session_id" = %config.session_id,
		"mcp.method" = %req.method,
		"mcp.tool_name" = tool_name.as_deref().unwrap_or(""),
		"mcp.is_error" = tracing::field::Empty,
		"mcp.error_kind" = tracing::field::Empty,
		"mcp.count" = tracing::field::Empty,
		"mcp.response_bytes" = tracing::field::Empty,
	);
	async move {
		match route(config, &req, cancel).await {
			Ok(value) => {
				record_result(&Span::current(), &value);
				Response::ok(req.id, value)
			}
			Err(err) => {
				warn!(error = %err, "request failed");
				match err.downcast_ref::<ProtocolError>() {
					Some(protocol) => Response::err(req.id, protocol.code, protocol.message.clone()),
					None => Response::err(req.id, -32000, err.to_string()),
				}
			}
		}
	}.instrument(span).await
}

async fn route(config: &Config, req: &Request, cancel: &CancellationToken) -> Result<Value> {
	match req.method.as_str() {
		"initialize" => {
			let version = req.params
				.get("protocolVersion")
				.and_then(Value::as_str)
				.unwrap_or(DEFAULT_PROTOCOL_VERSION);
			Ok(json!({
				"protocolVersion": version,
				"serverInfo": {
					"name": "mcp-fm",
					"version": env!("CARGO_PKG_VERSION")
				},
				"configSchema": config_schema(),
				"capabilities": {
					"tools": {
						"listChanged": false
					}
				}
			}))
		}
		"ping" => Ok(json!({})),
		"tools/list" => Ok(json!({
			"tools": tool_definitions(),
		})),
		"tools/call" => {
			let name = req.params
				.get("name")
				.and_then(Value::as_str)
				.ok_or_else(|| ProtocolError::new(-32602, "name is required"))?;
			let tool = Tool::from_name(name).ok_or_else(|| ProtocolError::new(-32602, format!("unknown tool: {}", name)))?;
			let arguments = req.params
				.get("arguments")
				.cloned()
				.unwrap_or_else(|| json!({}));
			if !arguments.is_object() {
				return Err(ProtocolError::new(-32602, "arguments must be an object").into());
			}
			let envelope = tool.call(&config.root, &arguments, cancel).await;
			Ok(tool_result(tool, &envelope))
		}
		_ => Err(ProtocolError::new(-32601, "method not found").into()),
	}
}

fn tool_result(tool: Tool, envelope: &Envelope) -> Value {
	json!({
		"structuredContent": envelope,
		"content": [
			{
				"type": "text",
				"text": tool_message(tool, envelope)
			}
		],
		"isError": !envelope.is_success()
	})
}

/// Human-readable rendering of an envelope for the `content` block.
fn tool_message(tool: Tool, envelope: &Envelope) -> String {
	if let Some(error) = envelope.error() {
		return error.message.clone();
	}
	let data = envelope.data().unwrap_or(&Value::Null);
	let text = |key: &str| data.get(key)
		.and_then(Value::as_str)
		.unwrap_or("")
		.to_string();
	let number = |key: &str| data.get(key)
		.and_then(Value::as_u64)
		.unwrap_or(0);
	match tool {
		Tool::ReadFile => text("content"),
		Tool::WriteFile => format!("Successfully wrote {} bytes to {}", number("bytesWritten"), text("path")),
		Tool::WriteJsonFile => format!("Successfully wrote JSON data to {} ({} bytes)", text("path"), number("bytesWritten")),
		Tool::AppendFile => format!("Successfully appended {} bytes to {}", number("bytesAppended"), text("path")),
		Tool::DeleteFile => format!("Successfully deleted file: {}", text("deleted")),
		Tool::CopyFile => format!("Successfully copied {} to {}", text("copiedFrom"), text("copiedTo")),
		Tool::MoveFile => format!("Successfully moved {} to {}", text("movedFrom"), text("movedTo")),
		Tool::CreateFolder => format!("Successfully created folder: {}", text("created")),
		Tool::DeleteFolder => format!(
			"Successfully deleted folder: {} (recursive: {})",
			text("deleted"),
			data.get("recursive").and_then(Value::as_bool).unwrap_or(false)
		),
		Tool::ReadJsonFile | Tool::GetFileInfo => serde_json::to_string_pretty(data).unwrap_or_default(),
		Tool::ListDirectory => listing_table(data),
		Tool::FindFiles => {
			let paths: Vec<&str> = data.as_array()
				.map(|items| items.iter().filter_map(Value::as_str).collect())
				.unwrap_or_default();
			if paths.is_empty() {
				"No files found matching the pattern.".to_string()
			}
			else {
				paths.join("\n")
			}
		}
		Tool::SearchInFiles => {
			let mut lines = Vec::new();
			for found in data.as_array().map(Vec::as_slice).unwrap_or_default() {
				let path = found.get("path")
					.and_then(Value::as_str)
					.unwrap_or("");
				for matched in found.get("matchedLines")
					.and_then(Value::as_array)
					.map(Vec::as_slice)
					.unwrap_or_default() {
					let line_number = matched.get("lineNumber")
						.and_then(Value::as_u64)
						.unwrap_or(0);
					let line = matched.get("text")
						.and_then(Value::as_str)
						.unwrap_or("");
					lines.push(format!("{}:{}: {}", path, line_number, line));
				}
			}
			if lines.is_empty() {
				"Search term not found in any matching files.".to_string()
			}
			else {
				lines.join("\n")
			}
		}
	}
}

fn listing_table(data: &Value) -> String {
	let entries = data.as_array()
		.map(Vec::as_slice)
		.unwrap_or_default();
	if entries.is_empty() {
		return "Directory is empty.".to_string();
	}
	let mut lines = vec![
		format!("{:<9} {:>10} {:<10} {}", "Type", "Size", "Modified", "Name"),
		format!("{:<9} {:>10} {:<10} {}", "-".repeat(9), "-".repeat(10), "-".repeat(10), "-".repeat(4)),
	];
	for entry in entries {
		let kind = entry.get("kind")
			.and_then(Value::as_str)
			.unwrap_or("");
		let size = entry.get("sizeBytes")
			.and_then(Value::as_u64)
			.map(|size| size.to_string())
			.unwrap_or_else(|| "-".to_string());
		let modified = entry.get("modifiedAt")
			.and_then(Value::as_str)
			.and_then(|stamp| stamp.split('T').next())
			.unwrap_or("");
		let name = entry.get("name")
			.and_then(Value::as_str)
			.unwrap_or("");
		lines.push(format!("{:<9} {:>10} {:<10} {}", kind, size, modified, name));
	}
	lines.join("\n")
}

fn config_schema() -> Value {
	json!({
		"$schema": "http://json-schema.org/draft-07/schema#",
		"title": "mcp-fm configuration",
		"type": "object",
		"additionalProperties": false,
		"properties": {
			"root": {
				"type": "string",
				"description": "Base directory for relative paths. Not a sandbox: absolute paths are used as given."
			},
			"otel_enabled": {
				"type": "boolean",
				"description": "Enable tracing export.",
				"scope": "configuration"
			},
			"otel_endpoint": {
				"type": "string",
				"description": "OTLP endpoint.",
				"scope": "configuration"
			},
			"otel_service_name": {
				"type": "string",
				"description": "OTEL service.name.",
				"scope": "configuration"
			}
		}
	})
}

fn load_config_value(path: &str) -> Result<Value> {
	let content = std::fs::read_to_string(path)
		.map_err(|err| anyhow!("failed to read config {}: {}", path, err))?;
	let value: Value = serde_json::from_str(&content)
		.map_err(|err| anyhow!("failed to parse config {}: {}", path, err))?;
	Ok(value)
}

fn apply_config_override(base: Config, value: &Value, cwd: &Path) -> Result<Config> {
	let obj = value.as_object().ok_or_else(|| anyhow!("config must be an object"))?;
	let mut next = base;
	for (key, value) in obj {
		match key.as_str() {
			"root" => {
				if !value.is_null() {
					let root = value.as_str().ok_or_else(|| anyhow!("root must be a string"))?;
					next.root = normalize_root_path(root, cwd)?;
				}
			}
			"otel_enabled" => {
				if !value.is_null() {
					next.otel_enabled = value.as_bool().ok_or_else(|| anyhow!("otel_enabled must be a boolean"))?;
				}
			}
			"otel_endpoint" => {
				if !value.is_null() {
					next.otel_endpoint = value.as_str().ok_or_else(|| anyhow!("otel_endpoint must be a string"))?.to_string();
				}
			}
			"otel_service_name" => {
				if !value.is_null() {
					next.otel_service_name = value.as_str().ok_or_else(|| anyhow!("otel_service_name must be a string"))?.to_string();
				}
			}
			_ => return Err(anyhow!("unknown config key: {}", key)),
		}
	}
	Ok(next)
}

fn normalize_root_path(path: &str, cwd: &Path) -> Result<PathBuf> {
	let mut root_path = PathBuf::from(path);
	if !root_path.is_absolute() {
		root_path = cwd.join(root_path);
	}
	let normalized = normalize_path(&root_path);
	if !normalized.is_dir() {
		return Err(anyhow!("root is not a directory: {}", normalized.display()));
	}
	Ok(normalized.canonicalize().unwrap_or(normalized))
}

fn parse_bool(value: &str, label: &str) -> Result<bool> {
	let value = value.trim().to_lowercase();
	match value.as_str() {
		"1" | "true" | "yes" | "on" => Ok(true),
		"0" | "false" | "no" | "off" => Ok(false),
		_ => Err(anyhow!("{} must be a boolean", label)),
	}
}

fn extract_tool_name(method: &str, params: &Value) -> Option<String> {
	if method != "tools/call" {
		return None;
	}
	params.get("name")
		.and_then(Value::as_str)
		.map(|value| value.to_string())
}

fn record_result(span: &Span, result: &Value) {
	let response_bytes = serde_json::to_string(result).map(|value| value.as_bytes().len() as u64).ok();
	if let Some(bytes) = response_bytes {
		span.record("mcp.response_bytes", bytes);
	}
	let is_error = result.get("isError")
		.and_then(Value::as_bool)
		.unwrap_or(false);
	span.record("mcp.is_error", is_error);
	let structured = result.get("structuredContent");
	if let Some(kind) = structured
		.and_then(|value| value.get("error"))
		.and_then(|error| error.get("kind"))
		.and_then(Value::as_str) {
		span.record("mcp.error_kind", kind);
	}
	if let Some(count) = structured
		.and_then(|value| value.get("data"))
		.and_then(Value::as_array)
		.map(|items| items.len() as u64) {
		span.record("mcp.count", count);
	}
}

async fn write_response(writer: &mut io::BufWriter<io::Stdout>, resp: Response) -> Result<()> {
	let line = serde_json::to_string(&resp)?;
	writer.write_all(line.as_bytes()).await?;
	writer.write_all(b"\n").await?;
	writer.flush().await?;
	Ok(())
}
