use serde_json::Value;
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

use crate::util::parse_bool_flag;

const DEBUG_PAYLOAD_ENV: &str = "CODEBENCH_DEBUG_PAYLOAD";
const LOG_FILTER_ENV: &str = "CODEBENCH_LOG";
const LOG_PATH_ENV: &str = "CODEBENCH_LOG_PATH";
const DEFAULT_LOG_FILTER: &str = "warn";

/// Installs the global tracing subscriber. Records go to `CODEBENCH_LOG_PATH`
/// when set, otherwise to stderr. Safe to call more than once.
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_env(LOG_FILTER_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let result = match resolve_log_path() {
        Some(path) => match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => builder
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .try_init(),
            Err(error) => {
                eprintln!("cannot open log file {path}: {error}");
                builder.with_writer(std::io::stderr).try_init()
            }
        },
        None => builder.with_writer(std::io::stderr).try_init(),
    };
    // A subscriber is already installed (tests, embedding hosts).
    let _ = result;
}

pub fn debug_payload_enabled() -> bool {
    std::env::var(DEBUG_PAYLOAD_ENV)
        .ok()
        .and_then(parse_bool_flag)
        .unwrap_or(false)
}

pub fn emit_debug_payload(request_url: &str, payload: &Value) {
    let formatted_payload = serde_json::to_string_pretty(payload)
        .unwrap_or_else(|_| "<payload serialization error>".to_string());
    tracing::info!(url = %request_url, "request payload:\n{formatted_payload}");
}

pub fn emit_sse_parse_error(
    event_type: Option<&str>,
    json_data: &str,
    parse_error: &serde_json::Error,
) {
    tracing::warn!(
        event_type = event_type.unwrap_or("<none>"),
        error = %parse_error,
        "dropping unparseable stream event: {json_data}"
    );
}

fn resolve_log_path() -> Option<String> {
    std::env::var(LOG_PATH_ENV)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
