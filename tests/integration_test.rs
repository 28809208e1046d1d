use codebench::config::{Config, DEFAULT_EVAL_TIMEOUT, DEFAULT_MODEL};
use codebench::Language;
use std::sync::Mutex;
use std::time::Duration;

static ENV_LOCK: Mutex<()> = Mutex::new(());

const ENV_KEYS: &[&str] = &[
    "CODEBENCH_API_KEY",
    "CODEBENCH_API_URL",
    "CODEBENCH_MODEL",
    "CODEBENCH_API_PROTOCOL",
    "CODEBENCH_MAX_TOKENS",
    "CODEBENCH_REQUEST_TIMEOUT_SECS",
    "CODEBENCH_EVAL_TIMEOUT_MS",
    "CODEBENCH_MEMORY_LIMIT_MB",
    "CODEBENCH_LANGUAGE",
];

fn clear_env() {
    for key in ENV_KEYS {
        std::env::remove_var(key);
    }
}

#[test]
fn test_config_validation_rejects_invalid_models_for_remote_api() {
    let config = Config {
        api_key: Some("test-key".to_string()),
        model: "local/mock-model".to_string(),
        api_url: "https://api.anthropic.com/v1/messages".to_string(),
        ..Config::default()
    };

    assert!(config.validate().is_err());
}

#[test]
fn test_config_validation_allows_local_endpoint_without_api_key() {
    let config = Config {
        api_key: None,
        model: "local/llama3.3".to_string(),
        api_url: "http://localhost:8000/v1/messages".to_string(),
        ..Config::default()
    };

    assert!(config.validate().is_ok());
}

#[test]
fn test_config_validation_requires_key_for_remote_api() {
    let config = Config::default();
    assert!(config.validate().is_err());
}

#[test]
fn test_config_validation_rejects_unknown_protocol() {
    let config = Config {
        api_key: Some("test-key".to_string()),
        api_protocol: Some("grpc".to_string()),
        ..Config::default()
    };
    assert!(config.validate().is_err());
}

#[test]
fn test_config_load_reads_environment() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    clear_env();
    std::env::set_var("CODEBENCH_API_KEY", "secret");
    std::env::set_var("CODEBENCH_LANGUAGE", "py");
    std::env::set_var("CODEBENCH_REQUEST_TIMEOUT_SECS", "30");
    std::env::set_var("CODEBENCH_MAX_TOKENS", "2048");

    let config = Config::load().expect("config loads");
    clear_env();

    assert_eq!(config.api_key.as_deref(), Some("secret"));
    assert_eq!(config.model, DEFAULT_MODEL);
    assert_eq!(config.language, Language::Python);
    assert_eq!(config.request_timeout, Some(Duration::from_secs(30)));
    assert_eq!(config.eval_timeout, Some(DEFAULT_EVAL_TIMEOUT));
    assert_eq!(config.max_tokens, Some(2048));
}

#[test]
fn test_config_load_rejects_bad_values() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    clear_env();

    std::env::set_var("CODEBENCH_LANGUAGE", "cobol");
    assert!(Config::load().is_err());
    clear_env();

    std::env::set_var("CODEBENCH_MAX_TOKENS", "lots");
    assert!(Config::load().is_err());
    clear_env();
}
