use codebench::api::mock_client::MockProvider;
use codebench::api::GenerateRequest;
use codebench::flow::{
    DefinitionError, Field, FlowError, FlowInvoker, FlowRegistry, ProviderError, Schema,
};
use codebench::{Workbench, WorkbenchOptions};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn review_registry() -> FlowRegistry {
    let mut registry = FlowRegistry::new();
    registry
        .define(
            "review",
            Schema::object()
                .field(Field::text("code"))
                .field(Field::object(
                    "meta",
                    Schema::object().field(Field::text("author")),
                )),
            Schema::object()
                .field(Field::number("score"))
                .field(Field::boolean("approved"))
                .field(Field::text("comment").optional()),
            "Review code by {{meta.author}}:\n{{code}}",
        )
        .expect("review flow is valid");
    registry
}

#[test]
fn test_registration_rejects_template_referencing_unknown_field() {
    let mut registry = FlowRegistry::new();
    let err = registry
        .define(
            "broken",
            Schema::object().field(Field::text("code")),
            Schema::object().field(Field::text("answer")),
            "{{code}} and {{missing}}",
        )
        .unwrap_err();
    assert!(matches!(err, DefinitionError::UnknownPlaceholder { .. }));
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_nested_placeholders_render_and_optional_output_fields_pass() {
    let provider = MockProvider::new().with_structured(json!({ "score": 7, "approved": true }));
    let invoker = FlowInvoker::new(review_registry(), Arc::new(provider.clone()), None);

    let output = invoker
        .invoke(
            "review",
            json!({ "code": "let x;", "meta": { "author": "sam" } }),
            &CancellationToken::new(),
        )
        .await
        .expect("review succeeds");

    assert_eq!(output["score"], 7);
    let request: GenerateRequest = provider.requests().remove(0);
    assert_eq!(request.prompt, "Review code by sam:\nlet x;");
    assert!(request.output_schema.is_some());
    assert!(request.history.is_empty());
}

#[tokio::test]
async fn test_nested_input_violation_names_the_path() {
    let provider = MockProvider::new();
    let invoker = FlowInvoker::new(review_registry(), Arc::new(provider.clone()), None);

    let err = invoker
        .invoke(
            "review",
            json!({ "code": "let x;", "meta": { "author": 3 } }),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    match err {
        FlowError::InputValidation { source, .. } => {
            assert_eq!(source.paths(), vec!["meta.author"]);
        }
        other => panic!("expected input validation, got {other:?}"),
    }
    assert_eq!(provider.request_count(), 0);
}

#[tokio::test]
async fn test_output_type_mismatch_is_reported() {
    let provider = MockProvider::new().with_structured(json!({ "score": "high", "approved": true }));
    let invoker = FlowInvoker::new(review_registry(), Arc::new(provider), None);

    let err = invoker
        .invoke(
            "review",
            json!({ "code": "x", "meta": { "author": "a" } }),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(err.is_output_validation());
}

#[tokio::test]
async fn test_provider_errors_pass_through() {
    let provider = MockProvider::new().with_error(ProviderError::Status {
        url: "https://example.test".to_string(),
        status: 429,
        message: "rate limited".to_string(),
    });
    let invoker = FlowInvoker::new(review_registry(), Arc::new(provider), None);

    let err = invoker
        .invoke(
            "review",
            json!({ "code": "x", "meta": { "author": "a" } }),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        FlowError::Provider(ProviderError::Status { status: 429, .. })
    ));
}

#[tokio::test]
async fn test_workbench_chat_streams_deltas() {
    let provider = MockProvider::new().with_sse(vec![
        "data: {\"choices\":[{\"delta\":{\"content\":\"It \"}}]}".to_string(),
        "data: {\"choices\":[{\"delta\":{\"content\":\"greets.\"},\"finish_reason\":\"stop\"}]}"
            .to_string(),
        "data: [DONE]".to_string(),
    ]);
    let mut bench =
        Workbench::new(Arc::new(provider), WorkbenchOptions::default()).expect("workbench");
    let (tx, mut rx) = mpsc::unbounded_channel();

    let reply = bench
        .send_chat_message("What does it do?", Some(&tx))
        .await
        .expect("reply");
    drop(tx);

    let mut pieces = Vec::new();
    while let Some(piece) = rx.recv().await {
        pieces.push(piece);
    }
    assert_eq!(reply, "It greets.");
    assert_eq!(pieces, vec!["It ", "greets."]);
    assert_eq!(bench.chat().last_reply(), Some("It greets."));
}
