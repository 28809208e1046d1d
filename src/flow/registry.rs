use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::error::{DefinitionError, FlowError, ProviderError};
use super::schema::{Schema, ValidationError, Violation};
use super::template::PromptTemplate;
use crate::api::{GenerateRequest, Generation, ModelProvider};
use crate::types::ChatMessage;
use crate::util::strip_code_fence;

/// A named contract: input shape, output shape and the prompt that links them.
#[derive(Debug)]
pub struct FlowDefinition {
    name: String,
    input_schema: Schema,
    output_schema: Schema,
    template: PromptTemplate,
}

impl FlowDefinition {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn input_schema(&self) -> &Schema {
        &self.input_schema
    }

    pub fn output_schema(&self) -> &Schema {
        &self.output_schema
    }
}

#[derive(Debug, Default)]
pub struct FlowRegistry {
    flows: BTreeMap<String, Arc<FlowDefinition>>,
}

impl FlowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a flow. All structural checks happen here so that a
    /// registered flow can only fail at invocation time on bad data.
    pub fn define(
        &mut self,
        name: impl Into<String>,
        input_schema: Schema,
        output_schema: Schema,
        template: &str,
    ) -> Result<Arc<FlowDefinition>, DefinitionError> {
        let name = name.into();
        if self.flows.contains_key(&name) {
            return Err(DefinitionError::DuplicateFlow(name));
        }

        for schema in [&input_schema, &output_schema] {
            if let Some(field) = schema.duplicate_field() {
                return Err(DefinitionError::DuplicateField { flow: name, field });
            }
        }

        let template = PromptTemplate::parse(template).map_err(|source| {
            DefinitionError::MalformedTemplate {
                flow: name.clone(),
                source,
            }
        })?;

        if let Some(placeholder) = template.unknown_placeholder(&input_schema) {
            return Err(DefinitionError::UnknownPlaceholder {
                flow: name,
                placeholder: placeholder.name(),
            });
        }

        let definition = Arc::new(FlowDefinition {
            name: name.clone(),
            input_schema,
            output_schema,
            template,
        });
        self.flows.insert(name, Arc::clone(&definition));
        Ok(definition)
    }

    pub fn get(&self, name: &str) -> Option<Arc<FlowDefinition>> {
        self.flows.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.flows.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }
}

/// Runs registered flows against a provider.
#[derive(Clone)]
pub struct FlowInvoker {
    registry: Arc<FlowRegistry>,
    provider: Arc<dyn ModelProvider>,
    request_timeout: Option<Duration>,
}

impl FlowInvoker {
    pub fn new(
        registry: FlowRegistry,
        provider: Arc<dyn ModelProvider>,
        request_timeout: Option<Duration>,
    ) -> Self {
        Self {
            registry: Arc::new(registry),
            provider,
            request_timeout,
        }
    }

    pub fn registry(&self) -> &FlowRegistry {
        &self.registry
    }

    /// Validate, render, generate, validate. The returned value always
    /// satisfies the flow's output schema.
    pub async fn invoke(
        &self,
        name: &str,
        input: Value,
        cancel: &CancellationToken,
    ) -> Result<Value, FlowError> {
        let definition = self
            .registry
            .get(name)
            .ok_or_else(|| FlowError::UnknownFlow(name.to_string()))?;

        definition
            .input_schema
            .validate(&input)
            .map_err(|source| FlowError::InputValidation {
                flow: name.to_string(),
                source,
            })?;

        let prompt = definition.template.render(&input);
        let request = GenerateRequest::structured(prompt, definition.output_schema.clone());

        let generation = self
            .bounded(self.provider.generate(&request), cancel)
            .await
            .inspect_err(|error| tracing::warn!(flow = name, %error, "flow invocation failed"))?;

        tracing::debug!(
            flow = name,
            prompt = %request.prompt,
            generation = ?generation,
            "flow invocation completed"
        );

        let output = structured_payload(generation)?;
        definition
            .output_schema
            .validate(&output)
            .map_err(|source| FlowError::OutputValidation {
                flow: name.to_string(),
                source,
            })?;
        Ok(output)
    }

    /// Typed wrapper over [`FlowInvoker::invoke`]. An output that validates
    /// but does not fit `O` is still an output validation failure.
    pub async fn invoke_typed<I, O>(
        &self,
        name: &str,
        input: &I,
        cancel: &CancellationToken,
    ) -> Result<O, FlowError>
    where
        I: Serialize + ?Sized,
        O: DeserializeOwned,
    {
        let input = serde_json::to_value(input).map_err(|error| FlowError::InputValidation {
            flow: name.to_string(),
            source: serde_failure(error),
        })?;
        let output = self.invoke(name, input, cancel).await?;
        serde_json::from_value(output).map_err(|error| FlowError::OutputValidation {
            flow: name.to_string(),
            source: serde_failure(error),
        })
    }

    /// Free-text chat. The provider receives `history` followed by `message`
    /// and nothing is remembered between calls.
    pub async fn chat(
        &self,
        history: &[ChatMessage],
        message: &str,
        deltas: Option<&mpsc::UnboundedSender<String>>,
        cancel: &CancellationToken,
    ) -> Result<String, FlowError> {
        let request = GenerateRequest::chat(history, message);
        tracing::debug!(turns = history.len(), "sending chat message");

        let reply = match deltas {
            Some(deltas) => {
                self.bounded(self.provider.stream_text(&request, deltas), cancel)
                    .await?
            }
            None => self
                .bounded(self.provider.generate(&request), cancel)
                .await?
                .into_text(),
        };
        Ok(reply)
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, ProviderError>>,
        cancel: &CancellationToken,
    ) -> Result<T, FlowError> {
        if cancel.is_cancelled() {
            return Err(FlowError::Cancelled);
        }

        let limited = async {
            match self.request_timeout {
                Some(limit) => match tokio::time::timeout(limit, call).await {
                    Ok(result) => result,
                    Err(_) => Err(ProviderError::Timeout(limit)),
                },
                None => call.await,
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FlowError::Cancelled),
            result = limited => result.map_err(FlowError::from),
        }
    }
}

fn structured_payload(generation: Generation) -> Result<Value, ProviderError> {
    match generation {
        Generation::Structured(value) => Ok(value),
        Generation::Text(text) => serde_json::from_str(strip_code_fence(&text)).map_err(|error| {
            ProviderError::MalformedResponse(format!("reply is not a JSON object: {error}"))
        }),
    }
}

fn serde_failure(error: serde_json::Error) -> ValidationError {
    ValidationError {
        violations: vec![Violation::new("", "value of the declared type", error.to_string())],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock_client::MockProvider;
    use crate::flow::schema::Field;
    use crate::flow::template::TemplateError;
    use serde_json::json;

    fn code_schema() -> Schema {
        Schema::object()
            .field(Field::text("code"))
            .field(Field::text("language"))
    }

    fn explanation_schema() -> Schema {
        Schema::object().field(Field::text("explanation"))
    }

    fn invoker_with(provider: MockProvider) -> FlowInvoker {
        let mut registry = FlowRegistry::new();
        registry
            .define(
                "explain",
                code_schema(),
                explanation_schema(),
                "Explain this {{{language}}}:\n{{{code}}}",
            )
            .unwrap();
        FlowInvoker::new(registry, Arc::new(provider), None)
    }

    #[test]
    fn test_define_rejects_duplicates_and_bad_templates() {
        let mut registry = FlowRegistry::new();
        registry
            .define("a", code_schema(), explanation_schema(), "{{{code}}}")
            .unwrap();

        assert_eq!(
            registry
                .define("a", code_schema(), explanation_schema(), "{{{code}}}")
                .unwrap_err(),
            DefinitionError::DuplicateFlow("a".to_string())
        );
        assert_eq!(
            registry
                .define("b", code_schema(), explanation_schema(), "{{{missing}}}")
                .unwrap_err(),
            DefinitionError::UnknownPlaceholder {
                flow: "b".to_string(),
                placeholder: "missing".to_string(),
            }
        );
        assert_eq!(
            registry
                .define("c", code_schema(), explanation_schema(), "{{{code")
                .unwrap_err(),
            DefinitionError::MalformedTemplate {
                flow: "c".to_string(),
                source: TemplateError::Unclosed { offset: 0 },
            }
        );
        let doubled = Schema::object()
            .field(Field::text("code"))
            .field(Field::number("code"));
        assert!(matches!(
            registry
                .define("d", doubled, explanation_schema(), "{{{code}}}")
                .unwrap_err(),
            DefinitionError::DuplicateField { .. }
        ));
        assert_eq!(registry.names(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_invoke_renders_prompt_and_returns_valid_output() {
        let provider = MockProvider::new().with_structured(json!({ "explanation": "adds" }));
        let invoker = invoker_with(provider.clone());

        let output = invoker
            .invoke(
                "explain",
                json!({ "code": "a + b", "language": "javascript" }),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(output, json!({ "explanation": "adds" }));
        let requests = provider.requests();
        assert_eq!(requests[0].prompt, "Explain this javascript:\na + b");
        assert_eq!(requests[0].output_schema, Some(explanation_schema()));
    }

    #[tokio::test]
    async fn test_invalid_input_never_reaches_provider() {
        let provider = MockProvider::new();
        let invoker = invoker_with(provider.clone());

        let err = invoker
            .invoke("explain", json!({ "code": 7 }), &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            FlowError::InputValidation { source, .. } => {
                assert_eq!(source.paths(), vec!["code", "language"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(provider.request_count(), 0);
    }

    #[tokio::test]
    async fn test_output_contract_is_enforced() {
        let provider = MockProvider::new().with_structured(json!({ "explanation": 3 }));
        let invoker = invoker_with(provider);

        let err = invoker
            .invoke(
                "explain",
                json!({ "code": "x", "language": "javascript" }),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(err.is_output_validation());
    }

    #[tokio::test]
    async fn test_fenced_text_reply_is_parsed() {
        let provider =
            MockProvider::new().with_text("```json\n{\"explanation\": \"fenced\"}\n```");
        let invoker = invoker_with(provider);

        let output = invoker
            .invoke(
                "explain",
                json!({ "code": "x", "language": "javascript" }),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(output["explanation"], "fenced");
    }

    #[tokio::test]
    async fn test_prose_reply_is_malformed() {
        let provider = MockProvider::new().with_text("I think the code adds numbers.");
        let invoker = invoker_with(provider);

        let err = invoker
            .invoke(
                "explain",
                json!({ "code": "x", "language": "javascript" }),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FlowError::Provider(ProviderError::MalformedResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_flow() {
        let invoker = invoker_with(MockProvider::new());
        let err = invoker
            .invoke("nope", json!({}), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, FlowError::UnknownFlow("nope".to_string()));
    }

    #[tokio::test]
    async fn test_typed_output_mismatch_is_output_validation() {
        #[derive(serde::Deserialize, Debug)]
        struct Wrong {
            #[allow(dead_code)]
            lines: u32,
        }

        let provider = MockProvider::new().with_structured(json!({ "explanation": "ok" }));
        let invoker = invoker_with(provider);

        let err = invoker
            .invoke_typed::<_, Wrong>(
                "explain",
                &json!({ "code": "x", "language": "javascript" }),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(err.is_output_validation());
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_timeout_bounds_the_call() {
        let provider = MockProvider::new()
            .with_structured(json!({ "explanation": "late" }))
            .with_delay(Duration::from_secs(30));
        let mut registry = FlowRegistry::new();
        registry
            .define("explain", code_schema(), explanation_schema(), "{{{code}}}")
            .unwrap();
        let invoker = FlowInvoker::new(registry, Arc::new(provider), Some(Duration::from_secs(5)));

        let err = invoker
            .invoke(
                "explain",
                json!({ "code": "x", "language": "javascript" }),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(
            err,
            FlowError::Provider(ProviderError::Timeout(Duration::from_secs(5)))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_aborts_pending_call() {
        let provider = MockProvider::new()
            .with_structured(json!({ "explanation": "late" }))
            .with_delay(Duration::from_secs(30));
        let invoker = invoker_with(provider);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let err = invoker
            .invoke(
                "explain",
                json!({ "code": "x", "language": "javascript" }),
                &cancel,
            )
            .await
            .unwrap_err();
        assert_eq!(err, FlowError::Cancelled);
    }

    #[tokio::test]
    async fn test_chat_sends_history_then_message() {
        let provider = MockProvider::new().with_text("Sure.");
        let invoker = invoker_with(provider.clone());
        let history = vec![ChatMessage::user("hi"), ChatMessage::model("hello")];

        let reply = invoker
            .chat(&history, "help me", None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(reply, "Sure.");
        let request = &provider.requests()[0];
        assert_eq!(request.history, history);
        assert_eq!(request.prompt, "help me");
        assert!(request.output_schema.is_none());
    }
}
