use aho_corasick::{AhoCorasick, MatchKind};
use serde_json::Value;

use super::schema::Schema;

/// A `{{{name}}}` or `{{name}}` token as it appears in the template source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    pub raw: String,
    pub path: Vec<String>,
}

impl Placeholder {
    pub fn name(&self) -> String {
        self.path.join(".")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("placeholder opened at byte {offset} is never closed")]
    Unclosed { offset: usize },

    #[error("'{name}' is not a valid placeholder name")]
    InvalidName { name: String },
}

/// Prompt text with named placeholders, parsed once at flow definition time.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    source: String,
    placeholders: Vec<Placeholder>,
    matcher: Option<AhoCorasick>,
}

impl PromptTemplate {
    pub fn parse(source: impl Into<String>) -> Result<Self, TemplateError> {
        let source = source.into();
        let mut placeholders: Vec<Placeholder> = Vec::new();
        let mut cursor = 0;

        while let Some(found) = source[cursor..].find("{{") {
            let start = cursor + found;
            let close = if source[start..].starts_with("{{{") {
                "}}}"
            } else {
                "}}"
            };
            let inner_start = start + close.len();
            let Some(close_at) = source[inner_start..].find(close) else {
                return Err(TemplateError::Unclosed { offset: start });
            };
            let inner_end = inner_start + close_at;
            let end = inner_end + close.len();

            let name = source[inner_start..inner_end].trim();
            let path = parse_path(name).ok_or_else(|| TemplateError::InvalidName {
                name: name.to_string(),
            })?;

            let raw = &source[start..end];
            if !placeholders.iter().any(|p| p.raw == raw) {
                placeholders.push(Placeholder {
                    raw: raw.to_string(),
                    path,
                });
            }
            cursor = end;
        }

        let matcher = if placeholders.is_empty() {
            None
        } else {
            let matcher = AhoCorasick::builder()
                .match_kind(MatchKind::LeftmostLongest)
                .build(placeholders.iter().map(|p| p.raw.as_str()))
                .map_err(|_| TemplateError::InvalidName {
                    name: placeholders
                        .iter()
                        .map(Placeholder::name)
                        .collect::<Vec<_>>()
                        .join(", "),
                })?;
            Some(matcher)
        };

        Ok(Self {
            source,
            placeholders,
            matcher,
        })
    }

    pub fn placeholders(&self) -> &[Placeholder] {
        &self.placeholders
    }

    /// First placeholder that does not name a field of `schema`.
    pub fn unknown_placeholder(&self, schema: &Schema) -> Option<&Placeholder> {
        self.placeholders
            .iter()
            .find(|placeholder| schema.resolve(&placeholder.path).is_none())
    }

    /// Substitutes every placeholder in a single pass. Substituted text is never
    /// re-scanned, so values containing `{{{...}}}` are inserted literally.
    pub fn render(&self, input: &Value) -> String {
        let Some(matcher) = &self.matcher else {
            return self.source.clone();
        };
        let replacements: Vec<String> = self
            .placeholders
            .iter()
            .map(|placeholder| lookup(input, &placeholder.path))
            .collect();
        matcher.replace_all(&self.source, &replacements)
    }
}

fn parse_path(name: &str) -> Option<Vec<String>> {
    if name.is_empty() {
        return None;
    }
    name.split('.')
        .map(|segment| {
            let mut chars = segment.chars();
            let first = chars.next()?;
            let valid = (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
            valid.then(|| segment.to_string())
        })
        .collect()
}

fn lookup(input: &Value, path: &[String]) -> String {
    let mut current = input;
    for segment in path {
        match current.get(segment) {
            Some(next) => current = next,
            None => return String::new(),
        }
    }
    match current {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Bool(_) | Value::Number(_) => current.to_string(),
        Value::Array(_) | Value::Object(_) => {
            serde_json::to_string_pretty(current).unwrap_or_else(|_| current.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::schema::Field;
    use serde_json::json;

    #[test]
    fn test_render_substitutes_triple_and_double_braces() {
        let template =
            PromptTemplate::parse("Language: {{{language}}}\nCode:\n{{ code }}").unwrap();
        let rendered = template.render(&json!({ "language": "javascript", "code": "a < b" }));
        assert_eq!(rendered, "Language: javascript\nCode:\na < b");
    }

    #[test]
    fn test_whitespace_inside_braces_is_allowed() {
        let template = PromptTemplate::parse("Code:\n  {{{\n    code\n  }}}\n").unwrap();
        assert_eq!(template.placeholders().len(), 1);
        assert_eq!(template.placeholders()[0].name(), "code");
        assert_eq!(template.render(&json!({ "code": "x" })), "Code:\n  x\n");
    }

    #[test]
    fn test_repeated_placeholder_is_replaced_everywhere() {
        let template = PromptTemplate::parse("```{{{language}}}\n{{{code}}}\n```{{{language}}}")
            .unwrap();
        assert_eq!(template.placeholders().len(), 2);
        assert_eq!(
            template.render(&json!({ "language": "js", "code": "1" })),
            "```js\n1\n```js"
        );
    }

    #[test]
    fn test_substituted_values_are_not_expanded_again() {
        let template = PromptTemplate::parse("{{{code}}} / {{{language}}}").unwrap();
        let rendered = template.render(&json!({ "code": "{{{language}}}", "language": "css" }));
        assert_eq!(rendered, "{{{language}}} / css");
    }

    #[test]
    fn test_non_text_values_and_missing_optionals() {
        let template = PromptTemplate::parse("{{{n}}}|{{{flag}}}|{{{opts}}}|{{{absent}}}").unwrap();
        let rendered = template.render(&json!({ "n": 3, "flag": true, "opts": { "a": 1 } }));
        assert_eq!(rendered, "3|true|{\n  \"a\": 1\n}|");
    }

    #[test]
    fn test_nested_path_lookup() {
        let template = PromptTemplate::parse("style={{{options.style}}}").unwrap();
        assert_eq!(
            template.render(&json!({ "options": { "style": "terse" } })),
            "style=terse"
        );
    }

    #[test]
    fn test_template_without_placeholders_renders_verbatim() {
        let template = PromptTemplate::parse("No placeholders here.").unwrap();
        assert_eq!(template.render(&json!({})), "No placeholders here.");
    }

    #[test]
    fn test_malformed_templates_are_rejected() {
        assert_eq!(
            PromptTemplate::parse("Code: {{{code}}").unwrap_err(),
            TemplateError::Unclosed { offset: 6 }
        );
        assert!(matches!(
            PromptTemplate::parse("{{{1st}}}").unwrap_err(),
            TemplateError::InvalidName { .. }
        ));
        assert!(matches!(
            PromptTemplate::parse("{{ }}").unwrap_err(),
            TemplateError::InvalidName { .. }
        ));
    }

    #[test]
    fn test_unknown_placeholder_is_found_against_schema() {
        let schema = Schema::object().field(Field::text("code"));
        let template = PromptTemplate::parse("{{{code}}} in {{{language}}}").unwrap();
        let unknown = template.unknown_placeholder(&schema).expect("language is unknown");
        assert_eq!(unknown.name(), "language");
    }
}
