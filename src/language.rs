use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Languages the workbench can edit. Only JavaScript can be executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    JavaScript,
    TypeScript,
    Python,
    Html,
    Css,
}

impl Language {
    pub const ALL: [Language; 5] = [
        Language::JavaScript,
        Language::TypeScript,
        Language::Python,
        Language::Html,
        Language::Css,
    ];

    /// Identifier sent to the model and accepted on the command line.
    pub fn id(self) -> &'static str {
        match self {
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Python => "python",
            Language::Html => "html",
            Language::Css => "css",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Language::JavaScript => "JavaScript",
            Language::TypeScript => "TypeScript",
            Language::Python => "Python",
            Language::Html => "HTML",
            Language::Css => "CSS",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        match id.trim().to_ascii_lowercase().as_str() {
            "javascript" | "js" => Some(Language::JavaScript),
            "typescript" | "ts" => Some(Language::TypeScript),
            "python" | "py" => Some(Language::Python),
            "html" | "htm" => Some(Language::Html),
            "css" => Some(Language::Css),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "js" | "mjs" | "cjs" => Some(Language::JavaScript),
            "ts" | "mts" | "cts" => Some(Language::TypeScript),
            "py" => Some(Language::Python),
            "html" | "htm" => Some(Language::Html),
            "css" => Some(Language::Css),
            _ => None,
        }
    }

    pub fn is_executable(self) -> bool {
        matches!(self, Language::JavaScript)
    }

    /// Document loaded into the buffer when this language is selected.
    pub fn starter_document(self) -> &'static str {
        match self {
            Language::JavaScript => DEFAULT_JS_CODE,
            Language::TypeScript => DEFAULT_TS_CODE,
            Language::Python => DEFAULT_PYTHON_CODE,
            Language::Html => DEFAULT_HTML_CODE,
            Language::Css => DEFAULT_CSS_CODE,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

const DEFAULT_JS_CODE: &str = r#"// Welcome to the AI Code Workbench!
// Select code and use the AI tools, or just write code and run it.

function greet(name) {
  console.log(`Hello, ${name}!`);
  // Try fixing this typo: console.lg("This is a test.");
  return `Greetings, ${name}`;
}

const message = greet('Developer');
console.log(message);
"#;

const DEFAULT_TS_CODE: &str = r#"// Welcome to the AI Code Workbench!
// TypeScript can be explained, fixed and completed, but not executed.

interface Greeting {
  name: string;
  excited?: boolean;
}

function greet({ name, excited = false }: Greeting): string {
  return `Hello, ${name}${excited ? '!' : '.'}`;
}

console.log(greet({ name: 'Developer', excited: true }));
"#;

const DEFAULT_PYTHON_CODE: &str = r#"# Welcome to the AI Code Workbench!
# Select code and use the AI tools.
# Python execution is not supported here, but the AI tools still work.

def greet(name):
  print(f"Hello, {name}!")
  return f"Greetings, {name}"

message = greet('Developer')
print(message)
"#;

const DEFAULT_HTML_CODE: &str = r#"<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="utf-8" />
    <title>AI Code Workbench</title>
  </head>
  <body>
    <h1>Hello, Developer!</h1>
    <p>Select markup and use the AI tools.</p>
  </body>
</html>
"#;

const DEFAULT_CSS_CODE: &str = r#"/* Welcome to the AI Code Workbench! */

body {
  font-family: system-ui, sans-serif;
  margin: 0 auto;
  max-width: 48rem;
}

h1 {
  color: #3f51b5;
}
"#;
