//! Best-effort tool intent extraction for backends without function calling.
//!
//! When an adapter reports `supports_function_calling == false` the model can
//! only describe what it wants in prose. An [`IntentExtractor`] turns such
//! prose into tool call requests. Results are suggestions: a missed or bogus
//! intent only changes which calls get scheduled, never how the scheduler
//! treats them.

use anyhow::{Context, Result};
use regex::Regex;
use serde_json::{Value, json};

/// A tool call recovered from free-form text.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedIntent {
    pub name: String,
    pub args: Value,
}

pub trait IntentExtractor: Send + Sync {
    fn extract(&self, text: &str) -> Vec<ExtractedIntent>;
}

/// Extracts nothing. Used when native function calling is available.
pub struct NoIntentExtractor;

impl IntentExtractor for NoIntentExtractor {
    fn extract(&self, _text: &str) -> Vec<ExtractedIntent> {
        Vec::new()
    }
}

/// Recognizes "create/write/save file `path`" followed by a fenced code block.
///
/// Each match becomes a call to the configured write tool with
/// `{"file_path": path, "content": body}`.
pub struct FileCreationIntentExtractor {
    tool_name: String,
    pattern: Regex,
}

const FILE_CREATION_PATTERN: &str = concat!(
    r"(?is)\b(?:create|write|save|add)\b[^`\n]{0,80}?",
    r"\b(?:file|to)\b[^`\n]{0,40}?`(?P<path>[^`\s]+)`",
    r"[^\n]*\n+\s*```[\w+.-]*[^\n]*\n(?P<body>.*?)```",
);

impl FileCreationIntentExtractor {
    /// # Errors
    /// Returns an error if the built-in pattern fails to compile.
    pub fn new(tool_name: impl Into<String>) -> Result<Self> {
        let pattern =
            Regex::new(FILE_CREATION_PATTERN).context("Invalid file creation intent pattern")?;
        Ok(Self {
            tool_name: tool_name.into(),
            pattern,
        })
    }
}

impl IntentExtractor for FileCreationIntentExtractor {
    fn extract(&self, text: &str) -> Vec<ExtractedIntent> {
        self.pattern
            .captures_iter(text)
            .filter_map(|caps| {
                let path = caps.name("path")?.as_str();
                let body = caps.name("body")?.as_str();
                Some(ExtractedIntent {
                    name: self.tool_name.clone(),
                    args: json!({ "file_path": path, "content": body }),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> Result<FileCreationIntentExtractor> {
        FileCreationIntentExtractor::new("write_file")
    }

    #[test]
    fn test_extracts_single_file() -> Result<()> {
        let text = "I'll create a file named `hello.py` with this content:\n\n```python\nprint('hi')\n```\nDone.";
        let intents = extractor()?.extract(text);

        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].name, "write_file");
        assert_eq!(intents[0].args["file_path"], "hello.py");
        assert_eq!(intents[0].args["content"], "print('hi')\n");
        Ok(())
    }

    #[test]
    fn test_extracts_multiple_files() -> Result<()> {
        let text = "Save this to `src/a.rs`:\n```rust\nfn a() {}\n```\nThen write the file `src/b.rs`:\n```\nfn b() {}\n```";
        let intents = extractor()?.extract(text);

        let paths: Vec<_> = intents
            .iter()
            .filter_map(|i| i.args["file_path"].as_str())
            .collect();
        assert_eq!(paths, vec!["src/a.rs", "src/b.rs"]);
        Ok(())
    }

    #[test]
    fn test_ignores_code_without_intent() -> Result<()> {
        let text = "Here is an example:\n```rust\nfn main() {}\n```";
        assert!(extractor()?.extract(text).is_empty());
        Ok(())
    }

    #[test]
    fn test_ignores_intent_without_code_block() -> Result<()> {
        let text = "You could create a file called `notes.txt` yourself.";
        assert!(extractor()?.extract(text).is_empty());
        Ok(())
    }

    #[test]
    fn test_no_intent_extractor() {
        assert!(NoIntentExtractor.extract("create file `a` ```\nx\n```").is_empty());
    }
}
