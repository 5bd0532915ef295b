//! Streaming types for LLM responses.
//!
//! Adapters yield [`GenerateResponse`] chunks through a [`StreamBox`]. The
//! chunks always carry *incremental* text; [`DeltaNormalizer`] turns the
//! snapshots of cumulative backends into deltas before they leave the
//! adapter. [`StreamAccumulator`] folds chunks back into the parts of one
//! model message.

use super::{GenerateResponse, Part, ProviderError, UsageMetadata};
use futures::Stream;
use std::pin::Pin;

/// Type alias for a boxed stream of response chunks.
pub type StreamBox = Pin<Box<dyn Stream<Item = Result<GenerateResponse, ProviderError>> + Send>>;

/// How a backend reports streamed text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChunkSemantics {
    /// Each chunk holds only the new text.
    #[default]
    Incremental,
    /// Each chunk holds the whole text produced so far.
    Cumulative,
}

/// Converts streamed text chunks into incremental deltas.
#[derive(Debug, Default)]
pub struct DeltaNormalizer {
    semantics: ChunkSemantics,
    snapshot: String,
}

impl DeltaNormalizer {
    #[must_use]
    pub const fn new(semantics: ChunkSemantics) -> Self {
        Self {
            semantics,
            snapshot: String::new(),
        }
    }

    /// Return the new text carried by `chunk`.
    ///
    /// For cumulative streams a chunk that does not extend the previous
    /// snapshot starts a new snapshot and is returned whole.
    pub fn push(&mut self, chunk: &str) -> String {
        match self.semantics {
            ChunkSemantics::Incremental => chunk.to_owned(),
            ChunkSemantics::Cumulative => {
                let delta = chunk
                    .strip_prefix(self.snapshot.as_str())
                    .unwrap_or(chunk)
                    .to_owned();
                chunk.clone_into(&mut self.snapshot);
                delta
            }
        }
    }

    pub fn reset(&mut self) {
        self.snapshot.clear();
    }
}

/// Collects streamed chunks into the parts of one model message.
///
/// Adjacent text fragments are merged; thoughts are kept out of the result.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    parts: Vec<Part>,
    usage: Option<UsageMetadata>,
    saw_content: bool,
}

impl StreamAccumulator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, chunk: &GenerateResponse) {
        if let Some(usage) = chunk.usage {
            self.usage = Some(usage);
        }
        for part in &chunk.parts {
            self.push_part(part.clone());
        }
    }

    fn push_part(&mut self, part: Part) {
        match part {
            Part::Thought { .. } => {}
            Part::Text { text } => {
                if text.is_empty() {
                    return;
                }
                self.saw_content = true;
                if let Some(Part::Text { text: last }) = self.parts.last_mut() {
                    last.push_str(&text);
                } else {
                    self.parts.push(Part::Text { text });
                }
            }
            other => {
                self.saw_content = true;
                self.parts.push(other);
            }
        }
    }

    /// Most recent usage sample seen in the stream.
    #[must_use]
    pub const fn usage(&self) -> Option<UsageMetadata> {
        self.usage
    }

    #[must_use]
    pub const fn has_content(&self) -> bool {
        self.saw_content
    }

    #[must_use]
    pub fn into_parts(self) -> Vec<Part> {
        self.parts
    }
}
