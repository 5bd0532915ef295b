//! Error reports for failed model exchanges.
//!
//! When a turn fails with an error that is not rethrown, the turn engine
//! hands an [`ErrorReport`] to an [`ErrorReporter`]. Reporting is best
//! effort: a reporter that fails only logs.

use crate::llm::Message;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// What was known about a failed exchange.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Curated history at the time of the failure
    pub history: Vec<Message>,
    /// The input that was being sent
    pub request: Value,
    /// Short label for where the failure happened, e.g. `turn`
    pub context: String,
}

#[async_trait]
pub trait ErrorReporter: Send + Sync {
    async fn report(&self, report: &ErrorReport);
}

/// Logs reports at error level. The default reporter.
pub struct LogReporter;

#[async_trait]
impl ErrorReporter for LogReporter {
    async fn report(&self, report: &ErrorReport) {
        log::error!(
            "Model exchange failed context={} status={:?} history_len={} error={}",
            report.context,
            report.status,
            report.history.len(),
            report.message
        );
    }
}

/// Writes each report as a JSON file into a directory.
///
/// Files are named `agent-core-error-{context}-{timestamp}.json`.
pub struct JsonFileReporter {
    dir: PathBuf,
}

impl JsonFileReporter {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub const fn dir(&self) -> &PathBuf {
        &self.dir
    }

    /// Write `report` and return the path of the new file.
    ///
    /// # Errors
    /// Fails if the directory cannot be created or the file cannot be
    /// written.
    pub async fn write(&self, report: &ErrorReport) -> Result<PathBuf> {
        let timestamp = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .context("Failed to format report timestamp")?
            .replace([':', '.'], "-");
        let path = self.dir.join(format!(
            "agent-core-error-{}-{timestamp}.json",
            report.context
        ));

        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create directory: {}", self.dir.display()))?;
        let body = serde_json::to_vec_pretty(report).context("Failed to serialize error report")?;
        tokio::fs::write(&path, body)
            .await
            .with_context(|| format!("Failed to write error report: {}", path.display()))?;
        Ok(path)
    }
}

impl Default for JsonFileReporter {
    fn default() -> Self {
        Self::new(std::env::temp_dir())
    }
}

#[async_trait]
impl ErrorReporter for JsonFileReporter {
    async fn report(&self, report: &ErrorReport) {
        match self.write(report).await {
            Ok(path) => log::info!("Error report written path={}", path.display()),
            Err(e) => log::warn!(
                "Failed to write error report context={} error={e:#}",
                report.context
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn report() -> ErrorReport {
        ErrorReport {
            message: "Bad request".into(),
            status: Some(400),
            history: vec![Message::user("hi"), Message::model("hello")],
            request: json!([{ "type": "text", "text": "again" }]),
            context: "turn".into(),
        }
    }

    #[tokio::test]
    async fn test_json_file_reporter_writes_report() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let reporter = JsonFileReporter::new(dir.path().join("reports"));

        let path = reporter.write(&report()).await?;

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_owned();
        assert!(name.starts_with("agent-core-error-turn-"));
        assert!(name.ends_with(".json"));
        assert!(!name.contains(':'));

        let written: Value = serde_json::from_slice(&std::fs::read(&path)?)?;
        assert_eq!(written["message"], "Bad request");
        assert_eq!(written["status"], 400);
        assert_eq!(written["history"].as_array().map(Vec::len), Some(2));
        assert_eq!(written["request"][0]["text"], "again");
        Ok(())
    }

    #[tokio::test]
    async fn test_unwritable_dir_does_not_panic() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x")?;

        let reporter = JsonFileReporter::new(blocker.join("nested"));
        assert!(reporter.write(&report()).await.is_err());
        reporter.report(&report()).await;
        Ok(())
    }

    #[test]
    fn test_status_omitted_when_absent() -> anyhow::Result<()> {
        let mut report = report();
        report.status = None;
        let json = serde_json::to_value(&report)?;
        assert!(json.get("status").is_none());
        Ok(())
    }
}
