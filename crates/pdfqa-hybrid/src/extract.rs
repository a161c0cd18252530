//! Text extraction collaborators. Both split pages on form feeds, which is
//! how `pdftotext` separates pages in its output.
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use pdfqa_core::config::{ExtractorKind, IngestConfig};
use pdfqa_core::error::ExtractError;
use pdfqa_core::traits::TextExtractor;
use pdfqa_core::types::PageText;

const PAGE_BREAK: char = '\u{000C}';

/// 1-based pages; a trailing page break does not open an extra page.
pub fn split_pages(text: &str) -> Vec<PageText> {
    let text = text.strip_suffix(PAGE_BREAK).unwrap_or(text);
    if text.is_empty() { return Vec::new(); }
    text.split(PAGE_BREAK).enumerate().map(|(i, page)| PageText::new(i as u32 + 1, page)).collect()
}

/// Accepts UTF-8 text uploads.
#[derive(Debug, Default, Clone)]
pub struct PlainTextExtractor;

#[async_trait]
impl TextExtractor for PlainTextExtractor {
    async fn extract(&self, bytes: &[u8]) -> Result<Vec<PageText>, ExtractError> {
        let text = std::str::from_utf8(bytes).map_err(|e| ExtractError::Unextractable(format!("not UTF-8 text: {}", e)))?;
        Ok(split_pages(text))
    }
}

/// Runs `pdftotext -enc UTF-8 - -` with the document on stdin.
#[derive(Debug, Clone)]
pub struct PdftotextExtractor {
    binary: PathBuf,
    timeout: Duration,
}

impl PdftotextExtractor {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self { Self { binary: binary.into(), timeout } }
}

#[async_trait]
impl TextExtractor for PdftotextExtractor {
    async fn extract(&self, bytes: &[u8]) -> Result<Vec<PageText>, ExtractError> {
        let mut child = Command::new(&self.binary)
            .args(["-enc", "UTF-8", "-", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        let mut stdin = child.stdin.take().ok_or_else(|| ExtractError::Unextractable("pdftotext stdin unavailable".into()))?;
        let input = bytes.to_vec();
        let writer = tokio::spawn(async move {
            let _ = stdin.write_all(&input).await;
        });
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ExtractError::Unextractable(format!("pdftotext timed out after {:?}", self.timeout)))??;
        let _ = writer.await;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExtractError::Unextractable(format!("pdftotext exited with {}: {}", output.status, stderr.trim())));
        }
        Ok(split_pages(&String::from_utf8_lossy(&output.stdout)))
    }
}

pub fn extractor_from_config(config: &IngestConfig) -> Box<dyn TextExtractor> {
    match config.extractor {
        ExtractorKind::Pdftotext => Box::new(PdftotextExtractor::new(&config.pdftotext_path, Duration::from_secs(config.extract_timeout_secs))),
        ExtractorKind::Plain => Box::new(PlainTextExtractor),
    }
}
