pub mod pdf;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use common::error::AppError;
use serde::Serialize;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::metadata::{infer_metadata, DocumentMetadata};

pub use pdf::PdfPageExtractor;

/// Text recovered from one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    pub text: String,
    /// Whether the text came from the vision model rather than the text layer.
    pub ocr: bool,
}

/// Produces per-page text for a PDF.
///
/// The outer error means the document could not be opened at all; inner
/// errors are confined to their page.
#[async_trait]
pub trait PageTextSource: Send + Sync {
    async fn extract_pages(&self, pdf: &Path) -> Result<Vec<Result<PageText, AppError>>, AppError>;
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PageRecord {
    pub page: u32,
    pub ocr: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub char_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentSidecar {
    #[serde(flatten)]
    pub metadata: DocumentMetadata,
    pub pages: Vec<PageRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractOutcome {
    Skipped,
    Extracted { pages: usize, failed_pages: usize },
}

pub fn text_sidecar_path(pdf: &Path) -> PathBuf {
    pdf.with_extension("txt")
}

pub fn json_sidecar_path(pdf: &Path) -> PathBuf {
    pdf.with_extension("json")
}

/// All PDFs under `root`, any extension case, in path order.
pub fn discover_pdfs(root: &Path) -> Vec<PathBuf> {
    discover_with_extension(root, "pdf")
}

pub(crate) fn discover_with_extension(root: &Path, extension: &str) -> Vec<PathBuf> {
    let mut found: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!(error = %err, "skipping unreadable directory entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(walkdir::DirEntry::into_path)
        .filter(|path| {
            path.extension()
                .is_some_and(|ext| ext.to_string_lossy().eq_ignore_ascii_case(extension))
        })
        .collect();
    found.sort();
    found
}

/// Collapses whitespace runs inside each line and drops OCR bullet glyphs.
pub fn clean_page_text(raw: &str) -> String {
    raw.replace(['\u{f0b7}', '\u{25cf}', '\u{2022}', '\r'], "")
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Extracts `pdf` into its `.txt` and `.json` sidecars.
pub async fn extract_document(
    pdf: &Path,
    source: &dyn PageTextSource,
    force: bool,
) -> Result<ExtractOutcome, AppError> {
    let txt_path = text_sidecar_path(pdf);
    if !force && tokio::fs::try_exists(&txt_path).await? {
        info!(pdf = %pdf.display(), "sidecar exists, skipping");
        return Ok(ExtractOutcome::Skipped);
    }

    let pages = source.extract_pages(pdf).await?;

    let mut text_out = String::new();
    let mut records = Vec::with_capacity(pages.len());
    let mut failed_pages = 0usize;

    for (number, page) in (1u32..).zip(pages) {
        match page {
            Ok(page) => {
                let cleaned = clean_page_text(&page.text);
                text_out.push_str(&format!("\n--- PAGE {number} ---\n{cleaned}\n"));
                records.push(PageRecord {
                    page: number,
                    ocr: page.ocr,
                    char_count: Some(cleaned.chars().count()),
                    error: None,
                });
            }
            Err(err) => {
                warn!(pdf = %pdf.display(), page = number, error = %err, "page extraction failed");
                failed_pages = failed_pages.saturating_add(1);
                text_out.push_str(&format!("\n--- PAGE {number} ERROR ---\n{err}\n"));
                records.push(PageRecord {
                    page: number,
                    ocr: true,
                    char_count: None,
                    error: Some(err.to_string()),
                });
            }
        }
    }

    let page_count = records.len();
    let sidecar = DocumentSidecar {
        metadata: infer_metadata(pdf),
        pages: records,
    };

    tokio::fs::write(&txt_path, text_out).await?;
    tokio::fs::write(json_sidecar_path(pdf), serde_json::to_vec_pretty(&sidecar)?).await?;

    info!(pdf = %pdf.display(), pages = page_count, failed_pages, "saved text and metadata");

    Ok(ExtractOutcome::Extracted {
        pages: page_count,
        failed_pages,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    struct FakeSource {
        calls: AtomicUsize,
    }

    impl FakeSource {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl PageTextSource for FakeSource {
        async fn extract_pages(
            &self,
            _pdf: &Path,
        ) -> Result<Vec<Result<PageText, AppError>>, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![
                Ok(PageText {
                    text: "Definition   of a list\n\u{2022} mutable".into(),
                    ocr: false,
                }),
                Err(AppError::Processing("vision model timed out".into())),
                Ok(PageText {
                    text: "Tuples are immutable".into(),
                    ocr: true,
                }),
            ])
        }
    }

    fn course_pdf(root: &Path) -> PathBuf {
        let dir = root.join("year_2/python/notes/unit1");
        std::fs::create_dir_all(&dir).expect("mkdir");
        let pdf = dir.join("Lists.pdf");
        std::fs::write(&pdf, b"%PDF-1.4").expect("write pdf");
        pdf
    }

    #[test]
    fn clean_page_text_normalises_whitespace_and_bullets() {
        let cleaned = clean_page_text("  Stack \t  ADT \r\n\u{f0b7} push   pop  \n");
        assert_eq!(cleaned, "Stack ADT\npush pop");
    }

    #[test]
    fn discover_pdfs_is_recursive_sorted_and_case_insensitive() {
        let dir = tempdir().expect("tempdir");
        let nested = dir.path().join("b/unit1");
        std::fs::create_dir_all(&nested).expect("mkdir");
        std::fs::write(nested.join("z.PDF"), b"").expect("write");
        std::fs::write(dir.path().join("a.pdf"), b"").expect("write");
        std::fs::write(dir.path().join("notes.txt"), b"").expect("write");

        let found = discover_pdfs(dir.path());
        assert_eq!(found, vec![dir.path().join("a.pdf"), nested.join("z.PDF")]);
    }

    #[tokio::test]
    async fn extract_document_writes_markers_and_metadata() {
        let dir = tempdir().expect("tempdir");
        let pdf = course_pdf(dir.path());
        let source = FakeSource::new();

        let outcome = extract_document(&pdf, &source, false).await.expect("extract");
        assert_eq!(
            outcome,
            ExtractOutcome::Extracted {
                pages: 3,
                failed_pages: 1
            }
        );

        let text = std::fs::read_to_string(text_sidecar_path(&pdf)).expect("txt");
        assert!(text.contains("--- PAGE 1 ---\nDefinition of a list\nmutable"));
        assert!(text.contains("--- PAGE 2 ERROR ---\nIngestion Processing error: vision model timed out"));
        assert!(text.contains("--- PAGE 3 ---\nTuples are immutable"));

        let json: serde_json::Value =
            serde_json::from_slice(&std::fs::read(json_sidecar_path(&pdf)).expect("json"))
                .expect("parse json");
        assert_eq!(json["subject"], "python");
        assert_eq!(json["type"], "notes");
        assert_eq!(json["unit"], "unit1");
        assert_eq!(json["source_pdf"], "Lists.pdf");
        assert_eq!(json["pages"][0]["char_count"], 28);
        assert_eq!(json["pages"][0]["ocr"], false);
        assert!(json["pages"][1]["error"].is_string());
        assert!(json["pages"][1].get("char_count").is_none());
    }

    #[tokio::test]
    async fn existing_sidecar_is_skipped_unless_forced() {
        let dir = tempdir().expect("tempdir");
        let pdf = course_pdf(dir.path());
        std::fs::write(text_sidecar_path(&pdf), "already done").expect("write");
        let source = FakeSource::new();

        let outcome = extract_document(&pdf, &source, false).await.expect("extract");
        assert_eq!(outcome, ExtractOutcome::Skipped);
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);

        let outcome = extract_document(&pdf, &source, true).await.expect("extract");
        assert!(matches!(outcome, ExtractOutcome::Extracted { pages: 3, .. }));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }
}
