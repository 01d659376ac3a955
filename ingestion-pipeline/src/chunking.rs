//! Heuristic segmentation of extracted course text.
//!
//! Pages are split before lines that open with an academic heading signal
//! (numbered sections, "Definition", "Advantages", ...), overlong blocks are
//! cut on natural boundaries, and fragments too short to stand alone are
//! folded into a neighbour. Every chunk is labelled with a [`ChunkType`] and
//! an [`ExamPriority`].

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use common::{
    error::AppError,
    storage::types::document_chunk::{ChunkType, ExamPriority},
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use text_splitter::TextSplitter;
use tokio::io::AsyncWriteExt;

use crate::metadata::{infer_metadata, DocumentMetadata, UNKNOWN};

pub const MIN_CHUNK_LEN: usize = 120;
pub const MAX_CHUNK_LEN: usize = 1200;
/// Pages with less text than this are OCR debris.
pub const MIN_PAGE_LEN: usize = 50;

static PAGE_MARKER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^--- PAGE (\d+)( ERROR)? ---$").ok());

static HEADING_SIGNAL: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:\d+\.\d+|\d+\s+|definition\b|advantages\b|disadvantages\b|explain\b)").ok()
});

/// First match wins, so order matters.
static CHUNK_TYPE_RULES: LazyLock<Vec<(Regex, ChunkType)>> = LazyLock::new(|| {
    [
        (r"\bdefinition\b|\bis defined as\b|\bmeans\b", ChunkType::Definition),
        (r"\badvantages?\b", ChunkType::Advantages),
        (r"\bdisadvantages?\b", ChunkType::Disadvantages),
        (r"\bsteps?\b|\bprocedure\b", ChunkType::Steps),
        (r"\balgorithm\b", ChunkType::Algorithm),
        (r"\bcompare\b|\bdifferentiate\b|\bvs\b", ChunkType::Comparison),
        (r"\bexample\b", ChunkType::Example),
        (r"\bexplain\b|\bworking\b|\boverview\b", ChunkType::Explanation),
        (r"\bformula\b|=", ChunkType::Formula),
    ]
    .into_iter()
    .filter_map(|(pattern, chunk_type)| Regex::new(pattern).ok().map(|re| (re, chunk_type)))
    .collect()
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidecarPage {
    pub number: u32,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
    pub page: u32,
    pub chunk_type: ChunkType,
    pub exam_priority: ExamPriority,
}

impl Chunk {
    fn classified(text: String, page: u32) -> Self {
        let chunk_type = detect_chunk_type(&text);
        Self {
            text,
            page,
            chunk_type,
            exam_priority: exam_priority(chunk_type),
        }
    }
}

/// A chunk with the metadata of its document, ready to embed or export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub text: String,
    #[serde(flatten)]
    pub metadata: DocumentMetadata,
    pub source_path: String,
    pub page: u32,
    pub chunk_type: ChunkType,
    pub exam_priority: ExamPriority,
}

/// Splits a `.txt` sidecar back into its pages, dropping pages that failed.
///
/// Text without page markers is treated as a single page.
pub fn split_pages(sidecar: &str) -> Vec<SidecarPage> {
    let Some(marker) = PAGE_MARKER.as_ref() else {
        return Vec::new();
    };

    let mut pages = Vec::new();
    let mut current: Option<(u32, Vec<&str>)> = None;
    let mut saw_marker = false;

    for line in sidecar.lines() {
        if let Some(caps) = marker.captures(line.trim()) {
            saw_marker = true;
            if let Some((number, lines)) = current.take() {
                pages.push(SidecarPage {
                    number,
                    text: lines.join("\n").trim().to_string(),
                });
            }
            let number = caps
                .get(1)
                .and_then(|m| m.as_str().parse::<u32>().ok())
                .unwrap_or_default();
            let failed = caps.get(2).is_some();
            if !failed {
                current = Some((number, Vec::new()));
            }
            continue;
        }

        if let Some((_, lines)) = current.as_mut() {
            lines.push(line);
        }
    }

    if let Some((number, lines)) = current {
        pages.push(SidecarPage {
            number,
            text: lines.join("\n").trim().to_string(),
        });
    }

    if !saw_marker && !sidecar.trim().is_empty() {
        pages.push(SidecarPage {
            number: 1,
            text: sidecar.trim().to_string(),
        });
    }

    pages
}

/// Splits before every line that opens with a heading signal. The first
/// line never splits; blocks are trimmed and empty ones dropped.
pub fn split_by_structure(text: &str) -> Vec<String> {
    let Some(signal) = HEADING_SIGNAL.as_ref() else {
        return vec![text.trim().to_string()]
            .into_iter()
            .filter(|block| !block.is_empty())
            .collect();
    };

    let mut blocks = Vec::new();
    let mut block_start = 0usize;

    for (newline, _) in text.match_indices('\n') {
        let line_start = newline.saturating_add(1);
        let opens_section = text
            .get(line_start..)
            .is_some_and(|rest| signal.is_match(rest));
        if opens_section {
            if let Some(block) = text.get(block_start..newline) {
                blocks.push(block);
            }
            block_start = line_start;
        }
    }
    if let Some(block) = text.get(block_start..) {
        blocks.push(block);
    }

    blocks
        .into_iter()
        .map(str::trim)
        .filter(|block| !block.is_empty())
        .map(str::to_string)
        .collect()
}

/// Cuts a block longer than [`MAX_CHUNK_LEN`] on paragraph, sentence or word
/// boundaries. Shorter blocks pass through untouched.
pub fn split_oversized(block: &str) -> Vec<String> {
    if block.chars().count() <= MAX_CHUNK_LEN {
        return vec![block.to_string()];
    }

    TextSplitter::new(MAX_CHUNK_LEN)
        .chunks(block)
        .map(str::trim)
        .filter(|piece| !piece.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn detect_chunk_type(text: &str) -> ChunkType {
    let lowered = text.to_lowercase();
    CHUNK_TYPE_RULES
        .iter()
        .find(|(rule, _)| rule.is_match(&lowered))
        .map_or(ChunkType::General, |(_, chunk_type)| *chunk_type)
}

pub fn exam_priority(chunk_type: ChunkType) -> ExamPriority {
    match chunk_type {
        ChunkType::Definition
        | ChunkType::Algorithm
        | ChunkType::Steps
        | ChunkType::Comparison
        | ChunkType::Formula => ExamPriority::High,
        ChunkType::Advantages | ChunkType::Disadvantages | ChunkType::Explanation => {
            ExamPriority::Medium
        }
        ChunkType::Example | ChunkType::General => ExamPriority::Low,
    }
}

/// Folds runs of short chunks into one. The run is emitted ahead of the next
/// full-size chunk (or at the end) and re-labelled from its combined text.
pub fn merge_weak_chunks(chunks: Vec<Chunk>) -> Vec<Chunk> {
    let mut merged = Vec::with_capacity(chunks.len());
    let mut buffer: Option<Chunk> = None;

    for chunk in chunks {
        if chunk.text.chars().count() < MIN_CHUNK_LEN {
            match buffer.as_mut() {
                Some(pending) => {
                    pending.text.push('\n');
                    pending.text.push_str(&chunk.text);
                }
                None => buffer = Some(chunk),
            }
        } else {
            if let Some(pending) = buffer.take() {
                merged.push(Chunk::classified(pending.text, pending.page));
            }
            merged.push(chunk);
        }
    }

    if let Some(pending) = buffer {
        merged.push(Chunk::classified(pending.text, pending.page));
    }

    merged
}

pub fn chunk_page(page: &SidecarPage) -> Vec<Chunk> {
    if page.text.chars().count() < MIN_PAGE_LEN {
        return Vec::new();
    }

    let chunks = split_by_structure(&page.text)
        .iter()
        .flat_map(|block| split_oversized(block))
        .map(|text| Chunk::classified(text, page.number))
        .collect();

    merge_weak_chunks(chunks)
}

pub fn chunk_sidecar(sidecar: &str) -> Vec<Chunk> {
    split_pages(sidecar).iter().flat_map(chunk_page).collect()
}

#[derive(Deserialize)]
struct RecordedSource {
    source_pdf: String,
}

/// The PDF a `.txt` sidecar was extracted from.
///
/// Uses the file name recorded in the `.json` sidecar, then a sibling PDF
/// with the same stem in any extension case.
pub async fn source_pdf_for(txt_path: &Path) -> PathBuf {
    let recorded = tokio::fs::read(txt_path.with_extension("json"))
        .await
        .ok()
        .and_then(|bytes| serde_json::from_slice::<RecordedSource>(&bytes).ok())
        .map(|recorded| recorded.source_pdf)
        .filter(|name| !name.is_empty() && name != UNKNOWN);
    if let Some(name) = recorded {
        return txt_path.with_file_name(name);
    }

    if let (Some(dir), Some(stem)) = (txt_path.parent(), txt_path.file_stem()) {
        if let Ok(mut entries) = tokio::fs::read_dir(dir).await {
            while let Ok(Some(entry)) = entries.next_entry().await {
                let path = entry.path();
                let is_pdf = path
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
                if is_pdf && path.file_stem() == Some(stem) {
                    return path;
                }
            }
        }
    }

    txt_path.with_extension("pdf")
}

/// Chunks of one source PDF; `records` may be empty when nothing usable is
/// left in the sidecar.
#[derive(Debug, Clone)]
pub struct ChunkedDocument {
    pub source_path: String,
    pub records: Vec<ChunkRecord>,
}

/// Reads a `.txt` sidecar and chunks it with the metadata of its PDF.
pub async fn chunk_document(txt_path: &Path) -> Result<ChunkedDocument, AppError> {
    let bytes = tokio::fs::read(txt_path).await?;
    let sidecar = String::from_utf8_lossy(&bytes);

    let pdf_path = source_pdf_for(txt_path).await;
    let metadata = infer_metadata(&pdf_path);
    let source_path = pdf_path.to_string_lossy().into_owned();

    let records = chunk_sidecar(&sidecar)
        .into_iter()
        .map(|chunk| ChunkRecord {
            text: chunk.text,
            metadata: metadata.clone(),
            source_path: source_path.clone(),
            page: chunk.page,
            chunk_type: chunk.chunk_type,
            exam_priority: chunk.exam_priority,
        })
        .collect();

    Ok(ChunkedDocument {
        source_path,
        records,
    })
}

/// Writes one JSON object per line.
pub async fn write_jsonl(records: &[ChunkRecord], path: &Path) -> Result<(), AppError> {
    let mut file = tokio::fs::File::create(path).await?;
    for record in records {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        file.write_all(&line).await?;
    }
    file.flush().await?;
    Ok(())
}
