//! Course metadata read from where a document sits in the tree.
//!
//! Documents are laid out as `{year}/{subject}/{doc_type}/{unit}/{file}.pdf`;
//! only the trailing segments are inspected, so the tree may live under any
//! prefix.

use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

pub const UNKNOWN: &str = "unknown";

static UNIT_NUMBER: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"(\d+)").ok());

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub year: String,
    pub subject: String,
    #[serde(rename = "type")]
    pub doc_type: String,
    pub unit: String,
    /// File name, e.g. `lists.pdf`
    #[serde(rename = "source_pdf")]
    pub source: String,
    pub topic: String,
}

pub fn infer_metadata(path: &Path) -> DocumentMetadata {
    let normalised = path.to_string_lossy().replace('\\', "/");
    let parts: Vec<&str> = normalised
        .split('/')
        .filter(|part| !part.is_empty() && *part != ".")
        .collect();

    let from_end = |n: usize| -> Option<&str> {
        parts
            .len()
            .checked_sub(n)
            .and_then(|idx| parts.get(idx))
            .copied()
    };

    let year = from_end(5).unwrap_or(UNKNOWN).to_string();
    let subject = from_end(4).map_or_else(|| UNKNOWN.to_string(), str::to_lowercase);
    let doc_type = from_end(3).map_or_else(|| UNKNOWN.to_string(), normalise_doc_type);
    let unit = from_end(2).map_or_else(|| UNKNOWN.to_string(), normalise_unit);

    let source = from_end(1).unwrap_or(UNKNOWN).to_string();
    let topic = Path::new(&source)
        .file_stem()
        .map_or_else(|| UNKNOWN.to_string(), |stem| stem.to_string_lossy().to_lowercase());

    DocumentMetadata {
        year,
        subject,
        doc_type,
        unit,
        source,
        topic,
    }
}

/// `PYQs` and `pyq` both mean previous-year papers.
pub fn normalise_doc_type(segment: &str) -> String {
    let lowered = segment.to_lowercase();
    match lowered.as_str() {
        "pyqs" => "pyq".to_string(),
        _ => lowered,
    }
}

/// `Unit_04`, `unit 4` and `UNIT4` all become `unit4`; anything else is unknown.
pub fn normalise_unit(segment: &str) -> String {
    let lowered = segment.to_lowercase();
    if !lowered.contains("unit") {
        return UNKNOWN.to_string();
    }

    UNIT_NUMBER
        .as_ref()
        .and_then(|re| re.captures(&lowered))
        .and_then(|caps| caps.get(1))
        .and_then(|digits| digits.as_str().parse::<u32>().ok())
        .map_or_else(|| UNKNOWN.to_string(), |number| format!("unit{number}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn full_tree_path_resolves_every_field() {
        let path = PathBuf::from("/data/year_2/Python/notes/Unit 3/Lists And Tuples.pdf");
        let meta = infer_metadata(&path);

        assert_eq!(meta.year, "year_2");
        assert_eq!(meta.subject, "python");
        assert_eq!(meta.doc_type, "notes");
        assert_eq!(meta.unit, "unit3");
        assert_eq!(meta.source, "Lists And Tuples.pdf");
        assert_eq!(meta.topic, "lists and tuples");
    }

    #[test]
    fn pyqs_folder_is_normalised() {
        let meta = infer_metadata(Path::new("year_1/dbms/PYQs/unit2/2023.pdf"));
        assert_eq!(meta.doc_type, "pyq");
        assert_eq!(meta.unit, "unit2");
    }

    #[test]
    fn short_paths_fall_back_to_unknown() {
        let meta = infer_metadata(Path::new("lists.pdf"));
        assert_eq!(meta.year, UNKNOWN);
        assert_eq!(meta.subject, UNKNOWN);
        assert_eq!(meta.doc_type, UNKNOWN);
        assert_eq!(meta.unit, UNKNOWN);
        assert_eq!(meta.source, "lists.pdf");
        assert_eq!(meta.topic, "lists");

        let meta = infer_metadata(Path::new("unit5/recursion.pdf"));
        assert_eq!(meta.unit, "unit5");
        assert_eq!(meta.doc_type, UNKNOWN);
    }

    #[test]
    fn non_unit_folder_is_unknown() {
        let meta = infer_metadata(Path::new("y/python/syllabus/misc/outline.pdf"));
        assert_eq!(meta.doc_type, "syllabus");
        assert_eq!(meta.unit, UNKNOWN);
    }

    #[test]
    fn windows_separators_are_accepted() {
        let meta = infer_metadata(Path::new(r"D:\data\year_2\python\notes\unit1\intro.pdf"));
        assert_eq!(meta.subject, "python");
        assert_eq!(meta.unit, "unit1");
        assert_eq!(meta.source, "intro.pdf");
        assert_eq!(meta.topic, "intro");
    }

    #[test]
    fn unit_normalisation_variants() {
        assert_eq!(normalise_unit("Unit_04"), "unit4");
        assert_eq!(normalise_unit("UNIT10"), "unit10");
        assert_eq!(normalise_unit("unit"), UNKNOWN);
        assert_eq!(normalise_unit("chapter3"), UNKNOWN);
    }
}
