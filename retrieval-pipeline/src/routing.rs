//! Decides, per query, whether and how to retrieve.

use std::{fmt, sync::LazyLock};

use common::{
    storage::types::{conversation::ConversationTurn, document_chunk::ChunkFilter},
    utils::config::AppConfig,
};
use regex::Regex;
use serde::{Deserialize, Serialize};

static UNIT_REFERENCE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"unit\s*(\d+)").ok());

/// Phrases that ask for more than the syllabus covers.
pub const GENERIC_TRIGGERS: [&str; 7] = [
    "explain in detail",
    "implementation",
    "code",
    "algorithm",
    "beyond syllabus",
    "why does",
    "how does",
];

const FOLLOW_UP_WORDS: [&str; 11] = [
    "it", "this", "that", "these", "those", "they", "more", "elaborate", "continue", "again",
    "above",
];

const FOLLOW_UP_PHRASES: [&str; 5] = [
    "what about",
    "tell me more",
    "explain more",
    "how about",
    "give an example",
];

/// Queries this short lean on the conversation for meaning.
const SHORT_QUERY_WORDS: usize = 3;

pub const SYLLABUS_DOC_TYPES: [&str; 2] = ["notes", "pyq"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    #[default]
    Syllabus,
    Generic,
}

impl fmt::Display for QueryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryMode::Syllabus => f.write_str("syllabus"),
            QueryMode::Generic => f.write_str("generic"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuerySettings {
    pub retrieval_top_k: usize,
    pub unit_top_k: usize,
    pub history_max_pairs: usize,
}

impl QuerySettings {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            retrieval_top_k: config.retrieval_top_k,
            unit_top_k: config.unit_top_k,
            history_max_pairs: config.history_max_pairs,
        }
    }
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            retrieval_top_k: 5,
            unit_top_k: 20,
            history_max_pairs: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPlan {
    pub unit: Option<String>,
    pub mode: QueryMode,
    /// Answer from the conversation alone, without retrieval.
    pub follow_up: bool,
    pub filter: ChunkFilter,
    pub limit: usize,
}

/// `"unit 4"` and `"Unit4"` both yield `unit4`.
pub fn detect_unit(query: &str) -> Option<String> {
    let lowered = query.to_lowercase();
    UNIT_REFERENCE
        .as_ref()?
        .captures(&lowered)?
        .get(1)?
        .as_str()
        .parse::<u32>()
        .ok()
        .map(|number| format!("unit{number}"))
}

pub fn classify_mode(query: &str) -> QueryMode {
    let lowered = query.to_lowercase();
    if GENERIC_TRIGGERS
        .iter()
        .any(|trigger| lowered.contains(trigger))
    {
        QueryMode::Generic
    } else {
        QueryMode::Syllabus
    }
}

pub fn is_follow_up(query: &str, history: &[ConversationTurn], unit: Option<&str>) -> bool {
    if history.is_empty() || unit.is_some() {
        return false;
    }

    let lowered = query.to_lowercase();
    let words: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|word| !word.is_empty())
        .collect();

    words.len() <= SHORT_QUERY_WORDS
        || words.iter().any(|word| FOLLOW_UP_WORDS.contains(word))
        || FOLLOW_UP_PHRASES
            .iter()
            .any(|phrase| lowered.contains(phrase))
}

pub fn plan_query(query: &str, history: &[ConversationTurn], settings: &QuerySettings) -> QueryPlan {
    let unit = detect_unit(query);
    let mode = classify_mode(query);
    let follow_up = is_follow_up(query, history, unit.as_deref());

    let filter = ChunkFilter {
        unit: unit.clone(),
        doc_types: (mode == QueryMode::Syllabus)
            .then(|| SYLLABUS_DOC_TYPES.iter().map(ToString::to_string).collect()),
    };
    let limit = if unit.is_some() {
        settings.unit_top_k
    } else {
        settings.retrieval_top_k
    };

    QueryPlan {
        unit,
        mode,
        follow_up,
        filter,
        limit,
    }
}
