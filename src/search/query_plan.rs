//! Query optimizer: classify a question and expand it into weighted variants.
//!
//! Classification is a swappable [`QueryClassifier`]; the default
//! [`KeywordClassifier`] scores cue phrases per query type. Expansion is
//! deterministic and needs no network call.

use std::collections::HashSet;

use crate::error::{RagError, Result};
use crate::models::{QueryPlan, QueryType, QueryVariant, SearchParams};

const ORIGINAL_WEIGHT: f32 = 1.0;
const NARROWED_WEIGHT: f32 = 0.85;
const TEMPORAL_WEIGHT: f32 = 0.75;
const BROADENED_WEIGHT: f32 = 0.7;

const MAX_KEYWORDS: usize = 10;
const BROAD_KEYWORDS: usize = 3;

const STOPWORDS: &[&str] = &[
    "the", "and", "but", "for", "with", "are", "was", "were", "been", "have", "has", "had",
    "does", "did", "will", "would", "could", "should", "what", "who", "whom", "when", "where",
    "why", "how", "which", "about", "our", "you", "your", "they", "them", "this", "that", "these",
    "those", "there", "any", "from", "can", "into", "its", "not", "all", "just", "than", "then",
    "also", "some",
];

/// Domain terms and the expansions used to broaden them; the first
/// expansion doubles as the narrowed-variant replacement.
const SYNONYMS: &[(&str, &[&str])] = &[
    ("app", &["application", "software"]),
    ("mobile", &["ios", "android"]),
    ("db", &["database", "storage"]),
    ("api", &["endpoint", "interface"]),
    ("ui", &["interface", "frontend"]),
    ("bug", &["error", "issue"]),
    ("feature", &["functionality", "capability"]),
];

const LEADING_FILLER: &[&str] = &["can you ", "please ", "help me ", "tell me "];
const TRAILING_FILLER: &[&str] = &["thank you", "thanks", "please"];

/// Words that anchor a query in time. "when" asks about time but anchors nothing.
const TIME_ANCHORS: &[&str] = &[
    "yesterday", "today", "last week", "last month", "this week", "this month", "ago",
    "recently", "earlier", "monday", "tuesday", "wednesday", "thursday", "friday", "saturday",
    "sunday", "january", "february", "march", "april", "june", "july", "august", "september",
    "october", "november", "december",
];

const FACTUAL_CUES: &[&str] = &[
    "who", "what", "which", "where", "how many", "how much", "did we decide", "name of",
];
const EXPLORATORY_CUES: &[&str] = &[
    "tell me about", "overview", "explore", "ideas", "anything", "thoughts on", "brainstorm",
    "what else", "summarize", "summarise",
];
const CONCEPTUAL_CUES: &[&str] = &["why", "how", "explain", "concept", "understand", "meaning"];

/// Assigns a [`QueryType`] to a normalized query. Implementations may be
/// heuristic or model-backed; the plan does not depend on which.
pub trait QueryClassifier: Send + Sync {
    fn classify(&self, normalized: &str) -> QueryType;
}

/// Counts cue phrases per type; ties go to the more specific type.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordClassifier;

impl QueryClassifier for KeywordClassifier {
    fn classify(&self, normalized: &str) -> QueryType {
        let temporal = count_cues(normalized, TIME_ANCHORS) + count_cues(normalized, &["when"]);
        // Tie-break order: temporal, factual, exploratory, conceptual
        let scored = [
            (QueryType::Temporal, temporal),
            (QueryType::Factual, count_cues(normalized, FACTUAL_CUES)),
            (QueryType::Exploratory, count_cues(normalized, EXPLORATORY_CUES)),
            (QueryType::Conceptual, count_cues(normalized, CONCEPTUAL_CUES)),
        ];

        let best = scored.iter().map(|(_, s)| *s).max().unwrap_or(0);
        if best == 0 {
            return QueryType::Conceptual;
        }
        scored
            .iter()
            .find(|(_, s)| *s == best)
            .map(|(t, _)| *t)
            .unwrap_or(QueryType::Conceptual)
    }
}

pub struct QueryOptimizer {
    classifier: Box<dyn QueryClassifier>,
    max_variants: usize,
}

impl QueryOptimizer {
    pub fn new(max_variants: usize) -> Self {
        Self::with_classifier(Box::new(KeywordClassifier), max_variants)
    }

    pub fn with_classifier(classifier: Box<dyn QueryClassifier>, max_variants: usize) -> Self {
        Self {
            classifier,
            max_variants: max_variants.max(1),
        }
    }

    /// Build the retrieval plan for `query`.
    ///
    /// Variants are ordered original (1.0), time-anchored (0.75, temporal
    /// queries with an explicit time cue only), broadened (0.7), narrowed
    /// (0.85); duplicates are collapsed case-insensitively and the list is
    /// capped at `max_variants`.
    pub fn plan(&self, query: &str) -> Result<QueryPlan> {
        let original = collapse_whitespace(query);
        if original.is_empty() {
            return Err(RagError::Validation("query is empty".into()));
        }

        let normalized = normalize(&original);
        let query_type = self.classifier.classify(&normalized);
        let keywords = extract_keywords(&normalized);

        let mut candidates = vec![QueryVariant {
            text: original.clone(),
            weight: ORIGINAL_WEIGHT,
        }];
        if query_type == QueryType::Temporal {
            if let Some(text) = temporal_variant(&normalized, &keywords) {
                candidates.push(QueryVariant {
                    text,
                    weight: TEMPORAL_WEIGHT,
                });
            }
        }
        candidates.push(QueryVariant {
            text: broadened(&keywords),
            weight: BROADENED_WEIGHT,
        });
        candidates.push(QueryVariant {
            text: narrowed(&keywords),
            weight: NARROWED_WEIGHT,
        });

        let mut seen = HashSet::new();
        let variants: Vec<QueryVariant> = candidates
            .into_iter()
            .filter(|v| !v.text.is_empty() && seen.insert(v.text.to_lowercase()))
            .take(self.max_variants)
            .collect();

        let search_params = search_params(query_type, keywords.len());

        tracing::debug!(
            "Query plan: type={}, keywords={keywords:?}, variants={}",
            query_type.as_str(),
            variants.len()
        );

        Ok(QueryPlan {
            original_query: original,
            query_type,
            variants,
            keywords,
            search_params,
        })
    }
}

// ─── Normalization and keywords ──────────────────────────

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lower-case, drop filler phrasing at either end.
pub fn normalize(query: &str) -> String {
    let mut q = collapse_whitespace(query).to_lowercase();

    for filler in LEADING_FILLER {
        if let Some(rest) = q.strip_prefix(filler) {
            q = rest.to_string();
            break;
        }
    }

    let trimmed = q.trim_end_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace());
    for filler in TRAILING_FILLER {
        if let Some(rest) = trimmed.strip_suffix(filler) {
            if rest.is_empty() || rest.ends_with([' ', ',']) {
                return rest.trim_end_matches([' ', ',']).to_string();
            }
        }
    }

    q.trim().to_string()
}

fn words(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty())
}

/// Lower-case words longer than two characters, minus stopwords, unique, in order.
pub fn extract_keywords(normalized: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    words(normalized)
        .map(str::to_lowercase)
        .filter(|w| w.chars().count() > 2 && !STOPWORDS.contains(&w.as_str()))
        .filter(|w| seen.insert(w.clone()))
        .take(MAX_KEYWORDS)
        .collect()
}

/// Whole-word (or whole-phrase) occurrences of each cue.
fn count_cues(normalized: &str, cues: &[&str]) -> usize {
    let padded = format!(" {} ", words(normalized).collect::<Vec<_>>().join(" "));
    cues.iter()
        .filter(|cue| padded.contains(&format!(" {cue} ")))
        .count()
}

fn synonyms_of(word: &str) -> Option<&'static [&'static str]> {
    SYNONYMS
        .iter()
        .find(|(term, _)| *term == word)
        .map(|(_, expansions)| *expansions)
}

// ─── Variants ────────────────────────────────────────────

/// The leading keywords plus domain expansions of each.
fn broadened(keywords: &[String]) -> String {
    let mut terms: Vec<&str> = Vec::new();
    for keyword in keywords.iter().take(BROAD_KEYWORDS) {
        terms.push(keyword);
        if let Some(expansions) = synonyms_of(keyword) {
            terms.extend(expansions.iter().copied());
        }
    }
    terms.join(" ")
}

/// Every keyword, with domain shorthand spelled out.
fn narrowed(keywords: &[String]) -> String {
    keywords
        .iter()
        .map(|k| {
            synonyms_of(k)
                .and_then(|e| e.first().copied())
                .unwrap_or(k.as_str())
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Explicit time anchors followed by the remaining keywords.
fn temporal_variant(normalized: &str, keywords: &[String]) -> Option<String> {
    let padded = format!(" {} ", words(normalized).collect::<Vec<_>>().join(" "));
    let anchors: Vec<&str> = TIME_ANCHORS
        .iter()
        .copied()
        .filter(|a| padded.contains(&format!(" {a} ")))
        .collect();
    if anchors.is_empty() {
        return None;
    }

    let anchor_words: HashSet<&str> = anchors.iter().flat_map(|a| a.split(' ')).collect();
    let mut terms = anchors.clone();
    terms.extend(
        keywords
            .iter()
            .map(String::as_str)
            .filter(|k| !anchor_words.contains(k)),
    );
    Some(terms.join(" "))
}

/// Suggested `(top_k, min_score)` per query type, adjusted for how specific
/// the query is.
pub fn search_params(query_type: QueryType, keyword_count: usize) -> SearchParams {
    let (top_k, min_score): (usize, f32) = match query_type {
        QueryType::Factual => (3, 0.4),
        QueryType::Conceptual => (8, 0.25),
        QueryType::Temporal => (6, 0.3),
        QueryType::Exploratory => (10, 0.2),
    };

    if keyword_count <= 2 {
        SearchParams {
            top_k: (top_k + 2).min(10),
            min_score: (min_score - 0.05).max(0.2),
        }
    } else if keyword_count >= 6 {
        SearchParams {
            top_k,
            min_score: (min_score + 0.05).min(0.5),
        }
    } else {
        SearchParams { top_k, min_score }
    }
}
