//! Retrieval-need heuristic: decides whether a conversational turn should go
//! through query planning and retrieval before synthesis.

use crate::models::ChatMessage;

/// Phrases asking outright for a transcript search. The text after the
/// phrase becomes the search query.
const EXPLICIT_TRIGGERS: &[&str] = &[
    "what did we discuss about",
    "when did we talk about",
    "search for",
    "look up",
    "look for",
    "remember when",
    "from the meeting",
    "in the transcript",
    "find",
    "locate",
    "recall",
];

/// Phrases that can only be answered from what was said in a meeting.
const IMPLICIT_TRIGGERS: &[&str] = &[
    "what was decided",
    "what did we decide",
    "what did we agree",
    "what did we say",
    "what did we discuss",
    "action items",
    "who said",
    "did anyone mention",
    "was there discussion about",
    "conclusion",
];

const TEMPORAL_TRIGGERS: &[&str] = &[
    "yesterday",
    "last week",
    "last meeting",
    "last time",
    "previously",
    "earlier",
    "in the past",
    "ago",
];

const ACKNOWLEDGEMENTS: &[&str] = &[
    "thanks", "thank you", "thx", "ok", "okay", "got it", "cool", "great", "nice", "perfect",
    "awesome", "sounds good", "makes sense", "understood", "that's clear", "hi", "hello", "hey",
    "bye", "good morning", "good night", "lol", "yes", "no", "sure",
];

/// Short acknowledgements are never longer than this many words.
const MAX_ACK_WORDS: usize = 6;

const QUESTION_WORDS: &[&str] = &[
    "what", "who", "when", "where", "why", "how", "which", "did", "does", "do", "is", "are",
    "was", "were", "can", "could", "should", "would",
];

const PRONOUNS: &[&str] = &[
    "it", "that", "this", "they", "them", "those", "these", "he", "she", "him", "her",
];

/// Words that carry no topic of their own in a follow-up question.
const FILLER: &[&str] = &[
    "about", "the", "a", "an", "s", "mean", "so", "then", "and", "but", "again", "more",
    "please", "you", "we", "me", "tell", "explain",
];

const SEARCH_FILLER: &[&str] = &["the", "a", "an", "about", "for", "regarding", "on"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalDecision {
    pub needed: bool,
    /// Search text to plan from, when retrieval is needed
    pub query: Option<String>,
}

impl RetrievalDecision {
    fn skip() -> Self {
        Self {
            needed: false,
            query: None,
        }
    }

    fn search(query: impl Into<String>) -> Self {
        Self {
            needed: true,
            query: Some(query.into()),
        }
    }
}

/// Decide whether `message` needs transcript retrieval.
///
/// `recent` holds the prior messages of the session, oldest first, without
/// `message` itself. `active_topics` are lower-case topics from earlier
/// retrieval turns.
pub fn decide(message: &str, recent: &[ChatMessage], active_topics: &[String]) -> RetrievalDecision {
    let message = message.trim();
    let lower = message.to_lowercase();
    let padded = padded_words(&lower);
    let is_question = message.contains('?');

    for trigger in EXPLICIT_TRIGGERS {
        if let Some(pos) = find_phrase(&lower, trigger) {
            return RetrievalDecision::search(extract_search_query(message, &lower, pos + trigger.len()));
        }
    }

    let mentions = |phrases: &[&str]| phrases.iter().any(|p| padded.contains(&format!(" {p} ")));

    if mentions(IMPLICIT_TRIGGERS) || mentions(TEMPORAL_TRIGGERS) {
        return RetrievalDecision::search(message);
    }

    // Triggers win over a greeting or acknowledgement prefix
    if !is_question && is_acknowledgement(&padded) {
        return RetrievalDecision::skip();
    }

    let question = is_question || starts_with_question_word(&padded);
    if question && is_pronoun_only(&padded) && !recent.is_empty() {
        return RetrievalDecision::skip();
    }

    let search_context = recent.iter().rev().take(3).any(|m| {
        let content = m.content.to_lowercase();
        content.contains("search") || content.contains("transcript")
    });
    if search_context {
        return RetrievalDecision::search(message);
    }

    if active_topics
        .iter()
        .any(|topic| !topic.is_empty() && lower.contains(topic.as_str()))
    {
        return RetrievalDecision::search(message);
    }

    if question {
        return RetrievalDecision::search(message);
    }

    RetrievalDecision::skip()
}

/// `" w1 w2 ... "` over alphanumeric words, apostrophes kept.
fn padded_words(lower: &str) -> String {
    let words: Vec<&str> = lower
        .split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .filter(|w| !w.is_empty())
        .collect();
    format!(" {} ", words.join(" "))
}

fn word_list(padded: &str) -> Vec<&str> {
    padded.split_whitespace().collect()
}

fn is_acknowledgement(padded: &str) -> bool {
    let words = word_list(padded);
    if words.is_empty() {
        return true;
    }
    if words.len() > MAX_ACK_WORDS {
        return false;
    }
    let joined = words.join(" ");
    ACKNOWLEDGEMENTS
        .iter()
        .any(|ack| joined == *ack || joined.starts_with(&format!("{ack} ")))
}

fn starts_with_question_word(padded: &str) -> bool {
    word_list(padded)
        .first()
        .is_some_and(|w| QUESTION_WORDS.contains(w))
}

/// A question whose only subject is a pronoun, e.g. "why is that?".
fn is_pronoun_only(padded: &str) -> bool {
    let words = word_list(padded);
    let has_pronoun = words
        .iter()
        .any(|w| PRONOUNS.contains(&w.trim_end_matches("'s")));
    let has_subject = words.iter().any(|w| {
        let w = w.trim_end_matches("'s");
        !QUESTION_WORDS.contains(&w) && !PRONOUNS.contains(&w) && !FILLER.contains(&w)
    });
    has_pronoun && !has_subject
}

/// Byte position of `phrase` in `lower` as whole words.
fn find_phrase(lower: &str, phrase: &str) -> Option<usize> {
    lower.match_indices(phrase).map(|(pos, _)| pos).find(|&pos| {
        let before_ok = lower[..pos]
            .chars()
            .next_back()
            .is_none_or(|c| !c.is_alphanumeric());
        let after_ok = lower[pos + phrase.len()..]
            .chars()
            .next()
            .is_none_or(|c| !c.is_alphanumeric());
        before_ok && after_ok
    })
}

/// Text after the trigger, without a leading filler word or trailing
/// punctuation. Falls back to the whole message when nothing is left.
fn extract_search_query(message: &str, lower: &str, after: usize) -> String {
    // Lower-casing can change byte lengths outside ASCII
    let source = if lower.len() == message.len() { message } else { lower };
    let rest = source.get(after..).unwrap_or("").trim();

    let mut words: Vec<&str> = rest.split_whitespace().collect();
    if words
        .first()
        .is_some_and(|w| SEARCH_FILLER.contains(&w.to_lowercase().as_str()))
    {
        words.remove(0);
    }
    let query = words
        .join(" ")
        .trim_end_matches(['?', '.', ',', '!'])
        .trim()
        .to_string();

    if query.is_empty() {
        message.to_string()
    } else {
        query
    }
}
