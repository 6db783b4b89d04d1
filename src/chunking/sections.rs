//! Parsing of the LLM-generated transcript report into tagged sections.
//!
//! Items are stored on chunks as `"<section_key>: <item>"` tags so the
//! report survives restarts alongside the chunks themselves.

use serde::{Deserialize, Serialize};

/// Report headings and the keys their items are stored under.
const SECTION_HEADINGS: &[(&str, &str)] = &[
    ("Main Conversation Topics", "conversation_topics"),
    ("Content Ideas", "content_ideas"),
    ("Action Items", "action_items"),
    ("Notes for the AI", "notes_for_ai"),
    ("Decisions Made", "decisions_made"),
    ("Critical Updates", "critical_updates"),
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportSections {
    pub conversation_topics: Vec<String>,
    pub content_ideas: Vec<String>,
    pub action_items: Vec<String>,
    pub notes_for_ai: Vec<String>,
    pub decisions_made: Vec<String>,
    pub critical_updates: Vec<String>,
}

impl ReportSections {
    fn section_mut(&mut self, key: &str) -> Option<&mut Vec<String>> {
        match key {
            "conversation_topics" => Some(&mut self.conversation_topics),
            "content_ideas" => Some(&mut self.content_ideas),
            "action_items" => Some(&mut self.action_items),
            "notes_for_ai" => Some(&mut self.notes_for_ai),
            "decisions_made" => Some(&mut self.decisions_made),
            "critical_updates" => Some(&mut self.critical_updates),
            _ => None,
        }
    }

    fn sections(&self) -> [(&'static str, &Vec<String>); 6] {
        [
            ("conversation_topics", &self.conversation_topics),
            ("content_ideas", &self.content_ideas),
            ("action_items", &self.action_items),
            ("notes_for_ai", &self.notes_for_ai),
            ("decisions_made", &self.decisions_made),
            ("critical_updates", &self.critical_updates),
        ]
    }

    pub fn is_empty(&self) -> bool {
        self.sections().iter().all(|(_, items)| items.is_empty())
    }

    /// Flatten into chunk tags.
    pub fn to_tags(&self) -> Vec<String> {
        self.sections()
            .iter()
            .flat_map(|(key, items)| items.iter().map(move |item| format!("{key}: {item}")))
            .collect()
    }

    /// Rebuild from chunk tags. Unknown keys are ignored.
    pub fn from_tags(tags: &[String]) -> Self {
        let mut sections = Self::default();
        for tag in tags {
            if let Some((key, item)) = tag.split_once(": ") {
                if let Some(items) = sections.section_mut(key) {
                    items.push(item.to_string());
                }
            }
        }
        sections
    }
}

/// Parse a free-text report. A heading switches the current section; bullet
/// lines (`-`, `*`, `•`) under it become items.
pub fn parse_report(report: &str) -> ReportSections {
    let mut sections = ReportSections::default();
    let mut current: Option<&str> = None;

    for line in report.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some((_, key)) = SECTION_HEADINGS
            .iter()
            .find(|(heading, _)| line.contains(&format!("{heading}:")))
        {
            current = Some(*key);
            continue;
        }

        let Some(key) = current else { continue };
        if line.starts_with(['-', '*', '•']) {
            let item = line.trim_start_matches(['-', '*', '•', ' ']).trim();
            if !item.is_empty() {
                if let Some(items) = sections.section_mut(key) {
                    items.push(item.to_string());
                }
            }
        }
    }

    sections
}
