//! Prompts and output schema for memory extraction and summarization

use std::fmt::Write;

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::db::{Character, Fact, User};

/// A memory candidate proposed by the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedMemory {
    /// Diary-style note from the character's point of view
    pub content: String,
    #[serde(default = "default_score")]
    pub importance: f64,
    #[serde(default = "default_score")]
    pub confidence: f64,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A stable fact proposed by the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedFact {
    pub name: String,
    pub value: String,
    #[serde(default, rename = "type")]
    pub fact_type: String,
}

/// Structured extraction output
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionResponse {
    #[serde(default)]
    pub memories: Vec<ExtractedMemory>,
    #[serde(default)]
    pub user_facts: Vec<ExtractedFact>,
    #[serde(default)]
    pub character_facts: Vec<ExtractedFact>,
}

const fn default_score() -> f64 {
    0.5
}

/// Parse model output, tolerating a surrounding Markdown code fence
///
/// # Errors
///
/// Returns error if the payload is not valid extraction JSON
pub fn parse_extraction(raw: &str) -> Result<ExtractionResponse> {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed);
    Ok(serde_json::from_str(body.trim())?)
}

/// Everything the prompts know about the pair
#[derive(Debug, Default)]
pub struct PromptSubjects<'a> {
    pub user: Option<&'a User>,
    pub character: Option<&'a Character>,
    pub user_facts: &'a [Fact],
    pub character_facts: &'a [Fact],
}

impl PromptSubjects<'_> {
    fn character_name(&self) -> &str {
        self.character.map_or("the character", |c| c.name.as_str())
    }

    fn user_name(&self) -> &str {
        self.user
            .map(|u| u.name.as_str())
            .filter(|name| !name.is_empty())
            .unwrap_or("the user")
    }

    fn write_known_facts(&self, out: &mut String) {
        if !self.character_facts.is_empty() {
            let _ = writeln!(out, "\nKnown facts about {}:", self.character_name());
            for fact in self.character_facts {
                let _ = writeln!(out, "- {}: {}", fact.name, fact.value);
            }
        }
        if !self.user_facts.is_empty() {
            let _ = writeln!(out, "\nKnown facts about {}:", self.user_name());
            for fact in self.user_facts {
                let _ = writeln!(out, "- {}: {}", fact.name, fact.value);
            }
        }
    }
}

/// System prompt asking for memories and facts as JSON
#[must_use]
pub fn extraction_prompt(subjects: &PromptSubjects<'_>) -> String {
    let character = subjects.character_name();
    let user = subjects.user_name();

    let mut prompt = format!(
        r#"You maintain the long-term memory of {character}, who is talking with {user}.
Read the conversation and extract what is worth remembering.

Output JSON with this structure:
{{
  "memories": [
    {{"content": "...", "importance": 0.0, "confidence": 0.0, "tags": ["..."]}}
  ],
  "user_facts": [{{"name": "...", "value": "...", "type": "..."}}],
  "character_facts": [{{"name": "...", "value": "...", "type": "..."}}]
}}

memories: significant events or emotional moments, written as a short diary
entry from {character}'s point of view. importance is the emotional weight or
long-term relevance from 0.0 to 1.0; confidence is how certain it is that the
memory is grounded in the conversation.
user_facts / character_facts: stable attributes (name, job, preferences,
relationships) stated clearly in the conversation.

Ignore greetings, one-off requests and temporary states. Do not repeat facts
that are already known. Every list must be empty if nothing new was said.
"#
    );

    subjects.write_known_facts(&mut prompt);
    prompt
}

/// System prompt asking for a short running summary
#[must_use]
pub fn summary_prompt(subjects: &PromptSubjects<'_>, previous: Option<&str>) -> String {
    let mut prompt = format!(
        "Summarize the conversation between {} and {} in 2-4 sentences. \
         Focus on what happened, how they felt, and anything left unresolved. \
         Reply with the summary only.\n",
        subjects.character_name(),
        subjects.user_name()
    );

    if let Some(previous) = previous.filter(|p| !p.trim().is_empty()) {
        let _ = write!(prompt, "\nEarlier summary to build on:\n{previous}\n");
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_output() {
        let raw = r#"{
            "memories": [{"content": "Hoang shared that he got a new job", "importance": 0.8, "confidence": 0.9, "tags": ["career"]}],
            "user_facts": [{"name": "job", "value": "backend developer", "type": "career"}],
            "character_facts": []
        }"#;
        let parsed = parse_extraction(raw).unwrap();
        assert_eq!(parsed.memories.len(), 1);
        assert_eq!(parsed.memories[0].tags, vec!["career"]);
        assert_eq!(parsed.user_facts[0].fact_type, "career");
        assert!(parsed.character_facts.is_empty());
    }

    #[test]
    fn missing_lists_default_to_empty() {
        let parsed = parse_extraction(r#"{"memories": [{"content": "x"}]}"#).unwrap();
        assert!((parsed.memories[0].importance - 0.5).abs() < f64::EPSILON);
        assert!(parsed.user_facts.is_empty());
    }

    #[test]
    fn strips_code_fence() {
        let parsed = parse_extraction("```json\n{\"memories\": []}\n```").unwrap();
        assert!(parsed.memories.is_empty());
        assert!(parse_extraction("not json").is_err());
    }

    #[test]
    fn summary_prompt_includes_previous() {
        let subjects = PromptSubjects::default();
        let prompt = summary_prompt(&subjects, Some("They met yesterday."));
        assert!(prompt.contains("2-4 sentences"));
        assert!(prompt.contains("They met yesterday."));
        assert!(!summary_prompt(&subjects, None).contains("Earlier summary"));
    }
}
