//! Post-turn memory curation
//!
//! Runs after the reply has been delivered. Every failure is logged and
//! swallowed; curation never affects the turn that triggered it.

use std::sync::Arc;

use super::EmbeddingIndex;
use super::extraction::{self, ExtractedFact, PromptSubjects};
use crate::agent::TurnContext;
use crate::db::{
    Character, ConversationStore, Fact, FactStore, FactSubject, Memory, ProfileRepo, User,
};
use crate::llm::{ChatRequest, LanguageModel};
use crate::message::{ChatMessage, transcript_to_text};
use crate::{Error, Result};

/// Curation tuning knobs
#[derive(Debug, Clone)]
pub struct CuratorSettings {
    /// Summarize when the transcript length is a multiple of this; 0 disables
    pub summary_cadence: usize,
    /// Messages fed to the summary prompt
    pub summary_window: usize,
    /// Messages fed to the extraction prompt
    pub extraction_window: usize,
    /// Memory candidates below this importance are dropped
    pub importance_floor: f64,
}

impl Default for CuratorSettings {
    fn default() -> Self {
        Self {
            summary_cadence: 20,
            summary_window: 20,
            extraction_window: 10,
            importance_floor: 0.3,
        }
    }
}

/// What one curation pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CurationReport {
    pub summarized: bool,
    pub stored: usize,
    pub duplicates: usize,
    pub skipped: usize,
    pub facts: usize,
}

/// Profile data loaded once per pass
struct Subjects {
    user: Option<User>,
    character: Option<Character>,
    user_facts: Vec<Fact>,
    character_facts: Vec<Fact>,
}

impl Subjects {
    fn prompt(&self) -> PromptSubjects<'_> {
        PromptSubjects {
            user: self.user.as_ref(),
            character: self.character.as_ref(),
            user_facts: &self.user_facts,
            character_facts: &self.character_facts,
        }
    }
}

/// Extracts memories, facts and summaries from recent history
pub struct MemoryCurator {
    model: Arc<dyn LanguageModel>,
    index: Arc<EmbeddingIndex>,
    conversations: Arc<dyn ConversationStore>,
    facts: Arc<dyn FactStore>,
    profiles: ProfileRepo,
    settings: CuratorSettings,
}

impl MemoryCurator {
    #[must_use]
    pub fn new(
        model: Arc<dyn LanguageModel>,
        index: Arc<EmbeddingIndex>,
        conversations: Arc<dyn ConversationStore>,
        facts: Arc<dyn FactStore>,
        profiles: ProfileRepo,
    ) -> Self {
        Self {
            model,
            index,
            conversations,
            facts,
            profiles,
            settings: CuratorSettings::default(),
        }
    }

    #[must_use]
    pub fn with_settings(mut self, settings: CuratorSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Whether a transcript of `count` messages is due for a summary
    #[must_use]
    pub const fn should_summarize(&self, count: usize) -> bool {
        let cadence = self.settings.summary_cadence;
        count > 0 && cadence > 0 && count % cadence == 0
    }

    /// Run one curation pass for the conversation in `ctx`
    pub async fn curate(&self, ctx: &TurnContext) -> CurationReport {
        let mut report = CurationReport::default();

        let count = match self.conversations.count(&ctx.conversation_id) {
            Ok(count) => count,
            Err(e) => {
                tracing::error!(conversation_id = %ctx.conversation_id, error = %e, "curation skipped: cannot count messages");
                return report;
            }
        };
        if count == 0 {
            return report;
        }

        let subjects = self.load_subjects(ctx);

        if self.should_summarize(count) {
            match self.summarize(ctx, &subjects).await {
                Ok(()) => report.summarized = true,
                Err(e) => {
                    tracing::warn!(conversation_id = %ctx.conversation_id, error = %e, "summary generation failed");
                }
            }
        }

        if let Err(e) = self.extract(ctx, &subjects, &mut report).await {
            tracing::warn!(conversation_id = %ctx.conversation_id, error = %e, "memory extraction failed");
        }

        tracing::info!(
            conversation_id = %ctx.conversation_id,
            messages = count,
            summarized = report.summarized,
            stored = report.stored,
            duplicates = report.duplicates,
            facts = report.facts,
            "memory curation finished"
        );
        report
    }

    fn load_subjects(&self, ctx: &TurnContext) -> Subjects {
        let user_subject = FactSubject::User(ctx.user_id.clone());
        let character_subject = FactSubject::Character(ctx.character_id.clone());

        Subjects {
            user: self.profiles.get_user(&ctx.user_id).ok().flatten(),
            character: self.profiles.get_character(&ctx.character_id).ok().flatten(),
            user_facts: self.facts.latest(&user_subject).unwrap_or_default(),
            character_facts: self.facts.latest(&character_subject).unwrap_or_default(),
        }
    }

    fn recent_transcript(&self, conversation_id: &str, window: usize) -> Result<String> {
        let history: Vec<ChatMessage> = self
            .conversations
            .list_recent(conversation_id, window)?
            .into_iter()
            .map(|record| record.message)
            .collect();
        Ok(transcript_to_text(&history))
    }

    async fn summarize(&self, ctx: &TurnContext, subjects: &Subjects) -> Result<()> {
        let transcript = self.recent_transcript(&ctx.conversation_id, self.settings.summary_window)?;
        let previous = self
            .conversations
            .get(&ctx.conversation_id)?
            .and_then(|c| c.current_summary);

        let request = ChatRequest::new(vec![ChatMessage::user(transcript)])
            .with_system(extraction::summary_prompt(&subjects.prompt(), previous.as_deref()));
        let summary = self.model.generate(&request).await?;
        let summary = summary.trim();
        if summary.is_empty() {
            return Err(Error::ModelStream("empty summary".to_string()));
        }

        self.conversations.set_summary(&ctx.conversation_id, summary)?;
        tracing::debug!(conversation_id = %ctx.conversation_id, "conversation summary updated");
        Ok(())
    }

    async fn extract(
        &self,
        ctx: &TurnContext,
        subjects: &Subjects,
        report: &mut CurationReport,
    ) -> Result<()> {
        let transcript =
            self.recent_transcript(&ctx.conversation_id, self.settings.extraction_window)?;
        let request = ChatRequest::new(vec![ChatMessage::user(transcript)])
            .with_system(extraction::extraction_prompt(&subjects.prompt()))
            .json();

        let raw = self.model.generate(&request).await?;
        let extracted = extraction::parse_extraction(&raw)?;

        for candidate in extracted.memories {
            let content = candidate.content.trim();
            if content.is_empty() || candidate.importance < self.settings.importance_floor {
                report.skipped += 1;
                continue;
            }

            let mut memory = Memory::new(ctx.user_id.as_str(), ctx.character_id.as_str(), content, Vec::new())
                .with_scores(candidate.importance, candidate.confidence)
                .with_source(ctx.conversation_id.as_str());
            for tag in candidate.tags {
                memory = memory.with_tag(tag);
            }

            match self.index.add_memory(memory).await {
                Ok(_) => report.stored += 1,
                Err(Error::DuplicateMemory {
                    existing_id,
                    distance,
                }) => {
                    tracing::debug!(existing_id = %existing_id, distance, "skipping duplicate memory");
                    report.duplicates += 1;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to store memory");
                    report.skipped += 1;
                }
            }
        }

        report.facts += self.store_facts(&FactSubject::User(ctx.user_id.clone()), extracted.user_facts);
        report.facts += self.store_facts(
            &FactSubject::Character(ctx.character_id.clone()),
            extracted.character_facts,
        );
        Ok(())
    }

    fn store_facts(&self, subject: &FactSubject, facts: Vec<ExtractedFact>) -> usize {
        let mut stored = 0;
        for fact in facts {
            if fact.name.trim().is_empty() || fact.value.trim().is_empty() {
                continue;
            }
            let fact = Fact::new(subject.clone(), fact.name.trim(), fact.value.trim())
                .with_type(fact.fact_type);
            match self.facts.append(&fact) {
                Ok(()) => stored += 1,
                Err(e) => tracing::warn!(fact = %fact.name, error = %e, "failed to store fact"),
            }
        }
        stored
    }
}
