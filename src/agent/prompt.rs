//! System prompt assembly
//!
//! The persona part of the prompt (character base prompt, profile, facts)
//! only changes when facts change, so it is rendered once per
//! `(character, user)` pair and kept in an LRU cache. The conversation
//! summary and recalled memories are appended per turn.

use std::fmt::Write;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError};

use lru::LruCache;

use super::TurnContext;
use crate::Result;
use crate::db::{Fact, FactRepo, FactStore, FactSubject, Memory, MemoryRepo, ProfileRepo};

/// Default number of cached `(character, user)` prompts
pub const DEFAULT_PROMPT_CACHE_CAPACITY: usize = 64;

type PairKey = (String, String);

/// Bounded get-or-compute cache of rendered persona prompts
pub struct PromptCache {
    entries: Mutex<LruCache<PairKey, Arc<str>>>,
}

impl PromptCache {
    /// Create a cache holding at most `capacity` prompts (minimum 1)
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Return the cached prompt or compute and store it
    ///
    /// Errors from `compute` are returned and nothing is cached.
    ///
    /// # Errors
    ///
    /// Propagates the error returned by `compute`
    pub fn get_or_compute<F>(&self, character_id: &str, user_id: &str, compute: F) -> Result<Arc<str>>
    where
        F: FnOnce() -> Result<String>,
    {
        let key = (character_id.to_string(), user_id.to_string());
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(prompt) = entries.get(&key) {
            return Ok(Arc::clone(prompt));
        }

        let prompt: Arc<str> = Arc::from(compute()?);
        entries.put(key, Arc::clone(&prompt));
        Ok(prompt)
    }

    /// Drop the cached prompt for a pair
    pub fn invalidate(&self, character_id: &str, user_id: &str) {
        let key = (character_id.to_string(), user_id.to_string());
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop(&key);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PromptCache {
    fn default() -> Self {
        Self::new(DEFAULT_PROMPT_CACHE_CAPACITY)
    }
}

/// Renders system prompts from profiles, facts, summary and memories
pub struct SystemPromptBuilder {
    profiles: ProfileRepo,
    facts: Arc<dyn FactStore>,
    cache: PromptCache,
}

impl SystemPromptBuilder {
    #[must_use]
    pub fn new(profiles: ProfileRepo, facts: Arc<dyn FactStore>) -> Self {
        Self {
            profiles,
            facts,
            cache: PromptCache::default(),
        }
    }

    #[must_use]
    pub fn with_cache(mut self, cache: PromptCache) -> Self {
        self.cache = cache;
        self
    }

    #[must_use]
    pub const fn cache(&self) -> &PromptCache {
        &self.cache
    }

    /// Persona prompt for the pair, cached
    ///
    /// # Errors
    ///
    /// Returns error if profiles or facts cannot be read
    pub fn persona(&self, ctx: &TurnContext) -> Result<Arc<str>> {
        self.cache
            .get_or_compute(&ctx.character_id, &ctx.user_id, || self.render_persona(ctx))
    }

    fn render_persona(&self, ctx: &TurnContext) -> Result<String> {
        let character = self.profiles.get_character(&ctx.character_id)?;
        let user = self.profiles.get_user(&ctx.user_id)?;
        let character_facts = self
            .facts
            .latest(&FactSubject::Character(ctx.character_id.clone()))?;
        let user_facts = self.facts.latest(&FactSubject::User(ctx.user_id.clone()))?;

        tracing::debug!(
            character_id = %ctx.character_id,
            user_id = %ctx.user_id,
            "rendering persona prompt"
        );

        let mut sections = Vec::new();
        if let Some(base) = character
            .as_ref()
            .map(|c| c.base_prompt.trim())
            .filter(|p| !p.is_empty())
        {
            sections.push(base.to_string());
        }
        push_facts(&mut sections, "About you:", &character_facts);

        let mut about_user = String::new();
        if let Some(user) = &user {
            if !user.name.is_empty() {
                let _ = writeln!(about_user, "Name: {}", user.name);
            }
            if !user.bio.is_empty() {
                let _ = writeln!(about_user, "{}", user.bio);
            }
        }
        about_user.push_str(&FactRepo::format_for_prompt(&user_facts));
        if !about_user.is_empty() {
            sections.push(format!("About the user:\n{}", about_user.trim_end()));
        }

        Ok(sections.join("\n\n"))
    }

    /// Full system prompt for one turn
    ///
    /// # Errors
    ///
    /// Returns error if the persona prompt cannot be rendered
    pub fn render(
        &self,
        ctx: &TurnContext,
        summary: Option<&str>,
        memories: &[Memory],
    ) -> Result<String> {
        let mut prompt = self.persona(ctx)?.to_string();

        if let Some(summary) = summary.map(str::trim).filter(|s| !s.is_empty()) {
            prompt.push_str("\n\nThe story so far:\n");
            prompt.push_str(summary);
        }

        let recalled = MemoryRepo::format_for_prompt(memories);
        if !recalled.is_empty() {
            prompt.push_str("\n\n");
            prompt.push_str(recalled.trim_end());
        }

        Ok(prompt)
    }

    /// Forget the cached persona prompt for the pair
    pub fn invalidate(&self, ctx: &TurnContext) {
        self.cache.invalidate(&ctx.character_id, &ctx.user_id);
    }
}

fn push_facts(sections: &mut Vec<String>, heading: &str, facts: &[Fact]) {
    if facts.is_empty() {
        return;
    }
    let lines = FactRepo::format_for_prompt(facts);
    sections.push(format!("{heading}\n{}", lines.trim_end()));
}
