//! LLM-backed extraction, normalization and candidate resolution.
//!
//! `LlmOracle` implements the three text oracles over a `Completion`
//! seam. `RigCompletion` is the production implementation (rig-core,
//! OpenAI-compatible endpoint); tests plug in canned completions.
//!
//! None of these oracles fail a run. Unparsable or failed completions are
//! logged and folded into an empty extraction, a locally folded id, or
//! `Candidate::Unknown`.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use resolution::{
    Candidate, CandidateResolver, EntityKind, Extraction, Extractor, LocatorError, LocatorResult,
    Normalizer, ResolverInput,
};
use rig::client::CompletionClient;
use rig::completion::Prompt;
use rig::providers::openai;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ModelConfig;
use crate::prompts;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelRole {
    Extraction,
    Normalizer,
    Resolver,
}

impl ModelRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Extraction => "extraction",
            Self::Normalizer => "normalizer",
            Self::Resolver => "resolver",
        }
    }
}

impl std::fmt::Display for ModelRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One-shot text completion.
#[async_trait]
pub trait Completion: Send + Sync {
    async fn complete(&self, role: ModelRole, preamble: &str, prompt: &str)
        -> LocatorResult<String>;

    /// Model identity for `role`, used to key cached answers.
    fn model_name(&self, role: ModelRole) -> String {
        role.as_str().to_string()
    }
}

/// Completion over a rig OpenAI-compatible client, one model per role.
pub struct RigCompletion {
    client: openai::CompletionsClient,
    models: ModelConfig,
    temperature: f64,
}

impl RigCompletion {
    pub fn new(client: openai::CompletionsClient, models: ModelConfig, temperature: f64) -> Self {
        Self {
            client,
            models,
            temperature,
        }
    }

    fn model_for(&self, role: ModelRole) -> &str {
        match role {
            ModelRole::Extraction => &self.models.extraction,
            ModelRole::Normalizer => &self.models.normalizer,
            ModelRole::Resolver => &self.models.resolver,
        }
    }
}

#[async_trait]
impl Completion for RigCompletion {
    async fn complete(
        &self,
        role: ModelRole,
        preamble: &str,
        prompt: &str,
    ) -> LocatorResult<String> {
        let model = self.model_for(role);
        debug!(%role, model, "requesting completion");
        let agent = self
            .client
            .agent(model)
            .preamble(preamble)
            .temperature(self.temperature)
            .build();
        let response: String = agent
            .prompt(prompt)
            .await
            .map_err(|e| LocatorError::Transport(format!("{role} completion failed: {e}")))?;
        Ok(response)
    }

    fn model_name(&self, role: ModelRole) -> String {
        self.model_for(role).to_string()
    }
}

#[derive(Debug, Default, Deserialize)]
struct EntityLists {
    #[serde(default)]
    names: Vec<String>,
    #[serde(default)]
    cities: Vec<String>,
}

/// The three text oracles over one completion backend.
pub struct LlmOracle {
    completion: Arc<dyn Completion>,
    target_name: String,
    memo: Mutex<HashMap<(EntityKind, String), String>>,
}

impl LlmOracle {
    pub fn new(completion: Arc<dyn Completion>, target_name: impl Into<String>) -> Self {
        Self {
            completion,
            target_name: target_name.into(),
            memo: Mutex::new(HashMap::new()),
        }
    }

    async fn entity_lists(&self, prompt: &str) -> LocatorResult<EntityLists> {
        let raw = self
            .completion
            .complete(ModelRole::Extraction, prompts::EXTRACTION_PREAMBLE, prompt)
            .await?;
        parse_entity_lists(&raw)
    }

    fn memoized(&self, kind: EntityKind, raw: &str) -> Option<String> {
        self.memo
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(&(kind, raw.to_string()))
            .cloned()
    }

    fn remember(&self, kind: EntityKind, raw: &str, canonical: &str) {
        self.memo
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert((kind, raw.to_string()), canonical.to_string());
    }
}

#[async_trait]
impl Extractor for LlmOracle {
    async fn extract(&self, note: &str) -> Extraction {
        let entities = self
            .entity_lists(&prompts::extraction_prompt(note))
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "entity extraction failed, continuing with none");
                EntityLists::default()
            });
        let prior = self
            .entity_lists(&prompts::prior_locations_prompt(note, &self.target_name))
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "prior-location extraction failed, continuing with none");
                EntityLists::default()
            });

        let extraction = Extraction {
            persons: non_empty(entities.names),
            places: non_empty(entities.cities),
            prior_locations: non_empty(prior.cities),
        };
        debug!(
            persons = extraction.persons.len(),
            places = extraction.places.len(),
            prior = extraction.prior_locations.len(),
            "note extracted"
        );
        extraction
    }
}

#[async_trait]
impl Normalizer for LlmOracle {
    async fn normalize(&self, raw: &str, kind: EntityKind) -> String {
        if let Some(hit) = self.memoized(kind, raw) {
            return hit;
        }
        let prompt = prompts::normalization_prompt(raw, kind);
        let answer = match self
            .completion
            .complete(ModelRole::Normalizer, prompts::NORMALIZER_PREAMBLE, &prompt)
            .await
        {
            Ok(answer) => clean_token(&answer, kind),
            Err(e) => {
                warn!(raw, %kind, error = %e, "normalization failed, folding locally");
                None
            }
        };
        let canonical = answer
            .or_else(|| clean_token(raw, kind))
            .unwrap_or_else(|| raw.trim().to_uppercase());
        debug!(raw, %kind, canonical = %canonical, "normalized");
        self.remember(kind, raw, &canonical);
        canonical
    }
}

#[async_trait]
impl CandidateResolver for LlmOracle {
    async fn resolve(&self, input: &ResolverInput<'_>) -> Candidate {
        let prompt = prompts::resolver_prompt(input, &self.target_name);
        match self
            .completion
            .complete(ModelRole::Resolver, prompts::RESOLVER_PREAMBLE, &prompt)
            .await
        {
            Ok(answer) => {
                let line = answer
                    .lines()
                    .map(str::trim)
                    .find(|l| !l.is_empty())
                    .unwrap_or_default();
                Candidate::from_answer(&fold_polish(line))
            }
            Err(e) => {
                warn!(error = %e, "candidate resolver failed");
                Candidate::Unknown
            }
        }
    }
}

/// Strip markdown fences and surrounding prose from a JSON object reply.
pub fn extract_json_object(raw: &str) -> &str {
    let stripped = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    match (stripped.find('{'), stripped.rfind('}')) {
        (Some(start), Some(end)) if start < end => &stripped[start..=end],
        _ => stripped,
    }
}

fn parse_entity_lists(raw: &str) -> LocatorResult<EntityLists> {
    serde_json::from_str(extract_json_object(raw))
        .map_err(|e| LocatorError::malformed("extraction", format!("{e}; raw: {raw}")))
}

fn non_empty(items: Vec<String>) -> BTreeSet<String> {
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Uppercase and replace Polish letters with ASCII.
pub fn fold_polish(text: &str) -> String {
    text.chars()
        .flat_map(char::to_uppercase)
        .map(|c| match c {
            'Ą' => 'A',
            'Ć' => 'C',
            'Ę' => 'E',
            'Ł' => 'L',
            'Ń' => 'N',
            'Ó' => 'O',
            'Ś' => 'S',
            'Ź' | 'Ż' => 'Z',
            other => other,
        })
        .collect()
}

/// Canonical id from the first non-empty line of `answer`, folded, with
/// surrounding quotes and punctuation trimmed.
///
/// Persons keep only the first name; places keep every word, so
/// "Zielona Góra" stays "ZIELONA GORA". `None` if nothing usable is left.
pub fn clean_token(answer: &str, kind: EntityKind) -> Option<String> {
    let line = answer.lines().map(str::trim).find(|l| !l.is_empty())?;
    let text = match kind {
        EntityKind::Person => line.split_whitespace().next()?.to_string(),
        EntityKind::Place => line.split_whitespace().collect::<Vec<_>>().join(" "),
    };
    let token = fold_polish(text.trim_matches(|c: char| !c.is_alphanumeric()));
    (!token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use resolution::AssociationMap;

    use super::*;

    /// Pops scripted answers in order and records every call.
    #[derive(Default)]
    struct ScriptedCompletion {
        answers: Mutex<VecDeque<LocatorResult<String>>>,
        calls: Mutex<Vec<(ModelRole, String)>>,
    }

    impl ScriptedCompletion {
        fn new(answers: Vec<LocatorResult<String>>) -> Arc<Self> {
            Arc::new(Self {
                answers: Mutex::new(answers.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<(ModelRole, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Completion for ScriptedCompletion {
        async fn complete(
            &self,
            role: ModelRole,
            _preamble: &str,
            prompt: &str,
        ) -> LocatorResult<String> {
            self.calls.lock().unwrap().push((role, prompt.to_string()));
            self.answers
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(LocatorError::Transport("script exhausted".into())))
        }
    }

    fn ok(s: &str) -> LocatorResult<String> {
        Ok(s.to_string())
    }

    #[test]
    fn folds_polish_letters() {
        assert_eq!(fold_polish("Grudziądz"), "GRUDZIADZ");
        assert_eq!(fold_polish("Elbląg"), "ELBLAG");
        assert_eq!(fold_polish("Rafał"), "RAFAL");
        assert_eq!(fold_polish("Łódź"), "LODZ");
    }

    #[test]
    fn clean_token_takes_first_name_for_persons() {
        let person = EntityKind::Person;
        assert_eq!(
            clean_token("  \"Rafał\".\nextra", person),
            Some("RAFAL".to_string())
        );
        assert_eq!(clean_token("Barbara Zawadzka", person), Some("BARBARA".to_string()));
        assert_eq!(clean_token("\n  \n", person), None);
        assert_eq!(clean_token("\"\"", person), None);
    }

    #[test]
    fn clean_token_keeps_every_word_of_a_place() {
        let place = EntityKind::Place;
        assert_eq!(
            clean_token("Zielona  Góra.\nextra", place),
            Some("ZIELONA GORA".to_string())
        );
        assert_eq!(clean_token("\"Kraków\"", place), Some("KRAKOW".to_string()));
        assert_eq!(clean_token("  \n", place), None);
    }

    #[test]
    fn json_object_is_found_inside_fences_and_prose() {
        let raw = "```json\n{\"names\":[\"Adam\"]}\n```";
        assert_eq!(extract_json_object(raw), "{\"names\":[\"Adam\"]}");
        let raw = "Sure! {\"cities\":[]} Hope that helps.";
        assert_eq!(extract_json_object(raw), "{\"cities\":[]}");
    }

    #[tokio::test]
    async fn extraction_parses_both_calls() {
        let completion = ScriptedCompletion::new(vec![
            ok(r#"{"names":["Adam"," Rafał ",""],"cities":["Kraków"]}"#),
            ok("```json\n{\"cities\":[\"Kraków\"]}\n```"),
        ]);
        let oracle = LlmOracle::new(completion.clone(), "BARBARA");
        let extraction = oracle.extract("note").await;

        assert_eq!(extraction.persons.len(), 2);
        assert!(extraction.persons.contains("Rafał"));
        assert!(extraction.places.contains("Kraków"));
        assert!(extraction.prior_locations.contains("Kraków"));
        assert!(completion
            .calls()
            .iter()
            .all(|(role, _)| *role == ModelRole::Extraction));
    }

    #[tokio::test]
    async fn unparsable_extraction_is_empty() {
        let completion = ScriptedCompletion::new(vec![ok("I cannot help."), ok("nope")]);
        let oracle = LlmOracle::new(completion, "BARBARA");
        let extraction = oracle.extract("note").await;
        assert!(extraction.is_empty());
        assert!(extraction.prior_locations.is_empty());
    }

    #[tokio::test]
    async fn normalization_is_memoized_per_kind() {
        let completion = ScriptedCompletion::new(vec![ok("KRAKOW"), ok("KRAKOWIAK")]);
        let oracle = LlmOracle::new(completion.clone(), "BARBARA");

        assert_eq!(oracle.normalize("Krakowie", EntityKind::Place).await, "KRAKOW");
        assert_eq!(oracle.normalize("Krakowie", EntityKind::Place).await, "KRAKOW");
        assert_eq!(
            oracle.normalize("Krakowie", EntityKind::Person).await,
            "KRAKOWIAK"
        );
        assert_eq!(completion.calls().len(), 2);
    }

    #[tokio::test]
    async fn failed_normalization_folds_locally() {
        let completion = ScriptedCompletion::new(vec![
            Err(LocatorError::Transport("down".into())),
            ok("   "),
        ]);
        let oracle = LlmOracle::new(completion, "BARBARA");
        assert_eq!(oracle.normalize("Grudziądz", EntityKind::Place).await, "GRUDZIADZ");
        assert_eq!(oracle.normalize("Rafał", EntityKind::Person).await, "RAFAL");
    }

    #[tokio::test]
    async fn multi_word_place_is_not_truncated() {
        let completion = ScriptedCompletion::new(vec![
            ok("ZIELONA GORA"),
            Err(LocatorError::Transport("down".into())),
            ok("Zbigniew Nowak"),
        ]);
        let oracle = LlmOracle::new(completion, "BARBARA");
        assert_eq!(
            oracle.normalize("Zielonej Górze", EntityKind::Place).await,
            "ZIELONA GORA"
        );
        assert_eq!(
            oracle.normalize("Bielsko Biała", EntityKind::Place).await,
            "BIELSKO BIALA"
        );
        assert_eq!(
            oracle.normalize("Zbigniewem", EntityKind::Person).await,
            "ZBIGNIEW"
        );
    }

    #[tokio::test]
    async fn resolver_reads_first_line() {
        let associations = AssociationMap::default();
        let candidates = vec!["ELBLAG".to_string()];
        let excluded = BTreeSet::new();
        let input = ResolverInput {
            note: "note",
            associations: &associations,
            candidates: &candidates,
            excluded: &excluded,
        };

        let completion = ScriptedCompletion::new(vec![
            ok("\nElbląg.\nBecause..."),
            ok("UNKNOWN"),
            Err(LocatorError::Transport("timeout".into())),
        ]);
        let oracle = LlmOracle::new(completion.clone(), "BARBARA");

        assert_eq!(
            oracle.resolve(&input).await,
            Candidate::Place("ELBLAG".to_string())
        );
        assert_eq!(oracle.resolve(&input).await, Candidate::Unknown);
        assert_eq!(oracle.resolve(&input).await, Candidate::Unknown);
        assert!(completion.calls()[0].1.contains("BARBARA was seen"));
    }
}
