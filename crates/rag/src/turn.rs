use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

use tabrag_core::{find_year, keys};

use crate::catalog::{CatalogMatch, CatalogStore};
use crate::context::{ContextStore, Slots, Turn};
use crate::profiles::BotProfiles;
use crate::prompts::{build_prompt, SYSTEM_QA};
use crate::provider::Generator;
use crate::rerank::Reranker;
use crate::retriever::{Hit, QueryMeta, Retriever};
use crate::settings::{Settings, DEFAULT_RERANK_K, DEFAULT_RESOLVE_THRESHOLD, DEFAULT_TOP_K};

pub const FALLBACK_ANSWER: &str =
    "No encontré información suficiente en la base para responder con confianza.";
pub const EMPTY_ANSWER: &str = "No pude generar una respuesta. Intenta de nuevo.";
pub const STORED_ANSWER_CHARS: usize = 1200;
pub const DEFAULT_SESSION: &str = "anon";

fn default_session() -> String {
    DEFAULT_SESSION.to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub bot_id: Option<String>,
    #[serde(default = "default_session")]
    pub session_id: String,
    #[serde(default)]
    pub meta: QueryMeta,
    #[serde(default)]
    pub debug: bool,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            session_id: default_session(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Source {
    pub titulo: Option<String>,
    pub domain: Option<String>,
    pub fuente_archivo: Option<String>,
    pub fuente_hoja: Option<String>,
    pub fuente_fila: Option<u64>,
    pub periodo: Option<String>,
}

impl Source {
    fn from_hit(hit: &Hit) -> Self {
        let text = |key: &str| hit.field(key).map(str::to_string);
        Self {
            titulo: text(keys::TITLE),
            domain: text(keys::DOMAIN),
            fuente_archivo: text(keys::SOURCE_FILE),
            fuente_hoja: text(keys::SOURCE_SHEET),
            fuente_fila: hit.metadata.get(keys::SOURCE_ROW).and_then(Value::as_u64),
            periodo: text(keys::PERIOD),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalDebug {
    pub context_slots: Slots,
    pub used_meta: QueryMeta,
    pub resolved: Option<CatalogMatch>,
    pub domains: Vec<String>,
    pub files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatResponse {
    pub answer: String,
    pub sources: Vec<Source>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retrieval_debug: Option<RetrievalDebug>,
}

#[derive(Debug, Clone, Copy)]
pub struct TurnOptions {
    pub top_k: usize,
    pub rerank_k: usize,
    pub resolve_threshold: u8,
}

impl Default for TurnOptions {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            rerank_k: DEFAULT_RERANK_K,
            resolve_threshold: DEFAULT_RESOLVE_THRESHOLD,
        }
    }
}

impl From<&Settings> for TurnOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            top_k: settings.top_k,
            rerank_k: settings.rerank_k,
            resolve_threshold: settings.resolve_threshold,
        }
    }
}

/// One chat turn: resolve, merge slots, retrieve, rerank, generate, remember.
pub struct TurnOrchestrator {
    profiles: BotProfiles,
    catalog: Arc<CatalogStore>,
    contexts: Arc<ContextStore>,
    retriever: Retriever,
    reranker: Box<dyn Reranker>,
    generator: Arc<dyn Generator>,
    options: TurnOptions,
}

impl TurnOrchestrator {
    pub fn new(
        profiles: BotProfiles,
        catalog: Arc<CatalogStore>,
        contexts: Arc<ContextStore>,
        retriever: Retriever,
        reranker: Box<dyn Reranker>,
        generator: Arc<dyn Generator>,
        options: TurnOptions,
    ) -> Self {
        Self {
            profiles,
            catalog,
            contexts,
            retriever,
            reranker,
            generator,
            options,
        }
    }

    pub fn handle(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let (bot_id, profile) = self.profiles.get(request.bot_id.as_deref());
        let session_id = match request.session_id.trim() {
            "" => DEFAULT_SESSION,
            id => id,
        };
        let user_text = request.message.trim();

        let conversation = self.contexts.load(session_id, &bot_id)?;
        let mut slots = conversation.slots;
        let mut history = conversation.history;

        let resolved = self
            .catalog
            .resolve(&bot_id, user_text, self.options.resolve_threshold)?;
        let meta = merge_meta(&request.meta, &slots, resolved.as_ref(), user_text);
        debug!(bot_id = %bot_id, session_id, resolved = ?resolved.as_ref().map(|m| &m.name), "merged turn context");

        let hits = self.retriever.search(
            user_text,
            &meta,
            self.options.top_k,
            &bot_id,
            &profile.allowed_domains,
            &[],
        )?;

        if hits.is_empty() {
            let mut answer = FALLBACK_ANSWER.to_string();
            if let Some(contact) = profile.contact.hint() {
                answer.push_str(&format!(" Podés escribir a {contact}."));
            }
            info!(bot_id = %bot_id, session_id, "no hits, answering with fallback");
            history.push(Turn::user(user_text));
            history.push(Turn::assistant(answer.clone()));
            self.contexts.save(session_id, &bot_id, &slots, &history)?;
            return Ok(ChatResponse {
                answer,
                sources: Vec::new(),
                retrieval_debug: None,
            });
        }

        let final_hits = self
            .reranker
            .rerank(user_text, hits, self.options.rerank_k)?;

        let prompt_slots = Slots {
            program_id: None,
            program_name: meta.program.clone().or_else(|| slots.program_name.clone()),
            period: meta.period.clone().or_else(|| slots.period.clone()),
            faculty: meta.faculty.clone().or_else(|| slots.faculty.clone()),
        };
        let prompt = build_prompt(user_text, &final_hits, &history, &prompt_slots);
        let system = profile
            .system_instruction
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(SYSTEM_QA);
        let generated = self.generator.generate(&prompt, Some(system))?;
        let answer = if generated.trim().is_empty() {
            EMPTY_ANSWER.to_string()
        } else {
            generated
        };

        remember(&mut slots, resolved.as_ref(), &meta);
        history.push(Turn::user(user_text));
        history.push(Turn::assistant(truncate_chars(&answer, STORED_ANSWER_CHARS)));
        self.contexts.save(session_id, &bot_id, &slots, &history)?;

        let sources = final_hits.iter().map(Source::from_hit).collect();
        let retrieval_debug = request.debug.then(|| RetrievalDebug {
            domains: distinct(&final_hits, keys::DOMAIN),
            files: distinct(&final_hits, keys::SOURCE_FILE),
            context_slots: slots.clone(),
            used_meta: meta.clone(),
            resolved: resolved.clone(),
        });
        Ok(ChatResponse {
            answer,
            sources,
            retrieval_debug,
        })
    }
}

/// Fresh resolution wins over remembered slots; the period comes from the
/// request, then a year in the message, then the slot.
fn merge_meta(request: &QueryMeta, slots: &Slots, resolved: Option<&CatalogMatch>, text: &str) -> QueryMeta {
    let mut meta = request.clone();
    match resolved {
        Some(found) => {
            if !found.program_id.is_empty() {
                meta.program_id = Some(found.program_id.clone());
            }
            meta.program = Some(found.name.clone());
        }
        None => {
            if meta.program_id().is_none() {
                if let Some(id) = &slots.program_id {
                    meta.program_id = Some(id.clone());
                }
            }
            if meta.program().is_none() {
                if let Some(name) = &slots.program_name {
                    meta.program = Some(name.clone());
                }
            }
        }
    }
    if meta.period().is_none() {
        meta.period = find_year(text)
            .map(str::to_string)
            .or_else(|| slots.period.clone());
    }
    if meta.faculty().is_none() {
        if let Some(faculty) = &slots.faculty {
            meta.faculty = Some(faculty.clone());
        }
    }
    meta
}

/// A fresh resolution replaces the program wholesale, id included.
fn remember(slots: &mut Slots, resolved: Option<&CatalogMatch>, meta: &QueryMeta) {
    if let Some(found) = resolved {
        slots.program_id = Some(found.program_id.clone()).filter(|id| !id.is_empty());
        slots.program_name = Some(found.name.clone());
        if let Some(faculty) = &found.faculty {
            slots.faculty = Some(faculty.clone());
        }
    }
    if let Some(period) = meta.period() {
        slots.period = Some(period.to_string());
    }
    if let Some(faculty) = meta.faculty() {
        slots.faculty = Some(faculty.to_string());
    }
}

fn distinct(hits: &[Hit], key: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for value in hits.iter().filter_map(|h| h.field(key)) {
        if !out.iter().any(|seen| seen == value) {
            out.push(value.to_string());
        }
    }
    out
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => text[..cut].to_string(),
        None => text.to_string(),
    }
}
