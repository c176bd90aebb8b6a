use std::fmt::Write;

use crate::context::{Slots, Turn};
use crate::retriever::Hit;

pub const SYSTEM_QA: &str = "Eres el asistente de Admisiones de la universidad.
Responde en español rioplatense, claro y conciso.

Si una respuesta depende de un período/año, aclara qué período estás usando.
Si la evidencia es insuficiente, dilo y sugerí contacto humano.
No inventes datos ni políticas.
";

pub const PROMPT_HISTORY_TURNS: usize = 4;

/// Builds the user prompt: context slots, recent turns, question and numbered
/// fragments.
pub fn build_prompt(query: &str, hits: &[Hit], history: &[Turn], slots: &Slots) -> String {
    let mut out = String::new();

    let mut parts = Vec::new();
    if let Some(name) = slots.program_name.as_deref().filter(|v| !v.is_empty()) {
        parts.push(format!("Carrera: {name}"));
    }
    if let Some(period) = slots.period.as_deref().filter(|v| !v.is_empty()) {
        parts.push(format!("Período: {period}"));
    }
    if let Some(faculty) = slots.faculty.as_deref().filter(|v| !v.is_empty()) {
        parts.push(format!("Facultad: {faculty}"));
    }
    if !parts.is_empty() {
        let _ = writeln!(out, "Contexto actual: {}", parts.join(" | "));
    }

    let tail = &history[history.len().saturating_sub(PROMPT_HISTORY_TURNS)..];
    for turn in tail {
        let _ = writeln!(out, "{}: {}", turn.role.as_str(), turn.content);
    }

    let _ = write!(out, "\nPregunta: {query}\n\nContexto recuperado:\n");
    for (i, hit) in hits.iter().enumerate() {
        let _ = writeln!(out, "[{}] {}", i + 1, hit.text);
    }
    out.push_str(
        "\nInstrucciones: responde breve y cita [n] donde n sea el índice del fragmento relevante.\n",
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn hit(text: &str) -> Hit {
        Hit {
            text: text.to_string(),
            metadata: Map::new(),
            score: 1.0,
        }
    }

    #[test]
    fn prompt_lists_slots_history_and_fragments() {
        let slots = Slots {
            program_name: Some("Medicina".into()),
            period: Some("2025".into()),
            ..Slots::default()
        };
        let history: Vec<Turn> = (0..6)
            .map(|i| if i % 2 == 0 { Turn::user(format!("u{i}")) } else { Turn::assistant(format!("a{i}")) })
            .collect();
        let prompt = build_prompt("¿cuánto sale?", &[hit("ARANCEL: 62.000"), hit("CUOTAS: 10")], &history, &slots);
        assert!(prompt.starts_with("Contexto actual: Carrera: Medicina | Período: 2025\n"));
        assert!(!prompt.contains("u0"));
        assert!(prompt.contains("user: u2\nassistant: a3\nuser: u4\nassistant: a5\n"));
        assert!(prompt.contains("Pregunta: ¿cuánto sale?"));
        assert!(prompt.contains("Contexto recuperado:\n[1] ARANCEL: 62.000\n[2] CUOTAS: 10\n"));
        assert!(prompt.trim_end().ends_with("fragmento relevante."));
    }

    #[test]
    fn empty_slots_add_no_context_line() {
        let prompt = build_prompt("hola", &[], &[], &Slots::default());
        assert!(prompt.starts_with("\nPregunta: hola"));
    }
}
