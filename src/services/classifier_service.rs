//! services/classifier_service.rs
//! Clasificador de significancia: cascada de tres niveles.
//!
//! 1. Normalizados iguales: no significativo (caso mayoritario, sin red).
//! 2. Juez semantico opcional con timeout corto; si responde sin ambiguedad, manda.
//! 3. Heuristica determinista: texto plano sin relojes ni frases de carga.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::time::timeout;

use crate::services::{
    judge_service::{JudgeVerdict, SemanticJudge},
    normalizer_service::{extract_text, normalize},
};

/// Caracteres maximos de texto por lado que se resumen para el juez.
const DIFF_TEXT_LIMIT: usize = 2000;
/// Tokens maximos agregados/quitados que viajan al juez.
const DIFF_TOKEN_LIMIT: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Los normalizados coinciden.
    Unchanged,
    JudgedContent,
    JudgedTechnical,
    /// El texto plano coincide tras quitar relojes y frases de carga.
    HeuristicNoise,
    HeuristicContent,
}

impl Verdict {
    pub fn is_significant(&self) -> bool {
        matches!(self, Verdict::JudgedContent | Verdict::HeuristicContent)
    }
}

#[derive(Clone)]
pub struct SignificanceClassifier {
    judge: Option<Arc<dyn SemanticJudge>>,
    judge_timeout: Duration,
}

impl SignificanceClassifier {
    pub fn new(judge: Option<Arc<dyn SemanticJudge>>, judge_timeout: Duration) -> Self {
        Self {
            judge,
            judge_timeout,
        }
    }

    /// Sin juez: solo normalizador + heuristica.
    pub fn heuristic_only() -> Self {
        Self::new(None, Duration::from_secs(5))
    }

    pub async fn is_significant(&self, before: &str, after: &str) -> bool {
        self.classify(before, after).await.is_significant()
    }

    /// Recibe snapshots crudos; la normalizacion ocurre aqui.
    pub async fn classify(&self, before: &str, after: &str) -> Verdict {
        let norm_before = normalize(before);
        let norm_after = normalize(after);
        if norm_before == norm_after {
            return Verdict::Unchanged;
        }

        let text_before = extract_text(&norm_before);
        let text_after = extract_text(&norm_after);

        if let Some(verdict) = self.consult_judge(&text_before, &text_after).await {
            return verdict;
        }

        if strip_noise(&text_before) == strip_noise(&text_after) {
            Verdict::HeuristicNoise
        } else {
            Verdict::HeuristicContent
        }
    }

    /// Errores, timeouts y respuestas ambiguas devuelven `None`: cae a la heuristica.
    async fn consult_judge(&self, text_before: &str, text_after: &str) -> Option<Verdict> {
        let judge = self.judge.as_ref()?;
        let diff = TokenDiff::between(text_before, text_after, DIFF_TOKEN_LIMIT);

        match timeout(self.judge_timeout, judge.classify(&diff)).await {
            Ok(Ok(JudgeVerdict::Content)) => Some(Verdict::JudgedContent),
            Ok(Ok(JudgeVerdict::Technical)) => Some(Verdict::JudgedTechnical),
            Ok(Ok(JudgeVerdict::Ambiguous)) => {
                log::warn!("(classify) Respuesta ambigua del juez, usando heuristica.");
                None
            }
            Ok(Err(e)) => {
                log::warn!("(classify) Error del juez, usando heuristica: {:?}", e);
                None
            }
            Err(_) => {
                log::warn!(
                    "(classify) Timeout del juez tras {:?}, usando heuristica.",
                    self.judge_timeout
                );
                None
            }
        }
    }
}

static NOISE_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        // 02:21:01, 2:21, 10:42 PM
        r"(?i)\b\d{1,2}:\d{2}(?::\d{2})?(?:\s*[ap]\.?m\.?)?",
        r"(?i)\b\d+\s*(?:seconds?|secs?|minutes?|mins?|hours?|hrs?)\s+ago\b",
        r"(?i)\bjust now\b",
        r"(?i)\b(?:loading|please wait|processing)\b(?:\.{1,3}|…)?",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("regex de ruido invalida"))
    .collect()
});

static SPACES_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("regex invalida"));

/// Quita patrones de reloj/temporizador y frases de carga del texto plano.
pub fn strip_noise(text: &str) -> String {
    let stripped = NOISE_RES.iter().fold(text.to_string(), |acc, re| {
        re.replace_all(&acc, "").into_owned()
    });
    SPACES_RE.replace_all(&stripped, " ").trim().to_string()
}

/// Resumen acotado de palabras agregadas/quitadas entre dos textos.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl TokenDiff {
    pub fn between(before: &str, after: &str, limit: usize) -> Self {
        let before: String = before.chars().take(DIFF_TEXT_LIMIT).collect();
        let after: String = after.chars().take(DIFF_TEXT_LIMIT).collect();

        let before_words: HashSet<&str> = before.split_whitespace().collect();
        let after_words: HashSet<&str> = after.split_whitespace().collect();

        TokenDiff {
            added: ordered_difference(&after, &before_words, limit),
            removed: ordered_difference(&before, &after_words, limit),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "Added: {}\nRemoved: {}",
            self.added.join(", "),
            self.removed.join(", ")
        )
    }
}

/// Palabras de `text` ausentes en `other`, en orden de aparicion y sin repetir.
fn ordered_difference(text: &str, other: &HashSet<&str>, limit: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    text.split_whitespace()
        .filter(|w| !other.contains(w) && seen.insert(*w))
        .take(limit)
        .map(str::to_string)
        .collect()
}

/// Diff de texto visible entre dos snapshots crudos (para el cuerpo de las alertas).
pub fn visible_diff(before: &str, after: &str, limit: usize) -> TokenDiff {
    TokenDiff::between(
        &extract_text(&normalize(before)),
        &extract_text(&normalize(after)),
        limit,
    )
}
