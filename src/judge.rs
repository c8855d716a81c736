//! Rubric-based response evaluation.
//!
//! One model call scores the answer on five dimensions against the
//! retrieved context. Model output is parsed leniently since chat models
//! wrap JSON in prose and code fences; anything unparseable means the
//! turn simply carries no evaluation.

use serde_json::Value;
use tracing::warn;

use crate::llm::{ChatApi, ChatMessage, ChatRequest};
use crate::models::{DimensionScore, EvaluationResult};

/// Context excerpt shown to the judge is capped so the rubric itself
/// never gets crowded out of the window.
const MAX_CONTEXT_CHARS: usize = 2000;

fn rubric_prompt(query: &str, answer: &str, context: &str) -> String {
    let context_excerpt: String = if context.is_empty() {
        "No context provided".to_string()
    } else {
        context.chars().take(MAX_CONTEXT_CHARS).collect()
    };

    format!(
        "You are an expert legal evaluation system. Assess the quality of this legal assistant's response using the query and retrieved legal context as reference.\n\n\
         **USER QUERY:**\n{query}\n\n\
         **RETRIEVED LEGAL CONTEXT (Ground Truth):**\n{context_excerpt}\n\n\
         **AI RESPONSE TO EVALUATE:**\n{answer}\n\n\
         Evaluate on 5 dimensions (1-5 scale):\n\n\
         1. **FACTUAL ACCURACY** (1-5): Does the response accurately reflect the legal provisions in the context? Are facts correct?\n\n\
         2. **LEGAL REASONING** (1-5): Is the legal analysis logically sound? Are arguments well-structured?\n\n\
         3. **CITATION QUALITY** (1-5): Are legal sources (articles, acts) properly mentioned and attributed?\n\n\
         4. **CLARITY** (1-5): Is the language clear, professional, and understandable?\n\n\
         5. **COMPLETENESS** (1-5): Does it fully address all aspects of the user's query?\n\n\
         Respond in JSON:\n\
         {{\n\
           \"factual_accuracy\": {{\"score\": X, \"reason\": \"...\"}},\n\
           \"legal_reasoning\": {{\"score\": X, \"reason\": \"...\"}},\n\
           \"citation_quality\": {{\"score\": X, \"reason\": \"...\"}},\n\
           \"clarity\": {{\"score\": X, \"reason\": \"...\"}},\n\
           \"completeness\": {{\"score\": X, \"reason\": \"...\"}},\n\
           \"overall_score\": X.X,\n\
           \"summary\": \"Brief overall assessment\"\n\
         }}\n"
    )
}

/// Score an answer on the five-dimension rubric. `None` means the judge
/// call failed or its output could not be parsed; the turn is valid
/// without an evaluation.
pub async fn evaluate(
    chat: &dyn ChatApi,
    query: &str,
    answer: &str,
    retrieved_context: &str,
) -> Option<EvaluationResult> {
    let request = ChatRequest {
        messages: vec![
            ChatMessage::system("You are a legal evaluation expert. Always respond in valid JSON."),
            ChatMessage::user(rubric_prompt(query, answer, retrieved_context)),
        ],
        temperature: 0.1,
        max_tokens: 1000,
    };

    let raw = match chat.complete(request).await {
        Ok(raw) => raw,
        Err(e) => {
            warn!(error = %e, "judge call failed; turn left unevaluated");
            return None;
        }
    };

    match parse_evaluation(&raw) {
        Some(result) => Some(result),
        None => {
            warn!(raw_len = raw.len(), "judge output unparseable; turn left unevaluated");
            None
        }
    }
}

/// Lenient parse: strip code fences, take the first `{...}` object,
/// clamp every score into [1,5]. `overall_score` falls back to the mean
/// of the dimensions when the model omits it.
pub fn parse_evaluation(raw: &str) -> Option<EvaluationResult> {
    let json = extract_json_object(raw)?;
    let value: Value = serde_json::from_str(&json).ok()?;

    let dim = |name: &str| -> Option<DimensionScore> {
        let entry = value.get(name)?;
        let score = clamp_score(entry.get("score")?.as_f64()?);
        let reason = entry
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Some(DimensionScore { score, reason })
    };

    let factual_accuracy = dim("factual_accuracy")?;
    let legal_reasoning = dim("legal_reasoning")?;
    let citation_quality = dim("citation_quality")?;
    let clarity = dim("clarity")?;
    let completeness = dim("completeness")?;

    let summary = value
        .get("summary")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let mut result = EvaluationResult {
        factual_accuracy,
        legal_reasoning,
        citation_quality,
        clarity,
        completeness,
        overall_score: 0.0,
        summary,
    };
    let mean = result.dimensions().iter().map(|d| d.score).sum::<f64>() / 5.0;
    result.overall_score = value
        .get("overall_score")
        .and_then(Value::as_f64)
        .map(clamp_score)
        .unwrap_or(mean);

    Some(result)
}

fn clamp_score(score: f64) -> f64 {
    score.clamp(1.0, 5.0)
}

/// Pull the first balanced `{...}` out of code fences or surrounding
/// prose.
fn extract_json_object(raw: &str) -> Option<String> {
    let cleaned = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let start = cleaned.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, c) in cleaned[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(cleaned[start..start + offset + 1].to_string());
                }
            }
            _ => {}
        }
    }
    None
}
