//! Answer generation against the chat-completion API.

use tracing::warn;

use crate::llm::{ChatApi, ChatMessage, ChatRequest, LlmError};

const SYSTEM_PROMPT: &str = "You are a legal assistant specializing in Indian constitutional law and human rights.

Your knowledge domains:
- Indian Constitution (Articles, Amendments, Schedules)
- Fundamental Rights (Articles 12-35)
- Directive Principles of State Policy
- Universal Declaration of Human Rights (UDHR)
- Constitutional governance structures (Panchayati Raj, etc.)

Guidelines:
1. Always cite specific Articles/Sections when applicable
2. Distinguish between constitutional rights vs. human rights treaties
3. If context lacks relevant information, say: \"Based on the available documents, I don't have specific information on this topic.\"
4. Use clear, accessible language while maintaining legal accuracy
";

/// Shown to the user whenever the model call fails; the cause goes to
/// the debug payload, never to the answer text.
pub const FALLBACK_RESPONSE: &str =
    "I am unable to generate a response right now. Please try your question again in a moment.";

/// Generated answer plus the upstream failure, if any. A failure still
/// yields usable text (the fallback), never an error for the caller.
#[derive(Debug, Clone)]
pub struct GeneratedAnswer {
    pub text: String,
    pub error: Option<String>,
}

impl GeneratedAnswer {
    pub fn is_fallback(&self) -> bool {
        self.error.is_some()
    }
}

/// One completion call with the assembled prompt sections. Timeout,
/// non-2xx and malformed-body failures all collapse into the fixed
/// fallback answer.
pub async fn generate(
    chat: &dyn ChatApi,
    query: &str,
    retrieved_context: &str,
    conversation_context: &str,
) -> GeneratedAnswer {
    let user_prompt = format!(
        "Conversation:\n{}\n\nContext:\n{}\n\nQuestion: {}",
        conversation_context, retrieved_context, query
    );

    let request = ChatRequest {
        messages: vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(user_prompt),
        ],
        temperature: 0.2,
        max_tokens: 1000,
    };

    match chat.complete(request).await {
        Ok(text) => GeneratedAnswer { text, error: None },
        Err(e) => {
            warn!(error = %e, "generation failed; returning fallback answer");
            GeneratedAnswer {
                text: FALLBACK_RESPONSE.to_string(),
                error: Some(describe(&e)),
            }
        }
    }
}

fn describe(e: &LlmError) -> String {
    match e {
        LlmError::Timeout(msg) => format!("timeout: {}", msg),
        LlmError::Status { status, body } => format!("upstream status {}: {}", status, body),
        LlmError::Malformed(msg) => format!("malformed response: {}", msg),
        LlmError::Transport(msg) => format!("transport: {}", msg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct OkChat;

    #[async_trait]
    impl ChatApi for OkChat {
        async fn complete(&self, request: ChatRequest) -> Result<String, LlmError> {
            // The system prompt must lead and the sections must land in
            // the user message.
            assert_eq!(request.messages[0].role, "system");
            assert!(request.messages[1].content.contains("Question: what is bail"));
            assert!(request.messages[1].content.contains("Context:\nsome chunk"));
            Ok("Bail is ...".to_string())
        }
    }

    struct TimeoutChat;

    #[async_trait]
    impl ChatApi for TimeoutChat {
        async fn complete(&self, _request: ChatRequest) -> Result<String, LlmError> {
            Err(LlmError::Timeout("deadline elapsed".into()))
        }
    }

    #[tokio::test]
    async fn test_success_passes_text_through() {
        let out = generate(&OkChat, "what is bail", "some chunk", "").await;
        assert_eq!(out.text, "Bail is ...");
        assert!(!out.is_fallback());
    }

    #[tokio::test]
    async fn test_failure_returns_fixed_fallback_with_cause() {
        let out = generate(&TimeoutChat, "q", "", "").await;
        assert_eq!(out.text, FALLBACK_RESPONSE);
        let cause = out.error.unwrap();
        assert!(cause.contains("timeout"));
    }
}
