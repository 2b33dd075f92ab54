use serde::Deserialize;
use std::path::Path;

use crate::database::SearchHit;
use crate::error::ConfigError;
use crate::providers::traits::ChatMessage;

pub const RAG_PROMPT_ID: &str = "rlm/rag-prompt";

const RAG_PROMPT: &str = "You are an assistant for question-answering tasks. \
Use the following pieces of retrieved context to answer the question. \
If you don't know the answer, just say that you don't know. \
Use three sentences maximum and keep the answer concise.\n\
Question: {question} \nContext: {context} \nAnswer:";

const QUESTION: &str = "{question}";
const CONTEXT: &str = "{context}";

/// Versioned prompt with `{question}` and `{context}` placeholders.
///
/// The user template is sent as the single user message; an optional
/// system template is sent before it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PromptTemplate {
    pub id: String,
    pub version: String,
    #[serde(default)]
    pub system: Option<String>,
    pub template: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self {
            id: RAG_PROMPT_ID.to_string(),
            version: "1".to_string(),
            system: None,
            template: RAG_PROMPT.to_string(),
        }
    }
}

impl PromptTemplate {
    /// Reads a JSON template file such as
    /// `{"id": "...", "version": "...", "template": "..."}`.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ConfigError::PromptTemplate(format!("{}: {}", path.display(), e)))?;
        let template: PromptTemplate = serde_json::from_str(&raw)
            .map_err(|e| ConfigError::PromptTemplate(format!("{}: {}", path.display(), e)))?;
        template.validate()?;
        Ok(template)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let all = format!("{}{}", self.system.as_deref().unwrap_or_default(), self.template);
        for placeholder in [QUESTION, CONTEXT] {
            if !all.contains(placeholder) {
                return Err(ConfigError::PromptTemplate(format!(
                    "{} v{} is missing the {} placeholder",
                    self.id, self.version, placeholder
                )));
            }
        }
        Ok(())
    }

    pub fn format(&self, question: &str, context: &str) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.system {
            messages.push(ChatMessage::system(render(system, question, context)));
        }
        messages.push(ChatMessage::user(render(&self.template, question, context)));
        messages
    }
}

/// Substitutes placeholders in one pass, so braces inside the question or
/// the retrieved text are never expanded.
pub fn render(template: &str, question: &str, context: &str) -> String {
    let mut out = String::with_capacity(template.len() + question.len() + context.len());
    let mut rest = template;
    while let Some(pos) = rest.find('{') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        if tail.starts_with(QUESTION) {
            out.push_str(question);
            rest = &tail[QUESTION.len()..];
        } else if tail.starts_with(CONTEXT) {
            out.push_str(context);
            rest = &tail[CONTEXT.len()..];
        } else {
            out.push('{');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    out
}

/// Retrieved chunk texts in rank order, separated by blank lines.
pub fn join_context(hits: &[SearchHit]) -> String {
    hits.iter()
        .map(|hit| hit.chunk.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Chunk;
    use crate::providers::traits::Role;
    use std::sync::Arc;

    fn hit(text: &str, rank: usize) -> SearchHit {
        SearchHit {
            chunk: Arc::new(Chunk {
                text: text.to_string(),
                source: "https://example.com".to_string(),
                document_index: 0,
                chunk_index: rank,
                start_index: 0,
                end_index: text.len(),
            }),
            score: 1.0,
            rank,
        }
    }

    #[test]
    fn default_prompt_has_question_and_context() {
        let messages = PromptTemplate::default().format("What is task decomposition?", "Chunk A\n\nChunk B");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::User);
        assert!(messages[0].content.contains("Question: What is task decomposition?"));
        assert!(messages[0].content.contains("Context: Chunk A\n\nChunk B"));
        assert!(messages[0].content.ends_with("Answer:"));
    }

    #[test]
    fn substitution_is_single_pass() {
        let out = render("Q={question} C={context}", "what is {context}?", "{question} {x}");
        assert_eq!(out, "Q=what is {context}? C={question} {x}");
    }

    #[test]
    fn stray_braces_are_kept() {
        assert_eq!(render("{ {question} }", "q", "c"), "{ q }");
        assert_eq!(render("trailing {", "q", "c"), "trailing {");
    }

    #[test]
    fn context_joins_with_blank_lines() {
        let hits = vec![hit("first", 1), hit("second", 2)];
        assert_eq!(join_context(&hits), "first\n\nsecond");
        assert_eq!(join_context(&[]), "");
    }

    #[test]
    fn validate_requires_both_placeholders() {
        let template = PromptTemplate {
            id: "custom".to_string(),
            version: "2".to_string(),
            system: Some("Use {context}".to_string()),
            template: "Answer {question}".to_string(),
        };
        assert!(template.validate().is_ok());

        let missing = PromptTemplate { system: None, ..template };
        assert!(matches!(missing.validate(), Err(ConfigError::PromptTemplate(_))));
    }

    #[tokio::test]
    async fn loads_template_from_json() {
        let path = std::env::temp_dir().join(format!("prompt-{}.json", uuid::Uuid::new_v4()));
        tokio::fs::write(
            &path,
            r#"{"id": "custom", "version": "3", "system": "Be brief.", "template": "{context}\n{question}"}"#,
        )
        .await
        .unwrap();
        let template = PromptTemplate::load(&path).await.unwrap();
        let _ = tokio::fs::remove_file(&path).await;

        let messages = template.format("q", "c");
        assert_eq!(messages[0], ChatMessage::system("Be brief."));
        assert_eq!(messages[1], ChatMessage::user("c\nq"));
    }
}
