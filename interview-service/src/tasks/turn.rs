//! Conversation turn handler.
//!
//! One LLM call per student message. The model is required to answer with a
//! single JSON object `{"role": "patient"|"instructor", "content": "..."}`;
//! everything it actually returns goes through [`parse_turn_reply`], which
//! recovers every malformed shape it can so a turn almost never fails.

use rig::completion::{Chat, Message as RigMessage};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::llm::{LlmConfig, chat_agent, clean_json_reply};
use crate::models::{Archetype, Case, KnowledgeItem, Message, MessageRole, SpeakerRole, TurnReply};
use crate::prompts::{FILLER_REPLY, OUTPUT_DIRECTIVE, patient_system_prompt};

#[derive(Debug, Error)]
pub enum TurnError {
    /// The reply was JSON but carried no usable role. Hard error for this
    /// turn only; the session is not terminated.
    #[error("model reply has no usable role")]
    MissingRole,

    #[error("chat completion failed: {0}")]
    Completion(String),
}

#[derive(Deserialize)]
struct RawReply {
    role: Option<String>,
    content: Option<String>,
}

/// Apply the reply contract to whatever text the model produced.
///
/// - valid JSON with a known role and non-empty content: returned unmodified
/// - valid JSON, empty/whitespace content: fixed filler text, role preserved
/// - not a JSON object: the raw text becomes a patient reply
/// - JSON without a usable role: [`TurnError::MissingRole`]
pub fn parse_turn_reply(raw: &str) -> Result<TurnReply, TurnError> {
    let cleaned = clean_json_reply(raw);
    let parsed = match serde_json::from_str::<RawReply>(cleaned) {
        Ok(parsed) => parsed,
        Err(_) => {
            debug!("Reply was not a JSON object, treating raw text as patient speech");
            return Ok(TurnReply {
                role: SpeakerRole::Patient,
                content: raw.to_string(),
            });
        }
    };

    let role = match parsed.role.as_deref() {
        Some("patient") => SpeakerRole::Patient,
        Some("instructor") => SpeakerRole::Instructor,
        _ => return Err(TurnError::MissingRole),
    };

    let content = match parsed.content {
        Some(content) if !content.trim().is_empty() => content,
        _ => FILLER_REPLY.to_string(),
    };

    Ok(TurnReply { role, content })
}

/// Convert transcript messages into provider messages. Patient and
/// instructor turns were both produced by the model, so they map to
/// assistant messages; system notes ride along as prefixed user messages.
pub fn to_rig_messages(messages: &[Message]) -> Vec<RigMessage> {
    messages
        .iter()
        .map(|m| match m.role {
            MessageRole::User => RigMessage::user(m.content.clone()),
            MessageRole::Patient | MessageRole::Instructor => {
                RigMessage::assistant(m.content.clone())
            }
            MessageRole::System => RigMessage::user(format!("[SYSTEM] {}", m.content)),
        })
        .collect()
}

/// Run one interview turn: assemble the system prompt from case, archetype
/// and retrieved knowledge, send the history with the output directive
/// appended, and parse the reply. No retries.
pub async fn send_turn(
    llm: &LlmConfig,
    case: &Case,
    archetype: &Archetype,
    knowledge: &[KnowledgeItem],
    messages: &[Message],
) -> Result<TurnReply, TurnError> {
    let system_prompt = patient_system_prompt(case, archetype, knowledge);
    let agent = chat_agent(llm, &system_prompt);

    let history = to_rig_messages(messages);

    info!(
        case_id = %case.id,
        history_len = history.len(),
        knowledge_excerpts = knowledge.len().min(crate::prompts::MAX_KNOWLEDGE_EXCERPTS),
        "Sending interview turn"
    );

    let raw = agent
        .chat(OUTPUT_DIRECTIVE, history)
        .await
        .map_err(|e| TurnError::Completion(e.to_string()))?;

    parse_turn_reply(&raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_formed_replies_pass_through_unmodified() {
        let reply =
            parse_turn_reply(r#"{"role": "patient", "content": "足首の外側が痛いです。"}"#).unwrap();
        assert_eq!(reply.role, SpeakerRole::Patient);
        assert_eq!(reply.content, "足首の外側が痛いです。");

        let reply =
            parse_turn_reply(r#"{"role": "instructor", "content": "前方引き出しテスト：陽性"}"#)
                .unwrap();
        assert_eq!(reply.role, SpeakerRole::Instructor);
        assert_eq!(reply.content, "前方引き出しテスト：陽性");
    }

    #[test]
    fn fenced_json_is_unwrapped() {
        let raw = "```json\n{\"role\": \"instructor\", \"content\": \"所見を提示します\"}\n```";
        let reply = parse_turn_reply(raw).unwrap();
        assert_eq!(reply.role, SpeakerRole::Instructor);
        assert_eq!(reply.content, "所見を提示します");
    }

    #[test]
    fn empty_content_becomes_filler_with_role_preserved() {
        let reply = parse_turn_reply(r#"{"role": "instructor", "content": ""}"#).unwrap();
        assert_eq!(reply.role, SpeakerRole::Instructor);
        assert_eq!(reply.content, FILLER_REPLY);

        let reply = parse_turn_reply(r#"{"role": "patient", "content": "   \n  "}"#).unwrap();
        assert_eq!(reply.role, SpeakerRole::Patient);
        assert_eq!(reply.content, FILLER_REPLY);

        // Missing content behaves like empty content.
        let reply = parse_turn_reply(r#"{"role": "patient"}"#).unwrap();
        assert_eq!(reply.content, FILLER_REPLY);
    }

    #[test]
    fn non_json_replies_become_patient_speech_verbatim() {
        let raw = "はい、昨日の練習中に捻りました。";
        let reply = parse_turn_reply(raw).unwrap();
        assert_eq!(reply.role, SpeakerRole::Patient);
        assert_eq!(reply.content, raw);

        // JSON scalars and arrays are not reply objects either.
        let reply = parse_turn_reply("[1, 2, 3]").unwrap();
        assert_eq!(reply.role, SpeakerRole::Patient);
        assert_eq!(reply.content, "[1, 2, 3]");
    }

    #[test]
    fn missing_or_unknown_role_is_a_hard_turn_error() {
        assert!(matches!(
            parse_turn_reply(r#"{"content": "誰が話しているか不明"}"#),
            Err(TurnError::MissingRole)
        ));
        assert!(matches!(
            parse_turn_reply(r#"{"role": "narrator", "content": "..." }"#),
            Err(TurnError::MissingRole)
        ));
    }

    #[test]
    fn history_roles_map_to_provider_roles() {
        let messages = vec![
            Message {
                role: MessageRole::User,
                content: "いつからですか".to_string(),
            },
            Message {
                role: MessageRole::Patient,
                content: "昨日からです".to_string(),
            },
            Message {
                role: MessageRole::Instructor,
                content: "視診所見を提示します".to_string(),
            },
            Message {
                role: MessageRole::System,
                content: "note".to_string(),
            },
        ];
        let rig_messages = to_rig_messages(&messages);
        assert_eq!(rig_messages.len(), 4);
    }
}
