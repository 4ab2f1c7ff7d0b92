use crate::error::{Error, Result};
use crate::models::chat::ChatSession;
use crate::models::criteria::ExtractedRequirement;
use crate::models::job::{JobPosting, ScoredJob, SourceFailure};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A search frame carries no `type` field on the wire; everything is
/// optional except the message text itself.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchFrame {
    pub message: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlFrame {
    LoadChatHistory {
        #[serde(default)]
        user_id: Option<String>,
    },
    ClearChatHistory {
        #[serde(default)]
        user_id: Option<String>,
    },
    SaveChat {
        chat_data: ChatSession,
    },
    GetChat {
        chat_id: String,
    },
}

/// One discrete inbound envelope on the real-time channel.
#[derive(Debug, Clone)]
pub enum Inbound {
    Search(SearchFrame),
    Control(ControlFrame),
}

impl Inbound {
    /// Control frames are tagged by `type`; anything else with a `message`
    /// field is a search. Everything else is rejected without touching
    /// session state.
    pub fn parse(raw: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(raw)
            .map_err(|e| Error::InvalidEnvelope(format!("not a JSON object: {}", e)))?;

        if value.get("type").is_some() {
            let control: ControlFrame = serde_json::from_value(value)
                .map_err(|e| Error::InvalidEnvelope(format!("unknown control frame: {}", e)))?;
            return Ok(Inbound::Control(control));
        }

        if value.get("message").is_some() {
            let search: SearchFrame = serde_json::from_value(value)
                .map_err(|e| Error::InvalidEnvelope(format!("malformed search frame: {}", e)))?;
            if search.message.trim().is_empty() {
                return Err(Error::InvalidEnvelope("empty message".to_string()));
            }
            return Ok(Inbound::Search(search));
        }

        Err(Error::InvalidEnvelope(
            "expected a typed control frame or a search message".to_string(),
        ))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobSearchData {
    pub response: String,
    pub matched_jobs: Vec<ScoredJob>,
    pub jobs: Vec<JobPosting>,
    pub total_jobs_found: usize,
    pub total_matched_jobs: usize,
    pub requirements_extracted: ExtractedRequirement,
    pub source_errors: Vec<SourceFailure>,
    pub chat_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    JobSearchResponse {
        data: JobSearchData,
        timestamp: DateTime<Utc>,
    },
    ChatHistory {
        data: ChatHistoryData,
        timestamp: DateTime<Utc>,
    },
    ChatHistoryCleared {
        data: ClearedData,
        timestamp: DateTime<Utc>,
    },
    ChatSaved {
        data: SavedData,
        timestamp: DateTime<Utc>,
    },
    ChatLoaded {
        data: LoadedData,
        timestamp: DateTime<Utc>,
    },
    Error {
        message: String,
        timestamp: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatHistoryData {
    pub chats: Vec<ChatSession>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClearedData {
    pub deleted_count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SavedData {
    pub success: bool,
}

/// `chat` is null when the requested id has no persisted record.
#[derive(Debug, Clone, Serialize)]
pub struct LoadedData {
    pub chat: Option<ChatSession>,
}

impl Outbound {
    pub fn error(message: impl Into<String>) -> Self {
        Outbound::Error {
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_search_frame_without_type_tag() {
        let raw = r#"{"message":"python developer in Tbilisi","chat_id":"c1"}"#;
        match Inbound::parse(raw).unwrap() {
            Inbound::Search(frame) => {
                assert_eq!(frame.message, "python developer in Tbilisi");
                assert_eq!(frame.chat_id.as_deref(), Some("c1"));
            }
            other => panic!("expected search frame, got {:?}", other),
        }
    }

    #[test]
    fn parses_tagged_control_frames() {
        let raw = r#"{"type":"load_chat_history","user_id":"u1"}"#;
        assert!(matches!(
            Inbound::parse(raw).unwrap(),
            Inbound::Control(ControlFrame::LoadChatHistory { .. })
        ));

        let raw = r#"{"type":"clear_chat_history"}"#;
        assert!(matches!(
            Inbound::parse(raw).unwrap(),
            Inbound::Control(ControlFrame::ClearChatHistory { .. })
        ));

        let raw = r#"{"type":"get_chat","chat_id":"c1"}"#;
        match Inbound::parse(raw).unwrap() {
            Inbound::Control(ControlFrame::GetChat { chat_id }) => assert_eq!(chat_id, "c1"),
            other => panic!("expected get_chat, got {:?}", other),
        }
    }

    #[test]
    fn rejects_unknown_type_and_garbage() {
        assert!(Inbound::parse(r#"{"type":"reboot"}"#).is_err());
        assert!(Inbound::parse("not json").is_err());
        assert!(Inbound::parse(r#"{"ping":true}"#).is_err());
        assert!(Inbound::parse(r#"{"message":"   "}"#).is_err());
    }

    #[test]
    fn error_envelope_serializes_with_type_tag() {
        let json = serde_json::to_value(Outbound::error("bad frame")).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["message"], "bad frame");
        assert!(json["timestamp"].is_string());
    }
}
