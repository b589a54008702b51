use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Who produced a message in the interview transcript.
///
/// `Patient` and `Instructor` are both played by the model; the ordered
/// message list is the only conversation state there is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Patient,
    Instructor,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

/// The persona the model answered with on a single turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeakerRole {
    Patient,
    Instructor,
}

/// One reply from the model, already validated against the wire contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnReply {
    pub role: SpeakerRole,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientProfile {
    pub name: String,
    pub age: String,
    pub gender: String,
    pub occupation: String,
    pub chief_complaint: String,
    pub onset_date: String,
    pub history: String,
    pub pain_scale: u8,
    pub adl_scale: u8,
    pub sports_scale: u8,
}

/// A clinical training case. Immutable once persisted; looked up by id for
/// the lifetime of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Case {
    pub id: String,
    pub title: String,
    pub archetype_id: String,
    pub region_id: String,
    pub category_id: String,
    pub initial_complaint: String,
    /// Hidden from the student; seeds the patient role-play.
    pub scenario_context: String,
    pub true_diagnosis: String,
    pub required_findings: Vec<String>,
    #[serde(default)]
    pub patient_profile: Option<PatientProfile>,
}

impl Case {
    pub fn matches_classification(
        &self,
        archetype_id: &str,
        region_id: &str,
        category_id: &str,
    ) -> bool {
        self.archetype_id == archetype_id
            && self.region_id == region_id
            && self.category_id == category_id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub subcategories: Vec<Category>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BodyRegion {
    pub id: String,
    pub label: String,
    pub categories: Vec<Category>,
}

/// A fixed block of question hints shown to the student during the interview.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterviewFrame {
    pub title: String,
    pub items: Vec<String>,
}

/// A patient-persona template. Static catalog data, not user-mutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Archetype {
    pub id: String,
    pub label: String,
    pub description: String,
    pub tone: String,
    #[serde(default)]
    pub navigation_groups: Vec<BodyRegion>,
    #[serde(default)]
    pub interview_frames: Vec<InterviewFrame>,
}

/// A reference-document excerpt, related to cases only by classification
/// tuple equality.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeItem {
    pub id: String,
    pub title: String,
    pub file_name: String,
    pub content: String,
    pub archetype_id: String,
    pub region_id: String,
    pub category_id: String,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeSummary {
    pub id: String,
    pub title: String,
    pub uploaded_at: DateTime<Utc>,
    pub content_length: usize,
    pub archetype_id: String,
    pub region_id: String,
    pub category_id: String,
}

impl From<&KnowledgeItem> for KnowledgeSummary {
    fn from(item: &KnowledgeItem) -> Self {
        Self {
            id: item.id.clone(),
            title: item.title.clone(),
            uploaded_at: item.uploaded_at,
            content_length: item.content.chars().count(),
            archetype_id: item.archetype_id.clone(),
            region_id: item.region_id.clone(),
            category_id: item.category_id.clone(),
        }
    }
}

// --- HTTP DTOs ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionRequest {
    pub archetype_id: String,
    pub region_id: String,
    pub category_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionResponse {
    pub session_id: String,
    pub case_id: String,
    pub case_title: String,
    pub patient_label: String,
    pub interview_frames: Vec<InterviewFrame>,
    pub patient_profile: Option<PatientProfile>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub case_id: String,
    pub case_title: String,
    pub status_message: Option<String>,
    pub context: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub case_id: String,
    pub messages: Vec<Message>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishSessionRequest {
    pub case_id: String,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub user_summary: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseImportResponse {
    pub text_preview: String,
    pub extracted: Case,
}
