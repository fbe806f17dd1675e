//! Generation request shapes.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::NarrationError;

/// Which narration the remote side should generate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationKind {
    /// Continue an existing episode one level deeper.
    Continue,
    /// New episode from a single seed.
    NewFromSingleSeed,
    /// New episode from several seeds.
    NewFromMultiSeed,
}

impl GenerationKind {
    /// Remote operation name sent in the `event` field.
    pub fn event_name(self) -> &'static str {
        match self {
            GenerationKind::Continue => "generate-rabbithole-followup",
            GenerationKind::NewFromSingleSeed => "generate-rabbithole-poi-single",
            GenerationKind::NewFromMultiSeed => "generate-rabbithole-poi-multi",
        }
    }

    pub fn is_continuation(self) -> bool {
        matches!(self, GenerationKind::Continue)
    }

    /// Route of the equivalent non-streaming request, relative to the API base.
    ///
    /// Continuations read `parentId` and `followUpId` from the payload.
    pub fn legacy_path(self, payload: &Value) -> Result<String, NarrationError> {
        match self {
            GenerationKind::NewFromSingleSeed => Ok("podcast/poi-single".to_string()),
            GenerationKind::NewFromMultiSeed => Ok("podcast/poi-multi".to_string()),
            GenerationKind::Continue => {
                let parent = id_field(payload, "parentId")?;
                let follow_up = id_field(payload, "followUpId")?;
                Ok(format!("podcast/{parent}/followUp/{follow_up}"))
            }
        }
    }
}

/// Ids may arrive as numbers or strings.
fn id_field(payload: &Value, key: &str) -> Result<String, NarrationError> {
    match payload.get(key) {
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        _ => Err(NarrationError::InvalidRequest(format!("payload needs `{key}`"))),
    }
}

/// Everything needed to open one generation session.
#[derive(Clone, Debug)]
pub struct StreamRequest {
    pub kind: GenerationKind,
    pub payload: Value,
    pub token: String,
    pub endpoint: String,
}

impl StreamRequest {
    /// The single outbound message sent once connected.
    pub fn outbound_message(&self) -> String {
        json!({
            "event": self.kind.event_name(),
            "data": self.payload,
        })
        .to_string()
    }
}

/// Join a base URL and a relative route with exactly one slash.
pub fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}
