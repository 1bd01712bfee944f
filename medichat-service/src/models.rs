use medichat_core::ChatMessage;
use serde::{Deserialize, Serialize};

/// Body posted by the chat front end
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub data: Option<ChatRequestData>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequestData {
    #[serde(default)]
    pub report_data: Option<String>,
}

impl ChatRequest {
    /// Report text, empty when the caller sent none.
    pub fn report_text(&self) -> &str {
        self.data
            .as_ref()
            .and_then(|d| d.report_data.as_deref())
            .unwrap_or_default()
    }

    pub fn question(&self) -> Option<&str> {
        ChatMessage::last_question(&self.messages)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExtractReportRequest {
    /// Data URL of the uploaded report, e.g. `data:image/jpeg;base64,...`
    pub base64: String,
}
