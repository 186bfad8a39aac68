use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Control-plane response envelope. `exception` is zero on success;
/// a non-zero value comes with a human-readable `message`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    #[serde(default)]
    pub exception: i64,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default = "Option::default")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn is_ok(&self) -> bool {
        self.exception == 0
    }

    pub fn message(&self) -> &str {
        self.message.as_deref().unwrap_or("Unknown error")
    }
}

/// Payload of a successful `confirm` exchange. The server has issued
/// agent ids under both keys historically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmData {
    #[serde(default)]
    pub agent_id: Option<Value>,
    #[serde(default)]
    pub id: Option<Value>,
}

impl ConfirmData {
    pub fn agent_id(&self) -> Option<String> {
        let value = self.agent_id.as_ref().or(self.id.as_ref())?;
        match value {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}
