use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct ActionItem {
    pub(crate) task: String,
    pub(crate) owner: String,
    pub(crate) deadline: String,
}

/// The Record of Decision for one recording. Every field is required.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct MeetingReport {
    pub(crate) summary: String,
    pub(crate) action_items: Vec<ActionItem>,
    pub(crate) decisions: Vec<String>,
    pub(crate) whatsapp_followup: String,
    pub(crate) email_followup: String,
}

impl MeetingReport {
    /// Parses engine output, rejecting anything that does not match the
    /// schema exactly. There is no partial result.
    pub(crate) fn from_engine_text(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text.trim())
    }
}

pub(crate) fn response_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "summary": { "type": "string" },
            "action_items": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "task": { "type": "string" },
                        "owner": { "type": "string" },
                        "deadline": { "type": "string" }
                    },
                    "required": ["task", "owner", "deadline"],
                    "additionalProperties": false
                }
            },
            "decisions": {
                "type": "array",
                "items": { "type": "string" }
            },
            "whatsapp_followup": { "type": "string" },
            "email_followup": { "type": "string" }
        },
        "required": ["summary", "action_items", "decisions", "whatsapp_followup", "email_followup"],
        "additionalProperties": false
    })
}

impl fmt::Display for MeetingReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "RECORD OF DECISION")?;
        writeln!(f)?;
        writeln!(f, "Executive Context")?;
        writeln!(f, "  {}", self.summary)?;
        writeln!(f)?;

        writeln!(f, "Decisions")?;
        if self.decisions.is_empty() {
            writeln!(f, "  (none)")?;
        }
        for decision in &self.decisions {
            writeln!(f, "  - {decision}")?;
        }
        writeln!(f)?;

        writeln!(f, "Ownership")?;
        if self.action_items.is_empty() {
            writeln!(f, "  (none)")?;
        }
        for item in &self.action_items {
            writeln!(f, "  - {}", item.task)?;
            writeln!(f, "    owner: {}  deadline: {}", item.owner, item.deadline)?;
        }
        writeln!(f)?;

        writeln!(f, "Brief Group")?;
        writeln!(f, "{}", self.whatsapp_followup)?;
        writeln!(f)?;
        writeln!(f, "Formal Update")?;
        write!(f, "{}", self.email_followup)
    }
}
