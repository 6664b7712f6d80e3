use serde::{Deserialize, Serialize};

use crate::session::Category;

/// Message in an oracle conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

/// Message role
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl Message {
    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Wire request posted to an oracle endpoint
#[derive(Debug, Clone, Serialize)]
pub struct OracleRequest {
    pub messages: Vec<Message>,
    /// Disable streaming (default: false for non-streaming response)
    #[serde(default)]
    pub stream: bool,
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl OracleRequest {
    /// Create a new request with messages
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            stream: false,
            session_id: None,
        }
    }

    /// Set the session ID for conversation continuity
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// Wire response from an oracle endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct OracleReply {
    pub success: bool,
    pub completion: String,
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

/// Classification request, composed by the engine
#[derive(Debug, Clone)]
pub struct ClassifyRequest {
    /// Session the request belongs to.
    pub session_id: String,
    /// Free-text symptom description.
    pub symptom: String,
    /// Short digest of the baseline health snapshot.
    pub baseline_summary: Option<String>,
}

impl ClassifyRequest {
    /// Create a new classification request
    pub fn new(session_id: impl Into<String>, symptom: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            symptom: symptom.into(),
            baseline_summary: None,
        }
    }

    /// Attach a baseline health digest
    pub fn with_baseline(mut self, summary: impl Into<String>) -> Self {
        self.baseline_summary = Some(summary.into());
        self
    }
}

/// Next-step request for one reasoning round
#[derive(Debug, Clone)]
pub struct DecideRequest {
    /// Session the request belongs to.
    pub session_id: String,
    /// Free-text symptom description.
    pub symptom: String,
    /// Classified diagnostic category.
    pub category: Category,
    /// Category playbook injected into the system prompt.
    pub playbook: String,
    /// Catalog of callable tools, rendered from the registry.
    pub tool_catalog: String,
    /// Digest of the evidence collected so far.
    pub evidence_digest: String,
    /// Current round number (1-based).
    pub round: u32,
    /// Round budget for this session.
    pub max_rounds: u32,
    /// Extra context notes, e.g. from review loop-backs.
    pub notes: Vec<String>,
}

impl DecideRequest {
    /// Create a new next-step request
    pub fn new(
        session_id: impl Into<String>,
        symptom: impl Into<String>,
        category: Category,
        round: u32,
        max_rounds: u32,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            symptom: symptom.into(),
            category,
            playbook: String::new(),
            tool_catalog: String::new(),
            evidence_digest: String::new(),
            round,
            max_rounds,
            notes: Vec::new(),
        }
    }

    /// Attach the category playbook
    pub fn with_playbook(mut self, playbook: impl Into<String>) -> Self {
        self.playbook = playbook.into();
        self
    }

    /// Attach the rendered tool catalog
    pub fn with_tool_catalog(mut self, catalog: impl Into<String>) -> Self {
        self.tool_catalog = catalog.into();
        self
    }

    /// Attach the evidence digest
    pub fn with_evidence_digest(mut self, digest: impl Into<String>) -> Self {
        self.evidence_digest = digest.into();
        self
    }

    /// Attach context notes
    pub fn with_notes(mut self, notes: Vec<String>) -> Self {
        self.notes = notes;
        self
    }
}

/// One tool invocation requested by the oracle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
    /// Tool name.
    pub tool: String,
    /// Arguments as a JSON object.
    #[serde(default)]
    pub args: serde_json::Value,
}

impl ToolRequest {
    /// Create a new tool request
    pub fn new(tool: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            tool: tool.into(),
            args,
        }
    }
}

/// Outcome of one reasoning round
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Run these tools and report back.
    Invoke(Vec<ToolRequest>),
    /// Stop: the cause is understood well enough.
    Conclude {
        /// Summary of the conclusion.
        summary: String,
        /// Confidence in the conclusion (0.0-1.0).
        confidence: f64,
    },
}

/// Structured classification parsed from a completion
#[derive(Debug, Clone, Deserialize)]
pub struct ClassifyReply {
    pub category: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub rationale: String,
}

impl ClassifyReply {
    /// Parse a classify reply from completion text
    pub fn from_completion(completion: &str) -> Result<Self, String> {
        parse_completion(completion)
    }
}

/// Structured next-step reply parsed from a completion
#[derive(Debug, Clone, Deserialize)]
pub struct DecideReply {
    #[serde(default)]
    pub conclude: bool,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub tool_calls: Vec<ToolRequest>,
}

impl DecideReply {
    /// Parse a decide reply from completion text
    pub fn from_completion(completion: &str) -> Result<Self, String> {
        parse_completion(completion)
    }

    /// Convert the wire reply into a decision.
    ///
    /// An empty reply (no conclusion, no tool calls) is a valid decision;
    /// the reasoning loop treats it as a stall.
    pub fn into_decision(self) -> Result<Decision, String> {
        if self.conclude {
            let summary = self
                .summary
                .filter(|s| !s.trim().is_empty())
                .ok_or_else(|| "conclude reply missing summary".to_string())?;
            return Ok(Decision::Conclude {
                summary,
                confidence: self.confidence.unwrap_or(0.5).clamp(0.0, 1.0),
            });
        }

        let calls = self
            .tool_calls
            .into_iter()
            .map(|mut call| {
                // Absent args arrive as null; normalize to an empty object.
                if call.args.is_null() {
                    call.args = serde_json::json!({});
                }
                call
            })
            .collect();

        Ok(Decision::Invoke(calls))
    }
}

/// Parse a JSON reply from completion text.
///
/// Tries the whole completion first, then the region between the outermost
/// braces; models habitually wrap JSON in prose or code fences.
fn parse_completion<T: serde::de::DeserializeOwned>(completion: &str) -> Result<T, String> {
    if let Ok(parsed) = serde_json::from_str::<T>(completion) {
        return Ok(parsed);
    }

    if let (Some(start), Some(end)) = (completion.find('{'), completion.rfind('}')) {
        if start < end {
            if let Ok(parsed) = serde_json::from_str::<T>(&completion[start..=end]) {
                return Ok(parsed);
            }
        }
    }

    Err(format!(
        "completion is not valid JSON: {}",
        completion.chars().take(120).collect::<String>()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_constructors() {
        let msg = Message::system("You classify faults.");
        assert!(matches!(msg.role, MessageRole::System));
        let msg = Message::user("pods cannot reach service IPs");
        assert!(matches!(msg.role, MessageRole::User));
        let msg = Message::assistant("{}");
        assert!(matches!(msg.role, MessageRole::Assistant));
    }

    #[test]
    fn test_classify_reply_strict_parse() {
        let reply = ClassifyReply::from_completion(
            r#"{"category": "pod_to_service", "confidence": 0.85, "rationale": "mentions a VIP"}"#,
        )
        .unwrap();
        assert_eq!(reply.category, "pod_to_service");
        assert_eq!(reply.confidence, 0.85);
    }

    #[test]
    fn test_classify_reply_fenced_parse() {
        let reply = ClassifyReply::from_completion(
            "Here is my answer:\n```json\n{\"category\": \"general\"}\n```\nDone.",
        )
        .unwrap();
        assert_eq!(reply.category, "general");
        assert_eq!(reply.confidence, 0.0);
    }

    #[test]
    fn test_classify_reply_garbage() {
        assert!(ClassifyReply::from_completion("I have no idea").is_err());
    }

    #[test]
    fn test_decide_reply_tool_calls() {
        let reply = DecideReply::from_completion(
            r#"{"tool_calls": [{"tool": "collect_pod_logs", "args": {"pod": "web-0"}}]}"#,
        )
        .unwrap();
        let decision = reply.into_decision().unwrap();
        match decision {
            Decision::Invoke(calls) => {
                assert_eq!(calls.len(), 1);
                assert_eq!(calls[0].tool, "collect_pod_logs");
                assert_eq!(calls[0].args, json!({"pod": "web-0"}));
            }
            Decision::Conclude { .. } => panic!("expected invoke"),
        }
    }

    #[test]
    fn test_decide_reply_conclude() {
        let reply = DecideReply::from_completion(
            r#"{"conclude": true, "summary": "ACL drops traffic", "confidence": 0.9}"#,
        )
        .unwrap();
        match reply.into_decision().unwrap() {
            Decision::Conclude {
                summary,
                confidence,
            } => {
                assert_eq!(summary, "ACL drops traffic");
                assert_eq!(confidence, 0.9);
            }
            Decision::Invoke(_) => panic!("expected conclude"),
        }
    }

    #[test]
    fn test_decide_reply_conclude_without_summary() {
        let reply = DecideReply::from_completion(r#"{"conclude": true}"#).unwrap();
        assert!(reply.into_decision().is_err());
    }

    #[test]
    fn test_decide_reply_empty_is_valid_stall() {
        let reply = DecideReply::from_completion(r#"{}"#).unwrap();
        match reply.into_decision().unwrap() {
            Decision::Invoke(calls) => assert!(calls.is_empty()),
            Decision::Conclude { .. } => panic!("expected empty invoke"),
        }
    }

    #[test]
    fn test_decide_reply_null_args_normalized() {
        let reply =
            DecideReply::from_completion(r#"{"tool_calls": [{"tool": "collect_node_routes"}]}"#)
                .unwrap();
        match reply.into_decision().unwrap() {
            Decision::Invoke(calls) => assert_eq!(calls[0].args, json!({})),
            Decision::Conclude { .. } => panic!("expected invoke"),
        }
    }

    #[test]
    fn test_decide_request_builders() {
        let request = DecideRequest::new("s1", "no external traffic", Category::PodToExternal, 2, 10)
            .with_playbook("check SNAT first")
            .with_evidence_digest("baseline: all healthy")
            .with_notes(vec!["reviewer: look at the gateway".to_string()]);
        assert_eq!(request.round, 2);
        assert_eq!(request.category, Category::PodToExternal);
        assert_eq!(request.playbook, "check SNAT first");
        assert_eq!(request.notes.len(), 1);
    }

    #[test]
    fn test_confidence_clamped_on_conclude() {
        let reply = DecideReply {
            conclude: true,
            summary: Some("done".to_string()),
            confidence: Some(7.0),
            tool_calls: vec![],
        };
        match reply.into_decision().unwrap() {
            Decision::Conclude { confidence, .. } => assert_eq!(confidence, 1.0),
            Decision::Invoke(_) => panic!("expected conclude"),
        }
    }
}
