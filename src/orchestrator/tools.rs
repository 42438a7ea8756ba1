//! Tools the assistant can call, and the closed set of calls we accept.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::warn;

/// Tool definition sent to the assistant.
#[derive(Debug, Clone, Serialize)]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Tool calls the engine knows how to execute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tool", rename_all = "snake_case")]
pub enum ToolCall {
    /// Share the configured location, followed by an explanation.
    SendLocation,

    /// Open the gate and schedule the automatic close.
    OpenGate,

    /// Link the chat to a courier tracking number.
    AssociateTrackingNumber { tracking_number: String },

    /// Find the OTP this chat is asking for.
    ResolveOtp,

    /// Send the OTP for a known tracking number.
    SendOtp { tracking_number: String },

    /// Store a tracking number and OTP (extraction flow only).
    SaveTrackingOtp { tracking_number: String, otp: String },
}

impl ToolCall {
    /// Build a call from a function name and its JSON argument string.
    ///
    /// Unknown names and malformed arguments yield `None`.
    pub fn parse(name: &str, arguments: &str) -> Option<ToolCall> {
        let args = if arguments.trim().is_empty() { "{}" } else { arguments };
        let mut value: Value = match serde_json::from_str(args) {
            Ok(v) => v,
            Err(e) => {
                warn!("Skipping {name}: bad arguments ({e})");
                return None;
            }
        };
        let Some(obj) = value.as_object_mut() else {
            warn!("Skipping {name}: arguments are not an object");
            return None;
        };
        obj.insert("tool".to_string(), Value::String(name.to_string()));

        match serde_json::from_value(value) {
            Ok(call) => Some(call),
            Err(e) => {
                warn!("Skipping tool call {name}: {e}");
                None
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ToolCall::SendLocation => "send_location",
            ToolCall::OpenGate => "open_gate",
            ToolCall::AssociateTrackingNumber { .. } => "associate_tracking_number",
            ToolCall::ResolveOtp => "resolve_otp",
            ToolCall::SendOtp { .. } => "send_otp",
            ToolCall::SaveTrackingOtp { .. } => "save_tracking_otp",
        }
    }
}

fn no_params() -> Value {
    json!({ "type": "object", "properties": {} })
}

/// Tools offered when replying in a conversation.
pub fn get_tool_definitions() -> Vec<Tool> {
    vec![
        Tool {
            name: "send_location".to_string(),
            description: "Send the user's location to the chat".to_string(),
            parameters: no_params(),
        },
        Tool {
            name: "open_gate".to_string(),
            description: "Open the gate for the courier".to_string(),
            parameters: no_params(),
        },
        Tool {
            name: "associate_tracking_number".to_string(),
            description: "Associate a tracking number with this chat so its OTP can be found later".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "tracking_number": {
                        "type": "string",
                        "description": "The courier's tracking number"
                    }
                },
                "required": ["tracking_number"]
            }),
        },
        Tool {
            name: "resolve_otp".to_string(),
            description: "Send the OTP for this chat's delivery, or ask which tracking number it is for".to_string(),
            parameters: no_params(),
        },
        Tool {
            name: "send_otp".to_string(),
            description: "Send the OTP for a specific tracking number".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "tracking_number": {
                        "type": "string",
                        "description": "Tracking number chosen by the courier"
                    }
                },
                "required": ["tracking_number"]
            }),
        },
    ]
}

/// Tools offered to the OTP extraction prompt.
pub fn get_extraction_tool_definitions() -> Vec<Tool> {
    vec![Tool {
        name: "save_tracking_otp".to_string(),
        description: "Persist tracking number and OTP for later retrieval".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "tracking_number": { "type": "string" },
                "otp": { "type": "string" }
            },
            "required": ["tracking_number", "otp"]
        }),
    }]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_argumentless_calls() {
        assert_eq!(ToolCall::parse("open_gate", "{}"), Some(ToolCall::OpenGate));
        assert_eq!(ToolCall::parse("send_location", ""), Some(ToolCall::SendLocation));
        assert_eq!(ToolCall::parse("resolve_otp", "{\"extra\": 1}"), Some(ToolCall::ResolveOtp));
    }

    #[test]
    fn test_parse_with_arguments() {
        let call = ToolCall::parse("send_otp", r#"{"tracking_number": "ABC123"}"#);
        assert_eq!(call, Some(ToolCall::SendOtp { tracking_number: "ABC123".into() }));

        let call = ToolCall::parse("save_tracking_otp", r#"{"tracking_number": "ABC123", "otp": "9999"}"#);
        assert_eq!(
            call,
            Some(ToolCall::SaveTrackingOtp { tracking_number: "ABC123".into(), otp: "9999".into() })
        );
    }

    #[test]
    fn test_unknown_and_malformed_fail_closed() {
        assert_eq!(ToolCall::parse("launch_missiles", "{}"), None);
        assert_eq!(ToolCall::parse("send_otp", "{}"), None);
        assert_eq!(ToolCall::parse("send_otp", "not json"), None);
        assert_eq!(ToolCall::parse("send_otp", "[1, 2]"), None);
    }

    #[test]
    fn test_tool_call_serialize() {
        let call = ToolCall::AssociateTrackingNumber { tracking_number: "T1".into() };
        let json = serde_json::to_string(&call).unwrap();
        assert!(json.contains("associate_tracking_number"));
        assert!(json.contains("T1"));
    }

    #[test]
    fn test_names_match_definitions() {
        let names: Vec<String> = get_tool_definitions().into_iter().map(|t| t.name).collect();
        assert_eq!(
            names,
            vec!["send_location", "open_gate", "associate_tracking_number", "resolve_otp", "send_otp"]
        );
        let call = ToolCall::SendOtp { tracking_number: "x".into() };
        assert!(names.iter().any(|n| n == call.name()));
        assert_eq!(get_extraction_tool_definitions()[0].name, "save_tracking_otp");
    }
}
