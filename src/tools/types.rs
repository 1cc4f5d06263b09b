use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::browser::driver::ProtocolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ToolErrorCode {
    ElementNotFound,
    ElementNotClickable,
    OptionNotFound,
    NavigationFailed,
    NavigationTimeout,
    TypeFailed,
    SubmitFailed,
    VerificationFailed,
    ProtocolTimeout,
    ProtocolError,
    ScriptError,
    InvalidParameters,
    InvalidTool,
    ExecutionError,
}

impl ToolErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ElementNotFound => "ElementNotFound",
            Self::ElementNotClickable => "ElementNotClickable",
            Self::OptionNotFound => "OptionNotFound",
            Self::NavigationFailed => "NavigationFailed",
            Self::NavigationTimeout => "NavigationTimeout",
            Self::TypeFailed => "TypeFailed",
            Self::SubmitFailed => "SubmitFailed",
            Self::VerificationFailed => "VerificationFailed",
            Self::ProtocolTimeout => "ProtocolTimeout",
            Self::ProtocolError => "ProtocolError",
            Self::ScriptError => "ScriptError",
            Self::InvalidParameters => "InvalidParameters",
            Self::InvalidTool => "InvalidTool",
            Self::ExecutionError => "ExecutionError",
        }
    }

    /// Transient conditions worth retrying. Input errors and page-side
    /// script failures are not.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ElementNotFound
                | Self::ElementNotClickable
                | Self::NavigationFailed
                | Self::NavigationTimeout
                | Self::TypeFailed
                | Self::SubmitFailed
                | Self::VerificationFailed
                | Self::ProtocolTimeout
                | Self::ProtocolError
        )
    }

    /// Input errors end the run without touching any retry budget.
    pub fn is_input_error(&self) -> bool {
        matches!(self, Self::InvalidParameters | Self::InvalidTool)
    }
}

impl fmt::Display for ToolErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct ToolError {
    pub code: ToolErrorCode,
    pub message: String,
    pub recoverable: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

impl ToolError {
    pub fn new(code: ToolErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            recoverable: code.is_recoverable(),
            suggestions: Vec::new(),
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ToolErrorCode::InvalidParameters, message)
    }

    pub fn element_not_found(selector: &str) -> Self {
        Self::new(
            ToolErrorCode::ElementNotFound,
            format!("no element matches '{selector}'"),
        )
        .with_suggestion("wait for the element with wait_for_element before interacting")
        .with_suggestion("use find_elements to discover a working selector")
    }
}

impl From<ProtocolError> for ToolError {
    fn from(e: ProtocolError) -> Self {
        let code = match &e {
            ProtocolError::Timeout { .. } => ToolErrorCode::ProtocolTimeout,
            ProtocolError::ScriptException(_) => ToolErrorCode::ScriptError,
            ProtocolError::Navigation(_) => ToolErrorCode::NavigationFailed,
            ProtocolError::Transport(_) | ProtocolError::Remote { .. } | ProtocolError::Malformed(_) => {
                ToolErrorCode::ProtocolError
            }
        };
        Self::new(code, e.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolMetadata {
    pub execution_time_ms: u64,
    pub retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_passed: Option<bool>,
}

/// What a tool handler produces on success.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolOutput {
    pub message: String,
    pub data: Option<Value>,
    pub verification_passed: Option<bool>,
}

impl ToolOutput {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn verified(mut self, passed: bool) -> Self {
        self.verification_passed = Some(passed);
        self
    }
}

/// Outcome of one tool invocation. Built once, never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ToolMetadata>,
}

impl ToolResult {
    pub fn from_output(output: ToolOutput, metadata: ToolMetadata) -> Self {
        Self {
            success: true,
            message: output.message,
            data: output.data,
            error: None,
            metadata: Some(ToolMetadata {
                verification_passed: output.verification_passed,
                ..metadata
            }),
        }
    }

    pub fn from_error(error: ToolError, metadata: Option<ToolMetadata>) -> Self {
        Self {
            success: false,
            message: error.message.clone(),
            data: None,
            error: Some(error),
            metadata,
        }
    }

    pub fn error_code(&self) -> Option<ToolErrorCode> {
        self.error.as_ref().map(|e| e.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_errors_map_to_codes() {
        let timeout: ToolError = ProtocolError::Timeout {
            method: "DOM.getDocument".into(),
            timeout_ms: 10,
        }
        .into();
        assert_eq!(timeout.code, ToolErrorCode::ProtocolTimeout);
        assert!(timeout.recoverable);

        let script: ToolError = ProtocolError::ScriptException("ReferenceError".into()).into();
        assert_eq!(script.code, ToolErrorCode::ScriptError);
        assert!(!script.recoverable);
    }

    #[test]
    fn input_errors_are_not_recoverable() {
        assert!(!ToolErrorCode::InvalidParameters.is_recoverable());
        assert!(ToolErrorCode::InvalidTool.is_input_error());
        assert!(ToolErrorCode::ElementNotFound.is_recoverable());
    }

    #[test]
    fn result_serializes_camel_case_metadata() {
        let r = ToolResult::from_output(
            ToolOutput::message("ok").verified(true),
            ToolMetadata {
                execution_time_ms: 12,
                retries: 1,
                verification_passed: None,
            },
        );
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["metadata"]["executionTimeMs"], 12);
        assert_eq!(v["metadata"]["verificationPassed"], true);
        assert!(v.get("error").is_none());
    }
}
