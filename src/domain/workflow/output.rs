//! Step output transforms

use std::fmt;

use serde::{Deserialize, Serialize};

const THINK_OPEN: &str = "<think>";
const THINK_CLOSE: &str = "</think>";

/// Marker a passthrough validator emits to reject the previous step's content
pub const INVALID_MARKER: &str = "INVALID:";

/// Named transform applied to a step's raw output
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OutputField {
    /// No transform (empty field name)
    #[default]
    Raw,

    /// Strip `<think>` reasoning blocks
    GeneratedText,

    /// Keep reasoning blocks
    GeneratedTextWithReasoning,

    /// Treat the agent as a validator and pass the previous content through
    Passthrough,

    /// Unrecognized field name; identity transform
    Other(String),
}

impl OutputField {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Raw => "",
            Self::GeneratedText => "generatedText",
            Self::GeneratedTextWithReasoning => "generatedTextWithReasoning",
            Self::Passthrough => "passthrough",
            Self::Other(name) => name,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        matches!(self, Self::Passthrough)
    }
}

impl From<String> for OutputField {
    fn from(value: String) -> Self {
        match value.as_str() {
            "" => Self::Raw,
            "generatedText" => Self::GeneratedText,
            "generatedTextWithReasoning" => Self::GeneratedTextWithReasoning,
            "passthrough" => Self::Passthrough,
            _ => Self::Other(value),
        }
    }
}

impl From<&str> for OutputField {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<OutputField> for String {
    fn from(field: OutputField) -> Self {
        field.as_str().to_string()
    }
}

impl fmt::Display for OutputField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Apply an output field transform to raw step output
///
/// Passthrough content is returned unchanged here; the step executor replaces it.
pub fn process_output(content: &str, output_field: &OutputField) -> String {
    match output_field {
        OutputField::GeneratedText => extract_reasoning(content),
        OutputField::GeneratedTextWithReasoning
        | OutputField::Passthrough
        | OutputField::Raw
        | OutputField::Other(_) => content.to_string(),
    }
}

/// Remove a `<think>...</think>` reasoning block from generated text
///
/// With both tags, the block is cut out and the rest trimmed. With only a closing tag,
/// everything up to and including it is dropped. Otherwise the text is returned as-is.
pub fn extract_reasoning(content: &str) -> String {
    let start = content.find(THINK_OPEN);
    let end = content.find(THINK_CLOSE);

    match (start, end) {
        (Some(start), Some(end)) if end > start => {
            let before = &content[..start];
            let after = &content[end + THINK_CLOSE.len()..];
            format!("{}{}", before, after).trim().to_string()
        }
        (_, Some(end)) => content[end + THINK_CLOSE.len()..].trim().to_string(),
        _ => content.to_string(),
    }
}

/// Reason following the first `INVALID:` marker, if the marker is present
pub fn invalid_reason(content: &str) -> Option<&str> {
    content
        .split_once(INVALID_MARKER)
        .map(|(_, reason)| reason.trim())
}
