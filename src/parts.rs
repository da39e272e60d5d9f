//! Conversion between A2A message parts and model content parts.

use base64::Engine;

use crate::content::ModelPart;
use crate::error::AgentError;
use crate::protocol::{FileContent, Part};

/// Convert A2A parts into model parts, preserving order.
pub fn a2a_parts_to_model(parts: &[Part]) -> Result<Vec<ModelPart>, AgentError> {
    parts.iter().map(a2a_part_to_model).collect()
}

pub fn a2a_part_to_model(part: &Part) -> Result<ModelPart, AgentError> {
    match part {
        Part::Text { text } => Ok(ModelPart::text(text.clone())),
        Part::File {
            file: FileContent::Uri(file),
        } => Ok(ModelPart::file_data(file.uri.clone(), file.mime_type.clone())),
        Part::File {
            file: FileContent::Bytes(file),
        } => {
            let data = base64::engine::general_purpose::STANDARD
                .decode(file.bytes.as_bytes())
                .map_err(|e| AgentError::InvalidPart(format!("file bytes are not base64: {e}")))?;
            Ok(ModelPart::inline_data(data, file.mime_type.clone()))
        }
        Part::Data { .. } => Err(AgentError::UnsupportedPartType("data".to_string())),
    }
}

/// Convert model parts into A2A parts. Parts with no text, file reference,
/// or inline data are dropped.
pub fn model_parts_to_a2a(parts: &[ModelPart]) -> Vec<Part> {
    parts.iter().filter_map(model_part_to_a2a).collect()
}

pub fn model_part_to_a2a(part: &ModelPart) -> Option<Part> {
    if let Some(text) = part.text.as_deref().filter(|t| !t.is_empty()) {
        return Some(Part::text(text));
    }
    if let Some(file) = &part.file_data {
        return Some(Part::file_uri(file.file_uri.clone(), file.mime_type.clone()));
    }
    if let Some(blob) = &part.inline_data {
        let encoded = base64::engine::general_purpose::STANDARD.encode(&blob.data);
        return Some(Part::file_bytes(encoded, blob.mime_type.clone()));
    }
    None
}
