//! Document loading.
//!
//! Decodes JSON, YAML or TOML (chosen by file extension) into the value
//! tree. `{"$ref": "a.b"}` and `{"$incomplete": "string"}` objects become
//! references and incomplete values.

use std::path::Path;

use flowrun_core::TreeDocument;
use flowrun_types::{DocumentError, Value};
use thiserror::Error;

/// Encodings a document can be read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Yaml,
    Toml,
}

impl Format {
    /// Pick the format from a file extension.
    pub fn from_path(path: &Path) -> Option<Format> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "json" => Some(Format::Json),
            "yaml" | "yml" => Some(Format::Yaml),
            "toml" => Some(Format::Toml),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported document format: {0} (expected .json, .yaml, .yml or .toml)")]
    UnsupportedFormat(String),

    #[error("failed to parse {format:?} document: {message}")]
    Parse { format: Format, message: String },

    #[error(transparent)]
    Document(#[from] DocumentError),
}

/// Read and decode the document at `path`.
pub async fn load_document(path: &Path) -> Result<TreeDocument, LoadError> {
    let format = Format::from_path(path)
        .ok_or_else(|| LoadError::UnsupportedFormat(path.display().to_string()))?;
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| LoadError::Io {
            path: path.display().to_string(),
            source,
        })?;
    let doc = parse_document(&text, format)?;
    tracing::debug!(path = %path.display(), ?format, "loaded document");
    Ok(doc)
}

/// Decode `text` in the given format.
pub fn parse_document(text: &str, format: Format) -> Result<TreeDocument, LoadError> {
    let parse_err = |message: String| LoadError::Parse { format, message };
    let json: serde_json::Value = match format {
        Format::Json => serde_json::from_str(text).map_err(|e| parse_err(e.to_string()))?,
        Format::Yaml => serde_yaml_ng::from_str(text).map_err(|e| parse_err(e.to_string()))?,
        Format::Toml => toml::from_str(text).map_err(|e| parse_err(e.to_string()))?,
    };
    Ok(TreeDocument::new(Value::from_json(json)?))
}
