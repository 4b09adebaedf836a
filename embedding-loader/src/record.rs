use serde::{Deserialize, Serialize};

use crate::error::DimensionMismatch;

/// One embedded passage from a data object.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawEmbeddingRecord {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub embedding: Vec<f64>,
}

impl RawEmbeddingRecord {
    /// Fills in a missing id the same way the producing job names its chunks:
    /// `<object key>_<ordinal>`. Object keys are unique within a collection, so derived ids never
    /// collide across objects that share a `filename`.
    pub fn with_default_id(mut self, object_key: &str, ordinal: usize) -> Self {
        if self.id.trim().is_empty() {
            self.id = format!("{object_key}_{ordinal}");
        }
        self
    }
}

/// Document metadata for one source file, keyed by `filename`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CitationRecord {
    pub filename: String,
    #[serde(rename = "DocumentName", default)]
    pub document_name: String,
    #[serde(rename = "DocumentURL", default)]
    pub document_url: String,
    #[serde(default)]
    pub embedding: Vec<f64>,
}

/// The document pushed to the search index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedRecord {
    pub id: String,
    pub text: String,
    pub data_embedding: Vec<f64>,
    #[serde(rename = "DocumentName")]
    pub document_name: String,
    #[serde(rename = "DocumentURL")]
    pub document_url: String,
    pub citation_embedding: Vec<f64>,
}

impl CombinedRecord {
    /// Joins a data record with its citation. A missing citation contributes empty fields.
    pub fn join(raw: RawEmbeddingRecord, citation: Option<&CitationRecord>) -> Self {
        let (document_name, document_url, citation_embedding) = match citation {
            Some(c) => (
                c.document_name.clone(),
                c.document_url.clone(),
                c.embedding.clone(),
            ),
            None => (String::new(), String::new(), Vec::new()),
        };

        Self {
            id: raw.id,
            text: raw.text,
            data_embedding: raw.embedding,
            document_name,
            document_url,
            citation_embedding,
        }
    }

    /// Both vectors must have exactly `expected` entries. With `check_citation` unset only the
    /// data vector is checked.
    pub fn check_dimensions(
        &self,
        expected: usize,
        check_citation: bool,
    ) -> Result<(), DimensionMismatch> {
        if self.data_embedding.len() != expected {
            return Err(DimensionMismatch {
                field: "data_embedding",
                expected,
                actual: self.data_embedding.len(),
            });
        }
        if check_citation && self.citation_embedding.len() != expected {
            return Err(DimensionMismatch {
                field: "citation_embedding",
                expected,
                actual: self.citation_embedding.len(),
            });
        }
        Ok(())
    }
}
