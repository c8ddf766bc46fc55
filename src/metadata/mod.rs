//! Model metadata: resolves a model id to its container image and inputs.
//!
//! The orchestrator only needs the image reference. Input variables are
//! exposed so a front end can collect values before an inference.

mod fairmodels;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::error::MetadataError;

pub use fairmodels::FairModelsClient;

/// How a front end should collect a variable's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableKind {
    Categorical,
    Number,
    Integer,
    Boolean,
    Text,
}

impl VariableKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Categorical => "categorical",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Text => "text",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Number | Self::Integer)
    }
}

impl std::fmt::Display for VariableKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One allowed value of a categorical variable.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryOption {
    /// Value the model expects in the payload.
    pub value: Value,
    /// Human-readable label.
    pub label: String,
}

/// One input the model expects in its payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InputVariable {
    /// Payload key.
    pub name: String,
    pub label: String,
    pub kind: VariableKind,
    pub description: String,
    pub required: bool,
    /// Allowed values, categorical variables only.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<CategoryOption>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<Value>,
}

/// Everything known about one model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelMetadata {
    pub model_id: String,
    pub name: String,
    /// Container image serving the model, when the metadata declares one.
    pub image_ref: Option<String>,
    pub variables: Vec<InputVariable>,
}

/// Catalogue entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelSummary {
    pub id: String,
    pub title: String,
}

/// Source of model metadata.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    async fn fetch(&self, model_id: &str) -> Result<ModelMetadata, MetadataError>;

    async fn list_models(&self) -> Result<Vec<ModelSummary>, MetadataError>;
}
