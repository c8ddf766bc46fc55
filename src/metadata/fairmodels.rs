//! FAIRmodels JSON-LD metadata client.

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use serde_json::{Map, Value};

use crate::config::MetadataConfig;
use crate::error::MetadataError;
use crate::metadata::{
    CategoryOption, InputVariable, MetadataProvider, ModelMetadata, ModelSummary, VariableKind,
};

const GENERAL_INFO: &str = "General Model Information";
const UNKNOWN_MODEL: &str = "Unknown Model";
const MIN_NUMERICAL: &str = "Minimum - for numerical";
const MAX_NUMERICAL: &str = "Maximum - for numerical";
const CATEGORY_ID: &str = "Identification for category used in model";

/// Keys that may hold a list of input variable definitions, in lookup order.
const VARIABLE_SOURCES: [&str; 6] = [
    "Input data1",
    "Input data",
    "variables",
    "inputs",
    "features",
    "parameters",
];

/// HTTP client for the FAIRmodels catalogue.
pub struct FairModelsClient {
    client: reqwest::Client,
    config: MetadataConfig,
}

impl FairModelsClient {
    pub fn new(config: MetadataConfig) -> Result<Self, MetadataError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/ld+json"));
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(|e| MetadataError::Request {
                url: config.list_url.clone(),
                reason: format!("Failed to build HTTP client: {e}"),
            })?;
        Ok(Self { client, config })
    }

    async fn get_json(&self, url: &str, model_id: Option<&str>) -> Result<Value, MetadataError> {
        tracing::info!(url = %url, "Fetching model metadata");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| MetadataError::Request {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND
            && let Some(model_id) = model_id
        {
            return Err(MetadataError::NotFound {
                model_id: model_id.to_string(),
            });
        }
        if !status.is_success() {
            return Err(MetadataError::Request {
                url: url.to_string(),
                reason: format!("HTTP {status}"),
            });
        }

        response.json().await.map_err(|e| MetadataError::Parse {
            model_id: model_id.unwrap_or("<catalogue>").to_string(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl MetadataProvider for FairModelsClient {
    async fn fetch(&self, model_id: &str) -> Result<ModelMetadata, MetadataError> {
        let url = self.config.instance_url_for(model_id);
        let raw = self.get_json(&url, Some(model_id)).await?;
        if !raw.is_object() {
            return Err(MetadataError::Parse {
                model_id: model_id.to_string(),
                reason: "metadata document is not a JSON object".to_string(),
            });
        }
        let metadata = parse_metadata(model_id, &raw);
        tracing::info!(
            model_id = %model_id,
            name = %metadata.name,
            image = metadata.image_ref.as_deref().unwrap_or("<none>"),
            variables = metadata.variables.len(),
            "Parsed model metadata"
        );
        Ok(metadata)
    }

    async fn list_models(&self) -> Result<Vec<ModelSummary>, MetadataError> {
        let raw = self.get_json(&self.config.list_url, None).await?;
        let models = parse_model_list(&raw);
        tracing::info!(count = models.len(), "Parsed model catalogue");
        Ok(models)
    }
}

static NULL: Value = Value::Null;

/// Unwrap a JSON-LD `{"@value": x}` literal; other values pass through.
fn literal(value: &Value) -> &Value {
    match value {
        Value::Object(map) => map.get("@value").unwrap_or(&NULL),
        other => other,
    }
}

/// Non-empty text rendering of a scalar.
fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn literal_text(value: Option<&Value>) -> Option<String> {
    value.map(literal).and_then(text)
}

/// Python-style title casing: `"tumour_size"` becomes `"Tumour Size"`.
fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_alpha = false;
    for c in s.chars() {
        if c.is_alphabetic() {
            if prev_alpha {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_alpha = true;
        } else {
            out.push(c);
            prev_alpha = false;
        }
    }
    out
}

pub(crate) fn parse_metadata(model_id: &str, raw: &Value) -> ModelMetadata {
    ModelMetadata {
        model_id: model_id.to_string(),
        name: model_name(raw),
        image_ref: image_ref(raw),
        variables: variables(raw),
    }
}

fn model_name(raw: &Value) -> String {
    if let Some(title) = raw.get(GENERAL_INFO).and_then(|info| info.get("Title"))
        && let Some(name) = text(literal(title))
    {
        return name;
    }
    ["name", "title", "label", "@id"]
        .iter()
        .find_map(|key| raw.get(*key))
        .map(|v| v.as_str().map(String::from).unwrap_or_else(|| v.to_string()))
        .unwrap_or_else(|| UNKNOWN_MODEL.to_string())
}

fn image_ref(raw: &Value) -> Option<String> {
    if let Some(image) = literal_text(
        raw.get(GENERAL_INFO)
            .and_then(|info| info.get("FAIRmodels image name")),
    ) {
        return Some(image);
    }

    let nested = |key: &str, inner: &str| match raw.get(key) {
        Some(Value::Object(obj)) => obj.get(inner).and_then(text),
        Some(other) => text(other),
        None => None,
    };

    let image = nested("implementation", "dockerImage")
        .or_else(|| raw.get("dockerImage").and_then(text))
        .or_else(|| nested("container", "image"));
    if image.is_none() {
        tracing::warn!("Docker image not found in metadata");
    }
    image
}

fn variables(raw: &Value) -> Vec<InputVariable> {
    let mut vars: Vec<InputVariable> = VARIABLE_SOURCES
        .iter()
        .filter_map(|key| raw.get(*key).and_then(Value::as_array))
        .flatten()
        .filter_map(Value::as_object)
        .map(parse_variable)
        .collect();

    if vars.is_empty()
        && let Some(properties) = raw
            .get("schema")
            .and_then(|s| s.get("properties"))
            .and_then(Value::as_object)
    {
        vars = properties
            .iter()
            .filter_map(|(name, def)| def.as_object().map(|def| parse_schema_property(name, def)))
            .collect();
    }
    vars
}

fn parse_variable(var: &Map<String, Value>) -> InputVariable {
    let name = literal_text(var.get("Input label"))
        .or_else(|| var.get("name").and_then(text))
        .or_else(|| var.get("id").and_then(text))
        .unwrap_or_else(|| "unknown".to_string());

    let description = literal_text(var.get("Description"))
        .or_else(|| var.get("description").and_then(text))
        .unwrap_or_default();

    let feature_label = var
        .get("Input feature")
        .and_then(|f| f.get("rdfs:label"))
        .map(literal)
        .and_then(text);

    let kind = variable_kind(var);
    let (min, max) = if kind.is_numeric() {
        (
            bound(var, &[MIN_NUMERICAL, "minimum", "min"]),
            bound(var, &[MAX_NUMERICAL, "maximum", "max"]),
        )
    } else {
        (None, None)
    };

    InputVariable {
        label: feature_label.unwrap_or_else(|| human_readable_name(var, &name)),
        name,
        kind,
        description,
        required: var.get("required").and_then(Value::as_bool).unwrap_or(true),
        options: if kind == VariableKind::Categorical {
            categorical_options(var)
        } else {
            Vec::new()
        },
        min,
        max,
    }
}

/// First present key wins, even when its literal is null.
fn bound(var: &Map<String, Value>, keys: &[&str]) -> Option<Value> {
    keys.iter()
        .find_map(|key| var.get(*key))
        .map(literal)
        .filter(|v| !v.is_null())
        .cloned()
}

fn human_readable_name(var: &Map<String, Value>, name: &str) -> String {
    ["label", "title", "displayName", "description"]
        .iter()
        .find_map(|key| var.get(*key).and_then(text))
        .unwrap_or_else(|| title_case(&name.replace(['_', '-'], " ")))
}

fn kind_from_name(name: &str, allow_all: bool) -> Option<VariableKind> {
    match name.to_lowercase().as_str() {
        "categorical" | "enum" | "choice" => Some(VariableKind::Categorical),
        "number" | "float" | "double" | "numeric" => Some(VariableKind::Number),
        "integer" | "int" => Some(VariableKind::Integer),
        "boolean" | "bool" if allow_all => Some(VariableKind::Boolean),
        "text" | "string" if allow_all => Some(VariableKind::Text),
        _ => None,
    }
}

fn variable_kind(var: &Map<String, Value>) -> VariableKind {
    if let Some(kind) = literal_text(var.get("Type of input")).and_then(|t| kind_from_name(&t, false))
    {
        return kind;
    }
    if let Some(kind) = var
        .get("type")
        .and_then(Value::as_str)
        .and_then(|t| kind_from_name(t, true))
    {
        return kind;
    }

    let has_numeric_bound = [MIN_NUMERICAL, MAX_NUMERICAL]
        .iter()
        .filter_map(|key| var.get(*key))
        .any(|v| !literal(v).is_null());
    if has_numeric_bound
        || ["minimum", "maximum", "min", "max"]
            .iter()
            .any(|key| var.contains_key(*key))
    {
        return VariableKind::Number;
    }

    let has_categories = var
        .get("Categories")
        .and_then(Value::as_array)
        .is_some_and(|cats| {
            cats.iter()
                .filter_map(|c| c.get(CATEGORY_ID))
                .any(|id| !literal(id).is_null())
        });
    if has_categories
        || ["options", "enum", "choices"]
            .iter()
            .any(|key| var.contains_key(*key))
    {
        return VariableKind::Categorical;
    }

    VariableKind::Text
}

fn categorical_options(var: &Map<String, Value>) -> Vec<CategoryOption> {
    if let Some(categories) = var.get("Categories").and_then(Value::as_array) {
        let options: Vec<CategoryOption> = categories
            .iter()
            .filter(|c| c.is_object())
            .filter_map(|category| {
                let id = category.get(CATEGORY_ID).map(literal)?;
                let id_text = text(id)?;
                let label = category
                    .get("Category Label")
                    .and_then(|l| l.get("rdfs:label"))
                    .map(literal)
                    .and_then(text)
                    .unwrap_or(id_text);
                Some(CategoryOption {
                    value: id.clone(),
                    label,
                })
            })
            .collect();
        if !options.is_empty() {
            return options;
        }
    }

    ["options", "enum", "choices", "values"]
        .iter()
        .find_map(|key| var.get(*key).and_then(Value::as_array))
        .map(|values| values.iter().map(plain_option).collect())
        .unwrap_or_default()
}

fn plain_option(value: &Value) -> CategoryOption {
    CategoryOption {
        label: text(value).unwrap_or_else(|| value.to_string()),
        value: value.clone(),
    }
}

fn parse_schema_property(name: &str, def: &Map<String, Value>) -> InputVariable {
    let schema_type = def.get("type").and_then(Value::as_str).unwrap_or("string");
    let mut kind = match schema_type.to_lowercase().as_str() {
        "number" => VariableKind::Number,
        "integer" => VariableKind::Integer,
        "boolean" => VariableKind::Boolean,
        _ => VariableKind::Text,
    };

    let mut options = Vec::new();
    let (mut min, mut max) = (None, None);
    if let Some(values) = def.get("enum").and_then(Value::as_array) {
        kind = VariableKind::Categorical;
        options = values.iter().map(plain_option).collect();
    } else if kind.is_numeric() {
        min = def.get("minimum").filter(|v| !v.is_null()).cloned();
        max = def.get("maximum").filter(|v| !v.is_null()).cloned();
    }

    InputVariable {
        name: name.to_string(),
        label: def
            .get("title")
            .and_then(text)
            .unwrap_or_else(|| title_case(&name.replace('_', " "))),
        kind,
        description: def.get("description").and_then(text).unwrap_or_default(),
        required: true,
        options,
        min,
        max,
    }
}

/// Catalogue response: an object keyed by model id.
pub(crate) fn parse_model_list(raw: &Value) -> Vec<ModelSummary> {
    let Some(models) = raw.as_object() else {
        tracing::warn!("Model catalogue is not a JSON object");
        return Vec::new();
    };
    models
        .iter()
        .filter(|(_, info)| info.is_object())
        .map(|(id, info)| {
            let title = info
                .get("title")
                .and_then(text)
                .or_else(|| {
                    info.get("properties")
                        .and_then(|p| p.get("General Model Information.Title"))
                        .map(literal)
                        .and_then(text)
                })
                .unwrap_or_else(|| id.clone());
            ModelSummary {
                id: id.clone(),
                title,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn fairmodels_document() -> Value {
        json!({
            "@id": "https://v3.fairmodels.org/instance/3fa85f64",
            "General Model Information": {
                "Title": {"@value": "Laryngeal cancer survival"},
                "FAIRmodels image name": {"@value": "ghcr.io/maastroclinic/larynx-survival:1.2"}
            },
            "Input data1": [
                {
                    "Input label": {"@value": "age"},
                    "Description": {"@value": "Age at diagnosis"},
                    "Input feature": {"rdfs:label": {"@value": "Age"}},
                    "Type of input": {"@value": "Numeric"},
                    "Minimum - for numerical": {"@value": 18},
                    "Maximum - for numerical": {"@value": null}
                },
                {
                    "Input label": {"@value": "t_stage"},
                    "Input feature": {"rdfs:label": {"@value": "Tumour stage"}},
                    "Categories": [
                        {
                            "Identification for category used in model": {"@value": "T1"},
                            "Category Label": {"rdfs:label": {"@value": "Stage T1"}}
                        },
                        {
                            "Identification for category used in model": {"@value": "T2"},
                            "Category Label": {}
                        },
                        {
                            "Identification for category used in model": {"@value": null}
                        }
                    ]
                },
                {
                    "Input label": {"@value": "smoker"}
                }
            ]
        })
    }

    #[test]
    fn parses_fairmodels_jsonld() {
        let meta = parse_metadata("3fa85f64", &fairmodels_document());
        assert_eq!(meta.name, "Laryngeal cancer survival");
        assert_eq!(
            meta.image_ref.as_deref(),
            Some("ghcr.io/maastroclinic/larynx-survival:1.2")
        );
        assert_eq!(meta.variables.len(), 3);

        let age = &meta.variables[0];
        assert_eq!(age.name, "age");
        assert_eq!(age.label, "Age");
        assert_eq!(age.kind, VariableKind::Number);
        assert_eq!(age.description, "Age at diagnosis");
        assert_eq!(age.min, Some(json!(18)));
        assert_eq!(age.max, None);
        assert!(age.required);

        let stage = &meta.variables[1];
        assert_eq!(stage.kind, VariableKind::Categorical);
        assert_eq!(
            stage.options,
            vec![
                CategoryOption {
                    value: json!("T1"),
                    label: "Stage T1".to_string()
                },
                CategoryOption {
                    value: json!("T2"),
                    label: "T2".to_string()
                },
            ]
        );

        let smoker = &meta.variables[2];
        assert_eq!(smoker.kind, VariableKind::Text);
        assert_eq!(smoker.label, "Smoker");
    }

    #[test]
    fn falls_back_to_generic_fields() {
        let raw = json!({
            "name": "Toy model",
            "implementation": {"dockerImage": "toy/model:latest"},
            "variables": [
                {"name": "tumour_size", "type": "float", "min": 0, "max": 12.5},
                {"name": "has-nodes", "type": "bool", "required": false},
                {"id": "grade", "enum": [1, 2, 3]}
            ]
        });
        let meta = parse_metadata("toy", &raw);
        assert_eq!(meta.name, "Toy model");
        assert_eq!(meta.image_ref.as_deref(), Some("toy/model:latest"));

        let size = &meta.variables[0];
        assert_eq!(size.label, "Tumour Size");
        assert_eq!(size.kind, VariableKind::Number);
        assert_eq!(size.max, Some(json!(12.5)));

        let nodes = &meta.variables[1];
        assert_eq!(nodes.kind, VariableKind::Boolean);
        assert_eq!(nodes.label, "Has Nodes");
        assert!(!nodes.required);

        let grade = &meta.variables[2];
        assert_eq!(grade.name, "grade");
        assert_eq!(grade.kind, VariableKind::Categorical);
        assert_eq!(grade.options.len(), 3);
        assert_eq!(grade.options[0].label, "1");
    }

    #[test]
    fn image_from_container_field_or_missing() {
        let meta = parse_metadata("m", &json!({"container": {"image": "reg/img:2"}}));
        assert_eq!(meta.image_ref.as_deref(), Some("reg/img:2"));

        let meta = parse_metadata("m", &json!({"container": "reg/img:3"}));
        assert_eq!(meta.image_ref.as_deref(), Some("reg/img:3"));

        let meta = parse_metadata("m", &json!({"title": "No image"}));
        assert_eq!(meta.image_ref, None);
        assert_eq!(meta.name, "No image");
    }

    #[test]
    fn schema_properties_used_when_no_variable_list() {
        let raw = json!({
            "schema": {
                "properties": {
                    "psa_level": {"type": "number", "minimum": 0, "description": "ng/mL"},
                    "gleason": {"type": "integer", "enum": [6, 7, 8]},
                    "notes": {"title": "Clinical notes"}
                }
            }
        });
        let meta = parse_metadata("m", &raw);
        assert_eq!(meta.name, UNKNOWN_MODEL);
        let names: Vec<&str> = meta.variables.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["psa_level", "gleason", "notes"]);
        assert_eq!(meta.variables[0].label, "Psa Level");
        assert_eq!(meta.variables[0].min, Some(json!(0)));
        assert_eq!(meta.variables[1].kind, VariableKind::Categorical);
        assert_eq!(meta.variables[2].label, "Clinical notes");
        assert_eq!(meta.variables[2].kind, VariableKind::Text);
    }

    #[test]
    fn model_list_titles_with_fallbacks() {
        let raw = json!({
            "a1": {"title": "Model A"},
            "b2": {"properties": {"General Model Information.Title": "Model B"}},
            "c3": {},
            "d4": "not an object"
        });
        let models = parse_model_list(&raw);
        assert_eq!(
            models,
            vec![
                ModelSummary {
                    id: "a1".to_string(),
                    title: "Model A".to_string()
                },
                ModelSummary {
                    id: "b2".to_string(),
                    title: "Model B".to_string()
                },
                ModelSummary {
                    id: "c3".to_string(),
                    title: "c3".to_string()
                },
            ]
        );
        assert!(parse_model_list(&json!([1, 2])).is_empty());
    }

    #[test]
    fn title_case_matches_python_semantics() {
        assert_eq!(title_case("tumour size"), "Tumour Size");
        assert_eq!(title_case("pT2 stage"), "Pt2 Stage");
        assert_eq!(title_case("ALREADY UPPER"), "Already Upper");
    }

    #[tokio::test]
    async fn fetch_maps_404_to_not_found() {
        let app = axum::Router::new()
            .route(
                "/instance/{id}",
                axum::routing::get(
                    |axum::extract::Path(id): axum::extract::Path<String>| async move {
                        if id == "known" {
                            Ok(axum::Json(json!({
                                "name": "Known",
                                "dockerImage": "known/image:1"
                            })))
                        } else {
                            Err(axum::http::StatusCode::NOT_FOUND)
                        }
                    },
                ),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = FairModelsClient::new(MetadataConfig {
            instance_url: format!("http://{addr}/instance/"),
            list_url: format!("http://{addr}/"),
            ..Default::default()
        })
        .unwrap();

        let meta = client.fetch("known").await.unwrap();
        assert_eq!(meta.image_ref.as_deref(), Some("known/image:1"));

        let err = client.fetch("missing").await.unwrap_err();
        assert!(matches!(err, MetadataError::NotFound { ref model_id } if model_id == "missing"));
    }
}
