//! Free-form geospatial operations answered by generated code.
//!
//! The tool runs straight away and asks the user to keep the result: the
//! auxiliary model writes the Python snippet that performs the operation.

use async_trait::async_trait;
use saferplaces_core::error::ToolError;
use saferplaces_core::names;
use saferplaces_core::rules::{InferenceRule, InferenceRules, Inferred, ToolArgs, ValidationRules};
use saferplaces_core::tool::{AgentTool, GateDefaults, ToolContext, ToolOutput};
use serde_json::{Value, json};
use tracing::debug;

use crate::geo::file_name;
use crate::llm::{AskRole, Assistant};

pub struct GeospatialOpsTool {
    assistant: Assistant,
}

impl GeospatialOpsTool {
    pub fn new(assistant: Assistant) -> Self {
        Self { assistant }
    }
}

/// `{bucket_root}/user=={user}`: the project bucket without its project part.
fn user_bucket<'a>(ctx: &ToolContext<'a>) -> &'a str {
    ctx.project_bucket
        .rsplit_once("/project==")
        .map(|(user, _)| user)
        .unwrap_or(ctx.project_bucket)
}

/// A filename reply, or `None` when the model decided no layer is needed.
fn layer_name(reply: &str) -> Option<String> {
    let name = reply.trim().trim_matches(|c| matches!(c, '`' | '"' | '\''));
    match name {
        "" | "None" | "none" | "null" => None,
        other => Some(file_name(other).to_string()),
    }
}

/// Places the output layer in the user bucket, asking the model for a
/// filename when the caller gave none.
struct OutputLayer {
    assistant: Assistant,
}

#[async_trait]
impl InferenceRule for OutputLayer {
    async fn resolve(&self, args: &ToolArgs, ctx: &ToolContext<'_>) -> Result<Inferred, ToolError> {
        let bucket = user_bucket(ctx);
        if let Some(layer) = args.str("output_layer") {
            if layer.starts_with(&format!("{bucket}/")) {
                return Ok(Inferred::Keep);
            }
            return Ok(Inferred::Value(json!(format!("{bucket}/{}", file_name(layer)))));
        }

        let prompt = format!(
            "You are an assistant specialized in geospatial operations. Decide whether the user's \
             request requires creating a new output layer, and if so, propose a valid filename.\n\
             Do not create a layer for descriptive or statistical requests (bounding box, centroid, \
             area, perimeter, raster statistics): answer None.\n\
             Create a layer only if the operation produces geospatial data that can be shown on a \
             map (intersection, union, difference, clip, dissolve, spatial filtering), or if the \
             user asks to save the result.\n\
             Filenames are lowercase with letters, numbers and underscores, ending in .geojson for \
             vector data or .tif for raster data.\n\
             Output strictly one value: the filename, or None.\n\n\
             User request:\n\"{}\"",
            args.str("prompt").unwrap_or_default()
        );
        let reply = self
            .assistant
            .ask(AskRole::System, &prompt)
            .await
            .map_err(|e| ToolError::InferenceFailed {
                field: "output_layer".into(),
                reason: e.to_string(),
            })?;
        Ok(match layer_name(&reply) {
            Some(name) => {
                debug!(%name, "output layer proposed");
                Inferred::Value(json!(format!("{bucket}/{name}")))
            }
            None => Inferred::Keep,
        })
    }
}

fn describe_layers(ctx: &ToolContext<'_>) -> String {
    if ctx.state.layer_registry.is_empty() {
        return "No layers available.".into();
    }
    ctx.state
        .layer_registry
        .iter()
        .map(|l| {
            let layer_type = serde_json::to_value(l.layer_type).unwrap_or(Value::Null);
            format!(
                "Layer: {}\n- type: {}\n- src: {}",
                l.title,
                layer_type.as_str().unwrap_or_default(),
                l.src
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[async_trait]
impl AgentTool for GeospatialOpsTool {
    fn name(&self) -> &str {
        names::GEOSPATIAL_OPS_TOOL
    }

    fn description(&self) -> &str {
        "Interprets natural language requests for geospatial operations. Descriptive or \
         statistical queries (bounding boxes, centroids, raster statistics) return values or \
         simple geometries. Transformative operations (intersection, union, clip, difference, \
         dissolve) produce a new layer."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "prompt": {
                    "type": "string",
                    "description": "The user request describing the operation, e.g. 'Find all buildings within the bounding box of Rome'."
                },
                "output_layer": {
                    "type": ["string", "null"],
                    "description": "Filename of the layer to create, only for operations producing new data, e.g. clipped_area.tif."
                }
            },
            "required": ["prompt"]
        })
    }

    fn gate_defaults(&self) -> GateDefaults {
        GateDefaults::CONFIRM_OUTPUT
    }

    fn label(&self) -> &str {
        "Geospatial Operation"
    }

    fn inference_rules(&self) -> InferenceRules {
        InferenceRules::new().always_with(
            "output_layer",
            OutputLayer {
                assistant: self.assistant.clone(),
            },
        )
    }

    fn validation_rules(&self) -> ValidationRules {
        ValidationRules::new()
            .rule("prompt", |a, _| a.is_missing("prompt").then(|| "A prompt describing the operation must be provided.".to_string()))
    }

    async fn execute(&self, args: &ToolArgs, ctx: &ToolContext<'_>) -> Result<ToolOutput, ToolError> {
        let extra = args
            .present()
            .filter(|(k, _)| !matches!(k.as_str(), "prompt" | "output_layer"))
            .map(|(k, v)| format!("- {k}: {v}"))
            .collect::<Vec<_>>();
        let extra = if extra.is_empty() {
            String::new()
        } else {
            format!("Additional and useful informations:\n{}", extra.join("\n"))
        };

        let prompt = format!(
            "You are a Python code generator specialized in geospatial operations. Given a user \
             request describing a geospatial data operation, output only valid Python code that \
             produces the requested data.\n\
             Constraints:\n\
             1. Respond with Python code only, no explanations.\n\
             2. Use only geopandas, shapely, pandas, fiona, rasterio, pyproj and numpy.\n\
             3. Base results on your geographic knowledge or on the provided layers (S3 URLs).\n\
             4. If a new layer is required, store the result in the output layer given below.\n\
             5. End with print statements describing the operation and its output.\n\
             6. Do not import os, sys, subprocess or any unsafe module.\n\n\
             User request:\n\"{}\"\n\nOutput layer:\n\"{}\"\n\n\
             You have access to the following layers:\n{}\n\n{extra}",
            args.str("prompt").unwrap_or_default(),
            args.str("output_layer").unwrap_or("None"),
            describe_layers(ctx),
        );
        let code = self
            .assistant
            .ask(AskRole::System, &prompt)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: self.name().to_string(),
                reason: e.to_string(),
            })?;

        Ok(ToolOutput::new(json!({ "generated_code": code })))
    }
}
