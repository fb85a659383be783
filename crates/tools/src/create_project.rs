//! Create-project pipeline tools.
//!
//! Each tool selects one input of a new flood project: the terrain model,
//! the buildings, and optional infiltration, lithology and extra layers.
//! They are only bound through the create-project pipeline, which walks
//! them in order and consolidates their outputs.

use async_trait::async_trait;
use saferplaces_core::error::ToolError;
use saferplaces_core::names;
use saferplaces_core::rules::{InferenceRules, Inferred, ToolArgs, ValidationRules};
use saferplaces_core::tool::{AgentTool, GateDefaults, ToolContext, ToolOutput};
use serde_json::{Value, json};

use crate::geo::{PlaceBoundingBox, file_name, is_remote_or_existing, short_id};
use crate::llm::Assistant;

fn invalid_path(
    field: &'static str,
    what: &'static str,
) -> impl Fn(&ToolArgs, &ToolContext<'_>) -> Option<String> + Send + Sync + 'static {
    move |a: &ToolArgs, _: &ToolContext<'_>| {
        let path = a.str(field)?;
        (!is_remote_or_existing(path))
            .then(|| format!("Invalid {what} path: {path}. It should be a valid file path or None."))
    }
}

fn project_file(ctx: &ToolContext<'_>, kind: &str, source: Option<&str>, ext: &str) -> String {
    let name = match source {
        Some(src) => format!("{kind}-{}", file_name(src)),
        None => format!("{kind}-{}.{ext}", short_id()),
    };
    format!("{}/project/{name}", ctx.project_bucket)
}

// --- DTM -------------------------------------------------------------------

pub struct SelectDtmTool {
    assistant: Assistant,
}

impl SelectDtmTool {
    pub fn new(assistant: Assistant) -> Self {
        Self { assistant }
    }
}

#[async_trait]
impl AgentTool for SelectDtmTool {
    fn name(&self) -> &str {
        names::CREATE_PROJECT_SELECT_DTM_TOOL
    }

    fn description(&self) -> &str {
        "Useful when user wants to select a DTM for a new project. New DTM can be provided by \
         bbox coordinates or a location name plus a CRS (EPSG:4326). Otherwise user can upload a DTM file."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "area": {
                    "description": "Bounding box [min_x, min_y, max_x, max_y] in EPSG:4326, or the name of a country, continent or geographic area. Null if not specified.",
                    "anyOf": [
                        { "type": "string" },
                        { "type": "array", "items": { "type": "number" } },
                        { "type": "null" }
                    ]
                },
                "crs": {
                    "type": ["string", "null"],
                    "description": "EPSG code of the area coordinates, e.g. EPSG:4326. Null if not specified."
                },
                "dtm_file": {
                    "type": ["string", "null"],
                    "description": "Path to a Digital Terrain Model remote file (s3://...). Null if not specified."
                }
            }
        })
    }

    fn label(&self) -> &str {
        "Select DTM"
    }

    fn inference_rules(&self) -> InferenceRules {
        InferenceRules::new().always_with("area", PlaceBoundingBox::new("area", self.assistant.clone()))
    }

    fn validation_rules(&self) -> ValidationRules {
        ValidationRules::new()
            .rule("area", |a, _| match a.array("area") {
                Some(items) if items.len() != 4 => Some(format!(
                    "Invalid area coordinates: {}. It should be a list of 4 float values representing the bounding box [min_x, min_y, max_x, max_y].",
                    Value::Array(items.clone())
                )),
                _ => None,
            })
            .rule("area", |a, _| {
                (a.is_missing("dtm_file") && a.is_missing("area")).then(|| {
                    "Area cordinates or name (and relative output CRS) must be provided if dtm_file is not specified.".to_string()
                })
            })
            .rule("crs", |a, _| {
                let crs = a.str("crs")?;
                (!crs.contains("EPSG")).then(|| format!("Invalid CRS: {crs}. It should be a valid EPSG code or None."))
            })
            .rule("crs", |a, _| {
                (a.is_missing("dtm_file") && a.array("area").is_some() && a.is_missing("crs"))
                    .then(|| "CRS must be provided if area is specified as a list of coordinates.".to_string())
            })
            .rule("dtm_file", invalid_path("dtm_file", "DTM file"))
    }

    async fn execute(&self, args: &ToolArgs, ctx: &ToolContext<'_>) -> Result<ToolOutput, ToolError> {
        let file = project_file(ctx, "dtm", args.str("dtm_file"), "tif");
        Ok(ToolOutput::new(json!({
            "dtm_project_file": file,
            "area": args.get("area"),
            "crs": args.get("crs"),
        })))
    }
}

// --- Buildings -------------------------------------------------------------

pub struct SelectBuildingsTool;

#[async_trait]
impl AgentTool for SelectBuildingsTool {
    fn name(&self) -> &str {
        names::CREATE_PROJECT_SELECT_BUILDINGS_TOOL
    }

    fn description(&self) -> &str {
        "Useful when user wants to select the buildings of a new project. Buildings can be \
         downloaded automatically for the project area or provided as a file."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "do_download": {
                    "type": ["boolean", "null"],
                    "description": "Download buildings for the project area. True when no buildings file is given."
                },
                "buildings_file": {
                    "type": ["string", "null"],
                    "description": "Path to a buildings vector file (s3://...). Null if not specified."
                }
            }
        })
    }

    fn gate_defaults(&self) -> GateDefaults {
        GateDefaults::NONE
    }

    fn label(&self) -> &str {
        "Select Buildings"
    }

    fn inference_rules(&self) -> InferenceRules {
        InferenceRules::new().fill("do_download", |a, _| Ok(Inferred::Value(json!(a.is_missing("buildings_file")))))
    }

    fn validation_rules(&self) -> ValidationRules {
        ValidationRules::new()
            .rule("do_download", |a, _| {
                let value = a.get("do_download")?;
                (!value.is_boolean()).then(|| {
                    format!("Invalid value for do_download: {value}. It should be a boolean value (True or False).")
                })
            })
            .rule("buildings_file", invalid_path("buildings_file", "buildings file"))
            .rule("buildings_file", |a, _| {
                (a.bool("do_download") == Some(true) && !a.is_missing("buildings_file"))
                    .then(|| "No buildings file needs to be provided if do_download is True.".to_string())
            })
            .rule("buildings_file", |a, _| {
                (a.bool("do_download") == Some(false) && a.is_missing("buildings_file"))
                    .then(|| "Buildings file must be provided if do_download is False.".to_string())
            })
    }

    async fn execute(&self, args: &ToolArgs, ctx: &ToolContext<'_>) -> Result<ToolOutput, ToolError> {
        let file = project_file(ctx, "buildings", args.str("buildings_file"), "shp");
        Ok(ToolOutput::new(json!({
            "buildings_project_file": file,
            "downloaded": args.bool("do_download").unwrap_or(true),
        })))
    }
}

// --- Optional project layers -----------------------------------------------

/// A project input that may be skipped: infiltration rate, lithology or
/// any other layer. Without a file the output is `null`.
pub struct OptionalLayerTool {
    name: &'static str,
    label: &'static str,
    description: &'static str,
    input: &'static str,
    output: &'static str,
    kind: &'static str,
}

impl OptionalLayerTool {
    pub fn infiltration() -> Self {
        Self {
            name: names::CREATE_PROJECT_SELECT_INFILTRATION_TOOL,
            label: "Select Infiltration",
            description: "Useful when user wants to provide an infiltration rate file for a new project. The file is optional.",
            input: "infiltration_rate_file",
            output: "infiltration_project_file",
            kind: "infiltration rate file",
        }
    }

    pub fn lithology() -> Self {
        Self {
            name: names::CREATE_PROJECT_SELECT_LITHOLOGY_TOOL,
            label: "Select Lithology",
            description: "Useful when user wants to provide a lithology file for a new project. The file is optional.",
            input: "lithology_file",
            output: "lithology_project_file",
            kind: "lithology file",
        }
    }

    pub fn other_layers() -> Self {
        Self {
            name: names::CREATE_PROJECT_SELECT_OTHER_LAYERS_TOOL,
            label: "Select Other Layers",
            description: "Useful when user wants to add other layers to a new project. The file is optional.",
            input: "other_layers_file",
            output: "other_layers_project_file",
            kind: "other layers file",
        }
    }
}

#[async_trait]
impl AgentTool for OptionalLayerTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        self.description
    }

    fn parameters_schema(&self) -> Value {
        let mut properties = serde_json::Map::new();
        properties.insert(
            self.input.to_string(),
            json!({
                "type": ["string", "null"],
                "description": format!("Path to the {} (s3://...). Null if not specified.", self.kind),
            }),
        );
        json!({ "type": "object", "properties": properties })
    }

    fn gate_defaults(&self) -> GateDefaults {
        GateDefaults::NONE
    }

    fn label(&self) -> &str {
        self.label
    }

    fn validation_rules(&self) -> ValidationRules {
        ValidationRules::new().rule(self.input, invalid_path(self.input, self.kind))
    }

    async fn execute(&self, args: &ToolArgs, ctx: &ToolContext<'_>) -> Result<ToolOutput, ToolError> {
        let file = args
            .str(self.input)
            .map(|src| project_file(ctx, self.output.trim_end_matches("_project_file"), Some(src), "shp"));
        let mut content = serde_json::Map::new();
        content.insert(self.output.to_string(), json!(file));
        Ok(ToolOutput::new(Value::Object(content)))
    }
}
