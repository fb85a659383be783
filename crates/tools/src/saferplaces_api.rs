//! Tools backed by the SaferPlaces process API: digital twin, flood
//! simulation (SaferRain) and flooded-buildings analysis (SaferBuildings).

use async_trait::async_trait;
use saferplaces_core::error::ToolError;
use saferplaces_core::names;
use saferplaces_core::rules::{InferenceRules, Inferred, ToolArgs, ValidationRules};
use saferplaces_core::state::{LayerDescriptor, LayerType};
use saferplaces_core::tool::{AgentTool, ToolContext, ToolOutput};
use serde_json::{Map, Value, json};
use tracing::info;

use crate::geo::{PlaceBoundingBox, bbox_from_value, layer_src, output_path, short_id};
use crate::llm::Assistant;
use crate::remote::{ProcessClient, unexpected_response};

const API: &str = "SaferPlaces";

/// Replace a layer title with that layer's `src`.
fn resolve_layer(field: &'static str) -> impl Fn(&ToolArgs, &ToolContext<'_>) -> Result<Inferred, ToolError> + Send + Sync + 'static {
    move |a: &ToolArgs, ctx: &ToolContext<'_>| {
        Ok(match a.str(field).and_then(|r| layer_src(ctx, r)) {
            Some(src) => Inferred::Value(json!(src)),
            None => Inferred::Keep,
        })
    }
}

fn required(field: &'static str, what: &'static str) -> impl Fn(&ToolArgs, &ToolContext<'_>) -> Option<String> + Send + Sync + 'static {
    move |a: &ToolArgs, _: &ToolContext<'_>| a.is_missing(field).then(|| format!("{what} must be provided."))
}

/// Layer updates for the files of a response that the session does not know yet.
fn new_layers(ctx: &ToolContext<'_>, layers: impl IntoIterator<Item = LayerDescriptor>) -> Vec<LayerDescriptor> {
    layers.into_iter().filter(|l| ctx.state.layer(&l.src).is_none()).collect()
}

// ---------------------------------------------------------------------------
// Digital twin
// ---------------------------------------------------------------------------

/// Output files of the digital twin process and how each one is registered.
const TWIN_FILES: [(&str, &str, LayerType); 5] = [
    ("file_dem", "Digital Twin DEM", LayerType::Raster),
    ("file_building", "Digital Twin Buildings", LayerType::Vector),
    ("file_landuse", "Digital Twin Land Use", LayerType::Raster),
    ("file_dem_building", "Digital Twin DEM + Buildings", LayerType::Raster),
    ("file_seamask", "Digital Twin Sea Mask", LayerType::Raster),
];

pub struct DigitalTwinTool {
    client: ProcessClient,
    assistant: Assistant,
}

impl DigitalTwinTool {
    pub fn new(client: ProcessClient, assistant: Assistant) -> Self {
        Self { client, assistant }
    }
}

#[async_trait]
impl AgentTool for DigitalTwinTool {
    fn name(&self) -> &str {
        names::DIGITAL_TWIN_TOOL
    }

    fn description(&self) -> &str {
        "Generate a geospatial Digital Twin for an Area of Interest: a DEM/DTM raster, building \
         footprints, land use, a DEM with buildings burned in and a sea mask, all aligned and \
         clipped to the area. It is typically the first step of a workflow; its layers feed the \
         flood simulation and building analysis tools."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "bbox": {
                    "description": "Area of interest in EPSG:4326, as {west, south, east, north}, a [min_x, min_y, max_x, max_y] list, or a place name.",
                    "anyOf": [
                        { "type": "object", "properties": {
                            "west": { "type": "number" }, "south": { "type": "number" },
                            "east": { "type": "number" }, "north": { "type": "number" }
                        } },
                        { "type": "array", "items": { "type": "number" } },
                        { "type": "string" }
                    ]
                },
                "dataset_dem": {
                    "type": ["string", "null"],
                    "description": "Elevation dataset, e.g. GECOSISTEMA/ITALY, IGN/RGE_ALTI/1M, COPERNICUS/EUDEM. Leave null to let the service pick the best one for the area."
                },
                "dataset_building": {
                    "type": "string",
                    "description": "Building footprints provider. Defaults to OSM/BUILDINGS."
                },
                "dataset_land_use": {
                    "type": "string",
                    "description": "Land-use dataset. Defaults to ESA/WorldCover/v100."
                },
                "pixelsize": {
                    "type": ["number", "null"],
                    "description": "DEM resolution in meters. Prefer null to keep the native resolution."
                }
            },
            "required": ["bbox"]
        })
    }

    fn label(&self) -> &str {
        "Digital Twin"
    }

    fn inference_rules(&self) -> InferenceRules {
        InferenceRules::new()
            .always_with("bbox", PlaceBoundingBox::new("bbox", self.assistant.clone()))
            .fill("dataset_building", |_, _| Ok(Inferred::Value(json!("OSM/BUILDINGS"))))
            .fill("dataset_land_use", |_, _| Ok(Inferred::Value(json!("ESA/WorldCover/v100"))))
    }

    fn validation_rules(&self) -> ValidationRules {
        ValidationRules::new()
            .rule("bbox", required("bbox", "Area of interest"))
            .rule("bbox", |a, _| {
                let value = a.get("bbox")?;
                bbox_from_value(value).is_none().then(|| {
                    format!("Invalid bbox: {value}. It should be {{west, south, east, north}} in EPSG:4326.")
                })
            })
            .rule("pixelsize", |a, _| {
                let value = a.get("pixelsize")?;
                value
                    .as_f64()
                    .is_none_or(|p| p <= 0.0)
                    .then(|| format!("Invalid pixelsize: {value}. It should be a positive number of meters."))
            })
    }

    async fn execute(&self, args: &ToolArgs, ctx: &ToolContext<'_>) -> Result<ToolOutput, ToolError> {
        let bbox = args
            .get("bbox")
            .and_then(bbox_from_value)
            .ok_or_else(|| ToolError::InvalidArguments("bbox is not a bounding box".into()))?;

        let mut inputs = args.as_map().clone();
        inputs.insert(
            "bbox".into(),
            json!({"west": bbox[0], "south": bbox[1], "east": bbox[2], "north": bbox[3]}),
        );
        inputs.insert("workspace".into(), json!(ctx.project_bucket));
        inputs.insert(
            "project".into(),
            json!(ctx.state.project_id.clone().unwrap_or_else(|| format!("digital-twin-tool-{}", short_id()))),
        );

        let response = match self.client.execute("digital-twin-process", &inputs).await {
            Ok(response) => response,
            Err(e) => return Ok(e.into_output("Digital Twin", self.label())),
        };
        let Some(files) = response.get("files").and_then(Value::as_object) else {
            return Ok(unexpected_response("Digital Twin", self.label(), &response));
        };

        let layers = TWIN_FILES.iter().filter_map(|(key, title, layer_type)| {
            let src = files.get(*key)?.as_str()?;
            Some(
                LayerDescriptor::new(*title, src, *layer_type)
                    .with_description(format!("{title} generated by {API} API")),
            )
        });
        let mut output = ToolOutput::new(response.clone());
        for layer in new_layers(ctx, layers) {
            output = output.with_layer(layer);
        }
        info!(files = files.len(), "digital twin ready");
        Ok(output)
    }
}

// ---------------------------------------------------------------------------
// SaferRain
// ---------------------------------------------------------------------------

pub struct SaferRainTool {
    client: ProcessClient,
}

impl SaferRainTool {
    pub fn new(client: ProcessClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AgentTool for SaferRainTool {
    fn name(&self) -> &str {
        names::SAFER_RAIN_TOOL
    }

    fn description(&self) -> &str {
        "Run a flood simulation from a Digital Elevation Model and a rainfall input. Rainfall is \
         either a constant amount in millimeters applied over the whole DEM, or a rainfall raster; \
         the bands of a multiband raster are time steps summed from `band` to `to_band`. Inputs \
         can reference project layers by their src or title. The output is a water-depth raster."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "dem": {
                    "type": "string",
                    "description": "DEM GeoTIFF: URL, s3:// URI, or the src/title of a project raster layer."
                },
                "rain": {
                    "description": "Uniform rainfall in millimeters, or a rainfall raster (URL, s3:// URI, or project layer).",
                    "anyOf": [{ "type": "number" }, { "type": "string" }]
                },
                "water": {
                    "type": ["string", "null"],
                    "description": "Destination of the water depth raster. Leave null to let the tool choose."
                },
                "band": { "type": "integer", "description": "First rainfall band (1-based). Defaults to 1." },
                "to_band": { "type": "integer", "description": "Last rainfall band, inclusive. Defaults to 1." },
                "t_srs": { "type": ["string", "null"], "description": "Output spatial reference, e.g. EPSG:32633. Defaults to the DEM CRS." },
                "mode": { "type": "string", "enum": ["lambda", "batch"], "description": "Execution backend." }
            },
            "required": ["dem", "rain"]
        })
    }

    fn label(&self) -> &str {
        "Safer Rain"
    }

    fn inference_rules(&self) -> InferenceRules {
        InferenceRules::new()
            .always("dem", resolve_layer("dem"))
            .always("rain", resolve_layer("rain"))
            .always("water", |a, ctx| {
                let water = output_path(ctx.project_bucket, "saferrain-out", a.str("water"), || {
                    format!("water-depth-{}.tif", short_id())
                });
                Ok(Inferred::Value(json!(water)))
            })
            .fill("band", |_, _| Ok(Inferred::Value(json!(1))))
            .fill("to_band", |_, _| Ok(Inferred::Value(json!(1))))
            .always("mode", |_, _| Ok(Inferred::Value(json!("lambda"))))
    }

    fn validation_rules(&self) -> ValidationRules {
        ValidationRules::new()
            .rule("dem", required("dem", "DEM"))
            .rule("rain", required("rain", "Rainfall"))
            .rule("rain", |a, _| {
                let mm = a.get("rain")?.as_f64()?;
                (mm <= 0.0).then(|| format!("Invalid rainfall: {mm}. It should be a positive amount of millimeters."))
            })
            .rule("band", |a, _| {
                let band = a.get("band")?;
                band.as_i64()
                    .is_none_or(|b| b < 1)
                    .then(|| format!("Invalid band: {band}. It should be a 1-based band index."))
            })
            .rule("to_band", |a, _| {
                let (band, to_band) = (a.i64("band").unwrap_or(1), a.i64("to_band")?);
                (to_band < band)
                    .then(|| format!("Invalid to_band: {to_band}. It should not be lower than band ({band})."))
            })
    }

    async fn execute(&self, args: &ToolArgs, ctx: &ToolContext<'_>) -> Result<ToolOutput, ToolError> {
        let response = match self.client.execute("safer-rain-process", args.as_map()).await {
            Ok(response) => response,
            Err(e) => return Ok(e.into_output("Safer Rain", self.label())),
        };
        let Some(water) = response.get("water_depth_file").and_then(Value::as_str) else {
            return Ok(unexpected_response("Safer Rain", self.label(), &response));
        };

        let used = args
            .present()
            .filter(|(k, _)| k.as_str() != "water")
            .map(|(k, v)| format!("{k}: {}", display(v)))
            .collect::<Vec<_>>()
            .join(", ");
        let mut metadata = Map::new();
        metadata.insert("nodata".into(), json!("nan"));
        metadata.insert("colormap_name".into(), json!("blues"));
        let layer = LayerDescriptor::new("SaferRain Output", water, LayerType::Raster)
            .with_description(format!(
                "SaferRain output file with flooding waterdepth from this inputs: ({used})"
            ))
            .with_metadata(metadata);

        let mut output = ToolOutput::new(response.clone());
        for layer in new_layers(ctx, [layer]) {
            output = output.with_layer(layer);
        }
        Ok(output)
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// SaferBuildings
// ---------------------------------------------------------------------------

pub const FLOOD_MODES: [&str; 3] = ["BUFFER", "IN-AREA", "ALL"];

pub struct SaferBuildingsTool {
    client: ProcessClient,
}

impl SaferBuildingsTool {
    pub fn new(client: ProcessClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AgentTool for SaferBuildingsTool {
    fn name(&self) -> &str {
        names::SAFERBUILDINGS_TOOL
    }

    fn description(&self) -> &str {
        "Identify flooded buildings from a water depth raster. Buildings come from a file or a \
         provider (OSM, OVERTURE, RER-REST/*). Depths at or above `wd_thresh` meters count as \
         flooded. Optionally computes per-building statistics and a summary by building class."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "water": { "type": "string", "description": "Water depth raster, e.g. a SaferRain output layer." },
                "buildings": { "type": ["string", "null"], "description": "Buildings vector file. Leave null to use `provider`." },
                "provider": { "type": ["string", "null"], "description": "Buildings provider: OSM, OVERTURE, RER-REST/*." },
                "wd_thresh": { "type": "number", "description": "Flood depth threshold in meters. Defaults to 0.5." },
                "flood_mode": { "type": "string", "enum": ["BUFFER", "IN-AREA", "ALL"], "description": "How buildings are matched to flooded cells. Defaults to BUFFER." },
                "bbox": { "type": ["array", "null"], "items": { "type": "number" }, "description": "Optional clip box [min_x, min_y, max_x, max_y]." },
                "t_srs": { "type": ["string", "null"], "description": "Output spatial reference." },
                "filters": { "description": "Attribute filters on buildings." },
                "out": { "type": ["string", "null"], "description": "Destination file. Leave null to let the tool choose." },
                "only_flood": { "type": "boolean", "description": "Return flooded buildings only." },
                "stats": { "type": "boolean", "description": "Compute per-building water depth statistics." },
                "summary": { "type": "boolean", "description": "Aggregate statistics by building class." },
                "summary_on": { "description": "Attribute(s) used for the summary." }
            },
            "required": ["water"]
        })
    }

    fn label(&self) -> &str {
        "SaferBuildings"
    }

    fn inference_rules(&self) -> InferenceRules {
        InferenceRules::new()
            .always("water", resolve_layer("water"))
            .always("buildings", resolve_layer("buildings"))
            .fill("wd_thresh", |_, _| Ok(Inferred::Value(json!(0.5))))
            .fill("flood_mode", |_, _| Ok(Inferred::Value(json!("BUFFER"))))
            .always("out", |a, ctx| {
                let out = output_path(ctx.project_bucket, "saferbuildings-out", a.str("out"), || {
                    format!("buildings-{}.gpkg", short_id())
                });
                Ok(Inferred::Value(json!(out)))
            })
    }

    fn validation_rules(&self) -> ValidationRules {
        ValidationRules::new()
            .rule("water", required("water", "Water depth file"))
            .rule("wd_thresh", |a, _| {
                let value = a.get("wd_thresh")?;
                value
                    .as_f64()
                    .is_none_or(|t| t < 0.0)
                    .then(|| format!("Invalid wd_thresh: {value}. It should be a non-negative depth in meters."))
            })
            .rule("flood_mode", |a, _| {
                let mode = a.str("flood_mode")?;
                (!FLOOD_MODES.contains(&mode))
                    .then(|| format!("Invalid flood_mode: {mode}. It should be one of {}.", FLOOD_MODES.join(", ")))
            })
            .rule("bbox", |a, _| {
                let value = a.get("bbox")?;
                bbox_from_value(value)
                    .is_none()
                    .then(|| format!("Invalid bbox: {value}. It should be a list of 4 float values."))
            })
    }

    async fn execute(&self, args: &ToolArgs, ctx: &ToolContext<'_>) -> Result<ToolOutput, ToolError> {
        let response = match self.client.execute("safer-buildings-process", args.as_map()).await {
            Ok(response) => response,
            Err(e) => return Ok(e.into_output("SaferBuildings", self.label())),
        };
        if !response.is_object() || response.get("error").is_some() {
            return Ok(unexpected_response("SaferBuildings", self.label(), &response));
        }

        let src = response
            .get("file")
            .and_then(Value::as_str)
            .or_else(|| args.str("out"))
            .unwrap_or_default()
            .to_string();
        let layer = LayerDescriptor::new("SaferBuildings Output", &src, LayerType::Vector)
            .with_description(format!(
                "Buildings flooded by {}",
                args.str("water").unwrap_or("the given water depth")
            ));

        let mut output = ToolOutput::new(response.clone());
        if !src.is_empty() {
            for layer in new_layers(ctx, [layer]) {
                output = output.with_layer(layer);
            }
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedProvider;
    use crate::remote::testing::serve;
    use saferplaces_core::state::ConversationState;
    use saferplaces_core::tool::{Invocation, ToolGate, invoke};
    use std::sync::Arc;

    async fn run(tool: &dyn AgentTool, state: &ConversationState, args: ToolArgs) -> ToolOutput {
        let ctx = ToolContext::new(state, "s3://bucket/user==u/project==p");
        let mut gate = ToolGate::new(tool.gate_defaults());
        gate.confirm_execution();
        match invoke(tool, args, &mut gate, &ctx).await {
            Invocation::Completed(outcome) => outcome.output,
            Invocation::Suspended(i) => panic!("unexpected interrupt: {}", i.content),
        }
    }

    #[tokio::test]
    async fn safer_rain_registers_water_depth_layer() {
        let (config, seen) = serve(200, json!({"water_depth_file": "s3://bucket/wd.tif"})).await;
        let tool = SaferRainTool::new(ProcessClient::new(&config));
        let state = ConversationState::default();
        let out = run(&tool, &state, ToolArgs::new().with("dem", "s3://b/dem.tif").with("rain", 50)).await;

        assert!(!out.is_error());
        let layer = &out.updates.layer_registry[0];
        assert_eq!(layer.title, "SaferRain Output");
        assert_eq!(layer.src, "s3://bucket/wd.tif");
        assert_eq!(layer.layer_type, LayerType::Raster);
        assert_eq!(layer.metadata.as_ref().unwrap()["colormap_name"], "blues");
        assert!(!layer.description.as_ref().unwrap().contains("water:"));

        let body = &seen.lock().unwrap()[0]["inputs"];
        assert!(
            body["water"]
                .as_str()
                .unwrap()
                .starts_with("s3://bucket/user==u/project==p/saferrain-out/water-depth-")
        );
        assert_eq!(body["mode"], "lambda");
    }

    #[tokio::test]
    async fn safer_rain_resolves_layer_titles() {
        let (config, seen) = serve(200, json!({"water_depth_file": "s3://bucket/wd.tif"})).await;
        let tool = SaferRainTool::new(ProcessClient::new(&config));
        let mut state = ConversationState::default();
        state
            .layer_registry
            .push(LayerDescriptor::new("Rome DTM", "s3://b/rome.tif", LayerType::Raster));
        run(&tool, &state, ToolArgs::new().with("dem", "Rome DTM").with("rain", 20)).await;
        assert_eq!(seen.lock().unwrap()[0]["inputs"]["dem"], "s3://b/rome.tif");
    }

    #[tokio::test]
    async fn safer_rain_known_output_is_not_registered_twice() {
        let (config, _) = serve(200, json!({"water_depth_file": "s3://bucket/wd.tif"})).await;
        let tool = SaferRainTool::new(ProcessClient::new(&config));
        let mut state = ConversationState::default();
        state
            .layer_registry
            .push(LayerDescriptor::new("SaferRain Output", "s3://bucket/wd.tif", LayerType::Raster));
        let out = run(&tool, &state, ToolArgs::new().with("dem", "s3://b/dem.tif").with("rain", 50)).await;
        assert!(out.updates.layer_registry.is_empty());
    }

    #[tokio::test]
    async fn safer_rain_http_failure_asks_router_to_explain() {
        let (config, _) = serve(500, json!({"detail": "out of memory"})).await;
        let tool = SaferRainTool::new(ProcessClient::new(&config));
        let state = ConversationState::default();
        let out = run(&tool, &state, ToolArgs::new().with("dem", "s3://b/dem.tif").with("rain", 50)).await;

        let error = out.error_message().unwrap();
        assert!(error.starts_with("Failed to execute Safer Rain API: 500 - "));
        assert!(error.contains("out of memory"));
        assert!(out.updates.layer_registry.is_empty());
        assert!(out.updates.messages[0].content.contains("Safer Rain tool"));
    }

    #[tokio::test]
    async fn safer_rain_missing_key_is_unexpected() {
        let (config, _) = serve(200, json!({"status": "accepted"})).await;
        let tool = SaferRainTool::new(ProcessClient::new(&config));
        let state = ConversationState::default();
        let out = run(&tool, &state, ToolArgs::new().with("dem", "s3://b/dem.tif").with("rain", 50)).await;
        assert!(out.error_message().unwrap().starts_with("Unexpected response from Safer Rain API"));
    }

    #[tokio::test]
    async fn digital_twin_registers_every_returned_file() {
        let (config, seen) = serve(
            200,
            json!({"files": {
                "file_dem": "s3://b/dem.tif",
                "file_building": "s3://b/buildings.shp",
                "file_seamask": "s3://b/sea.tif"
            }}),
        )
        .await;
        let provider = Arc::new(ScriptedProvider::new(&[]));
        let tool = DigitalTwinTool::new(ProcessClient::new(&config), Assistant::new(provider, "m"));
        let state = ConversationState::default();
        let out = run(&tool, &state, ToolArgs::new().with("bbox", json!([12.2, 44.0, 12.6, 44.1]))).await;

        let titles: Vec<_> = out.updates.layer_registry.iter().map(|l| l.title.as_str()).collect();
        assert_eq!(titles, ["Digital Twin DEM", "Digital Twin Buildings", "Digital Twin Sea Mask"]);
        assert_eq!(out.updates.layer_registry[1].layer_type, LayerType::Vector);

        let body = &seen.lock().unwrap()[0]["inputs"];
        assert_eq!(body["bbox"]["west"], 12.2);
        assert_eq!(body["dataset_building"], "OSM/BUILDINGS");
        assert_eq!(body["workspace"], "s3://bucket/user==u/project==p");
    }

    #[tokio::test]
    async fn saferbuildings_defaults_and_output_layer() {
        let (config, seen) = serve(200, json!({"n_flooded": 12})).await;
        let tool = SaferBuildingsTool::new(ProcessClient::new(&config));
        let state = ConversationState::default();
        let out = run(&tool, &state, ToolArgs::new().with("water", "s3://b/wd.tif")).await;

        assert_eq!(out.content["n_flooded"], 12);
        let body = &seen.lock().unwrap()[0]["inputs"];
        assert_eq!(body["wd_thresh"], 0.5);
        assert_eq!(body["flood_mode"], "BUFFER");
        let out_path = body["out"].as_str().unwrap();
        assert!(out_path.starts_with("s3://bucket/user==u/project==p/saferbuildings-out/"));
        assert_eq!(out.updates.layer_registry[0].src, out_path);
    }

    #[test]
    fn saferbuildings_rejects_unknown_flood_mode() {
        let tool = SaferBuildingsTool::new(ProcessClient::new(&saferplaces_config::ProcessApiConfig {
            root: "http://localhost:5000".into(),
            user: None,
            token: None,
            timeout_secs: 5,
        }));
        let state = ConversationState::default();
        let ctx = ToolContext::new(&state, "s3://b");
        let args = ToolArgs::new().with("water", "s3://b/wd.tif").with("flood_mode", "NEARBY");
        assert!(tool.validation_rules().validate(&args, &ctx).unwrap().starts_with("Invalid flood_mode"));
    }
}
