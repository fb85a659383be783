//! Tools backed by the SaferCast process API: DPC radar/satellite products
//! and the ICON-2I forecast model.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Timelike, Utc};
use saferplaces_core::error::ToolError;
use saferplaces_core::names;
use saferplaces_core::rules::{InferenceRules, Inferred, ToolArgs, ValidationRules};
use saferplaces_core::state::{LayerDescriptor, LayerType};
use saferplaces_core::tool::{AgentTool, ToolContext, ToolOutput};
use serde_json::{Map, Value, json};

use crate::geo::{BBox, bbox_from_value};
use crate::remote::{ProcessClient, unexpected_response};

pub const DPC_PRODUCTS: [&str; 21] = [
    "VMI", "SRI", "SRT1", "SRT3", "SRT6", "SRT12", "SRT24", "IR108", "TEMP", "LTG", "AMV", "HRD",
    "RADAR_STATUS", "CAPPI1", "CAPPI2", "CAPPI3", "CAPPI4", "CAPPI5", "CAPPI6", "CAPPI7", "CAPPI8",
];

/// Coverage of DPC products: `[west, south, east, north]` in EPSG:4326.
pub const DPC_BOUNDS: BBox = [4.5233915, 35.0650858, 20.4766085, 47.8489892];

/// DPC publishes with a delay; nothing newer than this is available.
const DPC_DELAY_MINUTES: i64 = 10;
const DPC_LOOKBACK_DAYS: i64 = 7;

pub const ICON2I_VARIABLES: [&str; 9] = [
    "dewpoint_temperature",
    "pressure_reduced_to_msl",
    "snow_depth_water_equivalent",
    "temperature",
    "temperature_g",
    "total_cloud_cover",
    "total_precipitation",
    "u_wind_component",
    "v_wind_component",
];

const ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Parse an ISO 8601 timestamp, with or without an offset, as UTC.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(dt.and_utc());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M") {
        return Some(dt.and_utc());
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.format(ISO_FORMAT).to_string()
}

fn hour_floor(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.with_minute(0)
        .and_then(|d| d.with_second(0))
        .and_then(|d| d.with_nanosecond(0))
        .unwrap_or(dt)
}

fn bbox_object(bbox: BBox) -> Value {
    json!({"west": bbox[0], "south": bbox[1], "east": bbox[2], "north": bbox[3]})
}

fn range_pair(args: &ToolArgs, key: &str) -> Option<(f64, f64)> {
    match args.array(key)?.as_slice() {
        [a, b] => Some((a.as_f64()?, b.as_f64()?)),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// DPC retriever
// ---------------------------------------------------------------------------

pub struct DpcRetrieverTool {
    client: ProcessClient,
}

impl DpcRetrieverTool {
    pub fn new(client: ProcessClient) -> Self {
        Self { client }
    }
}

/// One end of the query window: the given value, else the matching end of
/// `time_range`, else `default`. Never later than the DPC publication delay.
fn dpc_time(args: &ToolArgs, now: DateTime<Utc>, field: &str, index: usize, default: DateTime<Utc>) -> Result<Inferred, ToolError> {
    let given = args
        .str(field)
        .or_else(|| args.array("time_range").and_then(|r| r.get(index)).and_then(Value::as_str));
    let time = match given {
        Some(text) => match parse_timestamp(text) {
            Some(time) => time,
            // Left for validation to report.
            None => return Ok(Inferred::Keep),
        },
        None => default,
    };
    let latest = now - Duration::minutes(DPC_DELAY_MINUTES);
    Ok(Inferred::Value(json!(format_timestamp(time.min(latest)))))
}

fn dpc_time_rules(field: &'static str) -> impl Fn(&ToolArgs, &ToolContext<'_>) -> Option<String> + Send + Sync + 'static {
    move |a: &ToolArgs, ctx: &ToolContext<'_>| {
        let text = a.str(field)?;
        let Some(time) = parse_timestamp(text) else {
            return Some(format!("Invalid {field}: {text}. It should be an ISO8601 timestamp."));
        };
        if time < ctx.now - Duration::days(DPC_LOOKBACK_DAYS) {
            return Some(format!("Invalid {field}: {text}. It should be inside last 7 days."));
        }
        if field == "time_end" {
            let start = a.str("time_start").and_then(parse_timestamp);
            if start.is_some_and(|start| time <= start) {
                return Some(format!("Invalid {field}: {text}. It should be after time_start."));
            }
        }
        (time > ctx.now).then(|| format!("Invalid {field}: {text}. It should be before current time."))
    }
}

#[async_trait]
impl AgentTool for DpcRetrieverTool {
    fn name(&self) -> &str {
        names::DPC_RETRIEVER_TOOL
    }

    fn description(&self) -> &str {
        "Retrieve meteorological products of the Italian Civil Protection Department (DPC) for an \
         area and a time window within the last 7 days: rainfall intensity (SRI), reflectivity \
         (VMI), cumulative precipitation (SRT1/3/6/12/24), cloud cover (IR108), temperature \
         (TEMP), lightning (LTG), upper-level winds (AMV), radar status and CAPPI levels."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "product": { "type": "string", "enum": DPC_PRODUCTS, "description": "DPC product code." },
                "bbox": {
                    "type": ["object", "null"],
                    "description": format!(
                        "Extent in EPSG:4326 as {{west, south, east, north}}. Full coverage is {}.",
                        bbox_object(DPC_BOUNDS)
                    )
                },
                "lat_range": { "type": ["array", "null"], "items": { "type": "number" }, "description": "Fallback for bbox: [lat_min, lat_max]." },
                "long_range": { "type": ["array", "null"], "items": { "type": "number" }, "description": "Fallback for bbox: [lon_min, lon_max]." },
                "time_start": { "type": ["string", "null"], "description": "Window start, ISO8601, e.g. 2025-09-18T00:00:00Z." },
                "time_end": { "type": ["string", "null"], "description": "Window end, ISO8601, after time_start." },
                "time_range": { "type": ["array", "null"], "items": { "type": "string" }, "description": "Fallback for time_start/time_end: [start, end]." }
            },
            "required": ["product"]
        })
    }

    fn label(&self) -> &str {
        "DPC Retriever"
    }

    fn inference_rules(&self) -> InferenceRules {
        InferenceRules::new()
            .fill("bbox", |a, _| {
                Ok(match (range_pair(a, "lat_range"), range_pair(a, "long_range")) {
                    (Some((south, north)), Some((west, east))) => {
                        Inferred::Value(bbox_object([west, south, east, north]))
                    }
                    _ => Inferred::Keep,
                })
            })
            .always("bbox", |a, _| {
                Ok(match a.get("bbox").and_then(bbox_from_value) {
                    Some(bbox) => Inferred::Value(bbox_object(bbox)),
                    None => Inferred::Keep,
                })
            })
            .always("time_start", |a, ctx| {
                let default = hour_floor(ctx.now) - Duration::hours(1);
                dpc_time(a, ctx.now, "time_start", 0, default)
            })
            .always("time_end", |a, ctx| dpc_time(a, ctx.now, "time_end", 1, hour_floor(ctx.now)))
            .always("bucket_destination", |_, ctx| {
                Ok(Inferred::Value(json!(format!("{}/dpc-out", ctx.project_bucket.trim_end_matches('/')))))
            })
    }

    fn validation_rules(&self) -> ValidationRules {
        ValidationRules::new()
            .rule("product", |a, _| {
                let product = a.get("product").cloned().unwrap_or(Value::Null);
                (!DPC_PRODUCTS.iter().any(|p| product.as_str() == Some(p))).then(|| {
                    format!(
                        "Invalid product name: {product}. It should be one of [{}].",
                        DPC_PRODUCTS.join(", ")
                    )
                })
            })
            .rule("bbox", |a, _| {
                a.is_missing("bbox")
                    .then(|| "You must provide either `bbox` or both `lat_range` and `long_range`.".to_string())
            })
            .rule("bbox", |a, _| {
                let value = a.get("bbox")?;
                let Some(bbox) = bbox_from_value(value) else {
                    return Some(format!("Invalid bbox: {value}. It should be {{west, south, east, north}}."));
                };
                let outside = bbox[0] < DPC_BOUNDS[0]
                    || bbox[1] < DPC_BOUNDS[1]
                    || bbox[2] > DPC_BOUNDS[2]
                    || bbox[3] > DPC_BOUNDS[3];
                outside.then(|| {
                    format!(
                        "Invalid bbox: {value}. It should be inside the DPC bounding box {}.",
                        bbox_object(DPC_BOUNDS)
                    )
                })
            })
            .rule("time_start", dpc_time_rules("time_start"))
            .rule("time_end", dpc_time_rules("time_end"))
    }

    async fn execute(&self, args: &ToolArgs, ctx: &ToolContext<'_>) -> Result<ToolOutput, ToolError> {
        let bbox = args
            .get("bbox")
            .and_then(bbox_from_value)
            .ok_or_else(|| ToolError::InvalidArguments("bbox is not a bounding box".into()))?;
        let product = args.str("product").unwrap_or_default();
        let start = args.str("time_start").unwrap_or_default();
        let end = args.str("time_end").unwrap_or_default();

        let mut inputs = Map::new();
        inputs.insert("product".into(), json!(product));
        inputs.insert("lat_range".into(), json!([bbox[1], bbox[3]]));
        inputs.insert("long_range".into(), json!([bbox[0], bbox[2]]));
        inputs.insert("time_range".into(), json!([start, end]));
        inputs.insert("bucket_destination".into(), json!(args.get("bucket_destination")));

        let response = match self.client.execute("dpc-retriever-process", &inputs).await {
            Ok(response) => response,
            Err(e) => return Ok(e.into_output("DPC Retriever", self.label())),
        };
        let Some(uri) = response.get("uri").and_then(Value::as_str) else {
            return Ok(unexpected_response("DPC Retriever", self.label(), &response));
        };

        let mut output = ToolOutput::new(response.clone());
        if ctx.state.layer(uri).is_none() {
            output = output.with_layer(
                LayerDescriptor::new(format!("DPC_{product}"), uri, LayerType::Raster).with_description(format!(
                    "DPC {product} data for bbox {} from {start} to {end}",
                    bbox_object(bbox)
                )),
            );
        }
        Ok(output)
    }
}

// ---------------------------------------------------------------------------
// ICON-2I
// ---------------------------------------------------------------------------

/// The latest 00:00 or 12:00 forecast run at or before `now`.
pub fn last_forecast_run(now: DateTime<Utc>) -> DateTime<Utc> {
    let run_hour = if now.hour() >= 12 { 12 } else { 0 };
    let hour = hour_floor(now);
    hour - Duration::hours(i64::from(hour.hour() - run_hour))
}

fn is_forecast_run(text: &str) -> bool {
    parse_timestamp(text).is_some_and(|t| matches!(t.hour(), 0 | 12) && t.minute() == 0 && t.second() == 0)
}

fn variable_rule(allowed: &'static [&'static str]) -> impl Fn(&ToolArgs, &ToolContext<'_>) -> Option<String> + Send + Sync + 'static {
    move |a: &ToolArgs, _: &ToolContext<'_>| {
        let variable = a.get("variable").cloned().unwrap_or(Value::Null);
        (!allowed.iter().any(|v| variable.as_str() == Some(v))).then(|| {
            format!(
                "Invalid variable: {variable}. It should be one of the following: {}.",
                allowed.join(", ")
            )
        })
    }
}

pub struct Icon2iIngestorTool {
    client: ProcessClient,
}

impl Icon2iIngestorTool {
    pub fn new(client: ProcessClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AgentTool for Icon2iIngestorTool {
    fn name(&self) -> &str {
        names::ICON2I_INGESTOR_TOOL
    }

    fn description(&self) -> &str {
        "Ingest a variable of the ICON-2I forecast model for one or more forecast runs and store \
         it in the project bucket."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "variable": { "type": "string", "enum": ICON2I_VARIABLES, "description": "Forecast variable." },
                "forecast_run": {
                    "description": "Forecast run(s), ISO8601 with hour 00:00:00 or 12:00:00. Defaults to the latest run.",
                    "anyOf": [{ "type": "string" }, { "type": "array", "items": { "type": "string" } }]
                }
            },
            "required": ["variable"]
        })
    }

    fn label(&self) -> &str {
        "ICON2I Ingestor"
    }

    fn inference_rules(&self) -> InferenceRules {
        InferenceRules::new()
            .fill("forecast_run", |_, ctx| {
                Ok(Inferred::Value(json!(format_timestamp(last_forecast_run(ctx.now)))))
            })
            .always("bucket_destination", |_, ctx| {
                Ok(Inferred::Value(json!(format!("{}/icon2i-out", ctx.project_bucket.trim_end_matches('/')))))
            })
    }

    fn validation_rules(&self) -> ValidationRules {
        ValidationRules::new()
            .rule("variable", variable_rule(&ICON2I_VARIABLES))
            .rule("forecast_run", |a, _| {
                let value = a.get("forecast_run")?;
                let runs: Vec<&Value> = match value {
                    Value::Array(items) => items.iter().collect(),
                    other => vec![other],
                };
                let valid = runs.iter().all(|r| r.as_str().is_some_and(is_forecast_run));
                (!valid).then(|| {
                    format!("Invalid forecast_run: {value}. It should be an ISO8601 date with hour 00:00:00 or 12:00:00.")
                })
            })
    }

    async fn execute(&self, args: &ToolArgs, _ctx: &ToolContext<'_>) -> Result<ToolOutput, ToolError> {
        match self.client.execute("icon2i-ingestor-process", args.as_map()).await {
            Ok(response) if response.is_object() => Ok(ToolOutput::new(response)),
            Ok(response) => Ok(unexpected_response("ICON2I Ingestor", self.label(), &response)),
            Err(e) => Ok(e.into_output("ICON2I Ingestor", self.label())),
        }
    }
}

pub struct Icon2iRetrieverTool {
    client: ProcessClient,
}

impl Icon2iRetrieverTool {
    pub fn new(client: ProcessClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AgentTool for Icon2iRetrieverTool {
    fn name(&self) -> &str {
        names::ICON2I_RETRIEVER_TOOL
    }

    fn description(&self) -> &str {
        "Retrieve a subset of ICON-2I forecast data: one variable over a latitude/longitude range \
         and a time range."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "variable": { "type": "string", "enum": ICON2I_VARIABLES, "description": "Forecast variable." },
                "lat_range": { "type": ["array", "null"], "items": { "type": "number" }, "description": "[lat_min, lat_max] in EPSG:4326. Null for all." },
                "long_range": { "type": ["array", "null"], "items": { "type": "number" }, "description": "[lon_min, lon_max] in EPSG:4326. Null for all." },
                "time_range": {
                    "type": ["array", "null"],
                    "items": { "type": ["string", "null"] },
                    "description": "[time_start, time_end] in ISO8601. Defaults to the whole forecast from the current hour."
                },
                "bucket_source": { "type": ["string", "null"], "description": "Bucket to read ingested data from." },
                "bucket_destination": { "type": ["string", "null"], "description": "Bucket to store the subset in." }
            },
            "required": ["variable"]
        })
    }

    fn label(&self) -> &str {
        "ICON2I Retriever"
    }

    fn inference_rules(&self) -> InferenceRules {
        InferenceRules::new().fill("time_range", |_, ctx| {
            Ok(Inferred::Value(json!([format_timestamp(hour_floor(ctx.now)), null])))
        })
    }

    fn validation_rules(&self) -> ValidationRules {
        let mut rules = ValidationRules::new().rule("variable", variable_rule(&ICON2I_VARIABLES));
        for field in ["lat_range", "long_range"] {
            rules = rules.rule(field, move |a, _| {
                let value = a.get(field)?;
                let ok = range_pair(a, field).is_some_and(|(min, max)| min <= max);
                (!ok).then(|| format!("Invalid {field}: {value}. It should be [min, max] in EPSG:4326."))
            });
        }
        rules.rule("time_range", |a, _| {
            let value = a.get("time_range")?;
            let ok = match a.array("time_range").map(Vec::as_slice) {
                Some([start, end]) => {
                    let start = start.as_str().and_then(parse_timestamp);
                    let end = match end {
                        Value::Null => Some(None),
                        other => other.as_str().and_then(parse_timestamp).map(Some),
                    };
                    match (start, end) {
                        (Some(start), Some(Some(end))) => end > start,
                        (Some(_), Some(None)) => true,
                        _ => false,
                    }
                }
                _ => false,
            };
            (!ok).then(|| format!("Invalid time_range: {value}. It should be [time_start, time_end] in ISO8601."))
        })
    }

    async fn execute(&self, args: &ToolArgs, _ctx: &ToolContext<'_>) -> Result<ToolOutput, ToolError> {
        match self.client.execute("icon2i-retriever-process", args.as_map()).await {
            Ok(response) if response.is_object() || response.is_array() => Ok(ToolOutput::new(response)),
            Ok(response) => Ok(unexpected_response("ICON2I Retriever", self.label(), &response)),
            Err(e) => Ok(e.into_output("ICON2I Retriever", self.label())),
        }
    }
}
