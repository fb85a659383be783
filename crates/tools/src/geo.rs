//! Bounding boxes, place names and file references shared by several tools.

use std::path::Path;

use async_trait::async_trait;
use saferplaces_core::error::ToolError;
use saferplaces_core::rules::{InferenceRule, Inferred, ToolArgs};
use saferplaces_core::tool::ToolContext;
use serde_json::{Value, json};
use tracing::debug;

use crate::llm::{AskRole, Assistant};

/// `[min_x, min_y, max_x, max_y]`
pub type BBox = [f64; 4];

pub fn floor_decimals(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).floor() / factor
}

pub fn ceil_decimals(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).ceil() / factor
}

/// Grow a bounding box to the given number of decimals.
pub fn round_outward(bbox: BBox, decimals: i32) -> BBox {
    [
        floor_decimals(bbox[0], decimals),
        floor_decimals(bbox[1], decimals),
        ceil_decimals(bbox[2], decimals),
        ceil_decimals(bbox[3], decimals),
    ]
}

/// Read a bounding box from either a 4-number list or a
/// `{west, south, east, north}` object.
pub fn bbox_from_value(value: &Value) -> Option<BBox> {
    match value {
        Value::Array(items) if items.len() == 4 => {
            let mut bbox = [0.0; 4];
            for (slot, item) in bbox.iter_mut().zip(items) {
                *slot = item.as_f64()?;
            }
            Some(bbox)
        }
        Value::Object(map) => Some([
            map.get("west")?.as_f64()?,
            map.get("south")?.as_f64()?,
            map.get("east")?.as_f64()?,
            map.get("north")?.as_f64()?,
        ]),
        _ => None,
    }
}

pub fn bbox_to_value(bbox: BBox) -> Value {
    json!(bbox)
}

/// An `s3://` URI or a file that exists on this host.
pub fn is_remote_or_existing(path: &str) -> bool {
    path.starts_with("s3://") || Path::new(path).is_file()
}

/// The `src` of the registered layer a reference names, matching either
/// its `src` or its title (case-insensitive).
pub fn layer_src(ctx: &ToolContext<'_>, reference: &str) -> Option<String> {
    ctx.state
        .layer_registry
        .iter()
        .find(|l| l.src == reference || l.title.eq_ignore_ascii_case(reference.trim()))
        .map(|l| l.src.clone())
}

/// Last path component of a file reference.
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Base file name without its extension.
pub fn file_stem(path: &str) -> &str {
    let name = file_name(path);
    name.rsplit_once('.').map(|(stem, _)| stem).filter(|s| !s.is_empty()).unwrap_or(name)
}

/// A destination under `{bucket}/{dir}`. A path already there is kept, any
/// other reference keeps only its file name, and no reference gets `fresh`.
pub fn output_path(bucket: &str, dir: &str, current: Option<&str>, fresh: impl FnOnce() -> String) -> String {
    let prefix = format!("{}/{dir}", bucket.trim_end_matches('/'));
    match current.map(str::trim).filter(|c| !c.is_empty()) {
        Some(path) if path.starts_with(&format!("{prefix}/")) => path.to_string(),
        Some(path) => format!("{prefix}/{}", file_name(path)),
        None => format!("{prefix}/{}", fresh()),
    }
}

/// A short random suffix for generated file names.
pub fn short_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..12].to_string()
}

/// Resolves a place name to a bounding box and rounds boxes outward.
///
/// A name is sent to the auxiliary model, and the result is marked
/// unconfirmed so the user gets to check it before execution. A box
/// already given as numbers is only rounded.
pub struct PlaceBoundingBox {
    field: &'static str,
    decimals: i32,
    assistant: Assistant,
}

impl PlaceBoundingBox {
    pub fn new(field: &'static str, assistant: Assistant) -> Self {
        Self {
            field,
            decimals: 1,
            assistant,
        }
    }
}

#[async_trait]
impl InferenceRule for PlaceBoundingBox {
    async fn resolve(&self, args: &ToolArgs, _ctx: &ToolContext<'_>) -> Result<Inferred, ToolError> {
        match args.get(self.field) {
            Some(Value::String(place)) => {
                let prompt = format!(
                    "Please provide the bounding box coordinates for the area: {place} with format \
                     [min_x, min_y, max_x, max_y] in EPSG:4326 Coordinate Reference System. \
                     Provide only the coordinates list without any additional text or explanation."
                );
                let reply = self
                    .assistant
                    .ask_json(AskRole::System, &prompt)
                    .await
                    .map_err(|e| ToolError::InferenceFailed {
                        field: self.field.to_string(),
                        reason: e.to_string(),
                    })?;
                let bbox = bbox_from_value(&reply).ok_or_else(|| ToolError::InferenceFailed {
                    field: self.field.to_string(),
                    reason: format!("no bounding box for '{place}' in model reply {reply}"),
                })?;
                debug!(place = %place, ?bbox, "place name resolved");
                Ok(Inferred::Unconfirmed(bbox_to_value(round_outward(bbox, self.decimals))))
            }
            Some(value) => Ok(bbox_from_value(value)
                .map(|bbox| Inferred::Value(bbox_to_value(round_outward(bbox, self.decimals))))
                .unwrap_or(Inferred::Keep)),
            None => Ok(Inferred::Keep),
        }
    }
}
