//! System messages placed before each fresh user prompt.

use chrono::{DateTime, SecondsFormat, Utc};
use saferplaces_core::message::Message;
use saferplaces_core::state::LayerDescriptor;

/// ISO8601 UTC timestamp without a zone suffix.
pub fn nowtime(now: DateTime<Utc>) -> String {
    now.naive_utc().format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

/// The current time and how to resolve relative dates against it.
pub fn nowtime_message(nowtime: &str) -> Message {
    Message::system(format!(
        "[CONTEXT]\n\
         current_time: {nowtime}\n\
         timezone: UTC0\n\
         \n\
         Instructions:\n\
         - Resolve any relative time expressions (e.g., today, yesterday, next N hours) using `current_time`.\n\
         - If a year is missing, assume the year from `current_time`.\n\
         - Always output absolute timestamps in ISO8601 UTC0 format without timezone.\n\
         [/CONTEXT]"
    ))
}

/// The project's layers, so the model reuses them instead of creating new
/// ones. `None` when the registry is empty.
pub fn layer_registry_message(layers: &[LayerDescriptor]) -> Option<Message> {
    if layers.is_empty() {
        return None;
    }

    let mut lines = vec![
        "[LAYER REGISTRY]".to_string(),
        "The following geospatial layers are currently available in the project.".to_string(),
        "Each layer has a `title` that should be referenced in conversations or tool calls when you \
         need to use it. If the user refers to an existing dataset, check this registry to see if \
         the dataset already exists before creating new data.\n"
            .to_string(),
        "Layers:".to_string(),
    ];
    for (idx, layer) in layers.iter().enumerate() {
        lines.push(format!("{}.", idx + 1));
        lines.push(format!("  - title: \"{}\"", layer.title));
        let layer_type = serde_json::to_value(layer.layer_type)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        lines.push(format!("  - type: {layer_type}"));
        if let Some(description) = layer.description.as_deref().filter(|d| !d.is_empty()) {
            lines.push(format!("  - description: {description}"));
        }
        lines.push(format!("  - src: {}", layer.src));
        if let Some(metadata) = layer.metadata.as_ref().filter(|m| !m.is_empty()) {
            lines.push("  - metadata:".to_string());
            let pretty = serde_json::to_string_pretty(metadata).unwrap_or_default();
            lines.extend(pretty.lines().map(|l| format!("      {l}")));
        }
    }
    lines.extend([
        "\nInstructions:".to_string(),
        "- When a user request can be satisfied by using one of these layers, prefer re-using the \
         layer instead of creating a new one."
            .to_string(),
        "- Always refer to the `title` when mentioning or selecting a layer in your tool arguments.".to_string(),
        "- If the type is 'vector', assume it contains geographic features like polygons, lines, or points."
            .to_string(),
        "- If the type is 'raster', assume it contains gridded geospatial data.".to_string(),
        "[/LAYER REGISTRY]".to_string(),
    ]);
    Some(Message::system(lines.join("\n")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use saferplaces_core::message::Role;
    use saferplaces_core::state::LayerType;
    use serde_json::json;

    #[test]
    fn nowtime_has_no_zone_suffix() {
        let now = Utc.with_ymd_and_hms(2025, 3, 4, 10, 30, 0).unwrap();
        assert_eq!(nowtime(now), "2025-03-04T10:30:00.000000");
    }

    #[test]
    fn context_message_carries_time() {
        let msg = nowtime_message("2025-03-04T10:30:00.000000");
        assert_eq!(msg.role, Role::System);
        assert!(msg.content.starts_with("[CONTEXT]"));
        assert!(msg.content.contains("current_time: 2025-03-04T10:30:00.000000"));
        assert!(msg.content.ends_with("[/CONTEXT]"));
    }

    #[test]
    fn empty_registry_has_no_message() {
        assert!(layer_registry_message(&[]).is_none());
    }

    #[test]
    fn registry_lists_layers_in_order() {
        let layers = vec![
            LayerDescriptor::new("dtm", "s3://b/dtm.tif", LayerType::Raster),
            LayerDescriptor::new("buildings", "s3://b/buildings.shp", LayerType::Vector)
                .with_description("OSM buildings")
                .with_metadata(json!({"epsg": 32632}).as_object().cloned().unwrap()),
        ];
        let msg = layer_registry_message(&layers).unwrap();
        let text = &msg.content;
        assert!(text.contains("1.\n  - title: \"dtm\"\n  - type: raster"));
        assert!(text.contains("2.\n  - title: \"buildings\"\n  - type: vector\n  - description: OSM buildings"));
        assert!(text.contains("      \"epsg\": 32632"));
        assert!(text.ends_with("[/LAYER REGISTRY]"));
    }
}
