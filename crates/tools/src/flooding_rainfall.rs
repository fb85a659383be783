//! Flooding-rainfall pipeline tools: define the rain event, then the model.

use async_trait::async_trait;
use saferplaces_core::error::ToolError;
use saferplaces_core::names;
use saferplaces_core::rules::{InferenceRules, Inferred, ToolArgs, ValidationRules};
use saferplaces_core::tool::{AgentTool, ToolContext, ToolOutput};
use serde_json::{Map, Value, json};

use crate::geo::is_remote_or_existing;

pub const RAIN_TYPES: [&str; 4] = ["uniform", "non-uniform-draw", "non-uniform-file", "safer003"];
pub const MODELS: [&str; 2] = ["saferplaces", "untrim"];

pub struct DefineRainTool;

#[async_trait]
impl AgentTool for DefineRainTool {
    fn name(&self) -> &str {
        names::FLOODING_RAINFALL_DEFINE_RAIN_TOOL
    }

    fn description(&self) -> &str {
        "Useful when user wants to define the rainfall event of a flooding simulation: \
         its type, amount and duration."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "rain_type": {
                    "type": ["string", "null"],
                    "enum": ["uniform", "non-uniform-draw", "non-uniform-file", "safer003", null],
                    "description": "Type of rainfall. Defaults to uniform."
                },
                "rain_mm": {
                    "type": ["number", "null"],
                    "description": "Rainfall in millimeters, only for uniform rain. Defaults to 100."
                },
                "non_uniform_polygon": {
                    "type": ["array", "null"],
                    "description": "Polygon coordinates of a drawn rainfall area, only for non-uniform-draw."
                },
                "non_uniform_file": {
                    "type": ["string", "null"],
                    "description": "Rainfall raster file (s3://...), only for non-uniform-file."
                },
                "rain_duration": {
                    "type": ["number", "null"],
                    "description": "Duration of the rainfall in hours. Defaults to 1."
                }
            }
        })
    }

    fn label(&self) -> &str {
        "Define Rain"
    }

    fn inference_rules(&self) -> InferenceRules {
        InferenceRules::new()
            .fill("rain_type", |_, _| Ok(Inferred::Value(json!("uniform"))))
            .fill("rain_mm", |a, _| {
                Ok(match a.str("rain_type") {
                    Some("uniform") => Inferred::Value(json!(100.0)),
                    _ => Inferred::Keep,
                })
            })
            .fill("rain_duration", |_, _| Ok(Inferred::Value(json!(1.0))))
    }

    fn validation_rules(&self) -> ValidationRules {
        ValidationRules::new()
            .rule("rain_type", |a, _| {
                let rain_type = a.get("rain_type").cloned().unwrap_or(Value::Null);
                (!RAIN_TYPES.iter().any(|t| rain_type.as_str() == Some(t))).then(|| {
                    format!(
                        "Invalid rain type: {rain_type}. It should be one of the following: {}.",
                        RAIN_TYPES.join(", ")
                    )
                })
            })
            .rule("rain_mm", |a, _| {
                let value = a.get("rain_mm")?;
                (value.as_f64().is_none_or(|mm| mm <= 0.0))
                    .then(|| format!("Invalid rainfall in mm: {value}. It should be a positive float value."))
            })
            .rule("rain_mm", |a, _| {
                (a.str("rain_type") != Some("uniform") && !a.is_missing("rain_mm"))
                    .then(|| "Rainfall in mm should not be provided if rain type is not uniform.".to_string())
            })
            .rule("non_uniform_polygon", |a, _| {
                let value = a.get("non_uniform_polygon")?;
                (!value.is_array()).then(|| {
                    format!("Invalid non-uniform polygon: {value}. It should be a valid polygon coordinates or None.")
                })
            })
            .rule("non_uniform_polygon", |a, _| {
                (a.str("rain_type") != Some("non-uniform-draw") && !a.is_missing("non_uniform_polygon")).then(|| {
                    "Non-uniform polygon should not be provided if rain type is not non-uniform-draw.".to_string()
                })
            })
            .rule("non_uniform_file", |a, _| {
                let path = a.str("non_uniform_file")?;
                (!is_remote_or_existing(path))
                    .then(|| format!("Invalid non-uniform file: {path}. It should be a valid file path or None."))
            })
            .rule("non_uniform_file", |a, _| {
                (a.str("rain_type") != Some("non-uniform-file") && !a.is_missing("non_uniform_file")).then(|| {
                    "Non-uniform file should not be provided if rain type is not non-uniform-file.".to_string()
                })
            })
            .rule("rain_duration", |a, _| {
                let value = a.get("rain_duration").cloned().unwrap_or(Value::Null);
                (value.as_f64().is_none_or(|h| h <= 0.0)).then(|| {
                    format!("Invalid rainfall duration: {value}. It should be a positive float value representing hours.")
                })
            })
    }

    async fn execute(&self, args: &ToolArgs, _ctx: &ToolContext<'_>) -> Result<ToolOutput, ToolError> {
        let rain_type = args.str("rain_type").unwrap_or("uniform");
        let mut content = Map::new();
        content.insert("rain_type".into(), json!(rain_type));
        content.insert("rain_duration".into(), json!(args.get("rain_duration")));

        let specific = match rain_type {
            "uniform" => Some("rain_mm"),
            "non-uniform-draw" => Some("non_uniform_polygon"),
            "non-uniform-file" => Some("non_uniform_file"),
            _ => None,
        };
        if let Some(key) = specific {
            content.insert(key.into(), json!(args.get(key)));
        }
        Ok(ToolOutput::new(Value::Object(content)))
    }
}

pub struct DefineModelTool;

/// Untrim parameters with their default and inclusive bounds.
const UNTRIM_PARAMS: [(&str, f64, f64, f64, &str); 5] = [
    ("simulation_time", 12.0, 1.0, 48.0, "a positive integer representing hours between 1 and 48"),
    ("manning_coefficient", 0.02, 0.0, 5.0, "a positive float value between 0 and 5"),
    ("nl", 50.0, 1.0, 100.0, "a positive integer between 1 and 100"),
    ("delta_t", 600.0, 6.0, 900.0, "a positive integer representing seconds between 6 and 900"),
    ("time_shot_interval", 3600.0, 600.0, 10800.0, "a positive integer representing seconds between 600 and 10800"),
];

fn untrim_label(field: &str) -> &'static str {
    match field {
        "simulation_time" => "simulation time",
        "manning_coefficient" => "Manning coefficient",
        "nl" => "number of layers",
        "delta_t" => "time step",
        _ => "time shot interval",
    }
}

#[async_trait]
impl AgentTool for DefineModelTool {
    fn name(&self) -> &str {
        names::FLOODING_RAINFALL_DEFINE_MODEL_TOOL
    }

    fn description(&self) -> &str {
        "Useful when user wants to choose the hydraulic model of a flooding simulation \
         (saferplaces or untrim) and its parameters."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "model_name": {
                    "type": ["string", "null"],
                    "enum": ["saferplaces", "untrim", null],
                    "description": "Hydraulic model. Defaults to saferplaces."
                },
                "simulation_time": { "type": ["integer", "null"], "description": "Simulated hours (untrim only, 1-48). Defaults to 12." },
                "manning_coefficient": { "type": ["number", "null"], "description": "Manning roughness coefficient (untrim only, 0-5). Defaults to 0.02." },
                "nl": { "type": ["integer", "null"], "description": "Number of vertical layers (untrim only, 1-100). Defaults to 50." },
                "delta_t": { "type": ["integer", "null"], "description": "Time step in seconds (untrim only, 6-900). Defaults to 600." },
                "time_shot_interval": { "type": ["integer", "null"], "description": "Output interval in seconds (untrim only, 600-10800). Defaults to 3600." },
                "apply_damage": { "type": ["boolean", "null"], "description": "Compute damages on buildings. Defaults to true." }
            }
        })
    }

    fn label(&self) -> &str {
        "Define Model"
    }

    fn inference_rules(&self) -> InferenceRules {
        let mut rules = InferenceRules::new().fill("model_name", |_, _| Ok(Inferred::Value(json!("saferplaces"))));
        for (field, default, _, _, _) in UNTRIM_PARAMS {
            rules = rules.fill(field, move |a, _| {
                Ok(if a.str("model_name") == Some("untrim") {
                    Inferred::Value(numeric(field, default))
                } else {
                    Inferred::Keep
                })
            });
        }
        rules.fill("apply_damage", |_, _| Ok(Inferred::Value(json!(true))))
    }

    fn validation_rules(&self) -> ValidationRules {
        let mut rules = ValidationRules::new().rule("model_name", |a, _| {
            let model = a.get("model_name").cloned().unwrap_or(Value::Null);
            (!MODELS.iter().any(|m| model.as_str() == Some(m)))
                .then(|| format!("Invalid model name: {model}. It should be one of ['saferplaces', 'untrim']."))
        });
        for (field, _, min, max, expected) in UNTRIM_PARAMS {
            let integer = field != "manning_coefficient";
            rules = rules.rule(field, move |a, _| {
                if a.str("model_name") != Some("untrim") {
                    return None;
                }
                let value = a.get(field)?;
                let ok = if integer { value.as_i64().map(|v| v as f64) } else { value.as_f64() }
                    .is_some_and(|v| v >= min && v <= max);
                (!ok).then(|| format!("Invalid {}: {value}. It should be {expected}.", untrim_label(field)))
            });
        }
        rules.rule("apply_damage", |a, _| {
            let value = a.get("apply_damage")?;
            (!value.is_boolean()).then(|| format!("Invalid apply damage: {value}. It should be a boolean value."))
        })
    }

    async fn execute(&self, args: &ToolArgs, _ctx: &ToolContext<'_>) -> Result<ToolOutput, ToolError> {
        let model = args.str("model_name").unwrap_or("saferplaces");
        let mut content = Map::new();
        content.insert("model_name".into(), json!(model));
        content.insert("apply_damage".into(), json!(args.bool("apply_damage").unwrap_or(true)));
        if model == "untrim" {
            for (field, ..) in UNTRIM_PARAMS {
                content.insert(field.into(), json!(args.get(field)));
            }
        }
        Ok(ToolOutput::new(Value::Object(content)))
    }
}

fn numeric(field: &str, value: f64) -> Value {
    if field == "manning_coefficient" {
        json!(value)
    } else {
        json!(value as i64)
    }
}
