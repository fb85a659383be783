//! Demo weather tool: a self-contained forecast used to exercise the
//! confirmation flow without any remote service.

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use saferplaces_core::error::ToolError;
use saferplaces_core::names;
use saferplaces_core::rules::{InferenceRules, Inferred, ToolArgs, ValidationRules};
use saferplaces_core::tool::{AgentTool, ToolContext, ToolOutput};
use serde_json::{Value, json};

use crate::geo::{PlaceBoundingBox, bbox_from_value};
use crate::llm::Assistant;

pub struct DemoWeatherTool {
    assistant: Assistant,
}

impl DemoWeatherTool {
    pub fn new(assistant: Assistant) -> Self {
        Self { assistant }
    }
}

fn parse_date(date: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

#[async_trait]
impl AgentTool for DemoWeatherTool {
    fn name(&self) -> &str {
        names::DEMO_WEATHER_TOOL
    }

    fn description(&self) -> &str {
        "Useful when user asks for a weather forecast. It returns the expected rainfall \
         over an area on a given date."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "area": {
                    "description": "The area of interest. A bounding box [min_x, min_y, max_x, max_y] in EPSG:4326, or the name of a country, region or city.",
                    "anyOf": [
                        { "type": "string" },
                        { "type": "array", "items": { "type": "number" } }
                    ]
                },
                "date": {
                    "type": "string",
                    "description": "The forecast date in YYYY-MM-DD format. Defaults to tomorrow."
                }
            },
            "required": ["area"]
        })
    }

    fn label(&self) -> &str {
        "Demo Weather"
    }

    fn inference_rules(&self) -> InferenceRules {
        InferenceRules::new()
            .always_with("area", PlaceBoundingBox::new("area", self.assistant.clone()))
            .fill("date", |_, ctx| {
                let tomorrow = ctx.now.date_naive() + Duration::days(1);
                Ok(Inferred::Value(json!(tomorrow.format("%Y-%m-%d").to_string())))
            })
    }

    fn validation_rules(&self) -> ValidationRules {
        ValidationRules::new()
            .rule("area", |a, _| a.is_missing("area").then(|| "Area must be provided.".to_string()))
            .rule("area", |a, _| match a.array("area") {
                Some(items) if items.len() != 4 => Some(format!(
                    "Invalid area coordinates: {}. It should be a list of 4 float values representing the bounding box [min_x, min_y, max_x, max_y].",
                    Value::Array(items.clone())
                )),
                _ => None,
            })
            .rule("date", |a, _| {
                let date = a.str("date")?;
                parse_date(date).is_none().then(|| {
                    format!("Invalid initialization time: {date}. It should be in the format YYYY-MM-DD.")
                })
            })
            .rule("date", |a, ctx| {
                let date = a.str("date")?;
                let day = parse_date(date)?;
                let start = day.and_hms_opt(0, 0, 0)?.and_utc();
                (start < ctx.now).then(|| format!("Invalid initialization time: {date}. It should be in the future."))
            })
    }

    async fn execute(&self, args: &ToolArgs, _ctx: &ToolContext<'_>) -> Result<ToolOutput, ToolError> {
        let bbox = args
            .get("area")
            .and_then(bbox_from_value)
            .ok_or_else(|| ToolError::InvalidArguments("area is not a bounding box".into()))?;
        let date = args.str("date").unwrap_or_default();
        let rain = bbox.iter().sum::<f64>() / 4.0;
        let area = bbox.iter().map(f64::to_string).collect::<Vec<_>>().join(", ");

        Ok(ToolOutput::new(json!({
            "weather_description": format!("It will rain {rain} mm in [{area}] on {date}"),
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedProvider;
    use chrono::{TimeZone, Utc};
    use saferplaces_core::state::ConversationState;
    use saferplaces_core::tool::{GateDefaults, Invocation, ToolGate, invoke};
    use std::sync::Arc;

    fn tool(replies: &[&str]) -> DemoWeatherTool {
        DemoWeatherTool::new(Assistant::new(Arc::new(ScriptedProvider::new(replies)), "m"))
    }

    #[tokio::test]
    async fn place_name_requires_confirmation_with_resolved_box() {
        let tool = tool(&["[10.0, 44.0, 12.0, 46.0]"]);
        let state = ConversationState::default();
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap();
        let ctx = ToolContext::new(&state, "s3://b").at(now);
        let mut gate = ToolGate::new(GateDefaults::NONE);

        let result = invoke(&tool, ToolArgs::new().with("area", "Bologna"), &mut gate, &ctx).await;
        let Invocation::Suspended(interrupt) = result else {
            panic!("expected confirmation");
        };
        assert_eq!(interrupt.args.get("area"), Some(&json!([10.0, 44.0, 12.0, 46.0])));
        assert_eq!(interrupt.args.str("date"), Some("2025-06-02"));
    }

    #[tokio::test]
    async fn confirmed_call_describes_rain() {
        let tool = tool(&[]);
        let state = ConversationState::default();
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap();
        let ctx = ToolContext::new(&state, "s3://b").at(now);
        let mut gate = ToolGate::new(tool.gate_defaults());
        gate.confirm_execution();

        let args = ToolArgs::new()
            .with("area", json!([10.0, 44.0, 12.0, 46.0]))
            .with("date", "2025-06-03");
        let Invocation::Completed(outcome) = invoke(&tool, args, &mut gate, &ctx).await else {
            panic!("expected completion");
        };
        assert_eq!(
            outcome.output.content["weather_description"],
            "It will rain 28 mm in [10, 44, 12, 46] on 2025-06-03"
        );
    }

    #[test]
    fn past_dates_are_rejected() {
        let tool = tool(&[]);
        let state = ConversationState::default();
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap();
        let ctx = ToolContext::new(&state, "s3://b").at(now);
        let rules = tool.validation_rules();

        let today = ToolArgs::new().with("area", json!([1, 2, 3, 4])).with("date", "2025-06-01");
        assert!(rules.validate(&today, &ctx).unwrap().contains("in the future"));

        let garbled = ToolArgs::new().with("area", json!([1, 2, 3, 4])).with("date", "June 3rd");
        assert!(rules.validate(&garbled, &ctx).unwrap().contains("YYYY-MM-DD"));

        let short = ToolArgs::new().with("area", json!([1, 2, 3])).with("date", "2025-06-03");
        assert!(rules.validate(&short, &ctx).unwrap().starts_with("Invalid area coordinates"));
    }
}
