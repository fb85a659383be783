//! Argument rule engine.
//!
//! Two ordered rule families run over a tool's raw arguments before the
//! action executes:
//!
//! 1. **Inference** ([`InferenceRules`]) fills omitted values, or rewrites
//!    values when a rule is declared `always`. A rule may mark the call as
//!    unconfirmed when it resolved a value through a non-deterministic lookup.
//! 2. **Validation** ([`ValidationRules`]) checks the resolved arguments.
//!    Fields are visited in declaration order and each field's predicates in
//!    list order; the first error message aborts the call.
//!
//! Both families see the full argument mapping, so cross-field rules are
//! expressed on whichever field owns the message.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::ToolError;
use crate::tool::ToolContext;

/// Argument mapping of one tool call.
///
/// A key that is absent and a key that holds `null` are both "missing".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolArgs(Map<String, Value>);

impl ToolArgs {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// The value under `key`, treating `null` as absent.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|v| !v.is_null())
    }

    pub fn is_missing(&self, key: &str) -> bool {
        self.get(key).is_none()
    }

    pub fn str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(Value::as_f64)
    }

    pub fn i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_i64)
    }

    pub fn bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    pub fn array(&self, key: &str) -> Option<&Vec<Value>> {
        self.get(key).and_then(Value::as_array)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    /// Overwrite every key present in `other`.
    pub fn merge(&mut self, other: &Map<String, Value>) {
        for (k, v) in other {
            self.0.insert(k.clone(), v.clone());
        }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    /// Keys with a non-null value, in insertion order.
    pub fn present(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter().filter(|(_, v)| !v.is_null())
    }
}

impl From<Map<String, Value>> for ToolArgs {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

type Predicate = Box<dyn Fn(&ToolArgs, &ToolContext<'_>) -> Option<String> + Send + Sync>;

/// Ordered validation predicates keyed by argument name.
#[derive(Default)]
pub struct ValidationRules {
    fields: Vec<(String, Vec<Predicate>)>,
}

impl ValidationRules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a predicate for `field`. A field keeps the position of its
    /// first registered predicate.
    pub fn rule<F>(mut self, field: &str, predicate: F) -> Self
    where
        F: Fn(&ToolArgs, &ToolContext<'_>) -> Option<String> + Send + Sync + 'static,
    {
        match self.fields.iter_mut().find(|(name, _)| name == field) {
            Some((_, predicates)) => predicates.push(Box::new(predicate)),
            None => self.fields.push((field.to_string(), vec![Box::new(predicate)])),
        }
        self
    }

    /// The first failing message, or `None` when every predicate passes.
    pub fn validate(&self, args: &ToolArgs, ctx: &ToolContext<'_>) -> Option<String> {
        for (field, predicates) in &self.fields {
            for predicate in predicates {
                if let Some(message) = predicate(args, ctx) {
                    debug!(field = %field, "validation failed");
                    return Some(message);
                }
            }
        }
        None
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }
}

// ---------------------------------------------------------------------------
// Inference
// ---------------------------------------------------------------------------

/// What a resolver decided for its field.
#[derive(Debug, Clone, PartialEq)]
pub enum Inferred {
    /// Leave the argument as it is.
    Keep,
    /// Replace the argument.
    Value(Value),
    /// Replace the argument and require the user to confirm execution.
    Unconfirmed(Value),
}

/// A resolver for one argument.
#[async_trait]
pub trait InferenceRule: Send + Sync {
    async fn resolve(&self, args: &ToolArgs, ctx: &ToolContext<'_>) -> Result<Inferred, ToolError>;
}

struct FnRule<F>(F);

#[async_trait]
impl<F> InferenceRule for FnRule<F>
where
    F: Fn(&ToolArgs, &ToolContext<'_>) -> Result<Inferred, ToolError> + Send + Sync,
{
    async fn resolve(&self, args: &ToolArgs, ctx: &ToolContext<'_>) -> Result<Inferred, ToolError> {
        (self.0)(args, ctx)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum When {
    Missing,
    Always,
}

/// Outcome of running every inference rule.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InferenceReport {
    /// A resolver asked for execution to be re-confirmed.
    pub unconfirmed: bool,
    /// Fields whose value changed.
    pub changed: Vec<String>,
}

/// Ordered inference rules keyed by argument name.
#[derive(Default)]
pub struct InferenceRules {
    rules: Vec<(String, When, Box<dyn InferenceRule>)>,
}

impl InferenceRules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `field` only when the caller left it out.
    pub fn fill<F>(self, field: &str, resolver: F) -> Self
    where
        F: Fn(&ToolArgs, &ToolContext<'_>) -> Result<Inferred, ToolError> + Send + Sync + 'static,
    {
        self.push(field, When::Missing, Box::new(FnRule(resolver)))
    }

    /// Resolve `field` on every call, even when the caller supplied it.
    /// The resolver must return the same value when run on its own output.
    pub fn always<F>(self, field: &str, resolver: F) -> Self
    where
        F: Fn(&ToolArgs, &ToolContext<'_>) -> Result<Inferred, ToolError> + Send + Sync + 'static,
    {
        self.push(field, When::Always, Box::new(FnRule(resolver)))
    }

    pub fn fill_with(self, field: &str, rule: impl InferenceRule + 'static) -> Self {
        self.push(field, When::Missing, Box::new(rule))
    }

    pub fn always_with(self, field: &str, rule: impl InferenceRule + 'static) -> Self {
        self.push(field, When::Always, Box::new(rule))
    }

    fn push(mut self, field: &str, when: When, rule: Box<dyn InferenceRule>) -> Self {
        self.rules.push((field.to_string(), when, rule));
        self
    }

    /// Run every rule in order, rewriting `args` in place.
    pub async fn apply(
        &self,
        args: &mut ToolArgs,
        ctx: &ToolContext<'_>,
    ) -> Result<InferenceReport, ToolError> {
        let mut report = InferenceReport::default();
        for (field, when, rule) in &self.rules {
            if *when == When::Missing && !args.is_missing(field) {
                continue;
            }
            let inferred = rule.resolve(args, ctx).await.map_err(|e| match e {
                ToolError::InferenceFailed { .. } => e,
                other => ToolError::InferenceFailed {
                    field: field.clone(),
                    reason: other.to_string(),
                },
            })?;
            let (value, unconfirmed) = match inferred {
                Inferred::Keep => continue,
                Inferred::Value(v) => (v, false),
                Inferred::Unconfirmed(v) => (v, true),
            };
            if args.get(field) != Some(&value) {
                report.changed.push(field.clone());
            }
            report.unconfirmed |= unconfirmed;
            args.set(field.clone(), value);
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ConversationState;
    use serde_json::json;

    fn args(v: Value) -> ToolArgs {
        ToolArgs::from(v.as_object().cloned().unwrap())
    }

    #[test]
    fn null_counts_as_missing() {
        let a = args(json!({"area": null, "crs": "EPSG:4326"}));
        assert!(a.is_missing("area"));
        assert!(a.is_missing("dtm_file"));
        assert_eq!(a.str("crs"), Some("EPSG:4326"));
    }

    #[test]
    fn validation_returns_first_failure_in_order() {
        let state = ConversationState::default();
        let ctx = ToolContext::new(&state, "s3://bucket");
        let rules = ValidationRules::new()
            .rule("a", |_, _| None)
            .rule("b", |_, _| Some("b failed".into()))
            .rule("a", |_, _| Some("a failed second".into()));

        // "a" keeps its position, so its second predicate runs before "b"
        assert_eq!(rules.validate(&ToolArgs::new(), &ctx).as_deref(), Some("a failed second"));
        assert_eq!(rules.fields().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn fill_rules_leave_supplied_values_alone() {
        let state = ConversationState::default();
        let ctx = ToolContext::new(&state, "s3://bucket");
        let rules = InferenceRules::new()
            .fill("rain_mm", |_, _| Ok(Inferred::Value(json!(100.0))))
            .fill("duration", |_, _| Ok(Inferred::Value(json!(1.0))));

        let mut full = args(json!({"rain_mm": 20.0, "duration": 3.0}));
        let before = full.clone();
        let report = rules.apply(&mut full, &ctx).await.unwrap();
        assert_eq!(full, before);
        assert!(report.changed.is_empty());

        let mut partial = args(json!({"rain_mm": null}));
        rules.apply(&mut partial, &ctx).await.unwrap();
        assert_eq!(partial.f64("rain_mm"), Some(100.0));
        assert_eq!(partial.f64("duration"), Some(1.0));
    }

    #[tokio::test]
    async fn later_rules_see_earlier_inferences() {
        let state = ConversationState::default();
        let ctx = ToolContext::new(&state, "s3://bucket");
        let rules = InferenceRules::new()
            .fill("do_download", |a, _| Ok(Inferred::Value(json!(a.is_missing("file")))))
            .always("label", |a, _| {
                Ok(Inferred::Value(json!(format!("download={}", a.bool("do_download").unwrap_or(false)))))
            });
        let mut a = ToolArgs::new();
        rules.apply(&mut a, &ctx).await.unwrap();
        assert_eq!(a.str("label"), Some("download=true"));
    }

    #[tokio::test]
    async fn unconfirmed_inference_is_reported() {
        let state = ConversationState::default();
        let ctx = ToolContext::new(&state, "s3://bucket");
        let rules = InferenceRules::new()
            .always("area", |_, _| Ok(Inferred::Unconfirmed(json!([10.0, 44.0, 12.0, 46.0]))));
        let mut a = args(json!({"area": "Bologna"}));
        let report = rules.apply(&mut a, &ctx).await.unwrap();
        assert!(report.unconfirmed);
        assert_eq!(report.changed, vec!["area"]);
    }

    #[tokio::test]
    async fn resolver_errors_name_the_field() {
        let state = ConversationState::default();
        let ctx = ToolContext::new(&state, "s3://bucket");
        let rules = InferenceRules::new().fill("area", |_, _| {
            Err(ToolError::InvalidArguments("no such place".into()))
        });
        let err = rules.apply(&mut ToolArgs::new(), &ctx).await.unwrap_err();
        match err {
            ToolError::InferenceFailed { field, reason } => {
                assert_eq!(field, "area");
                assert!(reason.contains("no such place"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
