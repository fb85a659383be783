//! Conversation state and its reducers.
//!
//! Every graph node reads a [`ConversationState`] and returns a
//! [`StateUpdate`]. The orchestrator folds the update into the state with
//! [`ConversationState::apply`], which calls one pure reducer per field:
//!
//! | Field            | Strategy                                              |
//! |------------------|-------------------------------------------------------|
//! | `messages`       | concatenate                                           |
//! | `node_history`   | concatenate                                           |
//! | `node_params`    | deep merge ([`merge_node_params`]), or clear          |
//! | `layer_registry` | merge by `src` ([`merge_layers`])                     |
//! | scalars          | overwrite when the update carries a value             |

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::message::Message;

/// Per-node parameter mapping (`node name → parameters`).
pub type Params = Map<String, Value>;

/// The state threaded through every node of one conversation thread.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationState {
    #[serde(default)]
    pub messages: Vec<Message>,

    #[serde(default)]
    pub node_history: Vec<String>,

    #[serde(default)]
    pub node_params: Params,

    #[serde(default)]
    pub layer_registry: Vec<LayerDescriptor>,

    /// Tools the chatbot may bind this turn: `Some([])` binds all,
    /// `None` binds none.
    #[serde(default, rename = "avaliable_tools", alias = "available_tools")]
    pub available_tools: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nowtime: Option<String>,
}

impl ConversationState {
    /// Fold an update into the state, field by field, in the order the
    /// update recorded its operations.
    pub fn apply(&mut self, update: StateUpdate) {
        let StateUpdate {
            messages,
            node_history,
            node_params,
            layer_registry,
            available_tools,
            user_id,
            project_id,
            nowtime,
        } = update;

        self.messages = merge_messages(std::mem::take(&mut self.messages), messages);
        self.node_history = merge_history(std::mem::take(&mut self.node_history), node_history);
        for op in node_params {
            self.node_params = match op {
                ParamsOp::Merge(params) => {
                    merge_node_params(std::mem::take(&mut self.node_params), params)
                }
                ParamsOp::Clear => Params::new(),
            };
        }
        self.layer_registry = merge_layers(std::mem::take(&mut self.layer_registry), layer_registry);

        if let Some(tools) = available_tools {
            self.available_tools = tools;
        }
        if user_id.is_some() {
            self.user_id = user_id;
        }
        if project_id.is_some() {
            self.project_id = project_id;
        }
        if nowtime.is_some() {
            self.nowtime = nowtime;
        }
    }

    /// The parameter mapping stored for `node`, if it is a non-empty object.
    pub fn params(&self, node: &str) -> Option<&Map<String, Value>> {
        self.node_params
            .get(node)
            .and_then(Value::as_object)
            .filter(|p| !p.is_empty())
    }

    /// A single value from the parameter mapping of `node`.
    pub fn param(&self, node: &str, key: &str) -> Option<&Value> {
        self.params(node).and_then(|p| p.get(key)).filter(|v| !v.is_null())
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn layer(&self, src: &str) -> Option<&LayerDescriptor> {
        self.layer_registry.iter().find(|l| l.src == src)
    }
}

/// One node's contribution to the state.
#[derive(Debug, Clone, Default)]
pub struct StateUpdate {
    pub messages: Vec<Message>,
    pub node_history: Vec<String>,
    /// Applied in order.
    pub node_params: Vec<ParamsOp>,
    pub layer_registry: Vec<LayerDescriptor>,
    /// `Some(value)` replaces the tool binding, `None` leaves it alone.
    pub available_tools: Option<Option<Vec<String>>>,
    pub user_id: Option<String>,
    pub project_id: Option<String>,
    pub nowtime: Option<String>,
}

/// An operation on `node_params`.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamsOp {
    /// Deep-merge the mapping into the current parameters.
    Merge(Params),
    /// Drop every parameter.
    Clear,
}

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    pub fn messages(mut self, messages: impl IntoIterator<Item = Message>) -> Self {
        self.messages.extend(messages);
        self
    }

    pub fn history(mut self, node: impl Into<String>) -> Self {
        self.node_history.push(node.into());
        self
    }

    /// Deep-merge `value` under `node_params[node]`.
    pub fn params(mut self, node: impl Into<String>, value: Value) -> Self {
        let mut params = Params::new();
        params.insert(node.into(), value);
        self.node_params.push(ParamsOp::Merge(params));
        self
    }

    /// Reset `node_params[node]` to an empty mapping.
    pub fn clear_params_for(self, node: impl Into<String>) -> Self {
        self.params(node, Value::Object(Map::new()))
    }

    pub fn merge_params(mut self, params: Params) -> Self {
        if !params.is_empty() {
            self.node_params.push(ParamsOp::Merge(params));
        }
        self
    }

    pub fn clear_params(mut self) -> Self {
        self.node_params.push(ParamsOp::Clear);
        self
    }

    pub fn layers(mut self, layers: impl IntoIterator<Item = LayerDescriptor>) -> Self {
        self.layer_registry.extend(layers);
        self
    }

    pub fn available_tools(mut self, tools: Option<Vec<String>>) -> Self {
        self.available_tools = Some(tools);
        self
    }

    /// Sequence `next` after `self`: lists concatenate, later scalars win.
    pub fn then(mut self, next: StateUpdate) -> Self {
        self.messages.extend(next.messages);
        self.node_history.extend(next.node_history);
        self.node_params.extend(next.node_params);
        self.layer_registry.extend(next.layer_registry);
        if next.available_tools.is_some() {
            self.available_tools = next.available_tools;
        }
        if next.user_id.is_some() {
            self.user_id = next.user_id;
        }
        if next.project_id.is_some() {
            self.project_id = next.project_id;
        }
        if next.nowtime.is_some() {
            self.nowtime = next.nowtime;
        }
        self
    }
}

/// Kind of geospatial artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerType {
    Vector,
    Raster,
}

impl LayerType {
    /// Guess the layer type from a file extension.
    pub fn from_src(src: &str) -> Self {
        let ext = src
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "geojson" | "json" | "gpkg" | "shp" | "kml" => LayerType::Vector,
            _ => LayerType::Raster,
        }
    }
}

/// A geospatial artifact known to the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerDescriptor {
    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub src: String,

    #[serde(rename = "type")]
    pub layer_type: LayerType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl LayerDescriptor {
    pub fn new(title: impl Into<String>, src: impl Into<String>, layer_type: LayerType) -> Self {
        Self {
            title: title.into(),
            description: None,
            src: src.into(),
            layer_type,
            metadata: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Fold a later descriptor of the same `src` into this one.
    fn absorb(&mut self, other: LayerDescriptor) {
        self.title = other.title;
        self.layer_type = other.layer_type;
        if other.description.is_some() {
            self.description = other.description;
        }
        self.metadata = match (self.metadata.take(), other.metadata) {
            (Some(old), Some(new)) => Some(merge_node_params(old, new)),
            (old, new) => new.or(old),
        };
    }
}

pub fn merge_messages(mut old: Vec<Message>, new: Vec<Message>) -> Vec<Message> {
    old.extend(new);
    old
}

pub fn merge_history(mut old: Vec<String>, new: Vec<String>) -> Vec<String> {
    old.extend(new);
    old
}

/// Deep merge of parameter mappings.
///
/// Objects merge key by key at every depth, arrays concatenate, and any other
/// value overwrites. An empty object overwrites too, which is how a node
/// clears the parameters it consumed.
pub fn merge_node_params(mut old: Params, new: Params) -> Params {
    for (key, value) in new {
        match (old.remove(&key), value) {
            (Some(Value::Object(left)), Value::Object(right)) if !right.is_empty() => {
                old.insert(key, Value::Object(merge_node_params(left, right)));
            }
            (Some(Value::Array(mut left)), Value::Array(right)) => {
                left.extend(right);
                old.insert(key, Value::Array(left));
            }
            (_, value) => {
                old.insert(key, value);
            }
        }
    }
    old
}

/// Merge layer descriptors keyed by `src`.
///
/// A descriptor whose `src` is new is appended. One whose `src` already
/// exists is folded into the existing entry in place, so the registry never
/// holds two entries with the same `src`.
pub fn merge_layers(mut old: Vec<LayerDescriptor>, new: Vec<LayerDescriptor>) -> Vec<LayerDescriptor> {
    for layer in new {
        match old.iter_mut().find(|l| l.src == layer.src) {
            Some(existing) => existing.absorb(layer),
            None => old.push(layer),
        }
    }
    old
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> Params {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn node_params_merge_is_deep() {
        let merged = merge_node_params(obj(json!({"A": {"y": 2}})), obj(json!({"A": {"x": 1}})));
        assert_eq!(Value::Object(merged), json!({"A": {"x": 1, "y": 2}}));
    }

    #[test]
    fn node_params_merge_nested_lists_and_scalars() {
        let merged = merge_node_params(
            obj(json!({"A": {"items": [1], "n": 1, "inner": {"k": "a"}}})),
            obj(json!({"A": {"items": [2], "n": 5, "inner": {"j": "b"}}})),
        );
        assert_eq!(
            Value::Object(merged),
            json!({"A": {"items": [1, 2], "n": 5, "inner": {"k": "a", "j": "b"}}})
        );
    }

    #[test]
    fn empty_object_clears_key() {
        let merged = merge_node_params(obj(json!({"A": {"y": 2}, "B": {"z": 3}})), obj(json!({"A": {}})));
        assert_eq!(Value::Object(merged), json!({"A": {}, "B": {"z": 3}}));
    }

    #[test]
    fn duplicate_layer_src_keeps_registry_length() {
        let a = LayerDescriptor::new("A", "a.tif", LayerType::Raster);
        let b = LayerDescriptor::new("B", "b.geojson", LayerType::Vector);
        let merged = merge_layers(vec![a.clone()], vec![a.clone(), b]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged.iter().filter(|l| l.src == "a.tif").count(), 1);
    }

    #[test]
    fn duplicate_layer_updates_existing_entry() {
        let a = LayerDescriptor::new("A", "a.tif", LayerType::Raster);
        let newer = LayerDescriptor::new("A v2", "a.tif", LayerType::Raster)
            .with_metadata(obj(json!({"nodata": -9999})));
        let merged = merge_layers(vec![a], vec![newer]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].title, "A v2");
        assert_eq!(merged[0].metadata.as_ref().unwrap()["nodata"], -9999);
    }

    #[test]
    fn apply_runs_params_ops_in_order() {
        let mut state = ConversationState::default();
        state.apply(
            StateUpdate::new()
                .params("chatbot", json!({"tool_choice": "any"}))
                .clear_params()
                .params("demo_tool_handler", json!({"next_node": "x"})),
        );
        assert!(state.params("chatbot").is_none());
        assert_eq!(state.param("demo_tool_handler", "next_node"), Some(&json!("x")));
    }

    #[test]
    fn apply_concatenates_messages_and_history() {
        let mut state = ConversationState::default();
        state.apply(StateUpdate::new().message(Message::user("hi")).history("chatbot"));
        state.apply(StateUpdate::new().message(Message::assistant("hello")).history("chatbot"));
        assert_eq!(state.messages.len(), 2);
        assert_eq!(state.node_history, vec!["chatbot", "chatbot"]);
    }

    #[test]
    fn available_tools_serializes_with_source_key() {
        let state = ConversationState {
            available_tools: Some(vec![]),
            ..Default::default()
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["avaliable_tools"], json!([]));

        let parsed: ConversationState =
            serde_json::from_value(json!({"available_tools": ["safer_rain_tool"]})).unwrap();
        assert_eq!(parsed.available_tools, Some(vec!["safer_rain_tool".to_string()]));
    }

    #[test]
    fn layer_type_from_extension() {
        assert_eq!(LayerType::from_src("s3://b/roads.geojson"), LayerType::Vector);
        assert_eq!(LayerType::from_src("s3://b/dem.tif"), LayerType::Raster);
        assert_eq!(LayerType::from_src("no_extension"), LayerType::Raster);
    }

    #[test]
    fn then_sequences_updates() {
        let combined = StateUpdate::new()
            .message(Message::system("one"))
            .then(StateUpdate::new().message(Message::system("two")).clear_params());
        assert_eq!(combined.messages.len(), 2);
        assert_eq!(combined.node_params, vec![ParamsOp::Clear]);
    }
}
