//! Canonical names of graph nodes and tools.
//!
//! These strings appear in `node_history`, `node_params` keys and tool
//! calls, so they are part of the persisted state format.

pub const GRAPH: &str = "SAFERPLACES-AGENT";

// Chatbot
pub const CHATBOT: &str = "chatbot";
pub const CHATBOT_UPDATE_MESSAGES: &str = "chatbot_update_messages";

// Demo subgraph
pub const DEMO_SUBGRAPH: &str = "demo_subgraph";
pub const DEMO_WEATHER_TOOL: &str = "demo_weather_tool";
pub const DEMO_TOOL_HANDLER: &str = "demo_tool_handler";
pub const DEMO_TOOL_INTERRUPT: &str = "demo_tool_interrupt";

// Create project subgraph
pub const CREATE_PROJECT_SUBGRAPH: &str = "create_project_subgraph";
pub const CREATE_PROJECT_SUBGRAPH_INTERFACE_TOOL: &str = "create_project_subgraph_interface_tool";
pub const CREATE_PROJECT_MAIN: &str = "create_project_main";
pub const CREATE_PROJECT_TOOL_HANDLER: &str = "create_project_tool_handler";
pub const CREATE_PROJECT_TOOL_INTERRUPT: &str = "create_project_tool_interrupt";
pub const CREATE_PROJECT_SELECT_DTM_TOOL: &str = "create_project_select_dtm_tool";
pub const CREATE_PROJECT_SELECT_DTM_TOOL_RUNNER: &str = "create_project_select_dtm_tool_runner";
pub const CREATE_PROJECT_SELECT_BUILDINGS_TOOL: &str = "create_project_select_buildings_tool";
pub const CREATE_PROJECT_SELECT_BUILDINGS_TOOL_RUNNER: &str =
    "create_project_select_buildings_tool_runner";
pub const CREATE_PROJECT_SELECT_INFILTRATION_TOOL: &str = "create_project_select_infiltration_tool";
pub const CREATE_PROJECT_SELECT_INFILTRATION_TOOL_RUNNER: &str =
    "create_project_select_infiltration_tool_runner";
pub const CREATE_PROJECT_SELECT_LITHOLOGY_TOOL: &str = "create_project_select_lithology_tool";
pub const CREATE_PROJECT_SELECT_LITHOLOGY_TOOL_RUNNER: &str =
    "create_project_select_lithology_tool_runner";
pub const CREATE_PROJECT_SELECT_OTHER_LAYERS_TOOL: &str = "create_project_select_other_layers_tool";
pub const CREATE_PROJECT_SELECT_OTHER_LAYERS_TOOL_RUNNER: &str =
    "create_project_select_other_layers_tool_runner";

// Flooding rainfall subgraph
pub const FLOODING_RAINFALL_SUBGRAPH: &str = "flooding_rainfall_subgraph";
pub const FLOODING_RAINFALL_SUBGRAPH_INTERFACE_TOOL: &str =
    "flooding_rainfall_subgraph_interface_tool";
pub const FLOODING_RAINFALL_MAIN: &str = "flooding_rainfall_main";
pub const FLOODING_RAINFALL_TOOL_HANDLER: &str = "flooding_rainfall_tool_handler";
pub const FLOODING_RAINFALL_TOOL_INTERRUPT: &str = "flooding_rainfall_tool_interrupt";
pub const FLOODING_RAINFALL_DEFINE_RAIN_TOOL: &str = "flooding_rainfall_define_rain_tool";
pub const FLOODING_RAINFALL_DEFINE_RAIN_TOOL_RUNNER: &str = "flooding_rainfall_define_rain_tool_runner";
pub const FLOODING_RAINFALL_DEFINE_MODEL_TOOL: &str = "flooding_rainfall_define_model_tool";
pub const FLOODING_RAINFALL_DEFINE_MODEL_TOOL_RUNNER: &str =
    "flooding_rainfall_define_model_tool_runner";

// SaferPlaces API subgraph
pub const SAFERPLACES_API_SUBGRAPH: &str = "saferplaces_api_subgraph";
pub const SAFERPLACES_API_TOOL_HANDLER: &str = "saferplaces_api_tool_handler";
pub const SAFERPLACES_API_TOOL_INTERRUPT: &str = "saferplaces_api_tool_interrupt";
pub const DIGITAL_TWIN_TOOL: &str = "digital_twin_tool";
pub const SAFER_RAIN_TOOL: &str = "safer_rain_tool";
pub const SAFERBUILDINGS_TOOL: &str = "saferbuildings_tool";

// SaferCast API subgraph
pub const SAFERCAST_API_SUBGRAPH: &str = "safercast_api_subgraph";
pub const SAFERCAST_API_TOOL_HANDLER: &str = "safercast_api_tool_handler";
pub const SAFERCAST_API_TOOL_INTERRUPT: &str = "safercast_api_tool_interrupt";
pub const ICON2I_INGESTOR_TOOL: &str = "icon2i_ingestor_tool";
pub const ICON2I_RETRIEVER_TOOL: &str = "icon2i_retriever_tool";
pub const DPC_RETRIEVER_TOOL: &str = "dpc_retriever_tool";

// Geospatial operations subgraph
pub const GEOSPATIAL_OPS_SUBGRAPH: &str = "geospatial_ops_subgraph";
pub const GEOSPATIAL_OPS_TOOL_HANDLER: &str = "geospatial_ops_tool_handler";
pub const GEOSPATIAL_OPS_TOOL_INTERRUPT: &str = "geospatial_ops_tool_interrupt";
pub const GEOSPATIAL_OPS_TOOL: &str = "geospatial_ops_tool";
