//! Light-control tool: the Lifx action.
//!
//! Switches a named fixture on or off. Fixture names are a fixed
//! enumeration from config; the device itself is found by matching its
//! group label on the network.

use async_trait::async_trait;
use rago_core::error::ToolError;
use rago_core::tool::{Tool, ToolResult};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info};

const TOOL_NAME: &str = "controlLights";

/// A light found on the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fixture {
    /// Group label, e.g. "Bedroom"
    pub label: String,
    pub addr: SocketAddr,
    pub target: u64,
}

/// The device network lights are reached through.
#[async_trait]
pub trait LightNetwork: Send + Sync {
    /// Find every fixture currently answering on the network.
    async fn discover(&self) -> Result<Vec<Fixture>, ToolError>;

    /// Switch a fixture's power.
    async fn set_power(&self, fixture: &Fixture, on: bool) -> Result<(), ToolError>;
}

#[derive(Debug, Deserialize)]
struct LightArgs {
    #[serde(rename = "deviceName", alias = "light_name")]
    device_name: String,
    state: bool,
}

/// Parse "on"/"off" style words.
fn parse_state(word: &str) -> Option<bool> {
    match word.trim().to_ascii_lowercase().as_str() {
        "on" | "true" | "1" | "yes" => Some(true),
        "off" | "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

fn state_word(on: bool) -> &'static str {
    if on { "on" } else { "off" }
}

pub struct LightControlTool {
    network: Arc<dyn LightNetwork>,
    fixtures: Vec<String>,
}

impl LightControlTool {
    pub fn new(network: Arc<dyn LightNetwork>, fixtures: Vec<String>) -> Self {
        Self { network, fixtures }
    }

    fn known_fixture(&self, name: &str) -> Option<&str> {
        self.fixtures
            .iter()
            .find(|f| f.eq_ignore_ascii_case(name))
            .map(|f| f.as_str())
    }
}

#[async_trait]
impl Tool for LightControlTool {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        "Turn a named light on or off."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "deviceName": {
                    "type": "string",
                    "enum": self.fixtures,
                    "description": "The light to control"
                },
                "state": {
                    "type": "boolean",
                    "description": "true to switch the light on, false to switch it off"
                }
            },
            "required": ["deviceName", "state"]
        })
    }

    fn marker_aliases(&self) -> &'static [&'static str] {
        &["Lifx", "Light"]
    }

    fn parse_marker_argument(&self, raw: &str) -> Option<serde_json::Value> {
        let raw = raw.trim();
        if raw.starts_with('{') {
            let args: LightArgs = serde_json::from_str(raw).ok()?;
            return Some(serde_json::json!({ "deviceName": args.device_name, "state": args.state }));
        }

        // "bedroom, on" or "living room on"
        let (device, state) = match raw.split_once(',') {
            Some(parts) => parts,
            None => raw.rsplit_once(char::is_whitespace)?,
        };
        let device = device.trim().trim_matches(|c| c == '"' || c == '\'');
        let state = parse_state(state)?;
        let device = self.known_fixture(device)?;
        Some(serde_json::json!({ "deviceName": device, "state": state }))
    }

    fn describe_call(&self, arguments: &serde_json::Value) -> String {
        match serde_json::from_value::<LightArgs>(arguments.clone()) {
            Ok(args) => format!("set {} light to {}", args.device_name, state_word(args.state)),
            Err(_) => format!("{TOOL_NAME} {arguments}"),
        }
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let args: LightArgs = serde_json::from_value(arguments)
            .map_err(|e| ToolError::InvalidArguments(format!("Invalid light arguments: {e}")))?;

        if self.known_fixture(&args.device_name).is_none() {
            return Err(ToolError::InvalidArguments(format!(
                "Unknown light '{}' (expected one of: {})",
                args.device_name,
                self.fixtures.join(", ")
            )));
        }

        let fixtures = self.network.discover().await?;
        debug!(found = fixtures.len(), device = %args.device_name, "Looking up light");

        let Some(fixture) = fixtures
            .iter()
            .find(|f| f.label.eq_ignore_ascii_case(&args.device_name))
        else {
            return Ok(ToolResult::failed(
                format!("Unable to find {}", args.device_name),
                "device not found",
            ));
        };

        self.network.set_power(fixture, args.state).await?;
        info!(light = %fixture.label, on = args.state, "Light switched");

        Ok(ToolResult::ok(format!(
            "{} light has been set to {}",
            fixture.label, args.state
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records power changes instead of touching the network.
    pub struct MockNetwork {
        pub labels: Vec<&'static str>,
        pub switched: Mutex<Vec<(String, bool)>>,
    }

    impl MockNetwork {
        pub fn with(labels: &[&'static str]) -> Arc<Self> {
            Arc::new(Self {
                labels: labels.to_vec(),
                switched: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LightNetwork for MockNetwork {
        async fn discover(&self) -> Result<Vec<Fixture>, ToolError> {
            Ok(self
                .labels
                .iter()
                .enumerate()
                .map(|(i, label)| Fixture {
                    label: label.to_string(),
                    addr: SocketAddr::from(([127, 0, 0, 1], 56700)),
                    target: i as u64 + 1,
                })
                .collect())
        }

        async fn set_power(&self, fixture: &Fixture, on: bool) -> Result<(), ToolError> {
            self.switched.lock().unwrap().push((fixture.label.clone(), on));
            Ok(())
        }
    }

    fn tool(network: Arc<MockNetwork>) -> LightControlTool {
        LightControlTool::new(network, vec!["bedroom".into(), "living room".into()])
    }

    #[test]
    fn schema_enumerates_fixtures() {
        let schema = tool(MockNetwork::with(&[])).parameters_schema();
        assert_eq!(
            schema["properties"]["deviceName"]["enum"],
            serde_json::json!(["bedroom", "living room"])
        );
        assert_eq!(schema["required"], serde_json::json!(["deviceName", "state"]));
    }

    #[test]
    fn marker_argument_forms() {
        let t = tool(MockNetwork::with(&[]));
        assert_eq!(
            t.parse_marker_argument("bedroom, on"),
            Some(serde_json::json!({"deviceName": "bedroom", "state": true}))
        );
        assert_eq!(
            t.parse_marker_argument("Living Room off"),
            Some(serde_json::json!({"deviceName": "living room", "state": false}))
        );
        assert_eq!(
            t.parse_marker_argument(r#"{"light_name": "bedroom", "state": false}"#),
            Some(serde_json::json!({"deviceName": "bedroom", "state": false}))
        );
        assert!(t.parse_marker_argument("bedroom").is_none());
        assert!(t.parse_marker_argument("kitchen, on").is_none());
        assert!(t.parse_marker_argument("bedroom, dim").is_none());
    }

    #[test]
    fn describe_call_names_device_and_state() {
        let t = tool(MockNetwork::with(&[]));
        assert_eq!(
            t.describe_call(&serde_json::json!({"deviceName": "bedroom", "state": true})),
            "set bedroom light to on"
        );
    }

    #[tokio::test]
    async fn switches_matching_fixture() {
        let network = MockNetwork::with(&["Bedroom", "Living Room"]);
        let result = tool(network.clone())
            .execute(serde_json::json!({"deviceName": "bedroom", "state": true}))
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.output, "Bedroom light has been set to true");
        assert_eq!(*network.switched.lock().unwrap(), vec![("Bedroom".to_string(), true)]);
    }

    #[tokio::test]
    async fn light_name_alias_accepted() {
        let network = MockNetwork::with(&["Living Room"]);
        let result = tool(network)
            .execute(serde_json::json!({"light_name": "living room", "state": false}))
            .await
            .unwrap();
        assert_eq!(result.output, "Living Room light has been set to false");
    }

    #[tokio::test]
    async fn missing_device_is_failed_result() {
        let network = MockNetwork::with(&["Living Room"]);
        let result = tool(network.clone())
            .execute(serde_json::json!({"deviceName": "bedroom", "state": true}))
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.output, "Unable to find bedroom");
        assert!(network.switched.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_fixture_rejected() {
        let result = tool(MockNetwork::with(&["Kitchen"]))
            .execute(serde_json::json!({"deviceName": "kitchen", "state": true}))
            .await;
        assert!(matches!(result, Err(ToolError::InvalidArguments(_))));
    }

    #[tokio::test]
    async fn wrong_state_type_rejected() {
        let result = tool(MockNetwork::with(&["Bedroom"]))
            .execute(serde_json::json!({"deviceName": "bedroom", "state": "on"}))
            .await;
        assert!(matches!(result, Err(ToolError::InvalidArguments(_))));
    }
}
