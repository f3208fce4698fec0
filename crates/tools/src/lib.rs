//! Local actions for rago.
//!
//! The model can act on the host through exactly two tools:
//! - `executeCommand` (textual alias `Command`): run a shell command
//! - `controlLights` (textual aliases `Lifx`, `Light`): switch a LIFX light

pub mod lifx;
pub mod lights;
pub mod shell;

use rago_config::AppConfig;
use rago_core::tool::ToolRegistry;
use std::sync::Arc;

pub use lifx::LifxNetwork;
pub use lights::{Fixture, LightControlTool, LightNetwork};
pub use shell::ShellTool;

/// Build the fixed action table.
///
/// Security defaults:
/// - Shell: only the commands in `command_policy.allowed_commands`, no chaining
/// - Lights: only the fixtures named in `lights.fixtures`
pub fn action_table(config: &AppConfig, network: Arc<dyn LightNetwork>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(ShellTool::from_config(&config.command_policy)));
    registry.register(Box::new(LightControlTool::new(
        network,
        config.lights.fixtures.clone(),
    )));
    registry
}
