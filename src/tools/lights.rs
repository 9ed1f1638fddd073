//! Light switch tools over an in-memory light board.

use super::{Tool, ToolResult};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Light {
    pub id: u32,
    pub name: String,
    pub is_on: bool,
}

/// Shared light state; reads return the current value, writes replace it
#[derive(Debug, Default)]
pub struct LightBoard {
    lights: Mutex<Vec<Light>>,
}

impl LightBoard {
    pub fn new(lights: Vec<Light>) -> Arc<Self> {
        Arc::new(Self {
            lights: Mutex::new(lights),
        })
    }

    /// Table Lamp and Porch light off, Chandelier on
    pub fn seeded() -> Arc<Self> {
        Self::new(vec![
            Light {
                id: 1,
                name: "Table Lamp".to_string(),
                is_on: false,
            },
            Light {
                id: 2,
                name: "Porch light".to_string(),
                is_on: false,
            },
            Light {
                id: 3,
                name: "Chandelier".to_string(),
                is_on: true,
            },
        ])
    }

    pub fn lights(&self) -> Vec<Light> {
        self.lights
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Set a light's state, returning the updated light or `None` for an unknown id
    pub fn set_state(&self, id: u32, is_on: bool) -> Option<Light> {
        let mut lights = self
            .lights
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let light = lights.iter_mut().find(|l| l.id == id)?;
        light.is_on = is_on;
        Some(light.clone())
    }
}

pub struct GetLightsTool {
    board: Arc<LightBoard>,
}

impl GetLightsTool {
    pub fn new(board: Arc<LightBoard>) -> Self {
        Self { board }
    }
}

#[async_trait]
impl Tool for GetLightsTool {
    fn name(&self) -> &str {
        "get_lights"
    }

    fn description(&self) -> &str {
        "Gets a list of lights and their current state."
    }

    fn parameters(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _params: Value) -> Result<ToolResult> {
        ToolResult::json(&self.board.lights())
    }
}

pub struct ChangeLightStateTool {
    board: Arc<LightBoard>,
}

impl ChangeLightStateTool {
    pub fn new(board: Arc<LightBoard>) -> Self {
        Self { board }
    }
}

#[derive(Deserialize)]
struct ChangeStateParams {
    id: u32,
    is_on: bool,
}

#[async_trait]
impl Tool for ChangeLightStateTool {
    fn name(&self) -> &str {
        "change_state"
    }

    fn description(&self) -> &str {
        "Changes the state of the light."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": { "type": "integer", "description": "Id of the light" },
                "is_on": { "type": "boolean", "description": "New state of the light" }
            },
            "required": ["id", "is_on"]
        })
    }

    async fn execute(&self, params: Value) -> Result<ToolResult> {
        let params: ChangeStateParams =
            serde_json::from_value(params).context("Invalid change_state parameters")?;

        match self.board.set_state(params.id, params.is_on) {
            Some(light) => {
                tracing::info!("Light {} ({}) is now {}", light.id, light.name, on_off(light.is_on));
                ToolResult::json(&light)
            }
            None => Ok(ToolResult::error(format!("No light with id {}", params.id))),
        }
    }
}

fn on_off(is_on: bool) -> &'static str {
    if is_on {
        "on"
    } else {
        "off"
    }
}

pub fn light_tools(board: Arc<LightBoard>) -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(GetLightsTool::new(board.clone())),
        Arc::new(ChangeLightStateTool::new(board)),
    ]
}
