#![allow(dead_code)]

#[path = "../../src/test_helpers.rs"]
mod scripted;

pub use scripted::{ScriptedProvider, Turn};

use async_trait::async_trait;
use rago_core::error::ToolError;
use rago_tools::{Fixture, LightNetwork};
use std::net::SocketAddr;
use std::sync::Mutex;

/// A LAN with fixed bulbs that records power changes.
pub struct FakeLan {
    labels: Vec<&'static str>,
    pub switched: Mutex<Vec<(String, bool)>>,
}

impl FakeLan {
    pub fn new(labels: &[&'static str]) -> Self {
        Self {
            labels: labels.to_vec(),
            switched: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl LightNetwork for FakeLan {
    async fn discover(&self) -> Result<Vec<Fixture>, ToolError> {
        Ok(self
            .labels
            .iter()
            .enumerate()
            .map(|(i, label)| Fixture {
                label: label.to_string(),
                addr: SocketAddr::from(([192, 168, 1, 50 + i as u8], 56700)),
                target: 0xd073_d500_0000 + i as u64,
            })
            .collect())
    }

    async fn set_power(&self, fixture: &Fixture, on: bool) -> Result<(), ToolError> {
        self.switched.lock().unwrap().push((fixture.label.clone(), on));
        Ok(())
    }
}
