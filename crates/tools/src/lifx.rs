//! LIFX LAN client.
//!
//! Packets are built and parsed by `lifx-core`; this module owns the UDP
//! transport: broadcast discovery, the group-label lookup and acknowledged
//! power changes.

use async_trait::async_trait;
use lifx_core::{BuildOptions, Message, PowerLevel, RawMessage, Service};
use rago_config::LightsConfig;
use rago_core::error::ToolError;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::lights::{Fixture, LightNetwork};

const ACK_TIMEOUT: Duration = Duration::from_millis(500);
const SET_POWER_ATTEMPTS: usize = 3;

fn io_error(e: std::io::Error) -> ToolError {
    ToolError::ExecutionFailed {
        tool_name: "controlLights".into(),
        reason: format!("LIFX network error: {e}"),
    }
}

fn protocol_error(e: lifx_core::Error) -> ToolError {
    ToolError::ExecutionFailed {
        tool_name: "controlLights".into(),
        reason: format!("LIFX protocol error: {e}"),
    }
}

/// `StateGroup` labels are NUL-padded to 32 bytes.
fn group_label(label: impl std::fmt::Display) -> String {
    label.to_string().trim_end_matches('\0').trim().to_string()
}

/// A message received from a device, tagged with who sent it.
struct Reply {
    target: u64,
    from: SocketAddr,
    message: Message,
}

/// LIFX devices reachable over UDP on the local network.
pub struct LifxNetwork {
    broadcast_addr: SocketAddr,
    discovery_timeout: Duration,
    source: u32,
    sequence: AtomicU8,
}

impl LifxNetwork {
    pub fn new(broadcast_addr: SocketAddr, discovery_timeout: Duration) -> Self {
        // Source 0 asks devices to broadcast their replies.
        let source = rand::random::<u32>().max(2);
        Self {
            broadcast_addr,
            discovery_timeout,
            source,
            sequence: AtomicU8::new(0),
        }
    }

    pub fn from_config(config: &LightsConfig) -> Result<Self, ToolError> {
        let broadcast_addr = config.broadcast_addr.parse().map_err(|e| {
            ToolError::InvalidArguments(format!(
                "Invalid lights.broadcast_addr '{}': {e}",
                config.broadcast_addr
            ))
        })?;
        Ok(Self::new(
            broadcast_addr,
            Duration::from_millis(config.discovery_timeout_ms),
        ))
    }

    /// Encode `message` for `target` (`None` broadcasts). Returns the bytes
    /// and the sequence number stamped on them.
    fn packet(
        &self,
        target: Option<u64>,
        message: Message,
        ack_required: bool,
    ) -> Result<(Vec<u8>, u8), ToolError> {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let options = BuildOptions {
            target,
            ack_required,
            res_required: !ack_required,
            sequence,
            source: self.source,
            ..BuildOptions::default()
        };
        let bytes = RawMessage::build(&options, message)
            .and_then(|raw| raw.pack())
            .map_err(protocol_error)?;
        Ok((bytes, sequence))
    }

    async fn bind() -> Result<UdpSocket, ToolError> {
        let socket = UdpSocket::bind("0.0.0.0:0").await.map_err(io_error)?;
        socket.set_broadcast(true).map_err(io_error)?;
        Ok(socket)
    }

    /// Read replies addressed to us until `deadline`, handing each to
    /// `on_reply`. Stops early when `on_reply` returns `true`.
    async fn collect_until(
        &self,
        socket: &UdpSocket,
        deadline: Instant,
        mut on_reply: impl FnMut(Reply) -> bool,
    ) -> Result<(), ToolError> {
        let mut buf = [0u8; 512];
        loop {
            let (len, from) = match tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await {
                Err(_) => return Ok(()),
                Ok(Err(e)) => return Err(io_error(e)),
                Ok(Ok(received)) => received,
            };
            let Ok(raw) = RawMessage::unpack(&buf[..len]) else {
                trace!(%from, len, "Ignoring non-LIFX datagram");
                continue;
            };
            if raw.frame.source != self.source {
                continue;
            }
            let Ok(message) = Message::from_raw(&raw) else {
                trace!(%from, typ = raw.protocol_header.typ, "Ignoring unknown LIFX message");
                continue;
            };
            let reply = Reply {
                target: raw.frame_addr.target,
                from,
                message,
            };
            if on_reply(reply) {
                return Ok(());
            }
        }
    }
}

#[async_trait]
impl LightNetwork for LifxNetwork {
    async fn discover(&self) -> Result<Vec<Fixture>, ToolError> {
        let socket = Self::bind().await?;
        let half = self.discovery_timeout / 2;

        let (get_service, _) = self.packet(None, Message::GetService, false)?;
        socket
            .send_to(&get_service, self.broadcast_addr)
            .await
            .map_err(io_error)?;

        let mut devices: HashMap<u64, SocketAddr> = HashMap::new();
        self.collect_until(&socket, Instant::now() + half, |reply| {
            if let Message::StateService {
                service: Service::UDP,
                port,
            } = reply.message
                && let Ok(port) = u16::try_from(port)
            {
                devices.insert(reply.target, SocketAddr::new(reply.from.ip(), port));
            }
            false
        })
        .await?;

        debug!(count = devices.len(), "LIFX devices answered discovery");
        if devices.is_empty() {
            return Ok(Vec::new());
        }

        for (target, addr) in &devices {
            let (get_group, _) = self.packet(Some(*target), Message::GetGroup, false)?;
            socket.send_to(&get_group, addr).await.map_err(io_error)?;
        }

        let mut fixtures: Vec<Fixture> = Vec::new();
        let expected = devices.len();
        self.collect_until(&socket, Instant::now() + half, |reply| {
            if let Message::StateGroup { label, .. } = reply.message
                && let Some(addr) = devices.get(&reply.target)
                && !fixtures.iter().any(|f| f.target == reply.target)
            {
                fixtures.push(Fixture {
                    label: group_label(label),
                    addr: *addr,
                    target: reply.target,
                });
            }
            fixtures.len() == expected
        })
        .await?;

        Ok(fixtures)
    }

    async fn set_power(&self, fixture: &Fixture, on: bool) -> Result<(), ToolError> {
        let socket = Self::bind().await?;
        let level = if on {
            PowerLevel::Enabled
        } else {
            PowerLevel::Standby
        };

        for attempt in 1..=SET_POWER_ATTEMPTS {
            let (bytes, sequence) =
                self.packet(Some(fixture.target), Message::SetPower { level }, true)?;
            socket.send_to(&bytes, fixture.addr).await.map_err(io_error)?;

            let mut acked = false;
            self.collect_until(&socket, Instant::now() + ACK_TIMEOUT, |reply| {
                acked = matches!(reply.message, Message::Acknowledgement { seq } if seq == sequence);
                acked
            })
            .await?;

            if acked {
                debug!(label = %fixture.label, on, "LIFX power set");
                return Ok(());
            }
            warn!(label = %fixture.label, attempt, "No acknowledgement from LIFX device");
        }

        Err(ToolError::ExecutionFailed {
            tool_name: "controlLights".into(),
            reason: format!("{} did not acknowledge the power change", fixture.label),
        })
    }
}
