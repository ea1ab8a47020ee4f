// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Connection registry: attachments, capability flags, broadcasts, and
//! inbound frame routing.

use std::sync::Arc;

use async_trait::async_trait;
use burrow_core::ConnectionId;
use burrow_wire::{Incoming, Outgoing};
use serde_json::{Map, Value};

use crate::agent::StateSource;
use crate::error::EngineError;
use crate::instance::Instance;

/// Internal attachment key: connection may not send state updates.
const READONLY_KEY: &str = "__burrow_readonly";
/// Internal attachment key: connection receives no protocol frames.
const NO_PROTOCOL_KEY: &str = "__burrow_no_protocol";

/// Outbound half of an attached session. The host owns the transport; the
/// engine only ever pushes text frames at it.
#[async_trait]
pub trait ConnectionSink: Send + Sync + 'static {
    async fn send(&self, frame: String);
}

/// A live attachment: the sink plus its state object. Internal capability
/// flags live inside the same attachment as user state but are stripped
/// from every user-visible read.
pub(crate) struct ConnectionEntry {
    pub(crate) sink: Arc<dyn ConnectionSink>,
    pub(crate) attachment: Map<String, Value>,
}

impl ConnectionEntry {
    fn flag(&self, key: &str) -> bool {
        self.attachment.get(key).and_then(Value::as_bool).unwrap_or(false)
    }
}

impl Instance {
    /// Attach a connection.
    ///
    /// Two policy decisions are taken here, both overridable by the agent:
    /// whether the connection is readonly, and whether it receives protocol
    /// frames at all. Protocol-enabled connections immediately get the
    /// identity frame (unless the class opts out), the current state (if
    /// defined), and the MCP snapshot.
    pub async fn connect(
        &self,
        id: ConnectionId,
        sink: Arc<dyn ConnectionSink>,
    ) -> Result<(), EngineError> {
        self.guard_destroyed()?;
        let readonly = self.core.agent.should_connection_be_readonly(&id);
        let protocol = self.core.agent.should_send_protocol_messages(&id);

        let mut attachment = Map::new();
        if readonly {
            attachment.insert(READONLY_KEY.to_string(), Value::Bool(true));
        }
        if !protocol {
            attachment.insert(NO_PROTOCOL_KEY.to_string(), Value::Bool(true));
        }
        self.core
            .connections
            .lock()
            .insert(id.clone(), ConnectionEntry { sink: sink.clone(), attachment });

        if protocol {
            if self.core.options.send_identity_on_connect {
                self.send_frame(
                    &sink,
                    &Outgoing::Identity {
                        name: self.core.name.clone(),
                        agent: self.core.agent.kind().to_string(),
                    },
                )
                .await;
            }
            if let Some(state) = self.state()? {
                self.send_frame(&sink, &Outgoing::State { state }).await;
            }
            self.send_frame(&sink, &Outgoing::McpServers { mcp: self.mcp_snapshot() }).await;
        }

        self.core.agent.on_connect(self, &id).await;
        Ok(())
    }

    /// Detach a connection. Idempotent.
    pub async fn disconnect(&self, id: &ConnectionId) {
        let existed = self.core.connections.lock().remove(id).is_some();
        if existed && !self.is_destroyed() {
            self.core.agent.on_close(self, id).await;
        }
    }

    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.core.connections.lock().keys().cloned().collect()
    }

    /// Route one inbound text frame: RPC request, state update, or (for
    /// anything that does not parse as a protocol frame) the raw handler.
    pub async fn on_connection_message(
        &self,
        id: &ConnectionId,
        raw: &str,
    ) -> Result<(), EngineError> {
        self.guard_destroyed()?;
        match Incoming::parse(raw) {
            Some(Incoming::Rpc { id: request_id, method, args }) => {
                self.dispatch_rpc(id, request_id, &method, args).await
            }
            Some(Incoming::SetState { state }) => {
                match self.set_state(state, StateSource::Connection(id.clone())).await {
                    Ok(()) => Ok(()),
                    Err(e @ (EngineError::StateRejected(_) | EngineError::ReadonlyConnection(_))) => {
                        // The full error stays in the server log; the client
                        // gets a generic rejection.
                        tracing::warn!(connection = %id, error = %e, "state update rejected");
                        self.send_to(
                            id,
                            &Outgoing::StateError { error: "State update rejected".to_string() },
                        )
                        .await;
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
            None => {
                self.core.agent.on_message(self, id, raw).await;
                Ok(())
            }
        }
    }

    /// User-visible connection state: the attachment minus internal keys.
    pub fn connection_state(&self, id: &ConnectionId) -> Result<Value, EngineError> {
        let connections = self.core.connections.lock();
        let entry = connections
            .get(id)
            .ok_or_else(|| EngineError::UnknownConnection(id.clone()))?;
        let visible: Map<String, Value> = entry
            .attachment
            .iter()
            .filter(|(k, _)| !is_internal_key(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(Value::Object(visible))
    }

    /// Replace user-visible connection state. Internal flags present before
    /// the call are merged back and survive unchanged.
    pub fn set_connection_state(
        &self,
        id: &ConnectionId,
        state: Value,
    ) -> Result<(), EngineError> {
        let mut connections = self.core.connections.lock();
        let entry = connections
            .get_mut(id)
            .ok_or_else(|| EngineError::UnknownConnection(id.clone()))?;
        let mut next = match state {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        next.retain(|k, _| !is_internal_key(k));
        for key in [READONLY_KEY, NO_PROTOCOL_KEY] {
            if let Some(flag) = entry.attachment.get(key) {
                next.insert(key.to_string(), flag.clone());
            }
        }
        entry.attachment = next;
        Ok(())
    }

    /// Flip the readonly flag. Clearing it removes the internal key entirely
    /// so no residue leaks into serialized attachments.
    pub fn set_connection_readonly(
        &self,
        id: &ConnectionId,
        readonly: bool,
    ) -> Result<(), EngineError> {
        let mut connections = self.core.connections.lock();
        let entry = connections
            .get_mut(id)
            .ok_or_else(|| EngineError::UnknownConnection(id.clone()))?;
        if readonly {
            entry.attachment.insert(READONLY_KEY.to_string(), Value::Bool(true));
        } else {
            entry.attachment.remove(READONLY_KEY);
        }
        Ok(())
    }

    pub fn is_connection_readonly(&self, id: &ConnectionId) -> bool {
        self.core
            .connections
            .lock()
            .get(id)
            .map(|entry| entry.flag(READONLY_KEY))
            .unwrap_or(false)
    }

    /// Broadcast the new state to every protocol-enabled connection except
    /// the originating one.
    pub(crate) async fn broadcast_state(&self, state: &Value, exclude: Option<&ConnectionId>) {
        let targets: Vec<Arc<dyn ConnectionSink>> = {
            let connections = self.core.connections.lock();
            connections
                .iter()
                .filter(|&(id, entry)| Some(id) != exclude && !entry.flag(NO_PROTOCOL_KEY))
                .map(|(_, entry)| entry.sink.clone())
                .collect()
        };
        let frame = Outgoing::State { state: state.clone() };
        for sink in targets {
            self.send_frame(&sink, &frame).await;
        }
    }

    /// Send a frame to one connection, if still attached.
    pub(crate) async fn send_to(&self, id: &ConnectionId, frame: &Outgoing) {
        let sink = self.core.connections.lock().get(id).map(|entry| entry.sink.clone());
        if let Some(sink) = sink {
            self.send_frame(&sink, frame).await;
        }
    }

    pub(crate) async fn send_frame(&self, sink: &Arc<dyn ConnectionSink>, frame: &Outgoing) {
        match frame.encode() {
            Ok(text) => sink.send(text).await,
            Err(e) => tracing::error!(error = %e, "dropping unencodable frame"),
        }
    }
}

fn is_internal_key(key: &str) -> bool {
    key == READONLY_KEY || key == NO_PROTOCOL_KEY
}

#[cfg(test)]
#[path = "connection_tests.rs"]
mod tests;
