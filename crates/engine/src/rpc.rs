// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! RPC dispatch and the streaming response sink.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use burrow_core::ConnectionId;
use burrow_wire::{Outgoing, RpcResponse};
use serde_json::Value;

use crate::agent::{Call, CallSource};
use crate::connection::ConnectionSink;
use crate::error::EngineError;
use crate::instance::Instance;

/// Response sink handed to RPC method implementations.
///
/// Non-streaming methods ignore it and just return a value. Streaming
/// methods push chunks with [`StreamSink::send`] and finish with
/// [`StreamSink::end`] or [`StreamSink::error`]; closing twice is a no-op,
/// and a handler that errors out after streaming is auto-closed with an
/// error frame.
pub struct StreamSink {
    sink: Arc<dyn ConnectionSink>,
    request_id: String,
    streamed: AtomicBool,
    closed: AtomicBool,
}

impl StreamSink {
    pub(crate) fn new(sink: Arc<dyn ConnectionSink>, request_id: String) -> Self {
        Self {
            sink,
            request_id,
            streamed: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// Emit one `done: false` chunk.
    pub async fn send(&self, chunk: Value) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        self.streamed.store(true, Ordering::SeqCst);
        self.emit(RpcResponse::chunk(self.request_id.as_str(), chunk)).await;
    }

    /// Close the stream with a terminal `done: true` frame.
    pub async fn end(&self, final_result: Option<Value>) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.emit(RpcResponse::ok(self.request_id.as_str(), final_result)).await;
    }

    /// Close the stream with an error frame.
    pub async fn error(&self, message: &str) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.emit(RpcResponse::err(self.request_id.as_str(), message)).await;
    }

    /// Whether any chunk has been pushed.
    pub fn is_streaming(&self) -> bool {
        self.streamed.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn emit(&self, response: RpcResponse) {
        match Outgoing::Rpc(response).encode() {
            Ok(text) => self.sink.send(text).await,
            Err(e) => tracing::error!(error = %e, "dropping unencodable rpc frame"),
        }
    }
}

impl Instance {
    /// Dispatch one inbound RPC request to the agent.
    pub(crate) async fn dispatch_rpc(
        &self,
        connection: &ConnectionId,
        request_id: String,
        method: &str,
        args: Vec<Value>,
    ) -> Result<(), EngineError> {
        let sink = {
            let connections = self.core.connections.lock();
            match connections.get(connection) {
                Some(entry) => entry.sink.clone(),
                None => return Err(EngineError::UnknownConnection(connection.clone())),
            }
        };

        if !self.core.agent.is_callable(method) || !self.core.agent.has_method(method) {
            let response = RpcResponse::err(
                &request_id,
                &format!("method '{method}' does not exist or is not callable"),
            );
            self.send_frame(&sink, &Outgoing::Rpc(response)).await;
            return Ok(());
        }

        let stream = StreamSink::new(sink, request_id);
        let call = Call {
            method,
            payload: Value::Array(args),
            source: CallSource::Rpc { connection, stream: &stream },
        };
        match self.core.agent.call(self, call).await {
            Ok(result) => {
                // A method that already closed its stream owns the terminal
                // frame; otherwise the return value is the response.
                if !stream.is_closed() {
                    let final_result = if result.is_null() { None } else { Some(result) };
                    stream.end(final_result).await;
                }
            }
            Err(e) => {
                tracing::warn!(method, error = %e, "rpc method failed");
                stream.error(&e.to_string()).await;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "rpc_tests.rs"]
mod tests;
