//! Standard I/O transport
//!
//! Newline-delimited JSON-RPC over stdin/stdout. All diagnostics go to
//! stderr via tracing; stdout carries protocol messages only.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter},
    sync::Mutex,
};
use tracing::{debug, error, info, warn};

use super::{JsonRpcMessage, McpMessage, MessageHandler, Transport};

pub struct StdioTransport {
    writer: Arc<Mutex<BufWriter<tokio::io::Stdout>>>,
    shutdown: Arc<Mutex<bool>>,
}

impl StdioTransport {
    pub fn new() -> Self {
        Self {
            writer: Arc::new(Mutex::new(BufWriter::new(tokio::io::stdout()))),
            shutdown: Arc::new(Mutex::new(false)),
        }
    }

    async fn write_message(&self, message: &JsonRpcMessage) -> Result<()> {
        let json = serde_json::to_string(message).context("failed to serialize response")?;
        debug!("sending: {json}");
        let mut writer = self.writer.lock().await;
        writer.write_all(json.as_bytes()).await.context("write to stdout failed")?;
        writer.write_all(b"\n").await.context("write to stdout failed")?;
        writer.flush().await.context("flush of stdout failed")?;
        Ok(())
    }

    async fn process(&self, handler: Box<dyn MessageHandler + Send + Sync>) -> Result<()> {
        let mut reader = BufReader::new(tokio::io::stdin());
        let mut line = String::new();
        info!("stdio transport ready");

        loop {
            if *self.shutdown.lock().await {
                info!("shutdown requested, leaving message loop");
                break;
            }
            line.clear();
            let read = reader.read_line(&mut line).await.context("read from stdin failed")?;
            if read == 0 {
                debug!("EOF on stdin");
                break;
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            debug!("received: {trimmed}");

            let message = match serde_json::from_str::<JsonRpcMessage>(trimmed) {
                Ok(message) => message,
                Err(e) => {
                    warn!("unparseable message: {e}");
                    continue;
                }
            };
            let decoded = match McpMessage::from_jsonrpc(message) {
                Ok(decoded) => decoded,
                Err(e) => {
                    warn!("unsupported message: {e}");
                    continue;
                }
            };

            match handler.handle_message(decoded).await {
                Ok(Some(response)) => {
                    if let Err(e) = self.write_message(&response).await {
                        error!("failed to send response: {e}");
                    }
                }
                Ok(None) => {}
                Err(e) => error!("handler error: {e}"),
            }
        }
        Ok(())
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn start(&self, handler: Box<dyn MessageHandler + Send + Sync>) -> Result<()> {
        *self.shutdown.lock().await = false;
        self.process(handler).await
    }

    async fn shutdown(&self) -> Result<()> {
        *self.shutdown.lock().await = true;
        if let Ok(mut writer) = self.writer.try_lock() {
            if let Err(e) = writer.flush().await {
                warn!("failed to flush stdout during shutdown: {e}");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_flag() {
        let transport = StdioTransport::new();
        assert!(!*transport.shutdown.lock().await);
        transport.shutdown().await.unwrap();
        assert!(*transport.shutdown.lock().await);
    }
}
