//! ==============================================================================
//! ingest.rs - single-shot tcp ingestion server
//! ==============================================================================
//!
//! protocol:
//!     a sensor node connects, writes one frame, and closes. nothing is sent
//!     back. the server is iterative on purpose: accept -> read -> parse ->
//!     append -> close, one connection at a time. a handful of nodes sending
//!     every few seconds never needs more, and waiting peers queue in the
//!     listen backlog.
//!
//! bounds:
//!     - exactly one read, of at most `max_payload_bytes`. a short read is the
//!       whole message.
//!     - a peer that sends nothing within `idle_timeout` is dropped.
//!
//! any failure is scoped to its connection: logged, connection closed,
//! loop continues.
//!
//! ==============================================================================

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Local;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::config::IngestConfig;
use crate::domain::Reading;
use crate::error::IngestError;
use crate::frame::FrameParser;
use crate::store::RecordStore;

pub struct IngestServer {
    listener: TcpListener,
    store: Arc<RecordStore>,
    parser: FrameParser,
    max_payload_bytes: usize,
    idle_timeout: Duration,
    show_sensor_data: bool,
}

impl IngestServer {
    /// bind the ingestion port; failure here is fatal to the process
    pub async fn bind(config: &IngestConfig, store: Arc<RecordStore>) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(config.listen)
            .await
            .with_context(|| format!("failed to bind ingestion port {}", config.listen))?;

        Ok(Self {
            listener,
            store,
            parser: FrameParser::new(config.channel_prefixes.clone()),
            max_payload_bytes: config.max_payload_bytes,
            idle_timeout: config.idle_timeout(),
            show_sensor_data: false,
        })
    }

    pub fn show_sensor_data(mut self, show: bool) -> Self {
        self.show_sensor_data = show;
        self
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run(self) {
        tracing::info!(addr = ?self.local_addr().ok(), "ingestion server listening");

        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            };

            tracing::debug!(%peer, "connection established");
            match self.handle_connection(stream).await {
                Ok(reading) if self.show_sensor_data => {
                    tracing::info!(
                        %peer,
                        timestamp = %reading.formatted_timestamp(),
                        values = ?reading.values(),
                        extra = ?reading.extra,
                        "stored reading"
                    );
                }
                Ok(_) => tracing::debug!(%peer, "stored reading"),
                Err(e) => tracing::warn!(%peer, error = %e, "dropped frame"),
            }
        }
    }

    /// serve one connection to completion and close it
    pub async fn handle_connection(&self, mut stream: TcpStream) -> Result<Reading, IngestError> {
        let result = self.ingest(&mut stream).await;
        // nothing to report to the node, just close
        let _ = stream.shutdown().await;
        result
    }

    async fn ingest(&self, stream: &mut TcpStream) -> Result<Reading, IngestError> {
        let mut buf = vec![0u8; self.max_payload_bytes];
        let n = tokio::time::timeout(self.idle_timeout, stream.read(&mut buf))
            .await
            .map_err(|_| IngestError::Idle(self.idle_timeout))??;
        if n == 0 {
            return Err(IngestError::Empty);
        }

        let frame = self.parser.parse(&buf[..n])?;
        let reading = frame.into_reading(Local::now().naive_local());

        let store = self.store.clone();
        let stored = tokio::task::spawn_blocking(move || store.append(reading)).await??;
        Ok(stored)
    }
}
