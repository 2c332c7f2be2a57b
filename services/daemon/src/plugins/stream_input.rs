//! Accepts TCP connections carrying framed messages (§4.A envelope),
//! resyncing past corrupted frames rather than dropping the connection
//! (§8 scenario S3).

use crate::config::RunnerConfig;
use crate::plugin::{Input, PluginInstance, RunnerContext, RunnerError};
use async_trait::async_trait;
use conduit_message::Message;
use conduit_splitter::{FramingSplitter, PollOutcome, StreamDriver, StreamDriverConfig};
use serde::Deserialize;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tracing::warn;

#[derive(Debug, Deserialize)]
struct TcpFrameInputParams {
    bind: String,
}

pub struct TcpFrameInput {
    bind: String,
}

impl TcpFrameInput {
    pub fn build(rconfig: &RunnerConfig) -> Result<PluginInstance, String> {
        let params: TcpFrameInputParams = super::parse_params(&rconfig.params)?;
        Ok(PluginInstance::Input(Box::new(TcpFrameInput { bind: params.bind })))
    }
}

#[async_trait]
impl Input for TcpFrameInput {
    async fn run(&mut self, ctx: RunnerContext) -> Result<(), RunnerError> {
        let listener = TcpListener::bind(&self.bind)
            .await
            .map_err(|e| RunnerError::Retryable(format!("binding '{}': {e}", self.bind)))?;

        loop {
            if ctx.stop_requested() {
                return Ok(());
            }

            let (socket, peer) = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!("accept failed: {e}");
                        continue;
                    }
                },
                _ = tokio::time::sleep(std::time::Duration::from_millis(200)) => continue,
            };

            let conn_ctx = ctx.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(socket, conn_ctx).await {
                    warn!(%peer, "connection handler exited: {e}");
                }
            });
        }
    }
}

async fn handle_connection(mut socket: tokio::net::TcpStream, ctx: RunnerContext) -> std::io::Result<()> {
    let mut driver = StreamDriver::new(FramingSplitter::new(), StreamDriverConfig::default());
    let mut read_buf = vec![0u8; 16 * 1024];

    loop {
        if ctx.stop_requested() {
            return Ok(());
        }
        let n = socket.read(&mut read_buf).await?;
        if n == 0 {
            return Ok(());
        }
        driver.feed(&read_buf[..n]);

        loop {
            match driver.poll() {
                PollOutcome::Record(record) => match Message::decode(&record.bytes) {
                    Ok(message) => ctx.submit(message, 0).await,
                    Err(e) => warn!("discarding undecodable framed message: {e}"),
                },
                PollOutcome::Error(e) => warn!("frame resync after split error: {e}"),
                PollOutcome::NeedMoreData => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pack_pool::PackPool;
    use crate::plugin::PackAcquirer;
    use crate::runner::RunnerCounters;
    use conduit_message::frame::encode_frame;
    use std::sync::Arc;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;
    use tokio::sync::{mpsc, watch};

    fn test_ctx() -> (RunnerContext, mpsc::Receiver<conduit_message::Pack>) {
        let pool = PackAcquirer::new(PackPool::new(8));
        let (router_tx, router_rx) = mpsc::channel(8);
        let (_stop_tx, stop_rx) = watch::channel(false);
        let ctx = RunnerContext {
            runner_name: Arc::from("test_tcp_frame_input"),
            pool,
            router_tx,
            counters: Arc::new(RunnerCounters::default()),
            stop: stop_rx,
        };
        (ctx, router_rx)
    }

    #[tokio::test]
    async fn resyncs_past_garbage_and_decodes_the_next_frame() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut client = tokio::net::TcpStream::connect(addr).await.unwrap();
        let (server_socket, _peer) = listener.accept().await.unwrap();

        let encoded = Message::new([7; 16], 0, "sample.type").encode();
        let framed = encode_frame(&encoded, None);
        let mut payload = b"GARBAGE".to_vec();
        payload.extend_from_slice(&framed);
        client.write_all(&payload).await.unwrap();
        client.shutdown().await.unwrap();

        let (ctx, mut rx) = test_ctx();
        handle_connection(server_socket, ctx).await.unwrap();

        let pack = rx.recv().await.unwrap();
        assert_eq!(pack.message.r#type(), "sample.type");
    }
}
