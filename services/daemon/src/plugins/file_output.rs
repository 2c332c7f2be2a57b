//! Appends every delivered message's payload to a file, batching writes
//! per `flush_count`/`flush_interval`/`flush_operator` (§4.B, §8 S4).
//!
//! A write is acknowledged (the buffered [`DeliveredPack`]s are dropped,
//! releasing claims and advancing any queue cursor) whether or not the
//! underlying `write` call returned a short count. A truncated write is a
//! real data-loss event — logged as an error — but Heka-style outputs
//! never retry a partial write against the same bytes, since there is no
//! way to know which bytes a partial write actually persisted.

use crate::config::RunnerConfig;
use crate::plugin::{Output, PluginInstance, RunnerContext, RunnerError};
use crate::router::DeliveredPack;
use async_trait::async_trait;
use serde::Deserialize;
use std::io::Write;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::error;

#[derive(Debug, Deserialize)]
struct FileOutputParams {
    path: String,
    #[serde(default = "default_flush_count")]
    flush_count: u64,
    #[serde(default = "default_flush_operator")]
    flush_operator: String,
    #[serde(default)]
    flush_interval_ms: Option<u64>,
}

fn default_flush_count() -> u64 {
    1
}

fn default_flush_operator() -> String {
    "OR".to_owned()
}

pub struct FileOutput {
    path: String,
    flush_count: u64,
    and_operator: bool,
    flush_interval: Option<Duration>,
}

impl FileOutput {
    pub fn build(rconfig: &RunnerConfig) -> Result<PluginInstance, String> {
        let params: FileOutputParams = super::parse_params(&rconfig.params)?;
        let and_operator = match params.flush_operator.to_ascii_uppercase().as_str() {
            "AND" => true,
            "OR" => false,
            other => return Err(format!("file_output.flush_operator must be AND/OR, got '{other}'")),
        };
        Ok(PluginInstance::Output(Box::new(FileOutput {
            path: params.path,
            flush_count: params.flush_count.max(1),
            and_operator,
            flush_interval: params.flush_interval_ms.map(Duration::from_millis),
        })))
    }

    fn should_flush_on_arrival(&self, pending_len: u64, interval_elapsed: bool) -> bool {
        let count_met = pending_len >= self.flush_count;
        if self.flush_interval.is_none() {
            return count_met;
        }
        if self.and_operator {
            count_met && interval_elapsed
        } else {
            count_met || interval_elapsed
        }
    }
}

#[async_trait]
impl Output for FileOutput {
    async fn run(&mut self, inbound: &mut mpsc::Receiver<DeliveredPack>, ctx: RunnerContext) -> Result<(), RunnerError> {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| RunnerError::Fatal(format!("opening output file '{}': {e}", self.path)))?;

        let mut buffer: Vec<u8> = Vec::new();
        let mut pending: Vec<DeliveredPack> = Vec::new();
        let mut interval_elapsed_since_last_flush = false;

        let mut ticker = self.flush_interval.map(|d| {
            let mut t = tokio::time::interval(d);
            t.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            t
        });

        loop {
            if ctx.stop_requested() {
                flush(&mut file, &mut buffer, &mut pending, &self.path);
                return Ok(());
            }

            tokio::select! {
                biased;
                maybe = inbound.recv() => {
                    match maybe {
                        Some(delivered) => {
                            buffer.extend_from_slice(delivered.message.payload().as_bytes());
                            buffer.push(b'\n');
                            pending.push(delivered);
                            if self.should_flush_on_arrival(pending.len() as u64, interval_elapsed_since_last_flush) {
                                flush(&mut file, &mut buffer, &mut pending, &self.path);
                                interval_elapsed_since_last_flush = false;
                            }
                        }
                        None => {
                            flush(&mut file, &mut buffer, &mut pending, &self.path);
                            return Ok(());
                        }
                    }
                }
                _ = async { ticker.as_mut().unwrap().tick().await }, if ticker.is_some() => {
                    interval_elapsed_since_last_flush = true;
                    if !pending.is_empty() {
                        flush(&mut file, &mut buffer, &mut pending, &self.path);
                        interval_elapsed_since_last_flush = false;
                    }
                }
            }
        }
    }
}

/// Write whatever is buffered and drop every pending [`DeliveredPack`],
/// acking them regardless of whether the write was short.
fn flush(file: &mut std::fs::File, buffer: &mut Vec<u8>, pending: &mut Vec<DeliveredPack>, path: &str) {
    if !buffer.is_empty() {
        match file.write(buffer) {
            Ok(n) if n < buffer.len() => {
                error!(path, requested = buffer.len(), written = n, "truncated write to output file, data lost");
            }
            Ok(_) => {}
            Err(e) => error!(path, "write to output file failed: {e}"),
        }
        if let Err(e) = file.flush() {
            error!(path, "flushing output file failed: {e}");
        }
        buffer.clear();
    }
    pending.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pack_pool::PackPool;
    use crate::plugin::PackAcquirer;
    use crate::runner::RunnerCounters;
    use conduit_test_support::sample_message;
    use std::sync::Arc;
    use tokio::sync::watch;

    #[test]
    fn or_operator_flushes_on_either_condition() {
        let out = FileOutput {
            path: String::new(),
            flush_count: 3,
            and_operator: false,
            flush_interval: Some(Duration::from_secs(1)),
        };
        assert!(out.should_flush_on_arrival(3, false));
        assert!(out.should_flush_on_arrival(1, true));
        assert!(!out.should_flush_on_arrival(1, false));
    }

    #[test]
    fn and_operator_requires_both_conditions() {
        let out = FileOutput {
            path: String::new(),
            flush_count: 3,
            and_operator: true,
            flush_interval: Some(Duration::from_secs(1)),
        };
        assert!(!out.should_flush_on_arrival(3, false));
        assert!(!out.should_flush_on_arrival(1, true));
        assert!(out.should_flush_on_arrival(3, true));
    }

    #[test]
    fn no_interval_configured_falls_back_to_count_only() {
        let out = FileOutput {
            path: String::new(),
            flush_count: 2,
            and_operator: false,
            flush_interval: None,
        };
        assert!(!out.should_flush_on_arrival(1, true));
        assert!(out.should_flush_on_arrival(2, false));
    }

    #[tokio::test]
    async fn writes_and_acks_buffered_messages_once_flush_count_is_reached() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.log");
        let mut out = FileOutput {
            path: path.to_str().unwrap().to_owned(),
            flush_count: 2,
            and_operator: false,
            flush_interval: None,
        };

        let (tx, mut inbound) = mpsc::channel(8);
        let pool = PackAcquirer::new(PackPool::new(4));
        let (router_tx, _router_rx) = mpsc::channel(4);
        let (_stop_tx, stop_rx) = watch::channel(false);
        let ctx = RunnerContext {
            runner_name: Arc::from("test_file_output"),
            pool,
            router_tx,
            counters: Arc::new(RunnerCounters::default()),
            stop: stop_rx,
        };

        let (ack_tx, mut ack_rx) = mpsc::unbounded_channel();
        let mut msg1 = sample_message(1, "t");
        msg1.set_payload("hello");
        let mut msg2 = sample_message(2, "t");
        msg2.set_payload("world");
        tx.send(DeliveredPack::from_buffer(msg1, 0, None, "c1".to_owned(), ack_tx.clone()))
            .await
            .unwrap();
        tx.send(DeliveredPack::from_buffer(msg2, 0, None, "c2".to_owned(), ack_tx.clone()))
            .await
            .unwrap();
        drop(tx);

        out.run(&mut inbound, ctx).await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "hello\nworld\n");

        // Both DeliveredPacks were dropped on flush, acking their cursors.
        assert_eq!(ack_rx.try_recv().unwrap(), "c1");
        assert_eq!(ack_rx.try_recv().unwrap(), "c2");
    }
}
