//! Tails one or more rotated log files into line-delimited messages,
//! resuming from a persisted seek journal across restarts (§4.C).

use crate::config::RunnerConfig;
use crate::plugin::{Input, PluginInstance, RunnerContext, RunnerError};
use async_trait::async_trait;
use conduit_message::Message;
use conduit_splitter::logstreamer::{group_by_stream, scan, LogStream, LogStreamerConfig, PriorityField};
use conduit_splitter::{PollOutcome, StreamDriver, StreamDriverConfig, TokenSplitter};
use serde::Deserialize;
use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

const TAIL_HASH_WINDOW: usize = 4096;

#[derive(Debug, Deserialize)]
struct LogStreamerParams {
    root: String,
    filename_regex: String,
    #[serde(default)]
    differentiator: Vec<String>,
    #[serde(default)]
    priority: Vec<String>,
    #[serde(default)]
    rescan_interval_ms: Option<u64>,
    #[serde(default)]
    check_interval_ms: Option<u64>,
    #[serde(default)]
    resume_from_start_on_hash_mismatch: Option<bool>,
    #[serde(default = "default_message_type")]
    message_type: String,
    #[serde(default)]
    logger: Option<String>,
}

fn default_message_type() -> String {
    "log_line".to_owned()
}

struct PerStream {
    log_stream: LogStream,
    driver: StreamDriver<TokenSplitter>,
    file: Option<std::fs::File>,
    current_path: Option<PathBuf>,
    read_offset: u64,
    tail: Vec<u8>,
}

pub struct LogStreamerInput {
    config: LogStreamerConfig,
    message_type: String,
    logger: Option<String>,
    streams: HashMap<String, PerStream>,
}

impl LogStreamerInput {
    pub fn build(rconfig: &RunnerConfig) -> Result<PluginInstance, String> {
        let params: LogStreamerParams = super::parse_params(&rconfig.params)?;
        let regex = regex::Regex::new(&params.filename_regex).map_err(|e| e.to_string())?;
        let mut config = LogStreamerConfig::new(PathBuf::from(params.root), regex);
        config.differentiator = params.differentiator;
        config.priority = params.priority.into_iter().map(PriorityField::numeric).collect();
        if let Some(ms) = params.rescan_interval_ms {
            config.rescan_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = params.check_interval_ms {
            config.check_interval = Duration::from_millis(ms);
        }
        if let Some(resume) = params.resume_from_start_on_hash_mismatch {
            config.resume_from_start_on_hash_mismatch = resume;
        }
        Ok(PluginInstance::Input(Box::new(LogStreamerInput {
            config,
            message_type: params.message_type,
            logger: params.logger,
            streams: HashMap::new(),
        })))
    }

    /// One pass: rescan the directory, resolve each stream's target file,
    /// read whatever new bytes have appeared, and emit them as messages.
    async fn tick(&mut self, ctx: &RunnerContext) -> Result<(), RunnerError> {
        let files = scan(&self.config).map_err(|e| RunnerError::Retryable(format!("scanning log directory: {e}")))?;
        let groups = group_by_stream(files);

        for (key, group_files) in &groups {
            if !self.streams.contains_key(key) {
                let log_stream = LogStream::new(&self.config, key)
                    .map_err(|e| RunnerError::Retryable(format!("opening seek journal for '{key}': {e}")))?;
                self.streams.insert(
                    key.clone(),
                    PerStream {
                        log_stream,
                        driver: StreamDriver::new(TokenSplitter::default(), StreamDriverConfig::default()),
                        file: None,
                        current_path: None,
                        read_offset: 0,
                        tail: Vec::new(),
                    },
                );
            }
            let stream = self.streams.get_mut(key).expect("just inserted");

            let target = match stream.log_stream.resolve(group_files) {
                Ok(Some(t)) => t,
                Ok(None) => continue,
                Err(e) => {
                    warn!(stream = %key, "failed to resolve log stream target: {e}");
                    continue;
                }
            };

            if stream.current_path.as_deref() != Some(target.path.as_path()) {
                match std::fs::File::open(&target.path) {
                    Ok(mut f) => {
                        if f.seek(SeekFrom::Start(target.start_offset)).is_err() {
                            warn!(path = %target.path.display(), "failed to seek to resume offset");
                            continue;
                        }
                        stream.file = Some(f);
                        stream.current_path = Some(target.path.clone());
                        stream.read_offset = target.start_offset;
                        stream.driver = StreamDriver::new(TokenSplitter::default(), StreamDriverConfig::default());
                        stream.tail.clear();
                    }
                    Err(e) => {
                        warn!(path = %target.path.display(), "failed to open log file: {e}");
                        continue;
                    }
                }
            }

            let Some(file) = stream.file.as_mut() else { continue };
            let mut buf = Vec::new();
            match file.read_to_end(&mut buf) {
                Ok(0) => continue,
                Ok(n) => {
                    stream.read_offset += n as u64;
                    stream.tail.extend_from_slice(&buf);
                    if stream.tail.len() > TAIL_HASH_WINDOW {
                        let excess = stream.tail.len() - TAIL_HASH_WINDOW;
                        stream.tail.drain(0..excess);
                    }
                    stream.driver.feed(&buf);
                }
                Err(e) => {
                    warn!(path = %target.path.display(), "error reading log file: {e}");
                    continue;
                }
            }

            loop {
                match stream.driver.poll() {
                    PollOutcome::Record(record) => {
                        let mut message = Message::new(*uuid::Uuid::new_v4().as_bytes(), now_ns(), self.message_type.as_str());
                        message.set_payload(String::from_utf8_lossy(&record.bytes).into_owned());
                        if let Some(logger) = &self.logger {
                            message.set_logger(logger.clone());
                        }
                        ctx.submit(message, 0).await;
                    }
                    PollOutcome::Error(e) => warn!(stream = %key, "log stream split error: {e}"),
                    PollOutcome::NeedMoreData => break,
                }
            }

            stream.log_stream.record_progress(stream.read_offset, &stream.tail);
            if let Err(e) = stream.log_stream.persist() {
                warn!(stream = %key, "failed to persist seek journal: {e}");
            }
        }

        Ok(())
    }
}

#[async_trait]
impl Input for LogStreamerInput {
    async fn run(&mut self, ctx: RunnerContext) -> Result<(), RunnerError> {
        let mut check = tokio::time::interval(self.config.check_interval);
        check.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            if ctx.stop_requested() {
                return Ok(());
            }
            check.tick().await;
            self.tick(&ctx).await?;
        }
    }
}

fn now_ns() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pack_pool::PackPool;
    use crate::plugin::PackAcquirer;
    use crate::runner::RunnerCounters;
    use std::io::Write as _;
    use std::sync::Arc;
    use tokio::sync::{mpsc, watch};

    fn test_ctx() -> (RunnerContext, mpsc::Receiver<conduit_message::Pack>) {
        let pool = PackAcquirer::new(PackPool::new(8));
        let (router_tx, router_rx) = mpsc::channel(8);
        let (_stop_tx, stop_rx) = watch::channel(false);
        let ctx = RunnerContext {
            runner_name: Arc::from("test_log_streamer"),
            pool,
            router_tx,
            counters: Arc::new(RunnerCounters::default()),
            stop: stop_rx,
        };
        (ctx, router_rx)
    }

    fn write_file(dir: &std::path::Path, name: &str, contents: &[u8]) {
        std::fs::File::create(dir.join(name)).unwrap().write_all(contents).unwrap();
    }

    #[tokio::test]
    async fn tails_new_lines_and_follows_rotation_to_a_higher_priority_file() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "app.1.log", b"line-one\nline-two\n");

        let regex = regex::Regex::new(r"^app\.(?P<seq>\d+)\.log$").unwrap();
        let mut config = LogStreamerConfig::new(dir.path().to_path_buf(), regex);
        config.priority = vec![PriorityField::numeric("seq")];

        let mut input = LogStreamerInput {
            config,
            message_type: "log_line".to_owned(),
            logger: None,
            streams: HashMap::new(),
        };

        let (ctx, mut rx) = test_ctx();
        input.tick(&ctx).await.unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.message.payload(), "line-one");
        let second = rx.recv().await.unwrap();
        assert_eq!(second.message.payload(), "line-two");

        // Force rotation the way the splitter crate's own stream tests do:
        // advance the journal past the file's real length.
        input
            .streams
            .get_mut("")
            .unwrap()
            .log_stream
            .record_progress(1000, b"not really this long");

        // No higher-priority file has appeared yet, so the rotated file
        // stays put until the next rescan.
        input.tick(&ctx).await.unwrap();
        assert!(rx.try_recv().is_err());

        write_file(dir.path(), "app.2.log", b"line-three\n");
        input.tick(&ctx).await.unwrap();
        let third = rx.recv().await.unwrap();
        assert_eq!(third.message.payload(), "line-three");
    }
}
