use regex::Regex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// One capture group from `filename_regex` used to rank files within a
/// differentiator group. Month names and similar non-numeric orderings
/// go through `translation` first (§4.C).
pub struct PriorityField {
    pub capture: String,
    pub translation: Option<HashMap<String, i64>>,
}

impl PriorityField {
    pub fn numeric(capture: impl Into<String>) -> Self {
        PriorityField {
            capture: capture.into(),
            translation: None,
        }
    }

    pub fn translated(capture: impl Into<String>, translation: HashMap<String, i64>) -> Self {
        PriorityField {
            capture: capture.into(),
            translation: Some(translation),
        }
    }

    pub(crate) fn rank(&self, captured: &str) -> i64 {
        if let Some(table) = &self.translation {
            if let Some(v) = table.get(captured) {
                return *v;
            }
        }
        captured.parse::<i64>().unwrap_or(0)
    }
}

/// Configures a single logical log stream made of one or more rotated
/// files under `root` (§4.C).
pub struct LogStreamerConfig {
    pub root: PathBuf,
    pub filename_regex: Regex,
    /// Named capture groups whose concatenation identifies which stream a
    /// file belongs to (e.g. a hostname or shard embedded in the filename).
    pub differentiator: Vec<String>,
    /// Named capture groups, most to least significant, ranking files
    /// within one differentiator group; the highest-ranked file is the
    /// one still being actively written.
    pub priority: Vec<PriorityField>,
    pub oldest_duration: Option<Duration>,
    pub rescan_interval: Duration,
    pub check_interval: Duration,
    /// When a resumed journal's recorded hash no longer matches the bytes
    /// on disk, whether to restart the file from its beginning (`true`,
    /// tolerating duplicate delivery) or jump to its current end (`false`,
    /// tolerating a gap). Delivery is already at-least-once, so the
    /// default favors not losing data over not duplicating it.
    pub resume_from_start_on_hash_mismatch: bool,
}

impl LogStreamerConfig {
    pub fn new(root: PathBuf, filename_regex: Regex) -> Self {
        LogStreamerConfig {
            root,
            filename_regex,
            differentiator: Vec::new(),
            priority: Vec::new(),
            oldest_duration: None,
            rescan_interval: Duration::from_secs(10),
            check_interval: Duration::from_millis(150),
            resume_from_start_on_hash_mismatch: true,
        }
    }
}
