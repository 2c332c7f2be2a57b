use super::config::LogStreamerConfig;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

#[cfg(unix)]
use std::os::unix::fs::MetadataExt;

/// Uniquely identifies an inode so rotation (unlink + recreate, or log
/// rotation tools that move the file) can be detected even when the path
/// stays the same (§4.C).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileIdentity {
    #[cfg(unix)]
    dev: u64,
    #[cfg(unix)]
    ino: u64,
    #[cfg(not(unix))]
    len_and_created: (u64, Option<SystemTime>),
}

impl FileIdentity {
    pub fn of(metadata: &std::fs::Metadata) -> Self {
        #[cfg(unix)]
        {
            FileIdentity {
                dev: metadata.dev(),
                ino: metadata.ino(),
            }
        }
        #[cfg(not(unix))]
        {
            FileIdentity {
                len_and_created: (metadata.len(), metadata.created().ok()),
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    pub differentiator_key: String,
    pub priority_key: Vec<i64>,
    pub modified: SystemTime,
    pub len: u64,
}

/// Walk `config.root` non-recursively, matching `filename_regex` against
/// each entry's file name, grouping by the differentiator captures and
/// ranking by the priority captures. Files outside `oldest_duration` are
/// skipped entirely.
pub fn scan(config: &LogStreamerConfig) -> std::io::Result<Vec<DiscoveredFile>> {
    let mut out = Vec::new();
    let now = SystemTime::now();

    for entry in std::fs::read_dir(&config.root)? {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        let Some(caps) = config.filename_regex.captures(file_name) else {
            continue;
        };
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        if let Some(max_age) = config.oldest_duration {
            let modified = metadata.modified()?;
            if now.duration_since(modified).unwrap_or_default() > max_age {
                continue;
            }
        }

        let differentiator_key = config
            .differentiator
            .iter()
            .map(|name| caps.name(name).map(|m| m.as_str()).unwrap_or(""))
            .collect::<Vec<_>>()
            .join("\u{1}");

        let priority_key = config
            .priority
            .iter()
            .map(|field| {
                let captured = caps.name(&field.capture).map(|m| m.as_str()).unwrap_or("");
                field.rank(captured)
            })
            .collect();

        out.push(DiscoveredFile {
            path: entry.path(),
            differentiator_key,
            priority_key,
            modified: metadata.modified()?,
            len: metadata.len(),
        });
    }

    Ok(out)
}

/// Group discovered files by differentiator key, each group sorted
/// ascending by priority (oldest/lowest-priority rotated file first, the
/// actively-written file last).
pub fn group_by_stream(mut files: Vec<DiscoveredFile>) -> HashMap<String, Vec<DiscoveredFile>> {
    files.sort_by(|a, b| a.priority_key.cmp(&b.priority_key));
    let mut groups: HashMap<String, Vec<DiscoveredFile>> = HashMap::new();
    for f in files {
        groups.entry(f.differentiator_key.clone()).or_default().push(f);
    }
    groups
}

pub fn identity_of(path: &Path) -> std::io::Result<FileIdentity> {
    Ok(FileIdentity::of(&std::fs::metadata(path)?))
}
