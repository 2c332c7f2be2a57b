use super::config::LogStreamerConfig;
use super::discover::{self, DiscoveredFile, FileIdentity};
use super::journal::SeekJournal;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Where to read from next, and whether that means we just rotated away
/// from a previous file.
#[derive(Debug, Clone)]
pub struct ResolvedTarget {
    pub path: PathBuf,
    pub start_offset: u64,
    pub rotated_from: Option<PathBuf>,
}

struct CurrentFile {
    path: PathBuf,
    identity: FileIdentity,
    priority_key: Vec<i64>,
}

/// Tracks one logical stream (one differentiator group) across its
/// rotated files, backed by a persisted [`SeekJournal`] (§4.C).
pub struct LogStream {
    slug: String,
    journal_path: PathBuf,
    journal: SeekJournal,
    current: Option<CurrentFile>,
    resume_from_start_on_hash_mismatch: bool,
}

impl LogStream {
    pub fn new(config: &LogStreamerConfig, differentiator_key: &str) -> io::Result<Self> {
        let slug = slugify(differentiator_key);
        let journal_path = config.root.join("seekjournals").join(&slug);
        let journal = SeekJournal::load(&journal_path)?.unwrap_or_default();
        Ok(LogStream {
            slug,
            journal_path,
            journal,
            current: None,
            resume_from_start_on_hash_mismatch: config.resume_from_start_on_hash_mismatch,
        })
    }

    pub fn slug(&self) -> &str {
        &self.slug
    }

    /// Decide which file we should be reading from, given the current
    /// directory scan for this stream's differentiator group (ascending
    /// priority, i.e. the active file last). Handles rotation: if the file
    /// we were tailing was replaced (new inode, or shrank below our last
    /// offset), we only switch once a strictly higher-priority file has
    /// appeared, so the rotated file is always finished to EOF first by
    /// the caller's normal tail loop.
    pub fn resolve(&mut self, files: &[DiscoveredFile]) -> io::Result<Option<ResolvedTarget>> {
        if files.is_empty() {
            return Ok(None);
        }

        if let Some(cur) = &self.current {
            if let Some(disc) = files.iter().find(|f| f.path == cur.path) {
                let live_identity = discover::identity_of(&disc.path)?;
                let rotated = live_identity != cur.identity || disc.len < self.journal.seek;
                if !rotated {
                    return Ok(Some(ResolvedTarget {
                        path: disc.path.clone(),
                        start_offset: self.journal.seek,
                        rotated_from: None,
                    }));
                }
            }

            let prior_path = cur.path.clone();
            let prior_priority = cur.priority_key.clone();
            return match files.iter().find(|f| f.priority_key > prior_priority) {
                Some(next) => {
                    self.current = Some(CurrentFile {
                        path: next.path.clone(),
                        identity: discover::identity_of(&next.path)?,
                        priority_key: next.priority_key.clone(),
                    });
                    self.journal = SeekJournal::default();
                    Ok(Some(ResolvedTarget {
                        path: next.path.clone(),
                        start_offset: 0,
                        rotated_from: Some(prior_path),
                    }))
                }
                // No newer file has shown up yet; stay put until the next
                // rescan, finishing the rotated file is still in progress.
                None => Ok(None),
            };
        }

        // First resolution for this stream: see whether the journal's
        // hash still matches the tail of one of the candidate files,
        // checked from most to least recently rotated.
        for file in files.iter().rev() {
            if self.journal.seek == 0 || file.len < self.journal.seek {
                continue;
            }
            let Ok(bytes) = read_window(&file.path, &self.journal) else {
                continue;
            };
            if self.journal.still_valid(&bytes) {
                self.current = Some(CurrentFile {
                    path: file.path.clone(),
                    identity: discover::identity_of(&file.path)?,
                    priority_key: file.priority_key.clone(),
                });
                return Ok(Some(ResolvedTarget {
                    path: file.path.clone(),
                    start_offset: self.journal.seek,
                    rotated_from: None,
                }));
            }
        }

        let target = files.last().expect("checked non-empty above");
        let start_offset = if self.journal.seek == 0 || self.resume_from_start_on_hash_mismatch {
            0
        } else {
            target.len
        };
        self.current = Some(CurrentFile {
            path: target.path.clone(),
            identity: discover::identity_of(&target.path)?,
            priority_key: target.priority_key.clone(),
        });
        self.journal = SeekJournal::default();
        self.journal.seek = start_offset;
        Ok(Some(ResolvedTarget {
            path: target.path.clone(),
            start_offset,
            rotated_from: None,
        }))
    }

    pub fn record_progress(&mut self, new_seek: u64, preceding_bytes: &[u8]) {
        self.journal.advance(new_seek, preceding_bytes);
    }

    pub fn persist(&self) -> io::Result<()> {
        self.journal.save(&self.journal_path)
    }
}

fn read_window(path: &Path, journal: &SeekJournal) -> io::Result<Vec<u8>> {
    let mut f = std::fs::File::open(path)?;
    f.seek(SeekFrom::Start(journal.last_start))?;
    let mut buf = vec![0u8; journal.last_len as usize];
    f.read_exact(&mut buf)?;
    Ok(buf)
}

fn slugify(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logstreamer::config::PriorityField;
    use crate::logstreamer::discover;
    use regex::Regex;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_file(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents).unwrap();
        path
    }

    fn base_config(root: PathBuf) -> LogStreamerConfig {
        let mut config = LogStreamerConfig::new(
            root,
            Regex::new(r"^app\.(?P<seq>\d+)\.log$").unwrap(),
        );
        config.priority = vec![PriorityField::numeric("seq")];
        config
    }

    #[test]
    fn first_resolve_with_no_journal_targets_highest_priority_file_from_start() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "app.1.log", b"old rotated content\n");
        write_file(dir.path(), "app.2.log", b"current content\n");
        let config = base_config(dir.path().to_path_buf());

        let files = discover::scan(&config).unwrap();
        let mut groups = discover::group_by_stream(files);
        let group = groups.remove("").unwrap();

        let mut stream = LogStream::new(&config, "").unwrap();
        let target = stream.resolve(&group).unwrap().unwrap();
        assert!(target.path.ends_with("app.2.log"));
        assert_eq!(target.start_offset, 0);
    }

    #[test]
    fn resume_with_matching_hash_continues_from_saved_seek() {
        let dir = tempdir().unwrap();
        let content = b"0123456789";
        write_file(dir.path(), "app.1.log", content);
        let config = base_config(dir.path().to_path_buf());

        let files = discover::scan(&config).unwrap();
        let mut groups = discover::group_by_stream(files);
        let group = groups.remove("").unwrap();

        let mut stream = LogStream::new(&config, "").unwrap();
        stream.record_progress(5, &content[0..5]);
        stream.persist().unwrap();

        let mut resumed = LogStream::new(&config, "").unwrap();
        let target = resumed.resolve(&group).unwrap().unwrap();
        assert_eq!(target.start_offset, 5);
    }

    #[test]
    fn rotation_waits_until_a_higher_priority_file_appears() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "app.1.log", b"first file\n");
        let config = base_config(dir.path().to_path_buf());
        let files = discover::scan(&config).unwrap();
        let mut groups = discover::group_by_stream(files);
        let group = groups.remove("").unwrap();

        let mut stream = LogStream::new(&config, "").unwrap();
        let first = stream.resolve(&group).unwrap().unwrap();
        assert!(first.path.ends_with("app.1.log"));

        // Simulate rotation: the file shrinks below our last offset.
        stream.record_progress(1000, b"not really this long");
        let still_only_one = stream.resolve(&group).unwrap();
        assert!(still_only_one.is_none());

        write_file(dir.path(), "app.2.log", b"second file\n");
        let files = discover::scan(&config).unwrap();
        let mut groups = discover::group_by_stream(files);
        let group = groups.remove("").unwrap();
        let rotated = stream.resolve(&group).unwrap().unwrap();
        assert!(rotated.path.ends_with("app.2.log"));
        assert_eq!(rotated.rotated_from.unwrap(), first.path);
    }
}
