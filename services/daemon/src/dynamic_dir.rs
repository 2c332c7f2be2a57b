//! Dynamic plugin directory scanner (§6): walks `<root>/<ticker_interval>/
//! *.toml` every `ticker_interval` seconds, diffing discovered plugin
//! files against running runners to add/remove/restart them.

use crate::config::{self, RunnerConfig};
use crate::pipeline::PipelineConfig;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// One discovered `*.toml` file under a `<root>/<N>/` subdirectory, where
/// `N` is the parent directory's ticker interval in seconds.
struct DiscoveredPlugin {
    path: PathBuf,
    ticker_interval: Duration,
    mtime: std::time::SystemTime,
}

/// Scan `root`'s immediate subdirectories (each named by a non-negative
/// integer) for `*.toml` files, returning them keyed by runner name.
fn scan(root: &Path) -> std::io::Result<HashMap<String, DiscoveredPlugin>> {
    let mut found = HashMap::new();
    let Ok(subdirs) = std::fs::read_dir(root) else {
        return Ok(found);
    };
    for subdir in subdirs.flatten() {
        let Ok(file_type) = subdir.file_type() else { continue };
        if !file_type.is_dir() {
            continue;
        }
        let Some(seconds) = subdir.file_name().to_str().and_then(|s| s.parse::<u64>().ok()) else {
            continue;
        };
        let ticker_interval = Duration::from_secs(seconds);
        let Ok(entries) = std::fs::read_dir(subdir.path()) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("toml") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Ok(metadata) = entry.metadata() else { continue };
            let Ok(mtime) = metadata.modified() else { continue };
            found.insert(
                stem.to_owned(),
                DiscoveredPlugin {
                    path,
                    ticker_interval,
                    mtime,
                },
            );
        }
    }
    Ok(found)
}

/// Parse one discovered file into a [`RunnerConfig`], with `ticker_interval`
/// overridden by the parent directory's name regardless of what (if
/// anything) the file itself specifies (§6).
fn load_runner_config(name: &str, discovered: &DiscoveredPlugin) -> Result<RunnerConfig, String> {
    let toml_str = std::fs::read_to_string(&discovered.path).map_err(|e| e.to_string())?;
    let mut rconfig = config::parse_single_runner(name, &toml_str).map_err(|e| e.to_string())?;
    rconfig.ticker_interval = Some(discovered.ticker_interval);
    Ok(rconfig)
}

/// Runs until `stop` fires, rescanning `root` every `poll_interval` and
/// adding/removing/restarting runners to match what it finds (§6).
pub async fn run(pipeline: Arc<PipelineConfig>, root: PathBuf, poll_interval: Duration, mut stop: tokio::sync::watch::Receiver<bool>) {
    let mut known: HashMap<String, std::time::SystemTime> = HashMap::new();

    loop {
        if *stop.borrow() {
            return;
        }

        match scan(&root) {
            Ok(discovered) => {
                let discovered_names: HashSet<&String> = discovered.keys().collect();
                let known_names: HashSet<String> = known.keys().cloned().collect();

                for name in known_names.iter() {
                    if !discovered_names.contains(name) {
                        info!(runner = %name, "dynamic plugin file removed, stopping runner");
                        pipeline.remove_runner(name).await;
                        known.remove(name);
                    }
                }

                for (name, plugin) in &discovered {
                    let changed = known.get(name).map(|prev_mtime| *prev_mtime != plugin.mtime).unwrap_or(true);
                    if !changed {
                        continue;
                    }
                    match load_runner_config(name, plugin) {
                        Ok(rconfig) => {
                            if known.contains_key(name) {
                                info!(runner = %name, "dynamic plugin file changed, restarting runner");
                                pipeline.remove_runner(name).await;
                            } else {
                                info!(runner = %name, "dynamic plugin file discovered, starting runner");
                            }
                            if let Err(e) = pipeline.add_runner(&rconfig).await {
                                error!(runner = %name, "failed to start dynamic runner: {e}");
                                continue;
                            }
                            known.insert(name.clone(), plugin.mtime);
                        }
                        Err(e) => warn!(runner = %name, "failed to parse dynamic plugin file: {e}"),
                    }
                }
            }
            Err(e) => warn!(root = %root.display(), "failed to scan dynamic plugin directory: {e}"),
        }

        tokio::select! {
            _ = tokio::time::sleep(poll_interval) => {}
            _ = stop.changed() => { if *stop.borrow() { return; } }
        }
    }
}
