//! End-to-end pipeline wiring: a `log_streamer_input` runner tails a file
//! on disk and the router delivers what it produces to a `file_output`
//! runner, exercising config loading, plugin construction, and routing
//! together rather than any one module in isolation.

use conduitd::config;
use conduitd::pipeline::PipelineConfig;
use conduitd::plugin::PluginRegistry;
use conduitd::plugins;
use conduitd::runner::ShutdownTrigger;
use std::io::Write;
use std::time::Duration;

#[tokio::test]
async fn log_line_tailed_from_disk_is_routed_to_file_output() {
    let input_dir = tempfile::tempdir().unwrap();
    let output_dir = tempfile::tempdir().unwrap();
    let log_path = input_dir.path().join("access.log");
    let out_path = output_dir.path().join("sink.log");

    std::fs::File::create(&log_path)
        .unwrap()
        .write_all(b"request one\nrequest two\n")
        .unwrap();

    let toml = format!(
        r#"
        base_dir = "{base_dir}"

        [[runners]]
        name = "tail_access_log"
        kind = "input"
        plugin = "log_streamer_input"
        root = "{root}"
        filename_regex = "^access\\.log$"
        check_interval_ms = 10

        [[runners]]
        name = "sink"
        kind = "output"
        plugin = "file_output"
        path = "{out_path}"
        flush_count = 1
        "#,
        base_dir = input_dir.path().display(),
        root = input_dir.path().display(),
        out_path = out_path.display(),
    );

    let cfg = config::load_config_from_str(&toml).expect("config should parse");

    let mut registry = PluginRegistry::new();
    plugins::register_builtin(&mut registry);
    let (shutdown, _fatal_rx) = ShutdownTrigger::new();
    let pipeline = PipelineConfig::new(&cfg, registry, shutdown);

    for rconfig in &cfg.runners {
        pipeline.add_runner(rconfig).await.expect("runner should start");
    }

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok(contents) = std::fs::read_to_string(&out_path) {
            if contents.contains("request one") && contents.contains("request two") {
                break;
            }
        }
        assert!(std::time::Instant::now() < deadline, "timed out waiting for sink output");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    pipeline.shutdown().await;
}
