//! Concrete plugins built on the capability traits in `crate::plugin`
//! (§4.B "a small built-in set covers the common cases").

mod file_output;
mod log_streamer_input;
mod stream_input;

use crate::plugin::PluginRegistry;

/// Register every built-in plugin under the name a `[[runners]].plugin`
/// field would reference.
pub fn register_builtin(registry: &mut PluginRegistry) {
    registry.register("log_streamer_input", log_streamer_input::LogStreamerInput::build);
    registry.register("file_output", file_output::FileOutput::build);
    registry.register("tcp_frame_input", stream_input::TcpFrameInput::build);
}

/// `RunnerConfig.params` is generic `toml::Value`; round-trip it through a
/// string to reuse `toml`'s own `Deserialize` support for a plugin's typed
/// parameter struct rather than hand-rolling a `Value` walker.
pub(crate) fn parse_params<T: serde::de::DeserializeOwned>(value: &toml::Value) -> Result<T, String> {
    let s = toml::to_string(value).map_err(|e| format!("re-serializing plugin params: {e}"))?;
    toml::from_str(&s).map_err(|e| format!("invalid plugin params: {e}"))
}
