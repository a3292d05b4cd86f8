pub mod capture_source;
pub mod playback_sink;
pub mod player;
pub mod recorder;
