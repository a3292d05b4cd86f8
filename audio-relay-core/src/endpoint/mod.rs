pub mod staged_sink;
pub mod staged_source;
