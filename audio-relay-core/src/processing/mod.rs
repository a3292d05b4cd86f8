pub mod pcm;
pub mod relay_buffer;
