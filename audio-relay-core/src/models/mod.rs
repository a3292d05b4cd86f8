pub mod config;
pub mod device;
pub mod error;
pub mod event;
pub mod geometry;
pub mod state;
pub mod stats;
pub mod summary;
