pub mod controller;
pub mod pump;
pub mod relay_session;
