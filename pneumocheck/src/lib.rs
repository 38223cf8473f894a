mod routes;

pub mod app;
pub mod config;
pub mod controller;
pub mod image;
pub mod prediction;
pub mod server;
pub mod session;
pub mod telemetry;

pub use app::start_app;
