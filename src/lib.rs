pub mod accumulator;
pub mod client;
pub mod config;
pub mod errors;
pub mod logging;
pub mod params;
pub mod results;
pub mod retry;
pub mod server;
pub mod sse;
pub mod tools;
pub mod xml_builder;
