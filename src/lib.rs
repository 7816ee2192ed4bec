pub mod aqi;
pub mod config;
pub mod events;
pub mod fetch;
pub mod hub;
pub mod logging;
pub mod normalize;
pub mod parser;
pub mod pipeline;
pub mod poller;
pub mod reading;
pub mod store;
