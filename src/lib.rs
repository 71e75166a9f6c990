//! Prometheus exporter for a FreeSWITCH switch, fed over the inbound event
//! socket.

pub mod agent;
pub mod collector;
pub mod config;
pub mod esl;
pub mod export;
pub mod state;
