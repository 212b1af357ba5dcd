mod common;
mod features;

pub mod callback;
pub mod config;
pub mod data_model;
pub mod probe;
pub mod probe_engine;
pub mod report;
pub mod runtime;
pub mod settings;
