// src/core/mod.rs — Core correction-loop engine

pub mod correction;
pub mod pipeline;
pub mod scoring;
pub mod telemetry;
pub mod template;
pub mod types;
