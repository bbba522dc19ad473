// src/lib.rs — Library root for reprompt

pub mod collab;
pub mod core;
pub mod infra;
