pub mod cli;
pub mod collect;
pub mod commands;
pub mod config;
pub mod search;
pub mod service;
pub mod snippet;
pub mod source;
pub mod state;
pub mod telemetry;
pub mod tree;

pub use notedex_indexer::{Document, RankedHit};
