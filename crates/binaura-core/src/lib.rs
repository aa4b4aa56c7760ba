//! Binaura Core - real-time binaural spatialization engine

pub mod config;
pub mod device;
pub mod dsp;
pub mod engine;
pub mod hal;
pub mod preset;
pub mod renderer;
pub mod types;

pub use types::*;
