//! Frame-rate upscaling job server: a durable queue of video conversion
//! jobs drained by a pool of workers that decode with ffmpeg, synthesize
//! intermediate frames with a RIFE engine, and re-mux with the original
//! audio.

pub mod api;
pub mod command;
pub mod config;
pub mod context;
pub mod domain;
pub mod events;
pub mod fsutil;
pub mod media;
pub mod pool;
pub mod queue;
pub mod rife;
pub mod store;
pub mod sync_ext;
pub mod worker;
