//! # memsys-membrane
//!
//! Shared low-level primitives for the memsys memory subsystem: pointer and
//! alignment arithmetic, and process-wide configuration. No allocation logic
//! lives here — see `memsys-backend` for the raw allocator and arena, and
//! `memsys-core` for the public façade.

pub mod config;
pub mod hint;
pub mod pointer;

pub use config::Config;
pub use hint::Hint;
