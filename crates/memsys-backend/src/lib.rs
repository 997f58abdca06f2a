//! # memsys-backend
//!
//! The mechanism layer of the memsys memory subsystem: the platform raw
//! allocator ([`raw`]), the canary guard-band codec ([`guard`]), and the
//! lock-free linear arena ([`arena`]). Everything here is `unsafe`-heavy and
//! policy-free; `memsys-core` decides when to reach for the arena, when to
//! wrap a block in guard bands, and how to route deallocation.

#![allow(unsafe_code)]

pub mod arena;
pub mod guard;
pub mod raw;
