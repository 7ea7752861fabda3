//! Rehearse API Library Crate
//!
//! This library contains the web service around `rehearse-core`: the
//! feedback and speech boundaries, the practice-session REST surface,
//! application state and routing. The binaries are thin wrappers around it.

pub mod audio_utils;
pub mod bootstrap;
pub mod boundary;
pub mod config;
pub mod handlers;
pub mod models;
pub mod prompts;
pub mod router;
pub mod sessions;
pub mod state;
