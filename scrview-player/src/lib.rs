//! # scrview-player
//!
//! Headless front end for recorded mirroring sessions: opens a recording,
//! registers the configured viewers, plays it through a
//! [`Session`](scrview_core::Session) and optionally saves the first
//! viewer's last image as a PPM snapshot.

pub mod config;
pub mod player;
