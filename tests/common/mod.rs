//! Common test infrastructure
//!
//! Tests should only import from this module, not from internal submodules.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::TestEnv;
//!
//! #[tokio::test]
//! async fn test_generates_preview() {
//!     let env = TestEnv::new().await;
//!     let id = env.insert_song("Song", &env.host.url("/files/song.mp3"));
//!     let pipeline = env.pipeline(TestEnv::options()).await;
//!     let outcome = pipeline.process_song(&env.song(id)).await;
//! }
//! ```

#![allow(dead_code)]

mod constants;
mod fake_host;
mod fake_media;
mod fixtures;

pub use constants::*;
pub use fake_host::{gated_token, FakeHost};
pub use fake_media::{fake_audio, fake_source, FakeMediaTool, FAKE_CLIP_BYTES, FAKE_SOURCE_BYTES};
pub use fixtures::{list_mp3s, TestEnv};
