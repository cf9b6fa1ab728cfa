//! CLI subcommand implementations for runstream.
//!
//! - [`serve`] - run the server until SIGINT/SIGTERM
//! - [`push`] - producer client for the push endpoint
//! - [`tail`] - observer client for the pull endpoint
//!
//! # Usage
//!
//! Commands are invoked from the main CLI dispatcher:
//!
//! ```ignore
//! use runstream::commands;
//!
//! commands::serve::run(config).await?;
//! commands::tail::run("http://localhost:5002", &run, "X-RUN-ID").await?;
//! ```

pub mod push;
pub mod serve;
pub mod tail;

#[doc(inline)]
pub use push::PushOptions;
#[doc(inline)]
pub use tail::{SseFrame, SseParser};
