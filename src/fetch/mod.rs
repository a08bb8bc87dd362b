//! Resilient HTTP access across ranked mirror URLs.
//!
//! This module turns a list of equivalent mirror URLs into a single
//! successful text fetch, JSON fetch, or streaming file download. Each URL
//! gets a fixed retry budget for transient failures; connectivity-class
//! errors then fall through to the next mirror in ranked order, while
//! protocol and format errors propagate immediately.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use versync_core::fetch::MirrorClient;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = MirrorClient::new(Duration::from_secs(3), Duration::from_secs(5), 3);
//! let mirrors = vec![
//!     "https://primary.example.com/channel/current.txt".to_string(),
//!     "https://backup.example.com/channel/current.txt".to_string(),
//! ];
//! let newest = client.fetch_text_multiple(&mirrors).await?;
//! println!("newest version: {}", newest.trim());
//! # Ok(())
//! # }
//! ```

mod client;
mod error;

pub use client::MirrorClient;
pub use error::FetchError;
