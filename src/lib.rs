//! Portal snapshot library.
//!
//! Logs into the PIS-GR requests portal with a browser session, waits for a
//! scheduled instant, then repeatedly snapshots the applications page during
//! a short window, re-authenticating when the session drops. Snapshots can
//! optionally be zipped and emailed afterwards.

// Allow raw string hashes for safety - they're harmless and prevent issues if content changes
#![allow(clippy::needless_raw_string_hashes)]

pub mod auth;
pub mod config;
pub mod constants;
pub mod credentials;
pub mod fs_utils;
pub mod poller;
pub mod schedule;
pub mod session;
pub mod shipper;
