//! SSRF-safe egress subsystem.
//!
//! # Data Flow
//! ```text
//! Caller-supplied URL:
//!     → client.rs (token bucket, deadline, redirect loop)
//!     → validate.rs (URL checks, host/port policy)
//!     → resolver.rs (A and AAAA lookups)
//!     → security::ip_filter (forbidden ranges)
//!     → download.rs (size and content-type limits on the body)
//! ```
//!
//! # Design Decisions
//! - Every hop is validated from scratch
//! - Connections are pinned to validated addresses (no DNS rebinding window)
//! - SSRF and rate-limit refusals are distinct error types

pub mod client;
pub mod download;
pub mod error;
pub mod resolver;
pub mod validate;

pub use client::{EgressClient, EgressClientBuilder, EgressRequest, FetchResponse};
pub use download::{Download, DownloadOptions};
pub use error::{EgressError, RateLimitError, SsrfError, SsrfReason};
pub use resolver::{resolve_host, DnsResolver, LookupError, StaticResolver, SystemResolver};
pub use validate::{check_redirect, validate_parsed, validate_url, EgressPolicy, ValidatedTarget};
