//! # Backend
//!
//! Protocol clients consumed by the nettest layer:
//!
//! - [`httpx`]: one-shot HTTP requests behind the [`httpx::HttpDoer`]
//!   capability trait, with optional SOCKS5 proxying
//! - [`bouncer`]: collector/test-helper discovery
//! - [`collector`]: report lifecycle (open, update, close)
//! - [`mlabns`]: measurement-server discovery
//! - [`iplookup`]: probe IP discovery
//! - [`geolookup`]: ASN/country lookups over gzipped MMDB databases
//! - [`resolver`]: resolver IP discovery
//! - [`assets`]: content-addressed MMDB download cache
//!
//! Every network operation takes a `CancellationToken` and returns
//! promptly once the token is cancelled.

pub mod assets;
pub mod bouncer;
pub mod collector;
pub mod geolookup;
pub mod httpx;
pub mod iplookup;
pub mod mlabns;
pub mod resolver;
pub mod testing;

pub use httpx::{HttpDoer, WebClient};
