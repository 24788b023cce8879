//! redns-rust - A regex-ready and scriptable authoritative DNS server
//! written in Rust
//!
//! Records are matched by exact name, by `/pattern/` regex, or computed
//! at query time by an embedded script. Zones load from a small text
//! description language and reload atomically while serving.

pub mod dns_server;
pub mod message;
pub mod rdata;
pub mod record;
pub mod reload;
pub mod script;
pub mod types;
pub mod wire;
pub mod zone;
pub mod zone_parser;
