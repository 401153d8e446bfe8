//! Bridge exposing Flexom zones (lights and window coverings) as smart-home
//! accessories, kept in sync with the backend by the engine in [`sync`].

mod client;
pub mod config;
mod diff;
mod error;
pub mod host;
mod logger;
mod platform;
mod protocol;
pub mod service;
pub mod sync;
mod types;
pub mod zone;

pub use client::{HemisClient, HemisClientBuilder};
pub use config::PlatformConfig;
pub use diff::factor_events;
pub use error::{Error, Result};
pub use logger::MessageLogMode;
pub use platform::{DiscoveryReport, Platform};
pub use service::ZoneService;
pub use types::*;
pub use zone::{ZoneControls, ZoneOptions};
