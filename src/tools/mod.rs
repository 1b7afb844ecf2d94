//! Capabilities units can call from inside a completion.
//!
//! - [`base_tool`] - the [`Capability`] trait and a closure-backed impl
//! - [`registry`] - name-indexed dispatch table
//! - [`amap`] - AMap POI search and weather lookups
//! - [`photos`] - photo lookup for attractions (Unsplash)

pub mod amap;
pub mod base_tool;
pub mod photos;
pub mod registry;

// Re-exports for convenience
pub use amap::{AmapClient, AmapTextSearch, AmapWeather};
pub use base_tool::{Capability, CapabilityFn, FnCapability, ToolArguments};
pub use photos::{ImageLookup, UnsplashClient};
pub use registry::ToolRegistry;
