#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![allow(clippy::module_name_repetitions)]

//! Delivers normalized Kubernetes events to a Loki-style push endpoint.
//!
//! The crate is organized the way a single sink inside a larger event
//! pipeline is: a [`Sink`](sinks::Sink) receives one [`EnhancedEvent`](event::EnhancedEvent)
//! at a time and performs exactly one HTTP push for it.

#[macro_use]
extern crate tracing;

#[macro_use]
pub mod internal_events;

pub mod app;
pub mod cli;
pub mod config;
pub mod event;
pub mod generate;
pub mod http;
pub mod layout;
pub mod sinks;
pub mod template;
pub mod tls;
pub mod trace;
pub mod validate;

pub use event::EnhancedEvent;

pub type Error = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T> = std::result::Result<T, Error>;

pub fn get_version() -> String {
    env!("CARGO_PKG_VERSION").to_owned()
}
