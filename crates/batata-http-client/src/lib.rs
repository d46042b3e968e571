//! Batata HTTP Client - Rust SDK for the Nacos v1 HTTP open API
//!
//! This crate provides:
//! - Instance registration with deduplicated, self-healing heartbeats
//! - Service discovery with a bounded-staleness cache
//! - UDP push subscriptions with diff-suppressed listener dispatch
//! - Config get/publish/remove and MD5-fingerprint long-poll watching
//! - Username/password login with background token refresh

pub mod auth;
pub mod client;
pub mod config;
pub mod constants;
pub mod error;
pub mod log;
pub mod model;
pub mod naming;
pub mod options;
pub mod param;
pub mod transport;

pub use client::ServiceClient;
pub use config::ConfigService;
pub use config::listener::{ConfigChangeListener, ConfigResponse};
pub use error::{ClientError, Result};
pub use log::{LogLevel, Logger, NoopLogger, TracingLogger};
pub use model::{Instance, Service};
pub use naming::NamingService;
pub use naming::listener::{EventListener, NamingEvent};
pub use options::ClientConfig;
pub use param::{ConfigParams, InstanceParams};
pub use transport::{HttpRequest, HttpTransport, Transport};
