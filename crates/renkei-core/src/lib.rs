//! Core types, traits, and domain services for the Renkei linkage and
//! notification delivery engine.
//!
//! This crate is deliberately free of HTTP and database dependencies.
//! Storage is abstracted behind [`store::ClinicStore`] and the external
//! messaging platform behind [`gateway::MessagingGateway`]; the services in
//! [`issuer`], [`linkage`], [`menu_sync`], [`scheduler`], and [`dispatch`]
//! are written against those traits only.

pub mod credential;
pub mod directory;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod issuer;
pub mod link;
pub mod linkage;
pub mod menu_sync;
pub mod reminder;
pub mod schedule;
pub mod scheduler;
pub mod store;
pub mod template;

pub use error::{Error, Result};
