//! Desired-state reconciler for the KEDA controller.
//!
//! A [`models::KedaController`] resource drives everything: its spec is
//! turned into a component manifest by the [`pipeline`], and the
//! [`convergence`] engine brings a [`store::ResourceStore`] in line with
//! that manifest. The [`controller`] schedules attempts per resource and
//! records the outcome in the resource status.

pub mod config;
pub mod controller;
pub mod convergence;
pub mod error;
pub mod manifest;
pub mod models;
pub mod pipeline;
pub mod scheme;
pub mod store;
pub mod transform;

pub use error::{Error, Result};
