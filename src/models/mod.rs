//! Domain models for the KEDA controller reconciler.
//!
//! # Core Concepts
//!
//! - [`ManifestObject`]: One declarative object (kind, namespace, name and a
//!   body). Deployments carry a typed body so container arguments can be read
//!   and rewritten safely; every other kind keeps its fields as a sorted JSON tree.
//! - [`KedaController`]: The configuration resource. Its spec is the single
//!   source of intent the manifest is rendered from.
//! - [`ReconciliationStatus`]: The phase and reason written back to the
//!   configuration resource after each reconciliation attempt.
//! - [`LogLevel`], [`LogEncoder`], [`TimeEncoding`], [`Verbosity`]: Validated
//!   enumerations that normalize free-form spec strings before they are
//!   materialized into container arguments.

mod controller;
mod level;
mod object;

pub use controller::*;
pub use level::*;
pub use object::*;
