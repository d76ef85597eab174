//! HTTP middleware for the Warden boundary.
pub mod admission;

pub use admission::{AdmissionLayer, AdmissionService, Principal, Subject};
