//! The building blocks the hub is assembled from.

pub mod alert;
pub mod latest;
pub mod registry;
pub mod source;
