//! Domain payload types.

pub mod catalog;
