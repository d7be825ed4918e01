//! License discovery and SPDX normalization.
//!
//! - [`resolver`] finds a LICENSE-like file in a directory and attaches the
//!   result to a [`Package`](crate::models::Package).
//! - [`classifier`] turns license text into an SPDX identifier.
//! - [`spdx`] holds the identifier table and string normalization.

pub mod classifier;
pub mod resolver;
pub mod spdx;

pub use resolver::{copyright, get_license, resolve_into};
