//! Converts workload names to actual application code.
//!
//! # Example
//!
//! To get the word count application:
//! ```
//! # use anyhow::Result;
//! use mrdb::workload;
//! # fn main() -> Result<()> {
//! let wc = workload::named("wc")?;
//! # Ok(())
//! # }
//! ```

use anyhow::{bail, Result};

use crate::Workload;

pub mod identity;
pub mod wc;

/// Gets the [`Workload`] named `name`.
///
/// Returns [`None`] if no application with the given name was found.
pub fn try_named(name: &str) -> Option<Workload> {
    match name {
        "wc" => Some(Workload {
            map_fn: |key, value, out| Box::pin(wc::map(key, value, out)),
            reduce_fn: |key, values, out| Box::pin(wc::reduce(key, values, out)),
        }),
        "identity" => Some(Workload {
            map_fn: |key, value, out| Box::pin(identity::map(key, value, out)),
            reduce_fn: |key, values, out| Box::pin(identity::reduce(key, values, out)),
        }),
        _ => None,
    }
}

/// Gets the [`Workload`] named `name`.
///
/// Returns an [`anyhow::Error`] if no application with the given name
/// was found.
pub fn named(name: &str) -> Result<Workload> {
    match try_named(name) {
        Some(app) => Ok(app),
        None => bail!("No workload named `{}` found.", name),
    }
}
