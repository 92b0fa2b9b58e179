//! Compile-time configuration
//!
//! Capacities, retry budgets, and default endpoints. Everything here is a
//! constant: ring and pool sizes are design parameters, not runtime
//! configuration, and must stay powers of two for index masking to hold.

pub mod constants;

pub use constants::*;
