//! Common value types and utilities shared across the stripegen crates:
//! tensor shapes, exact rational shape multipliers, integer rounding helpers
//! and a small background thread pool.

pub mod math;
pub mod shape;
pub mod thread_pool;

pub use shape::{Fraction, ShapeMultiplier, TensorShape};
pub use thread_pool::{TaskHandle, ThreadPool};
