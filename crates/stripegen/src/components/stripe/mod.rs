pub mod config;
pub mod generator;
pub mod shape_loop;

pub use config::{DimRange, PlanTypes, Splits, StripeConfig, StripeConfigRules};
pub use generator::*;
pub use shape_loop::StripeShapeLoop;
