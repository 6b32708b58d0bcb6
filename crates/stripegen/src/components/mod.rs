pub mod caps;
pub mod error;
pub mod parts;
pub mod plan;
pub mod ple;
pub mod stripe;
pub mod tile;
pub mod weights;

mod types;

pub use caps::{BlockConfig, HardwareCapabilities};
pub use types::*;
