pub mod device;
pub mod price;
pub mod types;

pub use device::*;
pub use price::*;
pub use types::*;
