mod budget;
mod usage;

pub use budget::*;
pub use usage::*;
