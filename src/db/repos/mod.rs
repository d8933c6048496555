mod budget_states;
mod usage;

pub use budget_states::*;
pub use usage::*;
