mod budget_states;
mod common;
mod usage;

pub use budget_states::SqliteBudgetStateRepo;
pub use usage::SqliteUsageRepo;
