use crate::{
    billing::BillingCycle,
    db::error::{DbError, DbResult},
};

/// Parse a stored billing cycle label, returning a DbError on failure
pub fn parse_cycle(s: &str) -> DbResult<BillingCycle> {
    s.parse()
        .map_err(|e| DbError::Corrupt(format!("invalid billing cycle label: {e}")))
}
