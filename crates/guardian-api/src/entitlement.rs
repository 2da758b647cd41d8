//! Paid-access gate consulted once per chat turn. Billing itself happens
//! elsewhere; all this sees is the account's flag.

use std::sync::Arc;

use anyhow::Result;
use uuid::Uuid;

use guardian_db::Database;

pub trait EntitlementGate: Send + Sync {
    fn is_entitled(&self, account_id: &Uuid) -> Result<bool>;
}

/// Reads `subscription_active`, which the billing integration maintains.
pub struct SubscriptionGate {
    db: Arc<Database>,
}

impl SubscriptionGate {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

impl EntitlementGate for SubscriptionGate {
    fn is_entitled(&self, account_id: &Uuid) -> Result<bool> {
        self.db.subscription_active(account_id)
    }
}

/// For self-hosted deployments without billing.
pub struct Unmetered;

impl EntitlementGate for Unmetered {
    fn is_entitled(&self, _account_id: &Uuid) -> Result<bool> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_flag_drives_gate() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let account = Uuid::new_v4();
        db.create_account(&account, "a@example.com", "hash").unwrap();
        let gate = SubscriptionGate::new(db.clone());

        assert!(!gate.is_entitled(&account).unwrap());
        db.set_subscription_active(&account, true).unwrap();
        assert!(gate.is_entitled(&account).unwrap());
        assert!(!gate.is_entitled(&Uuid::new_v4()).unwrap());
    }
}
