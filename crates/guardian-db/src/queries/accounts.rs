use anyhow::Result;
use uuid::Uuid;

use super::OptionalExt;
use crate::Database;
use crate::models::{AccountRow, uuid_col};

impl Database {
    /// Returns false when the email is already registered.
    pub fn create_account(&self, id: &Uuid, email: &str, password_hash: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO accounts (id, email, password) VALUES (?1, ?2, ?3)
                 ON CONFLICT(email) DO NOTHING",
                (id.to_string(), email, password_hash),
            )?;
            Ok(inserted == 1)
        })
    }

    pub fn get_account_by_email(&self, email: &str) -> Result<Option<AccountRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, email, password, subscription_active FROM accounts WHERE email = ?1",
                [email],
                |row| {
                    Ok(AccountRow {
                        id: uuid_col(row, 0)?,
                        email: row.get(1)?,
                        password: row.get(2)?,
                        subscription_active: row.get(3)?,
                    })
                },
            )
            .optional()
        })
    }

    /// Entitlement flag maintained by the external billing integration.
    pub fn subscription_active(&self, account_id: &Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let active: Option<bool> = conn
                .query_row(
                    "SELECT subscription_active FROM accounts WHERE id = ?1",
                    [account_id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(active.unwrap_or(false))
        })
    }

    pub fn set_subscription_active(&self, account_id: &Uuid, active: bool) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE accounts SET subscription_active = ?2 WHERE id = ?1",
                (account_id.to_string(), active),
            )?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_flag_defaults_off() {
        let db = Database::open_in_memory().unwrap();
        let id = Uuid::new_v4();
        db.create_account(&id, "a@example.com", "hash").unwrap();

        assert!(!db.subscription_active(&id).unwrap());
        db.set_subscription_active(&id, true).unwrap();
        assert!(db.subscription_active(&id).unwrap());

        let row = db.get_account_by_email("a@example.com").unwrap().unwrap();
        assert_eq!(row.id, id);
        assert!(row.subscription_active);
        assert!(!db.subscription_active(&Uuid::new_v4()).unwrap());
    }

    #[test]
    fn duplicate_email_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.create_account(&Uuid::new_v4(), "a@example.com", "hash").unwrap());
        assert!(!db.create_account(&Uuid::new_v4(), "a@example.com", "hash").unwrap());
        assert!(db.create_account(&Uuid::new_v4(), "b@example.com", "hash").unwrap());
    }
}
