pub mod accounts;
pub mod analytics;
pub mod conversations;
pub mod flags;
pub mod personas;
pub mod settings;

use anyhow::Result;

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// True for UNIQUE / PRIMARY KEY violations.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
                && (e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                    || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE)
    )
}

#[cfg(test)]
pub(crate) mod fixtures {
    use uuid::Uuid;

    use crate::{CreateDependentOutcome, Database};
    use guardian_types::models::Persona;

    pub struct Family {
        pub account_id: Uuid,
        pub guardian: Persona,
        pub dependent: Persona,
    }

    pub fn family(db: &Database) -> Family {
        let account_id = Uuid::new_v4();
        db.create_account(&account_id, &format!("{}@example.com", account_id), "hash")
            .unwrap();
        let guardian = db.ensure_guardian(&account_id, &Uuid::new_v4()).unwrap();
        let dependent = match db
            .create_dependent(&Uuid::new_v4(), &account_id, &guardian.id, "Kid", None, None, 4)
            .unwrap()
        {
            CreateDependentOutcome::Created(p) => p,
            _ => panic!("fixture dependent was refused"),
        };
        Family { account_id, guardian, dependent }
    }
}
