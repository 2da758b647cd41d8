use anyhow::Result;
use rusqlite::{Connection, Row};
use uuid::Uuid;

use guardian_types::models::{Persona, PersonaType};

use super::OptionalExt;
use crate::Database;
use crate::models::{enum_col, opt_uuid_col, uuid_col};

const PERSONA_COLUMNS: &str =
    "id, account_id, type, display_name, pin_hash, guardian_persona_id, avatar";

pub enum CreateDependentOutcome {
    Created(Persona),
    LimitReached,
    /// `guardian_id` is not the guardian persona of `account_id`.
    InvalidGuardian,
}

impl Database {
    /// Return the account's guardian persona, creating it on first access.
    ///
    /// The partial unique index on `(account_id) WHERE type = 'guardian'` makes
    /// concurrent first accesses converge on a single row.
    pub fn ensure_guardian(&self, account_id: &Uuid, new_id: &Uuid) -> Result<Persona> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO personas (id, account_id, type, display_name)
                 VALUES (?1, ?2, 'guardian', 'Guardian')",
                (new_id.to_string(), account_id.to_string()),
            )?;

            let sql = format!(
                "SELECT {PERSONA_COLUMNS} FROM personas WHERE account_id = ?1 AND type = 'guardian'"
            );
            Ok(conn.query_row(&sql, [account_id.to_string()], persona_from_row)?)
        })
    }

    pub fn get_persona(&self, id: &Uuid) -> Result<Option<Persona>> {
        self.with_conn(|conn| query_persona(conn, id))
    }

    /// All personas of an account, guardian first.
    pub fn list_personas(&self, account_id: &Uuid) -> Result<Vec<Persona>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {PERSONA_COLUMNS} FROM personas WHERE account_id = ?1
                 ORDER BY CASE type WHEN 'guardian' THEN 0 ELSE 1 END, created_at, rowid"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([account_id.to_string()], persona_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Insert a dependent under `guardian_id` unless the account already has
    /// `max_dependents`. The count check and the insert are one statement, so
    /// two concurrent creations cannot both slip under the limit.
    #[allow(clippy::too_many_arguments)]
    pub fn create_dependent(
        &self,
        id: &Uuid,
        account_id: &Uuid,
        guardian_id: &Uuid,
        display_name: &str,
        avatar: Option<&str>,
        pin_hash: Option<&str>,
        max_dependents: u32,
    ) -> Result<CreateDependentOutcome> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO personas (id, account_id, type, display_name, pin_hash, guardian_persona_id, avatar)
                 SELECT ?1, g.account_id, 'dependent', ?4, ?5, g.id, ?6
                 FROM personas g
                 WHERE g.id = ?3 AND g.account_id = ?2 AND g.type = 'guardian'
                   AND (SELECT COUNT(*) FROM personas
                        WHERE account_id = ?2 AND type = 'dependent') < ?7",
                rusqlite::params![
                    id.to_string(),
                    account_id.to_string(),
                    guardian_id.to_string(),
                    display_name,
                    pin_hash,
                    avatar,
                    max_dependents,
                ],
            )?;

            if inserted == 0 {
                let guardian_ok: bool = conn.query_row(
                    "SELECT EXISTS (SELECT 1 FROM personas
                                    WHERE id = ?1 AND account_id = ?2 AND type = 'guardian')",
                    (guardian_id.to_string(), account_id.to_string()),
                    |row| row.get(0),
                )?;
                return Ok(if guardian_ok {
                    CreateDependentOutcome::LimitReached
                } else {
                    CreateDependentOutcome::InvalidGuardian
                });
            }

            let persona = query_persona(conn, id)?
                .ok_or_else(|| anyhow::anyhow!("Dependent {} vanished after insert", id))?;
            Ok(CreateDependentOutcome::Created(persona))
        })
    }

    pub fn set_pin_hash(&self, persona_id: &Uuid, pin_hash: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE personas SET pin_hash = ?2 WHERE id = ?1",
                (persona_id.to_string(), pin_hash),
            )?;
            Ok(())
        })
    }

    /// True only if `dependent_id` is a dependent of the guardian persona
    /// `guardian_id`, and both belong to `account_id`. Re-evaluated on every
    /// privileged request.
    pub fn authorize_dependent_access(
        &self,
        dependent_id: &Uuid,
        guardian_id: &Uuid,
        account_id: &Uuid,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let allowed: bool = conn.query_row(
                "SELECT EXISTS (
                     SELECT 1 FROM personas d
                     JOIN personas g ON g.id = d.guardian_persona_id
                     WHERE d.id = ?1
                       AND d.type = 'dependent'
                       AND d.guardian_persona_id = ?2
                       AND d.account_id = ?3
                       AND g.type = 'guardian'
                       AND g.account_id = ?3
                 )",
                (dependent_id.to_string(), guardian_id.to_string(), account_id.to_string()),
                |row| row.get(0),
            )?;
            Ok(allowed)
        })
    }
}

fn query_persona(conn: &Connection, id: &Uuid) -> Result<Option<Persona>> {
    let sql = format!("SELECT {PERSONA_COLUMNS} FROM personas WHERE id = ?1");
    conn.query_row(&sql, [id.to_string()], persona_from_row).optional()
}

fn persona_from_row(row: &Row<'_>) -> rusqlite::Result<Persona> {
    Ok(Persona {
        id: uuid_col(row, 0)?,
        account_id: uuid_col(row, 1)?,
        kind: enum_col::<PersonaType>(row, 2)?,
        display_name: row.get(3)?,
        pin_hash: row.get(4)?,
        guardian_persona_id: opt_uuid_col(row, 5)?,
        avatar: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::fixtures;

    #[test]
    fn first_access_provisions_exactly_one_guardian() {
        let db = Database::open_in_memory().unwrap();
        let account = Uuid::new_v4();
        db.create_account(&account, "g@example.com", "hash").unwrap();

        let first = db.ensure_guardian(&account, &Uuid::new_v4()).unwrap();
        let second = db.ensure_guardian(&account, &Uuid::new_v4()).unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.kind, PersonaType::Guardian);
        assert!(first.hierarchy_is_consistent());
        assert_eq!(db.list_personas(&account).unwrap().len(), 1);
    }

    #[test]
    fn dependent_limit_is_enforced() {
        let db = Database::open_in_memory().unwrap();
        let family = fixtures::family(&db);

        let created = db
            .create_dependent(&Uuid::new_v4(), &family.account_id, &family.guardian.id, "Second", None, None, 2)
            .unwrap();
        assert!(matches!(created, CreateDependentOutcome::Created(_)));

        let refused = db
            .create_dependent(&Uuid::new_v4(), &family.account_id, &family.guardian.id, "Third", None, None, 2)
            .unwrap();
        assert!(matches!(refused, CreateDependentOutcome::LimitReached));

        let personas = db.list_personas(&family.account_id).unwrap();
        assert_eq!(personas.len(), 3);
        assert_eq!(personas[0].kind, PersonaType::Guardian);
    }

    #[test]
    fn dependent_cannot_be_attached_to_foreign_guardian() {
        let db = Database::open_in_memory().unwrap();
        let ours = fixtures::family(&db);
        let theirs = fixtures::family(&db);

        let outcome = db
            .create_dependent(&Uuid::new_v4(), &ours.account_id, &theirs.guardian.id, "Stray", None, None, 4)
            .unwrap();
        assert!(matches!(outcome, CreateDependentOutcome::InvalidGuardian));
    }

    #[test]
    fn authorization_requires_every_clause() {
        let db = Database::open_in_memory().unwrap();
        let family = fixtures::family(&db);
        let other = fixtures::family(&db);

        assert!(db
            .authorize_dependent_access(&family.dependent.id, &family.guardian.id, &family.account_id)
            .unwrap());

        // wrong guardian
        assert!(!db
            .authorize_dependent_access(&family.dependent.id, &other.guardian.id, &family.account_id)
            .unwrap());
        // wrong account
        assert!(!db
            .authorize_dependent_access(&family.dependent.id, &family.guardian.id, &other.account_id)
            .unwrap());
        // guardian is not a dependent
        assert!(!db
            .authorize_dependent_access(&family.guardian.id, &family.guardian.id, &family.account_id)
            .unwrap());
        // unknown persona
        assert!(!db
            .authorize_dependent_access(&Uuid::new_v4(), &family.guardian.id, &family.account_id)
            .unwrap());
    }
}
