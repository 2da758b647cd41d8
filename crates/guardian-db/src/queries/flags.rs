use anyhow::Result;
use chrono::NaiveDate;
use uuid::Uuid;

use guardian_types::models::{Flag, FlagReason};

use crate::Database;
use crate::models::{enum_col, timestamp_col, uuid_col};

impl Database {
    /// Record an audit flag. The referenced message must already be stored;
    /// the foreign key rejects anything else.
    pub fn flag_message(
        &self,
        id: &Uuid,
        message_id: &Uuid,
        flagged_by_persona_id: &Uuid,
        reason: FlagReason,
        detail: Option<&str>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO flags (id, message_id, flagged_by_persona_id, reason, detail)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                (
                    id.to_string(),
                    message_id.to_string(),
                    flagged_by_persona_id.to_string(),
                    reason.as_str(),
                    detail,
                ),
            )?;
            Ok(())
        })
    }

    /// Flags raised for a persona, newest first.
    pub fn list_flags(&self, persona_id: &Uuid) -> Result<Vec<Flag>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, message_id, flagged_by_persona_id, reason, detail, created_at
                 FROM flags WHERE flagged_by_persona_id = ?1
                 ORDER BY created_at DESC, rowid DESC",
            )?;
            let rows = stmt
                .query_map([persona_id.to_string()], |row| {
                    Ok(Flag {
                        id: uuid_col(row, 0)?,
                        message_id: uuid_col(row, 1)?,
                        flagged_by_persona_id: uuid_col(row, 2)?,
                        reason: enum_col::<FlagReason>(row, 3)?,
                        detail: row.get(4)?,
                        created_at: timestamp_col(row, 5)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Number of flags for a persona whose day falls in `[from, to]`.
    pub fn count_flags_between(&self, persona_id: &Uuid, from: NaiveDate, to: NaiveDate) -> Result<i64> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM flags
                 WHERE flagged_by_persona_id = ?1 AND date(created_at) BETWEEN ?2 AND ?3",
                (persona_id.to_string(), from.to_string(), to.to_string()),
                |row| row.get(0),
            )?)
        })
    }
}
