use anyhow::Result;
use rusqlite::{Connection, Row};
use uuid::Uuid;

use guardian_types::models::{CustomBlacklistEntry, Level, ModerationSettings};

use super::OptionalExt;
use crate::Database;
use crate::models::{enum_col, uuid_col};

impl Database {
    // -- Moderation settings --

    pub fn get_settings(&self, persona_id: &Uuid) -> Result<Option<ModerationSettings>> {
        self.with_conn(|conn| query_settings(conn, persona_id))
    }

    /// Load a dependent's settings, creating the conservative defaults if the
    /// row does not exist yet.
    pub fn resolve_settings(&self, persona_id: &Uuid) -> Result<ModerationSettings> {
        self.with_conn(|conn| {
            let defaults = ModerationSettings::conservative(*persona_id);
            conn.execute(
                "INSERT OR IGNORE INTO moderation_settings
                    (persona_id, topic_restriction_level, violence_level, politics_level,
                     homework_mode_only, word_filter_enabled)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                settings_params(&defaults),
            )?;
            query_settings(conn, persona_id)?
                .ok_or_else(|| anyhow::anyhow!("Settings for {} missing after init", persona_id))
        })
    }

    pub fn upsert_settings(&self, settings: &ModerationSettings) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO moderation_settings
                    (persona_id, topic_restriction_level, violence_level, politics_level,
                     homework_mode_only, word_filter_enabled)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(persona_id) DO UPDATE SET
                    topic_restriction_level = excluded.topic_restriction_level,
                    violence_level          = excluded.violence_level,
                    politics_level          = excluded.politics_level,
                    homework_mode_only      = excluded.homework_mode_only,
                    word_filter_enabled     = excluded.word_filter_enabled,
                    updated_at              = datetime('now')",
                settings_params(settings),
            )?;
            Ok(())
        })
    }

    // -- Custom blacklist --

    pub fn list_blacklist(&self, persona_id: &Uuid) -> Result<Vec<CustomBlacklistEntry>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, persona_id, word FROM blacklist_entries
                 WHERE persona_id = ?1 ORDER BY created_at, rowid",
            )?;
            let rows = stmt
                .query_map([persona_id.to_string()], |row| {
                    Ok(CustomBlacklistEntry {
                        id: uuid_col(row, 0)?,
                        persona_id: uuid_col(row, 1)?,
                        word: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn add_blacklist_word(&self, id: &Uuid, persona_id: &Uuid, word: &str) -> Result<CustomBlacklistEntry> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO blacklist_entries (id, persona_id, word) VALUES (?1, ?2, ?3)",
                (id.to_string(), persona_id.to_string(), word),
            )?;
            Ok(CustomBlacklistEntry {
                id: *id,
                persona_id: *persona_id,
                word: word.to_string(),
            })
        })
    }

    /// Remove an entry only if it belongs to `persona_id`. Returns whether a row was deleted.
    pub fn remove_blacklist_word(&self, persona_id: &Uuid, entry_id: &Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM blacklist_entries WHERE id = ?1 AND persona_id = ?2",
                (entry_id.to_string(), persona_id.to_string()),
            )?;
            Ok(removed > 0)
        })
    }
}

fn settings_params(s: &ModerationSettings) -> (String, &'static str, &'static str, &'static str, bool, bool) {
    (
        s.persona_id.to_string(),
        s.topic_restriction_level.as_str(),
        s.violence_level.as_str(),
        s.politics_level.as_str(),
        s.homework_mode_only,
        s.word_filter_enabled,
    )
}

fn query_settings(conn: &Connection, persona_id: &Uuid) -> Result<Option<ModerationSettings>> {
    conn.query_row(
        "SELECT persona_id, topic_restriction_level, violence_level, politics_level,
                homework_mode_only, word_filter_enabled
         FROM moderation_settings WHERE persona_id = ?1",
        [persona_id.to_string()],
        settings_from_row,
    )
    .optional()
}

fn settings_from_row(row: &Row<'_>) -> rusqlite::Result<ModerationSettings> {
    Ok(ModerationSettings {
        persona_id: uuid_col(row, 0)?,
        topic_restriction_level: enum_col::<Level>(row, 1)?,
        violence_level: enum_col::<Level>(row, 2)?,
        politics_level: enum_col::<Level>(row, 3)?,
        homework_mode_only: row.get(4)?,
        word_filter_enabled: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::fixtures;

    #[test]
    fn settings_are_lazily_created_conservative() {
        let db = Database::open_in_memory().unwrap();
        let family = fixtures::family(&db);
        let id = family.dependent.id;

        assert!(db.get_settings(&id).unwrap().is_none());

        let resolved = db.resolve_settings(&id).unwrap();
        assert_eq!(resolved, ModerationSettings::conservative(id));
        assert_eq!(db.get_settings(&id).unwrap(), Some(resolved));
    }

    #[test]
    fn resolve_keeps_existing_settings() {
        let db = Database::open_in_memory().unwrap();
        let family = fixtures::family(&db);
        let id = family.dependent.id;

        let custom = ModerationSettings {
            violence_level: Level::Low,
            word_filter_enabled: true,
            ..ModerationSettings::conservative(id)
        };
        db.upsert_settings(&custom).unwrap();

        assert_eq!(db.resolve_settings(&id).unwrap(), custom);

        let updated = ModerationSettings { politics_level: Level::Medium, ..custom };
        db.upsert_settings(&updated).unwrap();
        assert_eq!(db.get_settings(&id).unwrap(), Some(updated));
    }

    #[test]
    fn blacklist_removal_is_scoped_to_persona() {
        let db = Database::open_in_memory().unwrap();
        let ours = fixtures::family(&db);
        let theirs = fixtures::family(&db);

        let entry = db.add_blacklist_word(&Uuid::new_v4(), &ours.dependent.id, "minecraft").unwrap();

        assert!(!db.remove_blacklist_word(&theirs.dependent.id, &entry.id).unwrap());
        assert_eq!(db.list_blacklist(&ours.dependent.id).unwrap().len(), 1);

        assert!(db.remove_blacklist_word(&ours.dependent.id, &entry.id).unwrap());
        assert!(db.list_blacklist(&ours.dependent.id).unwrap().is_empty());
    }
}
