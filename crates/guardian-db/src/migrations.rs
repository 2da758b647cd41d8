use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (accounts, personas, moderation)");
        conn.execute_batch(
            "
            CREATE TABLE accounts (
                id                  TEXT PRIMARY KEY,
                email               TEXT NOT NULL UNIQUE,
                password            TEXT NOT NULL,
                subscription_active INTEGER NOT NULL DEFAULT 0,
                created_at          TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE personas (
                id                  TEXT PRIMARY KEY,
                account_id          TEXT NOT NULL REFERENCES accounts(id),
                type                TEXT NOT NULL CHECK (type IN ('guardian', 'dependent')),
                display_name        TEXT NOT NULL,
                pin_hash            TEXT,
                guardian_persona_id TEXT REFERENCES personas(id),
                avatar              TEXT,
                created_at          TEXT NOT NULL DEFAULT (datetime('now')),
                CHECK (
                    (type = 'guardian' AND guardian_persona_id IS NULL)
                    OR (type = 'dependent' AND guardian_persona_id IS NOT NULL)
                )
            );

            CREATE UNIQUE INDEX idx_personas_one_guardian
                ON personas(account_id) WHERE type = 'guardian';
            CREATE INDEX idx_personas_guardian
                ON personas(guardian_persona_id);

            CREATE TABLE moderation_settings (
                persona_id              TEXT PRIMARY KEY REFERENCES personas(id),
                topic_restriction_level TEXT NOT NULL CHECK (topic_restriction_level IN ('low', 'medium', 'high')),
                violence_level          TEXT NOT NULL CHECK (violence_level IN ('low', 'medium', 'high')),
                politics_level          TEXT NOT NULL CHECK (politics_level IN ('low', 'medium', 'high')),
                homework_mode_only      INTEGER NOT NULL DEFAULT 0,
                word_filter_enabled     INTEGER NOT NULL DEFAULT 0,
                updated_at              TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE blacklist_entries (
                id          TEXT PRIMARY KEY,
                persona_id  TEXT NOT NULL REFERENCES personas(id),
                word        TEXT NOT NULL,
                created_at  TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX idx_blacklist_persona ON blacklist_entries(persona_id);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    if version < 2 {
        info!("Running migration v2 (conversations, flags, analytics)");
        conn.execute_batch(
            "
            CREATE TABLE conversations (
                id          TEXT PRIMARY KEY,
                account_id  TEXT NOT NULL REFERENCES accounts(id),
                persona_id  TEXT NOT NULL REFERENCES personas(id),
                title       TEXT NOT NULL,
                visibility  TEXT NOT NULL DEFAULT 'private' CHECK (visibility IN ('public', 'private')),
                created_at  TEXT NOT NULL DEFAULT (datetime('now')),
                deleted_at  TEXT
            );

            CREATE INDEX idx_conversations_persona
                ON conversations(persona_id, created_at);

            CREATE TABLE messages (
                id              TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL REFERENCES conversations(id),
                role            TEXT NOT NULL,
                content         TEXT NOT NULL,
                created_at      TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX idx_messages_conversation
                ON messages(conversation_id, created_at);

            CREATE TABLE message_usage (
                id                TEXT PRIMARY KEY,
                conversation_id   TEXT NOT NULL REFERENCES conversations(id),
                message_id        TEXT REFERENCES messages(id),
                category          TEXT NOT NULL,
                prompt_tokens     INTEGER NOT NULL DEFAULT 0,
                completion_tokens INTEGER NOT NULL DEFAULT 0,
                created_at        TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE flags (
                id                    TEXT PRIMARY KEY,
                message_id            TEXT NOT NULL REFERENCES messages(id),
                flagged_by_persona_id TEXT NOT NULL REFERENCES personas(id),
                reason                TEXT NOT NULL
                    CHECK (reason IN ('abusive', 'wordFilter', 'violence', 'politics', 'inappropriate')),
                detail                TEXT,
                created_at            TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX idx_flags_persona ON flags(flagged_by_persona_id, created_at);

            CREATE TABLE daily_usage (
                persona_id    TEXT NOT NULL REFERENCES personas(id),
                date          TEXT NOT NULL,
                chats_started INTEGER NOT NULL DEFAULT 0,
                messages_sent INTEGER NOT NULL DEFAULT 0,
                words_sent    INTEGER NOT NULL DEFAULT 0,
                created_at    TEXT NOT NULL DEFAULT (datetime('now')),
                PRIMARY KEY (persona_id, date)
            );

            CREATE TABLE topics (
                id          TEXT PRIMARY KEY,
                name        TEXT NOT NULL,
                name_key    TEXT NOT NULL UNIQUE,
                updated_at  TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE conversation_topics (
                conversation_id TEXT NOT NULL REFERENCES conversations(id),
                topic_id        TEXT NOT NULL REFERENCES topics(id),
                relevance_score INTEGER NOT NULL DEFAULT 0,
                updated_at      TEXT NOT NULL DEFAULT (datetime('now')),
                PRIMARY KEY (conversation_id, topic_id)
            );

            INSERT INTO schema_version (version) VALUES (2);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
