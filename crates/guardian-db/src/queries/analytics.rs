use anyhow::Result;
use chrono::NaiveDate;
use rusqlite::Connection;
use tracing::warn;
use uuid::Uuid;

use guardian_types::models::{ExtractedTopic, TopicScore, UsageCounters};

use super::{OptionalExt, is_unique_violation};
use crate::Database;
use crate::models::uuid_col;

const DAY_FORMAT: &str = "%Y-%m-%d";

impl Database {
    // -- Daily usage --

    /// Add `delta` to the persona's counters for `day`. A single upsert, so
    /// concurrent turns never lose increments.
    pub fn add_daily_usage(&self, persona_id: &Uuid, day: NaiveDate, delta: UsageCounters) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO daily_usage (persona_id, date, chats_started, messages_sent, words_sent)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(persona_id, date) DO UPDATE SET
                    chats_started = chats_started + excluded.chats_started,
                    messages_sent = messages_sent + excluded.messages_sent,
                    words_sent    = words_sent + excluded.words_sent",
                (
                    persona_id.to_string(),
                    day.format(DAY_FORMAT).to_string(),
                    delta.chats_started,
                    delta.messages_sent,
                    delta.words_sent,
                ),
            )?;
            Ok(())
        })
    }

    pub fn get_daily_usage(&self, persona_id: &Uuid, day: NaiveDate) -> Result<Option<UsageCounters>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT chats_started, messages_sent, words_sent
                 FROM daily_usage WHERE persona_id = ?1 AND date = ?2",
                (persona_id.to_string(), day.format(DAY_FORMAT).to_string()),
                |row| {
                    Ok(UsageCounters {
                        chats_started: row.get(0)?,
                        messages_sent: row.get(1)?,
                        words_sent: row.get(2)?,
                    })
                },
            )
            .optional()
        })
    }

    /// Totals over the inclusive day range `[from, to]`.
    pub fn sum_usage(&self, persona_id: &Uuid, from: NaiveDate, to: NaiveDate) -> Result<UsageCounters> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COALESCE(SUM(chats_started), 0), COALESCE(SUM(messages_sent), 0),
                        COALESCE(SUM(words_sent), 0)
                 FROM daily_usage WHERE persona_id = ?1 AND date BETWEEN ?2 AND ?3",
                (
                    persona_id.to_string(),
                    from.format(DAY_FORMAT).to_string(),
                    to.format(DAY_FORMAT).to_string(),
                ),
                |row| {
                    Ok(UsageCounters {
                        chats_started: row.get(0)?,
                        messages_sent: row.get(1)?,
                        words_sent: row.get(2)?,
                    })
                },
            )?)
        })
    }

    // -- Topics --

    /// Look up a topic by case-insensitive name, creating it on first sight.
    /// The first spelling seen is the one kept.
    pub fn find_or_create_topic(&self, name: &str) -> Result<Uuid> {
        self.with_conn(|conn| topic_id_for(conn, name))
    }

    /// Attach a topic to a conversation, keeping the higher score if the pair
    /// already exists.
    pub fn merge_conversation_topic(&self, conversation_id: &Uuid, topic_id: &Uuid, score: i64) -> Result<()> {
        self.with_conn(|conn| merge_pair(conn, conversation_id, topic_id, score))
    }

    /// Store extracted topics for a conversation. A failure on one topic is
    /// logged and skipped. Returns how many topics were stored.
    pub fn record_topics(&self, conversation_id: &Uuid, topics: &[ExtractedTopic]) -> Result<usize> {
        self.with_conn(|conn| {
            let mut stored = 0;
            for topic in topics {
                let name = topic.name.trim();
                if name.is_empty() {
                    continue;
                }
                let score = relevance_score(topic.relevance);
                let result = topic_id_for(conn, name)
                    .and_then(|topic_id| merge_pair(conn, conversation_id, &topic_id, score));
                match result {
                    Ok(()) => stored += 1,
                    Err(e) => warn!("Failed to record topic '{}' for {}: {}", name, conversation_id, e),
                }
            }
            Ok(stored)
        })
    }

    pub fn conversation_topics(&self, conversation_id: &Uuid) -> Result<Vec<TopicScore>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT t.id, t.name, ct.relevance_score
                 FROM conversation_topics ct JOIN topics t ON t.id = ct.topic_id
                 WHERE ct.conversation_id = ?1
                 ORDER BY ct.relevance_score DESC, t.name",
            )?;
            let rows = stmt
                .query_map([conversation_id.to_string()], topic_score_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Highest-scoring topics across a persona's conversations started in
    /// `[from, to]`.
    pub fn top_topics(
        &self,
        persona_id: &Uuid,
        from: NaiveDate,
        to: NaiveDate,
        limit: usize,
    ) -> Result<Vec<TopicScore>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT t.id, t.name, MAX(ct.relevance_score) AS score
                 FROM conversation_topics ct
                 JOIN topics t ON t.id = ct.topic_id
                 JOIN conversations c ON c.id = ct.conversation_id
                 WHERE c.persona_id = ?1 AND date(c.created_at) BETWEEN ?2 AND ?3
                 GROUP BY t.id, t.name
                 ORDER BY score DESC, t.name
                 LIMIT ?4",
            )?;
            let rows = stmt
                .query_map(
                    (
                        persona_id.to_string(),
                        from.format(DAY_FORMAT).to_string(),
                        to.format(DAY_FORMAT).to_string(),
                        limit as i64,
                    ),
                    topic_score_from_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

/// Map a 0..1 relevance to the stored 0..100 score.
pub fn relevance_score(relevance: f64) -> i64 {
    if !relevance.is_finite() {
        return 0;
    }
    ((relevance * 100.0).round() as i64).clamp(0, 100)
}

fn topic_id_for(conn: &Connection, name: &str) -> Result<Uuid> {
    let key = name.to_lowercase();
    conn.execute(
        "INSERT OR IGNORE INTO topics (id, name, name_key) VALUES (?1, ?2, ?3)",
        (Uuid::new_v4().to_string(), name, &key),
    )?;
    Ok(conn.query_row("SELECT id FROM topics WHERE name_key = ?1", [&key], |row| uuid_col(row, 0))?)
}

fn merge_pair(conn: &Connection, conversation_id: &Uuid, topic_id: &Uuid, score: i64) -> Result<()> {
    let inserted = conn.execute(
        "INSERT INTO conversation_topics (conversation_id, topic_id, relevance_score) VALUES (?1, ?2, ?3)",
        (conversation_id.to_string(), topic_id.to_string(), score),
    );
    match inserted {
        Ok(_) => Ok(()),
        Err(e) if is_unique_violation(&e) => {
            conn.execute(
                "UPDATE conversation_topics
                 SET relevance_score = MAX(relevance_score, ?3), updated_at = datetime('now')
                 WHERE conversation_id = ?1 AND topic_id = ?2",
                (conversation_id.to_string(), topic_id.to_string(), score),
            )?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn topic_score_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TopicScore> {
    Ok(TopicScore {
        topic_id: uuid_col(row, 0)?,
        name: row.get(1)?,
        relevance_score: row.get(2)?,
    })
}
