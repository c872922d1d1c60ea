//! Conversation memory: sessions, messages, decisions, summarization.
//!
//! Sessions move strictly forward through `active → archived →
//! summarized`. Message inserts and deletes keep the session's
//! `message_count` in step inside one transaction, and messages read back
//! in FIFO order. Summarization and decision extraction call the
//! completion provider with prepared transcripts and parse its labeled
//! response sections.

use anyhow::Result;
use chrono::Utc;
use sqlx::Row;
use uuid::Uuid;

use crate::config::MemoryConfig;
use crate::error::CoreError;
use crate::models::{Decision, Message, Session, SessionState};
use crate::patterns;
use crate::provider::CompletionProvider;
use crate::store::Store;

/// Parsed summarization response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSummary {
    pub overview: String,
    pub topics: Vec<String>,
    pub decisions: Vec<String>,
    pub code_references: Vec<String>,
    pub key_points: Vec<String>,
}

pub struct ConversationMemory<'a> {
    store: &'a Store,
    config: MemoryConfig,
}

impl<'a> ConversationMemory<'a> {
    pub fn new(store: &'a Store, config: &MemoryConfig) -> Self {
        Self {
            store,
            config: config.clone(),
        }
    }

    pub async fn create_session(&self, title: Option<&str>) -> Result<Session> {
        let _guard = self.store.write_guard().await;
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO sessions (id, project_id, title, state, message_count, created_at, updated_at)
            VALUES (?, ?, ?, 'active', 0, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(self.store.project_id())
        .bind(title)
        .bind(now)
        .bind(now)
        .execute(self.store.pool())
        .await?;
        drop(_guard);

        self.get_session(&id)
            .await?
            .ok_or_else(|| CoreError::NotFound(id).into())
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        let row = sqlx::query("SELECT * FROM sessions WHERE id = ? AND project_id = ?")
            .bind(session_id)
            .bind(self.store.project_id())
            .fetch_optional(self.store.pool())
            .await?;
        row.map(|r| row_to_session(&r)).transpose()
    }

    pub async fn list_sessions(&self) -> Result<Vec<Session>> {
        let rows =
            sqlx::query("SELECT * FROM sessions WHERE project_id = ? ORDER BY created_at DESC")
                .bind(self.store.project_id())
                .fetch_all(self.store.pool())
                .await?;
        rows.iter().map(row_to_session).collect()
    }

    /// Advance the session state. Transitions are strictly monotonic;
    /// moving backwards is an error.
    pub async fn transition(&self, session_id: &str, new_state: SessionState) -> Result<Session> {
        let _guard = self.store.write_guard().await;
        let session = self
            .get_session(session_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("session {}", session_id)))?;

        if new_state.rank() <= session.state.rank() {
            return Err(CoreError::Invalid(format!(
                "session {} cannot move {} -> {}",
                session_id,
                session.state.as_str(),
                new_state.as_str()
            ))
            .into());
        }

        sqlx::query("UPDATE sessions SET state = ?, updated_at = ? WHERE id = ?")
            .bind(new_state.as_str())
            .bind(Utc::now().timestamp())
            .bind(session_id)
            .execute(self.store.pool())
            .await?;
        drop(_guard);

        self.get_session(session_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(session_id.to_string()).into())
    }

    /// Append a message; the session's `message_count` moves in the same
    /// transaction. Only active sessions accept messages.
    pub async fn add_message(
        &self,
        session_id: &str,
        role: &str,
        content: &str,
    ) -> Result<Message> {
        let _guard = self.store.write_guard().await;
        let session = self
            .get_session(session_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("session {}", session_id)))?;
        if session.state != SessionState::Active {
            return Err(CoreError::Invalid(format!(
                "session {} is {}, not active",
                session_id,
                session.state.as_str()
            ))
            .into());
        }

        let mut tx = self.store.pool().begin().await?;
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().timestamp();
        let seq = session.message_count + 1;

        sqlx::query(
            "INSERT INTO messages (id, session_id, seq, role, content, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(session_id)
        .bind(seq)
        .bind(role)
        .bind(content)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE sessions SET message_count = message_count + 1, updated_at = ? WHERE id = ?",
        )
        .bind(now)
        .bind(session_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Message {
            id,
            session_id: session_id.to_string(),
            role: role.to_string(),
            content: content.to_string(),
            created_at: chrono::DateTime::from_timestamp(now, 0).unwrap_or_else(Utc::now),
        })
    }

    /// Remove a message, decrementing the session count in step.
    pub async fn remove_message(&self, message_id: &str) -> Result<bool> {
        let _guard = self.store.write_guard().await;
        let session_id: Option<String> =
            sqlx::query_scalar("SELECT session_id FROM messages WHERE id = ?")
                .bind(message_id)
                .fetch_optional(self.store.pool())
                .await?;
        let Some(session_id) = session_id else {
            return Ok(false);
        };

        let mut tx = self.store.pool().begin().await?;
        sqlx::query("DELETE FROM messages WHERE id = ?")
            .bind(message_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "UPDATE sessions SET message_count = message_count - 1, updated_at = ? WHERE id = ?",
        )
        .bind(Utc::now().timestamp())
        .bind(&session_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(true)
    }

    /// Messages in FIFO order.
    pub async fn messages(&self, session_id: &str) -> Result<Vec<Message>> {
        let rows = sqlx::query(
            "SELECT * FROM messages WHERE session_id = ? ORDER BY created_at ASC, seq ASC",
        )
        .bind(session_id)
        .fetch_all(self.store.pool())
        .await?;
        Ok(rows.iter().map(row_to_message).collect())
    }

    /// True when the session has outgrown its active window.
    pub async fn should_summarize(&self, session_id: &str) -> Result<bool> {
        let session = self
            .get_session(session_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("session {}", session_id)))?;
        Ok(session.message_count > self.config.max_active_messages)
    }

    /// Summarize a session via the provider and advance it to
    /// `summarized`. Provider failures are surfaced.
    pub async fn summarize_session(
        &self,
        session_id: &str,
        provider: &dyn CompletionProvider,
    ) -> Result<SessionSummary> {
        let messages = self.messages(session_id).await?;
        let transcript = prepare_transcript(&messages, self.config.max_transcript_length);

        let prompt = format!(
            "Summarize this conversation. Respond with exactly five labeled \
             sections:\nOVERVIEW: one paragraph\nTOPICS: one per line, or the \
             word none\nDECISIONS: one per line, or none\nCODE_REFERENCES: one \
             per line, or none\nKEY_POINTS: one per line, or none\n\n\
             Transcript:\n{}",
            transcript
        );
        let response = provider.complete(&prompt).await.map_err(|e| {
            CoreError::ProviderUnavailable(format!("summarization failed: {}", e))
        })?;
        let summary = parse_summary(&response);

        {
            let _guard = self.store.write_guard().await;
            sqlx::query("UPDATE sessions SET summary = ?, updated_at = ? WHERE id = ?")
                .bind(&summary.overview)
                .bind(Utc::now().timestamp())
                .bind(session_id)
                .execute(self.store.pool())
                .await?;
        }

        let session = self
            .get_session(session_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("session {}", session_id)))?;
        if session.state.rank() < SessionState::Summarized.rank() {
            self.transition(session_id, SessionState::Summarized).await?;
        }

        Ok(summary)
    }

    /// Scan messages for decision phrases and expand matches through the
    /// provider into stored decisions.
    pub async fn extract_decisions(
        &self,
        session_id: &str,
        provider: &dyn CompletionProvider,
    ) -> Result<Vec<Decision>> {
        let messages = self.messages(session_id).await?;
        let candidates: Vec<&Message> = messages
            .iter()
            .filter(|m| patterns::contains_decision_phrase(&m.content))
            .collect();
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let excerpt: Vec<String> = candidates
            .iter()
            .map(|m| format!("[{}]: {}", m.role.to_uppercase(), m.content))
            .collect();
        let prompt = format!(
            "Extract the decisions from these messages. For each decision \
             respond with a block:\nDECISION: what was decided\nCONTEXT: why\n\
             ALTERNATIVES: comma-separated options that were rejected, or \
             none\n\nMessages:\n{}",
            excerpt.join("\n")
        );
        let response = provider.complete(&prompt).await.map_err(|e| {
            CoreError::ProviderUnavailable(format!("decision extraction failed: {}", e))
        })?;

        let mut decisions = Vec::new();
        for (description, context, alternatives) in parse_decision_blocks(&response) {
            let id = Uuid::new_v4().to_string();
            let now = Utc::now().timestamp();
            {
                let _guard = self.store.write_guard().await;
                sqlx::query(
                    "INSERT INTO decisions (id, session_id, description, context, alternatives, created_at) VALUES (?, ?, ?, ?, ?, ?)",
                )
                .bind(&id)
                .bind(session_id)
                .bind(&description)
                .bind(&context)
                .bind(serde_json::to_string(&alternatives)?)
                .bind(now)
                .execute(self.store.pool())
                .await?;
            }
            decisions.push(Decision {
                id,
                session_id: session_id.to_string(),
                description,
                context,
                alternatives,
                created_at: chrono::DateTime::from_timestamp(now, 0).unwrap_or_else(Utc::now),
            });
        }
        Ok(decisions)
    }

    pub async fn decisions(&self, session_id: &str) -> Result<Vec<Decision>> {
        let rows = sqlx::query(
            "SELECT * FROM decisions WHERE session_id = ? ORDER BY created_at ASC",
        )
        .bind(session_id)
        .fetch_all(self.store.pool())
        .await?;
        Ok(rows.iter().map(row_to_decision).collect())
    }
}

/// `[ROLE]: content` lines, clipped to the transcript cap.
pub fn prepare_transcript(messages: &[Message], max_length: usize) -> String {
    let mut transcript = String::new();
    for message in messages {
        transcript.push_str(&format!(
            "[{}]: {}\n",
            message.role.to_uppercase(),
            message.content
        ));
    }
    if transcript.chars().count() > max_length {
        transcript.chars().take(max_length).collect()
    } else {
        transcript
    }
}

/// Parse the five labeled summary sections. A list section holding the
/// literal `none` yields an empty list.
pub fn parse_summary(response: &str) -> SessionSummary {
    const LABELS: [&str; 5] = [
        "OVERVIEW:",
        "TOPICS:",
        "DECISIONS:",
        "CODE_REFERENCES:",
        "KEY_POINTS:",
    ];

    let mut sections: [Vec<String>; 5] = Default::default();
    let mut current: Option<usize> = None;

    for line in response.lines() {
        let trimmed = line.trim();
        let mut matched = false;
        for (i, label) in LABELS.iter().enumerate() {
            if let Some(rest) = trimmed.strip_prefix(label) {
                current = Some(i);
                let rest = rest.trim();
                if !rest.is_empty() {
                    sections[i].push(rest.to_string());
                }
                matched = true;
                break;
            }
        }
        if matched || trimmed.is_empty() {
            continue;
        }
        if let Some(i) = current {
            sections[i].push(trimmed.trim_start_matches('-').trim().to_string());
        }
    }

    let list = |items: &[String]| -> Vec<String> {
        if items.len() == 1 && items[0].eq_ignore_ascii_case("none") {
            Vec::new()
        } else {
            items
                .iter()
                .filter(|s| !s.eq_ignore_ascii_case("none"))
                .cloned()
                .collect()
        }
    };

    SessionSummary {
        overview: sections[0].join(" "),
        topics: list(&sections[1]),
        decisions: list(&sections[2]),
        code_references: list(&sections[3]),
        key_points: list(&sections[4]),
    }
}

/// Parse repeated `DECISION/CONTEXT/ALTERNATIVES` blocks.
pub fn parse_decision_blocks(response: &str) -> Vec<(String, Option<String>, Vec<String>)> {
    let mut blocks = Vec::new();
    let mut description: Option<String> = None;
    let mut context: Option<String> = None;
    let mut alternatives: Vec<String> = Vec::new();

    let mut flush = |description: &mut Option<String>,
                     context: &mut Option<String>,
                     alternatives: &mut Vec<String>,
                     blocks: &mut Vec<(String, Option<String>, Vec<String>)>| {
        if let Some(d) = description.take() {
            blocks.push((d, context.take(), std::mem::take(alternatives)));
        } else {
            context.take();
            alternatives.clear();
        }
    };

    for line in response.lines() {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix("DECISION:") {
            flush(&mut description, &mut context, &mut alternatives, &mut blocks);
            description = Some(rest.trim().to_string());
        } else if let Some(rest) = trimmed.strip_prefix("CONTEXT:") {
            let rest = rest.trim();
            context = (!rest.is_empty()).then(|| rest.to_string());
        } else if let Some(rest) = trimmed.strip_prefix("ALTERNATIVES:") {
            let rest = rest.trim();
            if !rest.eq_ignore_ascii_case("none") {
                alternatives = rest
                    .split(',')
                    .map(|a| a.trim().to_string())
                    .filter(|a| !a.is_empty())
                    .collect();
            }
        }
    }
    flush(&mut description, &mut context, &mut alternatives, &mut blocks);
    blocks
}

fn row_to_session(row: &sqlx::sqlite::SqliteRow) -> Result<Session> {
    let state_str: String = row.get("state");
    let state = SessionState::parse(&state_str)
        .ok_or_else(|| CoreError::Invalid(format!("unknown session state: {}", state_str)))?;
    Ok(Session {
        id: row.get("id"),
        project_id: row.get("project_id"),
        title: row.get("title"),
        state,
        message_count: row.get("message_count"),
        summary: row.get("summary"),
        created_at: chrono::DateTime::from_timestamp(row.get("created_at"), 0)
            .unwrap_or_else(Utc::now),
        updated_at: chrono::DateTime::from_timestamp(row.get("updated_at"), 0)
            .unwrap_or_else(Utc::now),
    })
}

fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> Message {
    Message {
        id: row.get("id"),
        session_id: row.get("session_id"),
        role: row.get("role"),
        content: row.get("content"),
        created_at: chrono::DateTime::from_timestamp(row.get("created_at"), 0)
            .unwrap_or_else(Utc::now),
    }
}

fn row_to_decision(row: &sqlx::sqlite::SqliteRow) -> Decision {
    let alternatives_json: String = row.get("alternatives");
    Decision {
        id: row.get("id"),
        session_id: row.get("session_id"),
        description: row.get("description"),
        context: row.get("context"),
        alternatives: serde_json::from_str(&alternatives_json).unwrap_or_default(),
        created_at: chrono::DateTime::from_timestamp(row.get("created_at"), 0)
            .unwrap_or_else(Utc::now),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate;
    use crate::provider::MockCompletion;


    async fn memory_store() -> Store {
        let pool = crate::db::connect_memory().await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        Store::from_pool(pool, "test")
    }

    fn config() -> MemoryConfig {
        MemoryConfig::default()
    }

    #[tokio::test]
    async fn test_message_count_tracks_inserts_and_deletes() {
        let store = memory_store().await;
        let memory = ConversationMemory::new(&store, &config());
        let session = memory.create_session(Some("debugging")).await.unwrap();

        memory.add_message(&session.id, "user", "hello").await.unwrap();
        let m2 = memory
            .add_message(&session.id, "assistant", "hi there")
            .await
            .unwrap();
        assert_eq!(
            memory.get_session(&session.id).await.unwrap().unwrap().message_count,
            2
        );

        memory.remove_message(&m2.id).await.unwrap();
        assert_eq!(
            memory.get_session(&session.id).await.unwrap().unwrap().message_count,
            1
        );
    }

    #[tokio::test]
    async fn test_messages_fifo_order() {
        let store = memory_store().await;
        let memory = ConversationMemory::new(&store, &config());
        let session = memory.create_session(None).await.unwrap();
        for i in 0..5 {
            memory
                .add_message(&session.id, "user", &format!("message {}", i))
                .await
                .unwrap();
        }
        let messages = memory.messages(&session.id).await.unwrap();
        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(
            contents,
            vec!["message 0", "message 1", "message 2", "message 3", "message 4"]
        );
    }

    #[tokio::test]
    async fn test_state_transitions_monotonic() {
        let store = memory_store().await;
        let memory = ConversationMemory::new(&store, &config());
        let session = memory.create_session(None).await.unwrap();

        memory
            .transition(&session.id, SessionState::Archived)
            .await
            .unwrap();
        memory
            .transition(&session.id, SessionState::Summarized)
            .await
            .unwrap();

        // Backwards is rejected.
        assert!(memory
            .transition(&session.id, SessionState::Active)
            .await
            .is_err());
        assert!(memory
            .transition(&session.id, SessionState::Archived)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_archived_session_rejects_messages() {
        let store = memory_store().await;
        let memory = ConversationMemory::new(&store, &config());
        let session = memory.create_session(None).await.unwrap();
        memory
            .transition(&session.id, SessionState::Archived)
            .await
            .unwrap();
        assert!(memory.add_message(&session.id, "user", "late").await.is_err());
    }

    #[tokio::test]
    async fn test_should_summarize_threshold() {
        let store = memory_store().await;
        let cfg = MemoryConfig {
            max_active_messages: 2,
            ..MemoryConfig::default()
        };
        let memory = ConversationMemory::new(&store, &cfg);
        let session = memory.create_session(None).await.unwrap();

        memory.add_message(&session.id, "user", "one").await.unwrap();
        memory.add_message(&session.id, "user", "two").await.unwrap();
        assert!(!memory.should_summarize(&session.id).await.unwrap());
        memory.add_message(&session.id, "user", "three").await.unwrap();
        assert!(memory.should_summarize(&session.id).await.unwrap());
    }

    #[test]
    fn test_prepare_transcript_format_and_cap() {
        let messages = vec![
            Message {
                id: "1".into(),
                session_id: "s".into(),
                role: "user".into(),
                content: "hello".into(),
                created_at: Utc::now(),
            },
            Message {
                id: "2".into(),
                session_id: "s".into(),
                role: "assistant".into(),
                content: "hi".into(),
                created_at: Utc::now(),
            },
        ];
        let transcript = prepare_transcript(&messages, 10_000);
        assert!(transcript.starts_with("[USER]: hello\n"));
        assert!(transcript.contains("[ASSISTANT]: hi\n"));

        let clipped = prepare_transcript(&messages, 8);
        assert_eq!(clipped.chars().count(), 8);
    }

    #[test]
    fn test_parse_summary_sections() {
        let response = "OVERVIEW: We debugged the indexer together.\nTOPICS:\n- hashing\n- chunking\nDECISIONS: none\nCODE_REFERENCES:\n- src/indexer.rs\nKEY_POINTS:\n- hash check comes first\n";
        let summary = parse_summary(response);
        assert_eq!(summary.overview, "We debugged the indexer together.");
        assert_eq!(summary.topics, vec!["hashing", "chunking"]);
        assert!(summary.decisions.is_empty());
        assert_eq!(summary.code_references, vec!["src/indexer.rs"]);
        assert_eq!(summary.key_points, vec!["hash check comes first"]);
    }

    #[test]
    fn test_parse_decision_blocks() {
        let response = "DECISION: use SQLite\nCONTEXT: simplest durable store\nALTERNATIVES: postgres, flat files\nDECISION: cap transcripts\nCONTEXT: provider limits\nALTERNATIVES: none\n";
        let blocks = parse_decision_blocks(response);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].0, "use SQLite");
        assert_eq!(blocks[0].2, vec!["postgres", "flat files"]);
        assert!(blocks[1].2.is_empty());
    }

    #[tokio::test]
    async fn test_summarize_session_stores_summary_and_advances() {
        let store = memory_store().await;
        let memory = ConversationMemory::new(&store, &config());
        let session = memory.create_session(None).await.unwrap();
        memory
            .add_message(&session.id, "user", "we decided to use SQLite for storage")
            .await
            .unwrap();

        let provider = MockCompletion {
            canned: Some(
                "OVERVIEW: Storage talk.\nTOPICS: none\nDECISIONS:\n- use SQLite\nCODE_REFERENCES: none\nKEY_POINTS: none\n"
                    .into(),
            ),
        };
        let summary = memory.summarize_session(&session.id, &provider).await.unwrap();
        assert_eq!(summary.overview, "Storage talk.");
        assert_eq!(summary.decisions, vec!["use SQLite"]);

        let stored = memory.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(stored.state, SessionState::Summarized);
        assert_eq!(stored.summary.as_deref(), Some("Storage talk."));
    }

    #[tokio::test]
    async fn test_extract_decisions_scans_phrases() {
        let store = memory_store().await;
        let memory = ConversationMemory::new(&store, &config());
        let session = memory.create_session(None).await.unwrap();
        memory
            .add_message(&session.id, "user", "we decided to use SQLite")
            .await
            .unwrap();
        memory
            .add_message(&session.id, "assistant", "noted, updating the plan")
            .await
            .unwrap();

        let provider = MockCompletion {
            canned: Some(
                "DECISION: use SQLite\nCONTEXT: durability\nALTERNATIVES: postgres\n".into(),
            ),
        };
        let decisions = memory.extract_decisions(&session.id, &provider).await.unwrap();
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].description, "use SQLite");
        assert_eq!(decisions[0].alternatives, vec!["postgres"]);

        let stored = memory.decisions(&session.id).await.unwrap();
        assert_eq!(stored.len(), 1);
    }
}
