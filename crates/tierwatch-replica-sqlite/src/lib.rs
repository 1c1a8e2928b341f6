use std::path::PathBuf;

use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Params};
use tierwatch_core::{
    EngineError, LogTimestamp, ReplicaGateway, RightsChangeRow, RightsLogSource, ScriptPageEdit,
};

/// Table layout the gateway expects, mirroring the slice of the wiki
/// replica it reads. Exposed so fixture databases can be seeded for tests
/// and local tooling.
pub const REPLICA_SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS user (
  user_id INTEGER PRIMARY KEY,
  user_name TEXT NOT NULL UNIQUE,
  user_editcount INTEGER
);

CREATE TABLE IF NOT EXISTS user_groups (
  ug_user INTEGER NOT NULL,
  ug_group TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS actor (
  actor_id INTEGER PRIMARY KEY,
  actor_name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS logging (
  log_id INTEGER PRIMARY KEY AUTOINCREMENT,
  log_type TEXT NOT NULL,
  log_action TEXT NOT NULL DEFAULT '',
  log_actor INTEGER,
  log_timestamp TEXT NOT NULL,
  log_title TEXT NOT NULL,
  log_params BLOB NOT NULL
);

CREATE TABLE IF NOT EXISTS page (
  page_id INTEGER PRIMARY KEY,
  page_namespace INTEGER NOT NULL,
  page_title TEXT NOT NULL,
  page_content_model TEXT
);

CREATE TABLE IF NOT EXISTS revision (
  rev_id INTEGER PRIMARY KEY AUTOINCREMENT,
  rev_page INTEGER NOT NULL,
  rev_actor INTEGER NOT NULL,
  rev_timestamp TEXT NOT NULL,
  rev_parent_id INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_logging_title ON logging(log_type, log_title);
CREATE INDEX IF NOT EXISTS idx_revision_actor ON revision(rev_actor, rev_timestamp);
";

/// Page content models that mark a script or style page.
const SCRIPT_CONTENT_MODELS: &str = "'css', 'sanitized-css', 'javascript', 'json'";

const PROPERTY_NAMESPACE: i64 = 120;
const INTERFACE_NAMESPACE: i64 = 8;

#[derive(Debug, Clone)]
pub struct ReplicaConfig {
    pub local_db: PathBuf,
    pub central_db: PathBuf,
    /// Wiki id used by the central log's `<user>@<wiki>` title convention.
    pub local_wiki_id: String,
}

impl ReplicaConfig {
    #[must_use]
    pub fn new(local_db: PathBuf, central_db: PathBuf) -> Self {
        Self { local_db, central_db, local_wiki_id: "wikidatawiki".to_string() }
    }
}

#[derive(Debug, Clone, Copy)]
enum Database {
    Local,
    Central,
}

/// Read-only gateway over the wiki replica. Every trait call opens its
/// own scoped connection and releases it on drop; nothing is cached
/// between calls.
pub struct SqliteReplica {
    config: ReplicaConfig,
}

impl SqliteReplica {
    #[must_use]
    pub fn new(config: ReplicaConfig) -> Self {
        Self { config }
    }

    fn connect(&self, database: Database) -> Result<Connection, EngineError> {
        let path = match database {
            Database::Local => &self.config.local_db,
            Database::Central => &self.config.central_db,
        };
        Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY
                | OpenFlags::SQLITE_OPEN_NO_MUTEX
                | OpenFlags::SQLITE_OPEN_URI,
        )
        .map_err(|err| {
            EngineError::Query(format!("cannot open replica database {}: {err}", path.display()))
        })
    }
}

fn query_error(context: &str, err: &rusqlite::Error) -> EngineError {
    EngineError::Query(format!("{context}: {err}"))
}

fn count_query<P: Params>(
    conn: &Connection,
    sql: &str,
    bindings: P,
    context: &str,
) -> Result<u64, EngineError> {
    let count: i64 = conn
        .query_row(sql, bindings, |row| row.get(0))
        .map_err(|err| query_error(context, &err))?;
    Ok(u64::try_from(count).unwrap_or(0))
}

fn parse_row_timestamp(raw: &str, context: &str) -> Result<LogTimestamp, EngineError> {
    LogTimestamp::parse(raw)
        .ok_or_else(|| EngineError::Query(format!("{context}: invalid timestamp {raw:?}")))
}

fn underscored(username: &str) -> String {
    username.replace(' ', "_")
}

impl ReplicaGateway for SqliteReplica {
    fn group_members(&self, group: &str) -> Result<Vec<String>, EngineError> {
        let context = "enumerate group members";
        let conn = self.connect(Database::Local)?;
        let mut stmt = conn
            .prepare(
                "SELECT user_name
                 FROM user
                   LEFT JOIN user_groups ON user_id = ug_user
                 WHERE ug_group = ?1
                 ORDER BY user_name ASC",
            )
            .map_err(|err| query_error(context, &err))?;
        let rows = stmt
            .query_map(params![group], |row| row.get::<_, String>(0))
            .map_err(|err| query_error(context, &err))?;

        let mut members = Vec::new();
        for row in rows {
            members.push(row.map_err(|err| query_error(context, &err))?);
        }
        Ok(members)
    }

    fn edit_count(&self, username: &str) -> Result<u64, EngineError> {
        let conn = self.connect(Database::Local)?;
        let count: Option<Option<i64>> = conn
            .query_row(
                "SELECT user_editcount FROM user WHERE user_name = ?1",
                params![username],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| query_error("query edit count", &err))?;
        Ok(count.flatten().and_then(|value| u64::try_from(value).ok()).unwrap_or(0))
    }

    fn latest_edit_timestamp(&self, username: &str) -> Result<Option<LogTimestamp>, EngineError> {
        let context = "query latest edit";
        let conn = self.connect(Database::Local)?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT rev_timestamp
                 FROM revision
                   JOIN actor ON rev_actor = actor_id
                 WHERE actor_name = ?1
                 ORDER BY rev_timestamp DESC
                 LIMIT 1",
                params![username],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| query_error(context, &err))?;

        match raw {
            None => Ok(None),
            Some(raw) => parse_row_timestamp(&raw, context).map(Some),
        }
    }

    fn logged_action_count(
        &self,
        username: &str,
        log_types: &[&str],
        since: LogTimestamp,
    ) -> Result<u64, EngineError> {
        // Log types come from fixed role definitions, never from input.
        let type_list =
            log_types.iter().map(|name| format!("'{name}'")).collect::<Vec<_>>().join(", ");
        let sql = format!(
            "SELECT COUNT(log_id)
             FROM logging
               JOIN actor ON log_actor = actor_id
             WHERE actor_name = ?1
               AND log_timestamp >= ?2
               AND log_type IN ({type_list})"
        );
        let conn = self.connect(Database::Local)?;
        count_query(&conn, &sql, params![username, since.compact_string()], "count logged actions")
    }

    fn property_creation_count(
        &self,
        username: &str,
        since: LogTimestamp,
    ) -> Result<u64, EngineError> {
        let conn = self.connect(Database::Local)?;
        count_query(
            &conn,
            "SELECT COUNT(*)
             FROM page
               JOIN revision ON page_id = rev_page
               JOIN actor ON rev_actor = actor_id
             WHERE rev_parent_id = 0
               AND rev_timestamp >= ?2
               AND page_namespace = ?3
               AND actor_name = ?1",
            params![username, since.compact_string(), PROPERTY_NAMESPACE],
            "count property creations",
        )
    }

    fn interface_message_edit_count(
        &self,
        username: &str,
        since: LogTimestamp,
    ) -> Result<u64, EngineError> {
        let sql = format!(
            "SELECT COUNT(rev_id)
             FROM revision
               JOIN actor ON rev_actor = actor_id
               JOIN page ON rev_page = page_id
             WHERE actor_name = ?1
               AND rev_timestamp >= ?2
               AND page_namespace = ?3
               AND page_content_model NOT IN ({SCRIPT_CONTENT_MODELS})"
        );
        let conn = self.connect(Database::Local)?;
        count_query(
            &conn,
            &sql,
            params![username, since.compact_string(), INTERFACE_NAMESPACE],
            "count interface message edits",
        )
    }

    fn script_page_edits(
        &self,
        username: &str,
        since: LogTimestamp,
    ) -> Result<Vec<ScriptPageEdit>, EngineError> {
        let context = "query script page edits";
        let sql = format!(
            "SELECT page_title, page_namespace
             FROM revision
               JOIN actor ON rev_actor = actor_id
               JOIN page ON rev_page = page_id
             WHERE actor_name = ?1
               AND rev_timestamp >= ?2
               AND page_content_model IN ({SCRIPT_CONTENT_MODELS})"
        );
        let conn = self.connect(Database::Local)?;
        let mut stmt = conn.prepare(&sql).map_err(|err| query_error(context, &err))?;
        let rows = stmt
            .query_map(params![username, since.compact_string()], |row| {
                Ok(ScriptPageEdit { title: row.get(0)?, namespace: row.get(1)? })
            })
            .map_err(|err| query_error(context, &err))?;

        let mut edits = Vec::new();
        for row in rows {
            edits.push(row.map_err(|err| query_error(context, &err))?);
        }
        Ok(edits)
    }

    fn rights_change_rows(
        &self,
        username: &str,
        source: RightsLogSource,
    ) -> Result<Vec<RightsChangeRow>, EngineError> {
        let context = "query rights changes";
        let (conn, log_title) = match source {
            RightsLogSource::LocalWiki => (self.connect(Database::Local)?, underscored(username)),
            // Some rights changes live in the central log under the
            // <user>@<wiki> title convention.
            RightsLogSource::CentralWiki => (
                self.connect(Database::Central)?,
                format!("{}@{}", underscored(username), self.config.local_wiki_id),
            ),
        };

        let mut stmt = conn
            .prepare(
                "SELECT log_timestamp, log_params
                 FROM logging
                 WHERE log_type = 'rights'
                   AND log_title = ?1",
            )
            .map_err(|err| query_error(context, &err))?;
        let rows = stmt
            .query_map(params![log_title], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
            })
            .map_err(|err| query_error(context, &err))?;

        let mut changes = Vec::new();
        for row in rows {
            let (raw_timestamp, blob) = row.map_err(|err| query_error(context, &err))?;
            changes.push(RightsChangeRow {
                timestamp: parse_row_timestamp(&raw_timestamp, context)?,
                params: blob,
            });
        }
        Ok(changes)
    }

    fn own_rights_action_rows(
        &self,
        username: &str,
        since: LogTimestamp,
    ) -> Result<Vec<RightsChangeRow>, EngineError> {
        let context = "query own rights actions";
        let conn = self.connect(Database::Local)?;
        let mut stmt = conn
            .prepare(
                "SELECT log_timestamp, log_params
                 FROM logging
                   JOIN actor ON log_actor = actor_id
                 WHERE actor_name = ?1
                   AND log_timestamp >= ?2
                   AND log_type = 'rights'",
            )
            .map_err(|err| query_error(context, &err))?;
        let rows = stmt
            .query_map(params![username, since.compact_string()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
            })
            .map_err(|err| query_error(context, &err))?;

        let mut actions = Vec::new();
        for row in rows {
            let (raw_timestamp, blob) = row.map_err(|err| query_error(context, &err))?;
            actions.push(RightsChangeRow {
                timestamp: parse_row_timestamp(&raw_timestamp, context)?,
                params: blob,
            });
        }
        Ok(actions)
    }

    fn rename_log_params(&self, username: &str) -> Result<Vec<Vec<u8>>, EngineError> {
        let context = "query rename log";
        let conn = self.connect(Database::Central)?;
        let log_title = format!("CentralAuth/{}", underscored(username));
        let mut stmt = conn
            .prepare(
                "SELECT log_params
                 FROM logging
                 WHERE log_type = 'gblrename'
                   AND log_action = 'rename'
                   AND log_title = ?1",
            )
            .map_err(|err| query_error(context, &err))?;
        let rows = stmt
            .query_map(params![log_title], |row| row.get::<_, Vec<u8>>(0))
            .map_err(|err| query_error(context, &err))?;

        let mut blobs = Vec::new();
        for row in rows {
            blobs.push(row.map_err(|err| query_error(context, &err))?);
        }
        Ok(blobs)
    }
}
