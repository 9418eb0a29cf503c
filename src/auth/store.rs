//! Account, session and login-failure storage.
//!
//! Backed by a single sqlite connection owned by the auth service loop; the
//! service is the only writer, so no connection pooling or WAL tuning is
//! needed. Every primitive is one statement or one implicit transaction.
//!
//! Sessions past their expiry are treated as absent on read; a periodic
//! sweep removes the rows.

use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("username already taken")]
    UsernameTaken,
    #[error("account not found")]
    AccountNotFound,
    #[error("token entropy unavailable: {0}")]
    Entropy(String),
    #[error(transparent)]
    Database(#[from] rusqlite::Error),
}

/// Durable account row. `ban_until` of 0 with `is_banned` means permanent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub account_id: u64,
    pub username: String,
    pub password_hash: String,
    pub email: Option<String>,
    pub created_at: i64,
    pub last_login_at: i64,
    pub is_banned: bool,
    pub ban_reason: String,
    pub ban_until: i64,
}

impl Account {
    /// A ban is in force when flagged and either permanent or not yet lapsed.
    pub fn ban_in_force(&self, now: i64) -> bool {
        self.is_banned && (self.ban_until == 0 || self.ban_until > now)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub account_id: u64,
    pub created_at: i64,
    pub expires_at: i64,
    pub last_seen_ip: String,
}

pub struct AuthStore {
    conn: Connection,
}

impl AuthStore {
    /// Open (or create) the store at `path` and initialize the schema.
    /// Schema failure here is fatal to the service.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS accounts (
                 account_id    INTEGER PRIMARY KEY AUTOINCREMENT,
                 username      TEXT NOT NULL,
                 username_ci   TEXT NOT NULL UNIQUE,
                 password_hash TEXT NOT NULL,
                 email         TEXT,
                 created_at    INTEGER NOT NULL,
                 last_login_at INTEGER NOT NULL DEFAULT 0,
                 is_banned     INTEGER NOT NULL DEFAULT 0,
                 ban_reason    TEXT NOT NULL DEFAULT '',
                 ban_until     INTEGER NOT NULL DEFAULT 0,
                 is_deleted    INTEGER NOT NULL DEFAULT 0
             );
             CREATE TABLE IF NOT EXISTS sessions (
                 token        TEXT PRIMARY KEY,
                 account_id   INTEGER NOT NULL,
                 created_at   INTEGER NOT NULL,
                 expires_at   INTEGER NOT NULL,
                 last_seen_ip TEXT NOT NULL DEFAULT ''
             );
             CREATE INDEX IF NOT EXISTS idx_sessions_account ON sessions(account_id);
             CREATE TABLE IF NOT EXISTS login_failures (
                 username_ci TEXT NOT NULL,
                 ip          TEXT NOT NULL,
                 at          INTEGER NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_failures_lookup
                 ON login_failures(username_ci, ip, at);",
        )?;
        Ok(())
    }

    // ---- accounts ----

    /// Create an account. Username uniqueness is case-insensitive and
    /// enforced by the storage layer; account ids are never reused.
    pub fn create_account(
        &self,
        username: &str,
        password_hash: &str,
        email: Option<&str>,
        now: i64,
    ) -> Result<u64, StoreError> {
        let result = self.conn.execute(
            "INSERT INTO accounts (username, username_ci, password_hash, email, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                username,
                username.to_lowercase(),
                password_hash,
                email,
                now
            ],
        );
        match result {
            Ok(_) => Ok(self.conn.last_insert_rowid() as u64),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::UsernameTaken)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn account_by_username(&self, username: &str) -> Result<Option<Account>, StoreError> {
        self.conn
            .query_row(
                "SELECT account_id, username, password_hash, email, created_at, last_login_at,
                        is_banned, ban_reason, ban_until
                 FROM accounts WHERE username_ci = ?1 AND is_deleted = 0",
                params![username.to_lowercase()],
                row_to_account,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn account_by_id(&self, account_id: u64) -> Result<Option<Account>, StoreError> {
        self.conn
            .query_row(
                "SELECT account_id, username, password_hash, email, created_at, last_login_at,
                        is_banned, ban_reason, ban_until
                 FROM accounts WHERE account_id = ?1 AND is_deleted = 0",
                params![account_id as i64],
                row_to_account,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Rewrite the password hash and invalidate every session of the
    /// account. Returns the number of sessions removed.
    pub fn update_password_hash(
        &self,
        account_id: u64,
        new_hash: &str,
    ) -> Result<u32, StoreError> {
        let updated = self.conn.execute(
            "UPDATE accounts SET password_hash = ?1 WHERE account_id = ?2 AND is_deleted = 0",
            params![new_hash, account_id as i64],
        )?;
        if updated == 0 {
            return Err(StoreError::AccountNotFound);
        }
        self.delete_all_sessions_for(account_id)
    }

    /// Ban an account (`until` 0 = permanent) and invalidate its sessions.
    pub fn ban_account(&self, account_id: u64, reason: &str, until: i64) -> Result<(), StoreError> {
        let updated = self.conn.execute(
            "UPDATE accounts SET is_banned = 1, ban_reason = ?1, ban_until = ?2
             WHERE account_id = ?3 AND is_deleted = 0",
            params![reason, until, account_id as i64],
        )?;
        if updated == 0 {
            return Err(StoreError::AccountNotFound);
        }
        self.delete_all_sessions_for(account_id)?;
        Ok(())
    }

    pub fn unban_account(&self, account_id: u64) -> Result<(), StoreError> {
        let updated = self.conn.execute(
            "UPDATE accounts SET is_banned = 0, ban_reason = '', ban_until = 0
             WHERE account_id = ?1 AND is_deleted = 0",
            params![account_id as i64],
        )?;
        if updated == 0 {
            return Err(StoreError::AccountNotFound);
        }
        Ok(())
    }

    pub fn touch_last_login(&self, account_id: u64, now: i64) -> Result<(), StoreError> {
        self.conn.execute(
            "UPDATE accounts SET last_login_at = ?1 WHERE account_id = ?2",
            params![now, account_id as i64],
        )?;
        Ok(())
    }

    /// Soft delete. The row (and its id) stays forever.
    pub fn soft_delete_account(&self, account_id: u64) -> Result<(), StoreError> {
        let updated = self.conn.execute(
            "UPDATE accounts SET is_deleted = 1 WHERE account_id = ?1",
            params![account_id as i64],
        )?;
        if updated == 0 {
            return Err(StoreError::AccountNotFound);
        }
        self.delete_all_sessions_for(account_id)?;
        Ok(())
    }

    // ---- sessions ----

    pub fn create_session(
        &self,
        account_id: u64,
        token: &str,
        now: i64,
        expires_at: i64,
        ip: &str,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO sessions (token, account_id, created_at, expires_at, last_seen_ip)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![token, account_id as i64, now, expires_at, ip],
        )?;
        Ok(())
    }

    /// Look up a session. Rows past expiry are invisible here.
    pub fn session_by_token(&self, token: &str, now: i64) -> Result<Option<Session>, StoreError> {
        self.conn
            .query_row(
                "SELECT token, account_id, created_at, expires_at, last_seen_ip
                 FROM sessions WHERE token = ?1 AND expires_at > ?2",
                params![token, now],
                |row| {
                    Ok(Session {
                        token: row.get(0)?,
                        account_id: row.get::<_, i64>(1)? as u64,
                        created_at: row.get(2)?,
                        expires_at: row.get(3)?,
                        last_seen_ip: row.get(4)?,
                    })
                },
            )
            .optional()
            .map_err(Into::into)
    }

    /// Look up a session regardless of expiry, so callers can tell an
    /// expired token apart from one that never existed.
    pub fn session_by_token_raw(&self, token: &str) -> Result<Option<Session>, StoreError> {
        self.conn
            .query_row(
                "SELECT token, account_id, created_at, expires_at, last_seen_ip
                 FROM sessions WHERE token = ?1",
                params![token],
                |row| {
                    Ok(Session {
                        token: row.get(0)?,
                        account_id: row.get::<_, i64>(1)? as u64,
                        created_at: row.get(2)?,
                        expires_at: row.get(3)?,
                        last_seen_ip: row.get(4)?,
                    })
                },
            )
            .optional()
            .map_err(Into::into)
    }

    /// True when the token existed (expired or not).
    pub fn delete_session(&self, token: &str) -> Result<bool, StoreError> {
        let deleted = self
            .conn
            .execute("DELETE FROM sessions WHERE token = ?1", params![token])?;
        Ok(deleted > 0)
    }

    pub fn delete_all_sessions_for(&self, account_id: u64) -> Result<u32, StoreError> {
        let deleted = self.conn.execute(
            "DELETE FROM sessions WHERE account_id = ?1",
            params![account_id as i64],
        )?;
        Ok(deleted as u32)
    }

    pub fn sweep_expired_sessions(&self, now: i64) -> Result<u32, StoreError> {
        let deleted = self
            .conn
            .execute("DELETE FROM sessions WHERE expires_at <= ?1", params![now])?;
        Ok(deleted as u32)
    }

    // ---- login failures ----

    pub fn record_failed_login(&self, username: &str, ip: &str, now: i64) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO login_failures (username_ci, ip, at) VALUES (?1, ?2, ?3)",
            params![username.to_lowercase(), ip, now],
        )?;
        Ok(())
    }

    pub fn count_recent_failures(
        &self,
        username: &str,
        ip: &str,
        window_secs: u64,
        now: i64,
    ) -> Result<u32, StoreError> {
        let cutoff = now - window_secs as i64;
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM login_failures
             WHERE username_ci = ?1 AND ip = ?2 AND at > ?3",
            params![username.to_lowercase(), ip, cutoff],
            |row| row.get(0),
        )?;
        Ok(count as u32)
    }

    /// Drop failure rows older than the sliding window; nothing outside it
    /// is ever consulted.
    pub fn sweep_stale_failures(&self, window_secs: u64, now: i64) -> Result<u32, StoreError> {
        let cutoff = now - window_secs as i64;
        let deleted = self
            .conn
            .execute("DELETE FROM login_failures WHERE at <= ?1", params![cutoff])?;
        Ok(deleted as u32)
    }
}

fn row_to_account(row: &rusqlite::Row<'_>) -> rusqlite::Result<Account> {
    Ok(Account {
        account_id: row.get::<_, i64>(0)? as u64,
        username: row.get(1)?,
        password_hash: row.get(2)?,
        email: row.get(3)?,
        created_at: row.get(4)?,
        last_login_at: row.get(5)?,
        is_banned: row.get::<_, i64>(6)? != 0,
        ban_reason: row.get(7)?,
        ban_until: row.get(8)?,
    })
}

// ---- password hashing and tokens ----

fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

/// Salt and hash a client-supplied SHA-256 hex digest for storage, as
/// `salt_hex$digest_hex`.
pub fn hash_password(client_hash: &str) -> Result<String, StoreError> {
    let mut salt = [0u8; 16];
    getrandom::fill(&mut salt).map_err(|e| StoreError::Entropy(e.to_string()))?;
    Ok(hash_with_salt(&salt, client_hash))
}

fn hash_with_salt(salt: &[u8], client_hash: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(client_hash.as_bytes());
    format!("{}${}", to_hex(salt), to_hex(&hasher.finalize()))
}

/// Verify a client hash against a stored `salt$digest` value.
pub fn verify_password(stored: &str, client_hash: &str) -> bool {
    let Some((salt_hex, _)) = stored.split_once('$') else {
        return false;
    };
    let Some(salt) = from_hex(salt_hex) else {
        return false;
    };
    hash_with_salt(&salt, client_hash) == stored
}

fn from_hex(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
        .collect()
}

/// 64 hex characters of cryptographically strong randomness.
pub fn generate_session_token() -> Result<String, StoreError> {
    let mut raw = [0u8; 32];
    getrandom::fill(&mut raw).map_err(|e| StoreError::Entropy(e.to_string()))?;
    Ok(to_hex(&raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> AuthStore {
        AuthStore::open_in_memory().unwrap()
    }

    #[test]
    fn create_account_assigns_distinct_ids() {
        let s = store();
        let a = s.create_account("alice", "h1", None, 100).unwrap();
        let b = s.create_account("bob", "h2", None, 100).unwrap();
        assert_ne!(a, 0);
        assert_ne!(a, b);
    }

    #[test]
    fn username_uniqueness_is_case_insensitive() {
        let s = store();
        s.create_account("Alice", "h", None, 0).unwrap();
        let err = s.create_account("ALICE", "h", None, 0).unwrap_err();
        assert!(matches!(err, StoreError::UsernameTaken));
        // Lookup works by any casing and preserves the original.
        let acct = s.account_by_username("alice").unwrap().unwrap();
        assert_eq!(acct.username, "Alice");
    }

    #[test]
    fn account_ids_survive_soft_delete() {
        let s = store();
        let a = s.create_account("alice", "h", None, 0).unwrap();
        s.soft_delete_account(a).unwrap();
        assert!(s.account_by_id(a).unwrap().is_none());
        // A new account never reuses the id.
        let b = s.create_account("brand_new", "h", None, 0).unwrap();
        assert!(b > a);
    }

    #[test]
    fn expired_sessions_are_invisible() {
        let s = store();
        let a = s.create_account("alice", "h", None, 0).unwrap();
        s.create_session(a, "tok", 0, 100, "127.0.0.1").unwrap();
        assert!(s.session_by_token("tok", 50).unwrap().is_some());
        assert!(s.session_by_token("tok", 100).unwrap().is_none());
        assert!(s.session_by_token("tok", 150).unwrap().is_none());
    }

    #[test]
    fn sweep_removes_only_expired_rows() {
        let s = store();
        let a = s.create_account("alice", "h", None, 0).unwrap();
        s.create_session(a, "old", 0, 100, "ip").unwrap();
        s.create_session(a, "live", 0, 500, "ip").unwrap();
        assert_eq!(s.sweep_expired_sessions(200).unwrap(), 1);
        assert!(s.session_by_token("live", 200).unwrap().is_some());
    }

    #[test]
    fn password_change_invalidates_every_session() {
        let s = store();
        let a = s.create_account("alice", "h", None, 0).unwrap();
        s.create_session(a, "t1", 0, 1000, "ip").unwrap();
        s.create_session(a, "t2", 0, 1000, "ip").unwrap();
        let invalidated = s.update_password_hash(a, "new-hash").unwrap();
        assert_eq!(invalidated, 2);
        assert!(s.session_by_token("t1", 1).unwrap().is_none());
        assert_eq!(
            s.account_by_id(a).unwrap().unwrap().password_hash,
            "new-hash"
        );
    }

    #[test]
    fn ban_invalidates_sessions_and_ban_until_semantics_hold() {
        let s = store();
        let a = s.create_account("alice", "h", None, 0).unwrap();
        s.create_session(a, "t1", 0, 1000, "ip").unwrap();
        s.ban_account(a, "toxicity", 0).unwrap();
        assert!(s.session_by_token("t1", 1).unwrap().is_none());

        let acct = s.account_by_id(a).unwrap().unwrap();
        assert!(acct.ban_in_force(i64::MAX - 1), "permanent ban never lapses");

        s.ban_account(a, "timed", 500).unwrap();
        let acct = s.account_by_id(a).unwrap().unwrap();
        assert!(acct.ban_in_force(499));
        assert!(!acct.ban_in_force(500));
    }

    #[test]
    fn failure_counting_respects_the_window() {
        let s = store();
        s.record_failed_login("alice", "1.2.3.4", 100).unwrap();
        s.record_failed_login("alice", "1.2.3.4", 200).unwrap();
        s.record_failed_login("alice", "5.6.7.8", 200).unwrap();
        assert_eq!(s.count_recent_failures("ALICE", "1.2.3.4", 300, 250).unwrap(), 2);
        // Window slides: the first failure ages out.
        assert_eq!(s.count_recent_failures("alice", "1.2.3.4", 100, 250).unwrap(), 1);
        assert_eq!(s.sweep_stale_failures(100, 250).unwrap(), 1);
    }

    #[test]
    fn password_hash_roundtrip_and_salting() {
        let client_hash = "c".repeat(64);
        let stored1 = hash_password(&client_hash).unwrap();
        let stored2 = hash_password(&client_hash).unwrap();
        assert_ne!(stored1, stored2, "salts must differ");
        assert!(verify_password(&stored1, &client_hash));
        assert!(verify_password(&stored2, &client_hash));
        assert!(!verify_password(&stored1, &"d".repeat(64)));
        assert!(!verify_password("garbage", &client_hash));
    }

    #[test]
    fn session_tokens_are_64_hex_and_unique() {
        let t1 = generate_session_token().unwrap();
        let t2 = generate_session_token().unwrap();
        assert_eq!(t1.len(), 64);
        assert!(t1.bytes().all(|b| b.is_ascii_hexdigit()));
        assert_ne!(t1, t2);
    }

    #[test]
    fn logout_count_via_delete_all() {
        let s = store();
        let a = s.create_account("alice", "h", None, 0).unwrap();
        s.create_session(a, "t1", 0, 1000, "ip").unwrap();
        s.create_session(a, "t2", 0, 1000, "ip").unwrap();
        s.create_session(a, "t3", 0, 1000, "ip").unwrap();
        assert!(s.delete_session("t1").unwrap());
        assert!(!s.delete_session("t1").unwrap());
        assert_eq!(s.delete_all_sessions_for(a).unwrap(), 2);
    }
}
