//! Auth service: the UDP request/response handler over the store.
//!
//! One datagram in, at most one datagram out; every response echoes the
//! request's `request_id` so the coordinator can correlate its asynchronous
//! validations. Malformed packets are dropped without a reply.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::AuthConfig;
use crate::net::Endpoint;
use crate::proto::auth::{
    build_packet, parse_packet, AuthMessageType, AuthResult, ChangePasswordRequest, ErrorPayload,
    LoginRequest, LoginResponse, LogoutRequest, RegisterRequest, RegisterResponse,
    SessionsInvalidatedResponse, ValidateTokenRequest, ValidateTokenResponse,
};
use crate::proto::MAX_DATAGRAM;

use super::store::{
    generate_session_token, hash_password, verify_password, AuthStore, StoreError,
};

const USERNAME_MIN: usize = 3;
const USERNAME_MAX: usize = 32;
const CLIENT_HASH_LEN: usize = 64; // SHA-256 hex

/// Request handling split from the socket so tests can drive it with raw
/// packets and a fixed clock.
pub struct AuthHandler {
    store: AuthStore,
    config: AuthConfig,
}

impl AuthHandler {
    pub fn new(store: AuthStore, config: AuthConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &AuthStore {
        &self.store
    }

    /// Handle one inbound datagram; returns the response packet, or `None`
    /// for unparseable input.
    pub fn handle_datagram(&self, datagram: &[u8], from_ip: &str, now: i64) -> Option<Vec<u8>> {
        let (header, payload) = match parse_packet(datagram) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!(error = %e, "dropping malformed auth packet");
                return None;
            }
        };
        let request_id = header.request_id;

        match header.msg_type {
            AuthMessageType::RegisterRequest => self.on_register(payload, from_ip, now, request_id),
            AuthMessageType::LoginRequest => self.on_login(payload, from_ip, now, request_id),
            AuthMessageType::ValidateTokenRequest => self.on_validate(payload, now, request_id),
            AuthMessageType::LogoutRequest => self.on_logout(payload, request_id),
            AuthMessageType::ChangePasswordRequest => {
                self.on_change_password(payload, now, request_id)
            }
            AuthMessageType::Enable2FaRequest => Some(build_packet(
                AuthMessageType::Error,
                header.account_id,
                request_id,
                &ErrorPayload {
                    code: AuthResult::ServerError,
                    message: "2FA is not available".into(),
                }
                .encode(),
            )),
            // Responses arriving at the server are stray reflections.
            _ => None,
        }
    }

    /// Periodic maintenance: drop expired sessions and stale failure rows.
    pub fn sweep(&self, now: i64) {
        match self.store.sweep_expired_sessions(now) {
            Ok(0) => {}
            Ok(n) => info!(sessions = n, "swept expired sessions"),
            Err(e) => warn!(error = %e, "session sweep failed"),
        }
        if let Err(e) = self
            .store
            .sweep_stale_failures(self.config.failure_window_secs, now)
        {
            warn!(error = %e, "failure sweep failed");
        }
    }

    fn on_register(
        &self,
        payload: &[u8],
        from_ip: &str,
        now: i64,
        request_id: u32,
    ) -> Option<Vec<u8>> {
        let req = RegisterRequest::decode(payload).ok()?;

        let respond = |result: AuthResult, account_id: u64, token: String, message: &str| {
            Some(build_packet(
                AuthMessageType::RegisterResponse,
                account_id,
                request_id,
                &RegisterResponse {
                    result,
                    account_id,
                    session_token: token,
                    error_message: message.into(),
                }
                .encode(),
            ))
        };

        if !valid_username(&req.username) {
            return respond(
                AuthResult::InvalidUsername,
                0,
                String::new(),
                "Username must be 3-32 characters of letters, digits or underscore",
            );
        }
        if !valid_client_hash(&req.password_hash) {
            return respond(
                AuthResult::PasswordTooShort,
                0,
                String::new(),
                "Password hash must be 64 hex characters",
            );
        }

        let stored_hash = match hash_password(&req.password_hash) {
            Ok(h) => h,
            Err(e) => {
                warn!(error = %e, "password hashing failed");
                return respond(AuthResult::ServerError, 0, String::new(), "Internal error");
            }
        };
        let email = (!req.email.is_empty()).then_some(req.email.as_str());

        let account_id = match self
            .store
            .create_account(&req.username, &stored_hash, email, now)
        {
            Ok(id) => id,
            Err(StoreError::UsernameTaken) => {
                return respond(
                    AuthResult::UsernameTaken,
                    0,
                    String::new(),
                    "Username is already taken",
                );
            }
            Err(e) => {
                warn!(error = %e, "account creation failed");
                return respond(AuthResult::ServerError, 0, String::new(), "Internal error");
            }
        };

        match self.issue_session(account_id, from_ip, now) {
            Ok(token) => {
                info!(account_id, username = %req.username, "account registered");
                respond(AuthResult::Success, account_id, token, "")
            }
            Err(e) => {
                warn!(error = %e, account_id, "session issue failed after register");
                respond(AuthResult::ServerError, account_id, String::new(), "Internal error")
            }
        }
    }

    fn on_login(
        &self,
        payload: &[u8],
        from_ip: &str,
        now: i64,
        request_id: u32,
    ) -> Option<Vec<u8>> {
        let req = LoginRequest::decode(payload).ok()?;

        let respond = |result: AuthResult, account_id: u64, token: String, message: &str| {
            Some(build_packet(
                AuthMessageType::LoginResponse,
                account_id,
                request_id,
                &LoginResponse {
                    result,
                    requires_2fa: false,
                    account_id,
                    session_token: token,
                    error_message: message.into(),
                }
                .encode(),
            ))
        };

        let account = match self.store.account_by_username(&req.username) {
            Ok(Some(account)) => account,
            Ok(None) => {
                let _ = self.store.record_failed_login(&req.username, from_ip, now);
                return respond(
                    AuthResult::InvalidCredentials,
                    0,
                    String::new(),
                    "Invalid username or password",
                );
            }
            Err(e) => {
                warn!(error = %e, "account lookup failed");
                return respond(AuthResult::ServerError, 0, String::new(), "Internal error");
            }
        };

        if account.ban_in_force(now) {
            return respond(
                AuthResult::AccountBanned,
                account.account_id,
                String::new(),
                &account.ban_reason,
            );
        }
        if account.is_banned {
            // Timed ban has lapsed; clear it on the way through.
            if let Err(e) = self.store.unban_account(account.account_id) {
                warn!(error = %e, account_id = account.account_id, "lazy unban failed");
            }
        }

        match self.store.count_recent_failures(
            &req.username,
            from_ip,
            self.config.failure_window_secs,
            now,
        ) {
            Ok(failures) if failures >= self.config.max_recent_failures => {
                warn!(username = %req.username, %from_ip, failures, "login rate limited");
                return respond(
                    AuthResult::RateLimited,
                    0,
                    String::new(),
                    "Too many failed attempts, try again later",
                );
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "failure count lookup failed");
                return respond(AuthResult::ServerError, 0, String::new(), "Internal error");
            }
        }

        if !verify_password(&account.password_hash, &req.password_hash) {
            let _ = self.store.record_failed_login(&req.username, from_ip, now);
            return respond(
                AuthResult::InvalidCredentials,
                0,
                String::new(),
                "Invalid username or password",
            );
        }

        match self.issue_session(account.account_id, from_ip, now) {
            Ok(token) => {
                let _ = self.store.touch_last_login(account.account_id, now);
                info!(account_id = account.account_id, username = %account.username, "login");
                respond(AuthResult::Success, account.account_id, token, "")
            }
            Err(e) => {
                warn!(error = %e, "session issue failed after login");
                respond(AuthResult::ServerError, 0, String::new(), "Internal error")
            }
        }
    }

    fn on_validate(&self, payload: &[u8], now: i64, request_id: u32) -> Option<Vec<u8>> {
        let req = ValidateTokenRequest::decode(payload).ok()?;

        let respond = |result: AuthResult,
                       is_banned: bool,
                       account_id: u64,
                       expires_at: u64,
                       message: &str| {
            Some(build_packet(
                AuthMessageType::ValidateTokenResponse,
                account_id,
                request_id,
                &ValidateTokenResponse {
                    result,
                    is_banned,
                    account_id,
                    expires_at,
                    error_message: message.into(),
                }
                .encode(),
            ))
        };

        let session = match self.store.session_by_token_raw(&req.session_token) {
            Ok(Some(session)) => session,
            Ok(None) => {
                return respond(AuthResult::TokenInvalid, false, 0, 0, "Unknown session token")
            }
            Err(e) => {
                warn!(error = %e, "session lookup failed");
                return respond(AuthResult::ServerError, false, 0, 0, "Internal error");
            }
        };

        if session.expires_at <= now {
            return respond(AuthResult::TokenExpired, false, 0, 0, "Session expired");
        }

        let account = match self.store.account_by_id(session.account_id) {
            Ok(Some(account)) => account,
            Ok(None) => {
                // Session without an account: treat the token as dead.
                let _ = self.store.delete_session(&req.session_token);
                return respond(AuthResult::TokenInvalid, false, 0, 0, "Unknown session token");
            }
            Err(e) => {
                warn!(error = %e, "account lookup failed");
                return respond(AuthResult::ServerError, false, 0, 0, "Internal error");
            }
        };

        let banned = account.ban_in_force(now);
        respond(
            AuthResult::Success,
            banned,
            account.account_id,
            session.expires_at as u64,
            if banned { account.ban_reason.as_str() } else { "" },
        )
    }

    fn on_logout(&self, payload: &[u8], request_id: u32) -> Option<Vec<u8>> {
        let req = LogoutRequest::decode(payload).ok()?;

        let respond = |result: AuthResult, count: u32, account_id: u64| {
            Some(build_packet(
                AuthMessageType::LogoutResponse,
                account_id,
                request_id,
                &SessionsInvalidatedResponse {
                    result,
                    sessions_invalidated: count,
                    error_message: String::new(),
                }
                .encode(),
            ))
        };

        let session = match self.store.session_by_token_raw(&req.session_token) {
            Ok(Some(session)) => session,
            Ok(None) => return respond(AuthResult::TokenInvalid, 0, 0),
            Err(e) => {
                warn!(error = %e, "session lookup failed");
                return respond(AuthResult::ServerError, 0, 0);
            }
        };

        let result = if req.logout_all_sessions {
            self.store.delete_all_sessions_for(session.account_id)
        } else {
            self.store
                .delete_session(&req.session_token)
                .map(u32::from)
        };

        match result {
            Ok(count) => {
                info!(account_id = session.account_id, count, "logout");
                respond(AuthResult::Success, count, session.account_id)
            }
            Err(e) => {
                warn!(error = %e, "logout failed");
                respond(AuthResult::ServerError, 0, session.account_id)
            }
        }
    }

    fn on_change_password(&self, payload: &[u8], now: i64, request_id: u32) -> Option<Vec<u8>> {
        let req = ChangePasswordRequest::decode(payload).ok()?;

        let respond = |result: AuthResult, count: u32, account_id: u64, message: &str| {
            Some(build_packet(
                AuthMessageType::ChangePasswordResponse,
                account_id,
                request_id,
                &SessionsInvalidatedResponse {
                    result,
                    sessions_invalidated: count,
                    error_message: message.into(),
                }
                .encode(),
            ))
        };

        let session = match self.store.session_by_token_raw(&req.session_token) {
            Ok(Some(session)) if session.expires_at > now => session,
            Ok(Some(_)) => return respond(AuthResult::TokenExpired, 0, 0, "Session expired"),
            Ok(None) => return respond(AuthResult::TokenInvalid, 0, 0, "Unknown session token"),
            Err(e) => {
                warn!(error = %e, "session lookup failed");
                return respond(AuthResult::ServerError, 0, 0, "Internal error");
            }
        };

        if !valid_client_hash(&req.new_password_hash) {
            return respond(
                AuthResult::PasswordTooShort,
                0,
                session.account_id,
                "Password hash must be 64 hex characters",
            );
        }

        let account = match self.store.account_by_id(session.account_id) {
            Ok(Some(account)) => account,
            Ok(None) => return respond(AuthResult::TokenInvalid, 0, 0, "Unknown account"),
            Err(e) => {
                warn!(error = %e, "account lookup failed");
                return respond(AuthResult::ServerError, 0, 0, "Internal error");
            }
        };

        if !verify_password(&account.password_hash, &req.old_password_hash) {
            return respond(
                AuthResult::InvalidCredentials,
                0,
                account.account_id,
                "Old password does not match",
            );
        }

        let new_stored = match hash_password(&req.new_password_hash) {
            Ok(h) => h,
            Err(e) => {
                warn!(error = %e, "password hashing failed");
                return respond(AuthResult::ServerError, 0, account.account_id, "Internal error");
            }
        };

        match self.store.update_password_hash(account.account_id, &new_stored) {
            Ok(count) => {
                info!(account_id = account.account_id, count, "password changed");
                respond(AuthResult::Success, count, account.account_id, "")
            }
            Err(e) => {
                warn!(error = %e, "password update failed");
                respond(AuthResult::ServerError, 0, account.account_id, "Internal error")
            }
        }
    }

    fn issue_session(&self, account_id: u64, ip: &str, now: i64) -> Result<String, StoreError> {
        let token = generate_session_token()?;
        let expires_at = now + self.config.session_ttl_secs as i64;
        self.store
            .create_session(account_id, &token, now, expires_at, ip)?;
        Ok(token)
    }
}

fn valid_username(username: &str) -> bool {
    (USERNAME_MIN..=USERNAME_MAX).contains(&username.len())
        && username
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

fn valid_client_hash(hash: &str) -> bool {
    hash.len() == CLIENT_HASH_LEN && hash.bytes().all(|b| b.is_ascii_hexdigit())
}

/// The auth service process: the handler plus its socket and timers.
pub struct AuthService {
    endpoint: Endpoint,
    handler: AuthHandler,
    sweep_interval: Duration,
}

impl AuthService {
    pub async fn bind(config: AuthConfig) -> anyhow::Result<Self> {
        let store = AuthStore::open(&config.db_path)?;
        let endpoint = Endpoint::bind(([0, 0, 0, 0], config.port).into()).await?;
        info!(port = config.port, db = %config.db_path, "auth service listening");
        let sweep_interval = Duration::from_secs(config.sweep_interval_secs.max(1));
        Ok(Self {
            endpoint,
            handler: AuthHandler::new(store, config),
            sweep_interval,
        })
    }

    /// Event loop: drain the socket, answer, sweep on schedule. Runs until
    /// the task is cancelled.
    pub async fn run(self) -> anyhow::Result<()> {
        let mut buf = [0u8; MAX_DATAGRAM];
        let mut last_sweep = Instant::now();

        loop {
            while let Some((len, from)) = self.endpoint.try_recv(&mut buf) {
                self.handle_from(&buf[..len], from);
            }

            if last_sweep.elapsed() >= self.sweep_interval {
                self.handler.sweep(chrono::Utc::now().timestamp());
                last_sweep = Instant::now();
            }

            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    fn handle_from(&self, datagram: &[u8], from: SocketAddr) {
        let now = chrono::Utc::now().timestamp();
        if let Some(response) = self
            .handler
            .handle_datagram(datagram, &from.ip().to_string(), now)
        {
            self.endpoint.try_send(from, &response);
        }
    }
}
