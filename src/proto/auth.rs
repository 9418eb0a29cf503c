//! AUTH protocol family: registration, login, token validation, logout and
//! password changes, spoken between clients and the auth server and between
//! the coordinator and the auth server.
//!
//! Header layout (24 bytes): magic u32, version u16, type u16,
//! payload_size u32, account_id u64, request_id u32. Every response echoes
//! the request's `request_id` so callers can correlate asynchronously.

use bytes::{Buf, BufMut};

use super::{ensure_len, put_fixed_str, read_fixed_str, WireError};

/// `'AUTH'` interpreted as a little-endian u32.
pub const AUTH_MAGIC: u32 = u32::from_le_bytes(*b"AUTH");
pub const AUTH_VERSION: u16 = 1;
pub const AUTH_PORT: u16 = 27015;

pub const HEADER_SIZE: usize = 24;

pub const USERNAME_MAX: usize = 32;
pub const PASSWORD_HASH_MAX: usize = 65; // SHA-256 hex + NUL
pub const SESSION_TOKEN_MAX: usize = 65; // 64 hex chars + NUL
pub const EMAIL_MAX: usize = 64;
pub const IP_MAX: usize = 46; // IPv6 text form
pub const ERROR_MESSAGE_MAX: usize = 128;
pub const TWO_FACTOR_CODE_MAX: usize = 8;

/// Authentication message types. Numbering is stable across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum AuthMessageType {
    // Client -> auth server
    RegisterRequest = 1,
    LoginRequest = 2,
    ValidateTokenRequest = 3,
    LogoutRequest = 4,
    Enable2FaRequest = 5,
    ChangePasswordRequest = 6,

    // Auth server -> client
    RegisterResponse = 10,
    LoginResponse = 11,
    ValidateTokenResponse = 12,
    LogoutResponse = 13,
    Enable2FaResponse = 14,
    ChangePasswordResponse = 15,

    Error = 255,
}

impl AuthMessageType {
    pub fn from_u16(raw: u16) -> Option<Self> {
        Some(match raw {
            1 => Self::RegisterRequest,
            2 => Self::LoginRequest,
            3 => Self::ValidateTokenRequest,
            4 => Self::LogoutRequest,
            5 => Self::Enable2FaRequest,
            6 => Self::ChangePasswordRequest,
            10 => Self::RegisterResponse,
            11 => Self::LoginResponse,
            12 => Self::ValidateTokenResponse,
            13 => Self::LogoutResponse,
            14 => Self::Enable2FaResponse,
            15 => Self::ChangePasswordResponse,
            255 => Self::Error,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::RegisterRequest => "RegisterRequest",
            Self::LoginRequest => "LoginRequest",
            Self::ValidateTokenRequest => "ValidateTokenRequest",
            Self::LogoutRequest => "LogoutRequest",
            Self::Enable2FaRequest => "Enable2FARequest",
            Self::ChangePasswordRequest => "ChangePasswordRequest",
            Self::RegisterResponse => "RegisterResponse",
            Self::LoginResponse => "LoginResponse",
            Self::ValidateTokenResponse => "ValidateTokenResponse",
            Self::LogoutResponse => "LogoutResponse",
            Self::Enable2FaResponse => "Enable2FAResponse",
            Self::ChangePasswordResponse => "ChangePasswordResponse",
            Self::Error => "Error",
        }
    }
}

/// Result codes carried in every auth response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum AuthResult {
    #[default]
    Success = 0,
    InvalidCredentials = 1,
    UsernameTaken = 2,
    InvalidUsername = 3,
    PasswordTooShort = 4,
    AccountLocked = 5,
    AccountBanned = 6,
    TokenExpired = 7,
    TokenInvalid = 8,
    RateLimited = 9,
    ServerError = 10,
    Requires2Fa = 11,
    Invalid2FaCode = 12,
}

impl AuthResult {
    pub fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Success,
            1 => Self::InvalidCredentials,
            2 => Self::UsernameTaken,
            3 => Self::InvalidUsername,
            4 => Self::PasswordTooShort,
            5 => Self::AccountLocked,
            6 => Self::AccountBanned,
            7 => Self::TokenExpired,
            8 => Self::TokenInvalid,
            9 => Self::RateLimited,
            11 => Self::Requires2Fa,
            12 => Self::Invalid2FaCode,
            _ => Self::ServerError,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::InvalidCredentials => "InvalidCredentials",
            Self::UsernameTaken => "UsernameTaken",
            Self::InvalidUsername => "InvalidUsername",
            Self::PasswordTooShort => "PasswordTooShort",
            Self::AccountLocked => "AccountLocked",
            Self::AccountBanned => "AccountBanned",
            Self::TokenExpired => "TokenExpired",
            Self::TokenInvalid => "TokenInvalid",
            Self::RateLimited => "RateLimited",
            Self::ServerError => "ServerError",
            Self::Requires2Fa => "Requires2FA",
            Self::Invalid2FaCode => "Invalid2FACode",
        }
    }
}

/// Parsed auth packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthHeader {
    pub msg_type: AuthMessageType,
    pub payload_size: u32,
    pub account_id: u64,
    pub request_id: u32,
}

/// Build `[header][payload]` for the auth wire.
pub fn build_packet(
    msg_type: AuthMessageType,
    account_id: u64,
    request_id: u32,
    payload: &[u8],
) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
    out.put_u32_le(AUTH_MAGIC);
    out.put_u16_le(AUTH_VERSION);
    out.put_u16_le(msg_type as u16);
    out.put_u32_le(payload.len() as u32);
    out.put_u64_le(account_id);
    out.put_u32_le(request_id);
    out.put_slice(payload);
    out
}

/// Parse an auth packet, returning the header and a borrowed payload slice.
/// Rejects short datagrams, wrong magic/version, unknown types and declared
/// payload sizes that overrun the datagram.
pub fn parse_packet(datagram: &[u8]) -> Result<(AuthHeader, &[u8]), WireError> {
    if datagram.len() < HEADER_SIZE {
        return Err(WireError::Truncated {
            need: HEADER_SIZE,
            have: datagram.len(),
        });
    }
    let mut buf = datagram;
    let magic = buf.get_u32_le();
    if magic != AUTH_MAGIC {
        return Err(WireError::BadMagic);
    }
    let version = buf.get_u16_le();
    if version != AUTH_VERSION {
        return Err(WireError::BadVersion(version));
    }
    let raw_type = buf.get_u16_le();
    let msg_type = AuthMessageType::from_u16(raw_type).ok_or(WireError::UnknownType(raw_type))?;
    let payload_size = buf.get_u32_le();
    let account_id = buf.get_u64_le();
    let request_id = buf.get_u32_le();

    let available = datagram.len() - HEADER_SIZE;
    if payload_size as usize > available {
        return Err(WireError::PayloadOverrun {
            declared: payload_size,
            available,
        });
    }
    let payload = &datagram[HEADER_SIZE..HEADER_SIZE + payload_size as usize];
    Ok((
        AuthHeader {
            msg_type,
            payload_size,
            account_id,
            request_id,
        },
        payload,
    ))
}

// ---- Request payloads ----

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RegisterRequest {
    pub username: String,
    pub password_hash: String,
    pub email: String,
}

impl RegisterRequest {
    pub const SIZE: usize = USERNAME_MAX + PASSWORD_HASH_MAX + EMAIL_MAX;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        put_fixed_str(&mut buf, USERNAME_MAX, &self.username);
        put_fixed_str(&mut buf, PASSWORD_HASH_MAX, &self.password_hash);
        put_fixed_str(&mut buf, EMAIL_MAX, &self.email);
        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, WireError> {
        ensure_len(&buf, Self::SIZE)?;
        Ok(Self {
            username: read_fixed_str(&mut buf, USERNAME_MAX),
            password_hash: read_fixed_str(&mut buf, PASSWORD_HASH_MAX),
            email: read_fixed_str(&mut buf, EMAIL_MAX),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LoginRequest {
    pub username: String,
    pub password_hash: String,
    pub two_factor_code: String,
}

impl LoginRequest {
    pub const SIZE: usize = USERNAME_MAX + PASSWORD_HASH_MAX + TWO_FACTOR_CODE_MAX;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        put_fixed_str(&mut buf, USERNAME_MAX, &self.username);
        put_fixed_str(&mut buf, PASSWORD_HASH_MAX, &self.password_hash);
        put_fixed_str(&mut buf, TWO_FACTOR_CODE_MAX, &self.two_factor_code);
        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, WireError> {
        ensure_len(&buf, Self::SIZE)?;
        Ok(Self {
            username: read_fixed_str(&mut buf, USERNAME_MAX),
            password_hash: read_fixed_str(&mut buf, PASSWORD_HASH_MAX),
            two_factor_code: read_fixed_str(&mut buf, TWO_FACTOR_CODE_MAX),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidateTokenRequest {
    pub session_token: String,
    pub ip_address: String,
}

impl ValidateTokenRequest {
    pub const SIZE: usize = SESSION_TOKEN_MAX + IP_MAX;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        put_fixed_str(&mut buf, SESSION_TOKEN_MAX, &self.session_token);
        put_fixed_str(&mut buf, IP_MAX, &self.ip_address);
        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, WireError> {
        ensure_len(&buf, Self::SIZE)?;
        Ok(Self {
            session_token: read_fixed_str(&mut buf, SESSION_TOKEN_MAX),
            ip_address: read_fixed_str(&mut buf, IP_MAX),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LogoutRequest {
    pub session_token: String,
    pub logout_all_sessions: bool,
}

impl LogoutRequest {
    pub const SIZE: usize = SESSION_TOKEN_MAX + 8;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        put_fixed_str(&mut buf, SESSION_TOKEN_MAX, &self.session_token);
        buf.put_u8(u8::from(self.logout_all_sessions));
        buf.put_bytes(0, 7);
        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, WireError> {
        ensure_len(&buf, Self::SIZE)?;
        let session_token = read_fixed_str(&mut buf, SESSION_TOKEN_MAX);
        let logout_all_sessions = buf.get_u8() != 0;
        buf.advance(7);
        Ok(Self {
            session_token,
            logout_all_sessions,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChangePasswordRequest {
    pub session_token: String,
    pub old_password_hash: String,
    pub new_password_hash: String,
}

impl ChangePasswordRequest {
    pub const SIZE: usize = SESSION_TOKEN_MAX + PASSWORD_HASH_MAX * 2;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        put_fixed_str(&mut buf, SESSION_TOKEN_MAX, &self.session_token);
        put_fixed_str(&mut buf, PASSWORD_HASH_MAX, &self.old_password_hash);
        put_fixed_str(&mut buf, PASSWORD_HASH_MAX, &self.new_password_hash);
        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, WireError> {
        ensure_len(&buf, Self::SIZE)?;
        Ok(Self {
            session_token: read_fixed_str(&mut buf, SESSION_TOKEN_MAX),
            old_password_hash: read_fixed_str(&mut buf, PASSWORD_HASH_MAX),
            new_password_hash: read_fixed_str(&mut buf, PASSWORD_HASH_MAX),
        })
    }
}

// ---- Response payloads ----

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RegisterResponse {
    pub result: AuthResult,
    pub account_id: u64,
    pub session_token: String,
    pub error_message: String,
}

impl RegisterResponse {
    pub const SIZE: usize = 8 + 8 + SESSION_TOKEN_MAX + ERROR_MESSAGE_MAX;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.put_u8(self.result as u8);
        buf.put_bytes(0, 7);
        buf.put_u64_le(self.account_id);
        put_fixed_str(&mut buf, SESSION_TOKEN_MAX, &self.session_token);
        put_fixed_str(&mut buf, ERROR_MESSAGE_MAX, &self.error_message);
        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, WireError> {
        ensure_len(&buf, Self::SIZE)?;
        let result = AuthResult::from_u8(buf.get_u8());
        buf.advance(7);
        Ok(Self {
            result,
            account_id: buf.get_u64_le(),
            session_token: read_fixed_str(&mut buf, SESSION_TOKEN_MAX),
            error_message: read_fixed_str(&mut buf, ERROR_MESSAGE_MAX),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LoginResponse {
    pub result: AuthResult,
    pub requires_2fa: bool,
    pub account_id: u64,
    pub session_token: String,
    pub error_message: String,
}

impl LoginResponse {
    pub const SIZE: usize = 8 + 8 + SESSION_TOKEN_MAX + ERROR_MESSAGE_MAX;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.put_u8(self.result as u8);
        buf.put_u8(u8::from(self.requires_2fa));
        buf.put_bytes(0, 6);
        buf.put_u64_le(self.account_id);
        put_fixed_str(&mut buf, SESSION_TOKEN_MAX, &self.session_token);
        put_fixed_str(&mut buf, ERROR_MESSAGE_MAX, &self.error_message);
        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, WireError> {
        ensure_len(&buf, Self::SIZE)?;
        let result = AuthResult::from_u8(buf.get_u8());
        let requires_2fa = buf.get_u8() != 0;
        buf.advance(6);
        Ok(Self {
            result,
            requires_2fa,
            account_id: buf.get_u64_le(),
            session_token: read_fixed_str(&mut buf, SESSION_TOKEN_MAX),
            error_message: read_fixed_str(&mut buf, ERROR_MESSAGE_MAX),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidateTokenResponse {
    pub result: AuthResult,
    pub is_banned: bool,
    pub account_id: u64,
    pub expires_at: u64,
    pub error_message: String,
}

impl ValidateTokenResponse {
    pub const SIZE: usize = 8 + 8 + 8 + ERROR_MESSAGE_MAX;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.put_u8(self.result as u8);
        buf.put_u8(u8::from(self.is_banned));
        buf.put_bytes(0, 6);
        buf.put_u64_le(self.account_id);
        buf.put_u64_le(self.expires_at);
        put_fixed_str(&mut buf, ERROR_MESSAGE_MAX, &self.error_message);
        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, WireError> {
        ensure_len(&buf, Self::SIZE)?;
        let result = AuthResult::from_u8(buf.get_u8());
        let is_banned = buf.get_u8() != 0;
        buf.advance(6);
        Ok(Self {
            result,
            is_banned,
            account_id: buf.get_u64_le(),
            expires_at: buf.get_u64_le(),
            error_message: read_fixed_str(&mut buf, ERROR_MESSAGE_MAX),
        })
    }
}

/// Shared layout for LogoutResponse and ChangePasswordResponse: a result,
/// the number of sessions invalidated, and an optional message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionsInvalidatedResponse {
    pub result: AuthResult,
    pub sessions_invalidated: u32,
    pub error_message: String,
}

impl SessionsInvalidatedResponse {
    pub const SIZE: usize = 8 + 8 + ERROR_MESSAGE_MAX;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.put_u8(self.result as u8);
        buf.put_bytes(0, 7);
        buf.put_u32_le(self.sessions_invalidated);
        buf.put_u32_le(0);
        put_fixed_str(&mut buf, ERROR_MESSAGE_MAX, &self.error_message);
        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, WireError> {
        ensure_len(&buf, Self::SIZE)?;
        let result = AuthResult::from_u8(buf.get_u8());
        buf.advance(7);
        let sessions_invalidated = buf.get_u32_le();
        buf.advance(4);
        Ok(Self {
            result,
            sessions_invalidated,
            error_message: read_fixed_str(&mut buf, ERROR_MESSAGE_MAX),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ErrorPayload {
    pub code: AuthResult,
    pub message: String,
}

impl ErrorPayload {
    pub const SIZE: usize = 8 + ERROR_MESSAGE_MAX;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.put_u8(self.code as u8);
        buf.put_bytes(0, 7);
        put_fixed_str(&mut buf, ERROR_MESSAGE_MAX, &self.message);
        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, WireError> {
        ensure_len(&buf, Self::SIZE)?;
        let code = AuthResult::from_u8(buf.get_u8());
        buf.advance(7);
        Ok(Self {
            code,
            message: read_fixed_str(&mut buf, ERROR_MESSAGE_MAX),
        })
    }
}
