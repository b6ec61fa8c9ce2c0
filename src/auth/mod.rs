//! Password hashing, bearer tokens and the login/refresh/register flows

pub mod middleware;
pub mod password;
pub mod routes;
pub mod service;
pub mod token;

pub use service::{AuthService, AuthSession};
pub use token::{Claims, TokenKind, TokenPair, TokenService};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("missing bearer token")]
    MissingToken,

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("token cannot be used here")]
    WrongTokenKind,

    #[error("user is inactive")]
    InactiveUser,

    #[error("registration is disabled")]
    RegistrationDisabled,

    #[error("failed to hash password: {0}")]
    PasswordHash(String),

    #[error("failed to sign token: {0}")]
    Signing(String),
}
