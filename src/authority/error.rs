use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthorityError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Username or email already registered")]
    AlreadyRegistered,

    #[error("Incorrect username or password")]
    BadCredentials,

    #[error("Incorrect current password")]
    WrongPassword,

    #[error("Missing bearer token")]
    MissingToken,

    #[error("Could not validate credentials")]
    InvalidToken,

    #[error("User not found")]
    UserNotFound,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthorityError {
    pub fn code(&self) -> &'static str {
        match self {
            AuthorityError::InvalidRequest(_) => "INVALID_REQUEST",
            AuthorityError::AlreadyRegistered => "ALREADY_REGISTERED",
            AuthorityError::BadCredentials => "BAD_CREDENTIALS",
            AuthorityError::WrongPassword => "WRONG_PASSWORD",
            AuthorityError::MissingToken => "UNAUTHENTICATED",
            AuthorityError::InvalidToken => "INVALID_TOKEN",
            AuthorityError::UserNotFound => "USER_NOT_FOUND",
            AuthorityError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            AuthorityError::InvalidRequest(_)
            | AuthorityError::AlreadyRegistered
            | AuthorityError::BadCredentials
            | AuthorityError::WrongPassword => 400,
            AuthorityError::MissingToken | AuthorityError::InvalidToken => 401,
            AuthorityError::UserNotFound => 404,
            AuthorityError::Internal(_) => 500,
        }
    }
}

impl From<sqlx::Error> for AuthorityError {
    fn from(e: sqlx::Error) -> Self {
        // users has unique constraints on username and email only
        if let sqlx::Error::Database(db) = &e
            && db.code().as_deref() == Some("23505")
        {
            return AuthorityError::AlreadyRegistered;
        }
        AuthorityError::Internal(e.to_string())
    }
}

impl From<validator::ValidationErrors> for AuthorityError {
    fn from(e: validator::ValidationErrors) -> Self {
        AuthorityError::InvalidRequest(e.to_string())
    }
}
