//! User repository for operator accounts

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::DbPool;
use crate::{Error, Result};

/// User roles for access control, ordered by privilege
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Operator,
    Observer,
}

impl Role {
    /// Stable string form used in the database
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Operator => "operator",
            Self::Observer => "observer",
        }
    }

    /// Parse from the stable string form
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(Self::Admin),
            "operator" => Some(Self::Operator),
            "observer" => Some(Self::Observer),
            _ => None,
        }
    }

    const fn rank(self) -> u8 {
        match self {
            Self::Admin => 2,
            Self::Operator => 1,
            Self::Observer => 0,
        }
    }

    /// Whether this role satisfies `required` (admin satisfies everything)
    #[must_use]
    pub const fn allows(self, required: Self) -> bool {
        self.rank() >= required.rank()
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An operator account
#[derive(Debug, Clone)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: Option<String>,
    pub hashed_password: String,
    pub role: Role,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

/// User repository
#[derive(Clone)]
pub struct UserRepo {
    pool: DbPool,
}

const COLUMNS: &str =
    "id, username, email, hashed_password, role, is_active, created_at, updated_at, last_login";

impl UserRepo {
    /// Create a new user repository
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn conn(&self) -> Result<super::DbConn> {
        self.pool.get().map_err(|e| Error::Database(e.to_string()))
    }

    /// Create a user
    ///
    /// # Errors
    ///
    /// Returns error if the username or email is already taken, or the
    /// database operation fails
    pub fn create(
        &self,
        username: &str,
        email: Option<&str>,
        hashed_password: &str,
        role: Role,
    ) -> Result<User> {
        let conn = self.conn()?;
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        conn.execute(
            "INSERT INTO users (id, username, email, hashed_password, role, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            rusqlite::params![id, username, email, hashed_password, role.as_str(), now.to_rfc3339()],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Error::Validation(format!("username or email already registered: {username}"))
            }
            other => Error::Sqlite(other),
        })?;

        Ok(User {
            id,
            username: username.to_string(),
            email: email.map(ToString::to_string),
            hashed_password: hashed_password.to_string(),
            role,
            is_active: true,
            created_at: now,
            updated_at: now,
            last_login: None,
        })
    }

    /// Find a user by username
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        let conn = self.conn()?;
        let user = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM users WHERE username = ?1"),
                [username],
                user_from_row,
            )
            .ok();
        Ok(user)
    }

    /// Find a user by id
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn find(&self, id: &str) -> Result<Option<User>> {
        let conn = self.conn()?;
        let user = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM users WHERE id = ?1"),
                [id],
                user_from_row,
            )
            .ok();
        Ok(user)
    }

    /// List all users
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn list(&self) -> Result<Vec<User>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare(&format!("SELECT {COLUMNS} FROM users ORDER BY created_at"))?;

        let users = stmt
            .query_map([], user_from_row)?
            .filter_map(std::result::Result::ok)
            .collect();
        Ok(users)
    }

    /// Number of registered users
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn count(&self) -> Result<i64> {
        let conn = self.conn()?;
        let count = conn.query_row("SELECT COUNT(id) FROM users", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Stamp a user's last successful login
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn touch_last_login(&self, id: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE users SET last_login = ?1, updated_at = ?1 WHERE id = ?2",
            rusqlite::params![Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    }
}

fn user_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        hashed_password: row.get(3)?,
        role: Role::parse(&row.get::<_, String>(4)?).unwrap_or(Role::Observer),
        is_active: row.get(5)?,
        created_at: parse_datetime(&row.get::<_, String>(6)?),
        updated_at: parse_datetime(&row.get::<_, String>(7)?),
        last_login: row
            .get::<_, Option<String>>(8)?
            .map(|s| parse_datetime(&s)),
    })
}

pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}
