//! Shared test utilities

use std::sync::Arc;

use tether_mesh::api::ApiState;
use tether_mesh::db::{self, DbPool, Role};
use tether_mesh::security::{PasswordHasher, Sha256Hasher, TokenIssuer};

/// Set up an in-memory test database
#[must_use]
pub fn setup_test_db() -> DbPool {
    db::init_memory().expect("failed to init test db")
}

/// Build API state over an in-memory database
#[must_use]
pub fn test_state() -> Arc<ApiState> {
    let db = setup_test_db();
    let tokens = TokenIssuer::new("test-secret", 60);
    Arc::new(ApiState::new(db, tokens, Arc::new(Sha256Hasher), 60, None))
}

/// Create a user and return a bearer token for them
pub fn login_as(state: &Arc<ApiState>, username: &str, role: Role) -> String {
    let hasher = Sha256Hasher;
    let user = state
        .user_repo
        .create(username, None, &hasher.hash("Str0ng-pass!"), role)
        .expect("failed to create test user");
    let (token, _claims) = state
        .tokens
        .issue(&user.username, &user.id, user.role)
        .expect("failed to issue test token");
    token
}
