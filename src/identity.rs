//! Identity collaborator: users, roles, passwords, and session sign-in.
//!
//! The [`IdentityStore`] trait is what seeding and authorization consume.
//! [`MemoryDatabase`] implements it on top of its migrated tables.
//!
//! Signing in stores a [`SignedInUser`] in the session through the session
//! codec; the authorization middleware reads it back on every request and
//! resolves the user's current roles into a [`Principal`].

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::handler::BoxFuture;
use crate::persistence::{MemoryDatabase, PersistenceError, Schema};
use crate::session::{Session, SessionError, get_session, set_session};

/// Session key holding the signed-in user.
pub const AUTH_SESSION_KEY: &str = ".Asc.Identity";

/// Session key holding where to send the user after signing in.
pub const RETURN_URL_SESSION_KEY: &str = ".Asc.ReturnUrl";

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("a user with email `{0}` already exists")]
    DuplicateUser(String),

    #[error("role `{0}` already exists")]
    DuplicateRole(String),

    #[error("role `{0}` does not exist")]
    RoleNotFound(String),

    #[error("user `{0}` does not exist")]
    UserNotFound(Uuid),

    #[error("`{0}` is not a valid email address")]
    InvalidEmail(String),

    #[error("password rejected: {0}")]
    InvalidPassword(&'static str),
}

// ── Entities ──────────────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub struct IdentityUser {
    pub id: Uuid,
    pub user_name: String,
    pub email: String,
    pub email_confirmed: bool,
    normalized_email: String,
    password_hash: String,
    salt: String,
}

#[derive(Clone, Debug)]
pub struct IdentityRole {
    pub id: Uuid,
    pub name: String,
    normalized_name: String,
}

/// Input for [`IdentityStore::create_user`].
#[derive(Clone, Debug)]
pub struct NewUser {
    pub user_name: String,
    pub email: String,
    pub password: String,
    pub email_confirmed: bool,
}

/// The signed-in user of the current request.
#[derive(Clone, Debug, PartialEq)]
pub struct Principal {
    pub user_id: Uuid,
    pub email: String,
    pub user_name: String,
    pub roles: Vec<String>,
}

impl Principal {
    pub fn is_in_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// What sign-in keeps in the session.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct SignedInUser {
    pub user_id: Uuid,
    pub email: String,
}

// ── Store contract ────────────────────────────────────────────────────────────

/// User and role management consumed by seeding and authorization.
///
/// Emails and role names compare case-insensitively.
pub trait IdentityStore: Send + Sync + 'static {
    fn find_user_by_email<'a>(
        &'a self,
        email: &'a str,
    ) -> BoxFuture<'a, Result<Option<IdentityUser>, IdentityError>>;

    fn find_user_by_id(&self, id: Uuid) -> BoxFuture<'_, Result<Option<IdentityUser>, IdentityError>>;

    fn create_user(&self, user: NewUser) -> BoxFuture<'_, Result<IdentityUser, IdentityError>>;

    fn role_exists<'a>(&'a self, role: &'a str) -> BoxFuture<'a, Result<bool, IdentityError>>;

    fn create_role<'a>(&'a self, role: &'a str) -> BoxFuture<'a, Result<IdentityRole, IdentityError>>;

    /// Adds `user_id` to `role`. Adding an existing membership is a no-op.
    fn add_to_role<'a>(
        &'a self,
        user_id: Uuid,
        role: &'a str,
    ) -> BoxFuture<'a, Result<(), IdentityError>>;

    fn roles_of(&self, user_id: Uuid) -> BoxFuture<'_, Result<Vec<String>, IdentityError>>;

    fn user_count(&self) -> BoxFuture<'_, Result<usize, IdentityError>>;
}

// ── Passwords ─────────────────────────────────────────────────────────────────

/// Default password rules: at least six characters with a digit, a lowercase
/// letter, an uppercase letter and a symbol.
pub fn validate_password(password: &str) -> Result<(), IdentityError> {
    if password.chars().count() < 6 {
        return Err(IdentityError::InvalidPassword("must be at least 6 characters"));
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(IdentityError::InvalidPassword("must contain a digit"));
    }
    if !password.chars().any(char::is_lowercase) {
        return Err(IdentityError::InvalidPassword("must contain a lowercase letter"));
    }
    if !password.chars().any(char::is_uppercase) {
        return Err(IdentityError::InvalidPassword("must contain an uppercase letter"));
    }
    if password.chars().all(char::is_alphanumeric) {
        return Err(IdentityError::InvalidPassword("must contain a non-alphanumeric character"));
    }
    Ok(())
}

fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

impl IdentityUser {
    pub fn check_password(&self, password: &str) -> bool {
        let hash = hash_password(&self.salt, password);
        hash.as_bytes().ct_eq(self.password_hash.as_bytes()).into()
    }
}

fn normalize(value: &str) -> String {
    value.trim().to_uppercase()
}

// ── MemoryDatabase implementation ─────────────────────────────────────────────

fn tables(schema: &mut Schema) -> Result<Tables<'_>, PersistenceError> {
    match (&mut schema.users, &mut schema.roles, &mut schema.user_roles) {
        (Some(users), Some(roles), Some(user_roles)) => Ok(Tables { users, roles, user_roles }),
        _ => Err(PersistenceError::SchemaNotReady),
    }
}

struct Tables<'a> {
    users: &'a mut Vec<IdentityUser>,
    roles: &'a mut Vec<IdentityRole>,
    user_roles: &'a mut Vec<(Uuid, Uuid)>,
}

impl MemoryDatabase {
    fn identity<T>(
        &self,
        f: impl FnOnce(Tables<'_>) -> Result<T, IdentityError>,
    ) -> Result<T, IdentityError> {
        let mut outcome = None;
        self.with_schema(|schema| {
            let tables = tables(schema)?;
            outcome = Some(f(tables));
            Ok(())
        })?;
        outcome.unwrap_or(Err(IdentityError::Persistence(PersistenceError::SchemaNotReady)))
    }
}

impl IdentityStore for MemoryDatabase {
    fn find_user_by_email<'a>(
        &'a self,
        email: &'a str,
    ) -> BoxFuture<'a, Result<Option<IdentityUser>, IdentityError>> {
        Box::pin(async move {
            let wanted = normalize(email);
            self.identity(|t| Ok(t.users.iter().find(|u| u.normalized_email == wanted).cloned()))
        })
    }

    fn find_user_by_id(&self, id: Uuid) -> BoxFuture<'_, Result<Option<IdentityUser>, IdentityError>> {
        Box::pin(async move { self.identity(|t| Ok(t.users.iter().find(|u| u.id == id).cloned())) })
    }

    fn create_user(&self, user: NewUser) -> BoxFuture<'_, Result<IdentityUser, IdentityError>> {
        Box::pin(async move {
            let email = user.email.trim();
            if email.is_empty() || !email.contains('@') {
                return Err(IdentityError::InvalidEmail(user.email.clone()));
            }
            validate_password(&user.password)?;
            let normalized_email = normalize(email);
            let salt = Uuid::new_v4().simple().to_string();
            let created = IdentityUser {
                id: Uuid::new_v4(),
                user_name: user.user_name.clone(),
                email: email.to_owned(),
                email_confirmed: user.email_confirmed,
                password_hash: hash_password(&salt, &user.password),
                normalized_email,
                salt,
            };
            self.identity(|t| {
                if t.users.iter().any(|u| u.normalized_email == created.normalized_email) {
                    return Err(IdentityError::DuplicateUser(created.email.clone()));
                }
                t.users.push(created.clone());
                Ok(())
            })?;
            info!(email = %created.email, "created user");
            Ok(created)
        })
    }

    fn role_exists<'a>(&'a self, role: &'a str) -> BoxFuture<'a, Result<bool, IdentityError>> {
        Box::pin(async move {
            let wanted = normalize(role);
            self.identity(|t| Ok(t.roles.iter().any(|r| r.normalized_name == wanted)))
        })
    }

    fn create_role<'a>(&'a self, role: &'a str) -> BoxFuture<'a, Result<IdentityRole, IdentityError>> {
        Box::pin(async move {
            let created = IdentityRole {
                id: Uuid::new_v4(),
                name: role.trim().to_owned(),
                normalized_name: normalize(role),
            };
            self.identity(|t| {
                if t.roles.iter().any(|r| r.normalized_name == created.normalized_name) {
                    return Err(IdentityError::DuplicateRole(created.name.clone()));
                }
                t.roles.push(created.clone());
                Ok(())
            })?;
            info!(role = %created.name, "created role");
            Ok(created)
        })
    }

    fn add_to_role<'a>(
        &'a self,
        user_id: Uuid,
        role: &'a str,
    ) -> BoxFuture<'a, Result<(), IdentityError>> {
        Box::pin(async move {
            let wanted = normalize(role);
            self.identity(|t| {
                if !t.users.iter().any(|u| u.id == user_id) {
                    return Err(IdentityError::UserNotFound(user_id));
                }
                let role_id = t.roles.iter()
                    .find(|r| r.normalized_name == wanted)
                    .map(|r| r.id)
                    .ok_or_else(|| IdentityError::RoleNotFound(role.to_owned()))?;
                if !t.user_roles.contains(&(user_id, role_id)) {
                    t.user_roles.push((user_id, role_id));
                }
                Ok(())
            })
        })
    }

    fn roles_of(&self, user_id: Uuid) -> BoxFuture<'_, Result<Vec<String>, IdentityError>> {
        Box::pin(async move {
            self.identity(|t| {
                Ok(t.user_roles.iter()
                    .filter(|(u, _)| *u == user_id)
                    .filter_map(|(_, r)| t.roles.iter().find(|role| role.id == *r))
                    .map(|role| role.name.clone())
                    .collect())
            })
        })
    }

    fn user_count(&self) -> BoxFuture<'_, Result<usize, IdentityError>> {
        Box::pin(async move { self.identity(|t| Ok(t.users.len())) })
    }
}

// ── Sign-in ───────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SignInError {
    #[error("invalid email or password")]
    InvalidCredentials,

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Verifies the credentials and records the user in `session`.
pub async fn sign_in(
    session: &Session,
    identity: &dyn IdentityStore,
    email: &str,
    password: &str,
) -> Result<Principal, SignInError> {
    let user = identity
        .find_user_by_email(email)
        .await?
        .filter(|u| u.check_password(password))
        .ok_or(SignInError::InvalidCredentials)?;
    let roles = identity.roles_of(user.id).await?;
    session.renew();
    set_session(session, AUTH_SESSION_KEY, &SignedInUser { user_id: user.id, email: user.email.clone() })?;
    info!(email = %user.email, "user signed in");
    Ok(Principal { user_id: user.id, email: user.email, user_name: user.user_name, roles })
}

/// Forgets the signed-in user and moves the session to a new identifier.
pub fn sign_out(session: &Session) {
    session.remove(AUTH_SESSION_KEY);
    session.renew();
}

/// Resolves the session's signed-in user against the identity store.
///
/// A sign-in record that no longer decodes is dropped and the request is
/// treated as anonymous, as is a record for a user that no longer exists.
pub async fn current_user(
    session: &Session,
    identity: &dyn IdentityStore,
) -> Result<Option<Principal>, IdentityError> {
    let signed_in = match get_session::<SignedInUser, _>(session, AUTH_SESSION_KEY) {
        Ok(Some(s)) => s,
        Ok(None) => return Ok(None),
        Err(e) => {
            tracing::warn!(error = %e, "discarding undecodable sign-in state");
            session.remove(AUTH_SESSION_KEY);
            return Ok(None);
        }
    };
    let Some(user) = identity.find_user_by_id(signed_in.user_id).await? else {
        session.remove(AUTH_SESSION_KEY);
        return Ok(None);
    };
    let roles = identity.roles_of(user.id).await?;
    Ok(Some(Principal { user_id: user.id, email: user.email, user_name: user.user_name, roles }))
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::persistence::Database;
    use crate::session::{SessionId, SessionValues};

    async fn migrated() -> MemoryDatabase {
        let db = MemoryDatabase::connect("Database=ASC").unwrap();
        db.migrate().await.unwrap();
        db
    }

    fn admin() -> NewUser {
        NewUser {
            user_name: "Admin".into(),
            email: "admin@asc.com".into(),
            password: "P@ssw0rd".into(),
            email_confirmed: true,
        }
    }

    #[tokio::test]
    async fn identity_needs_migrated_schema() {
        let db = MemoryDatabase::connect("Database=ASC").unwrap();
        let err = db.role_exists("Admin").await.unwrap_err();
        assert!(matches!(err, IdentityError::Persistence(PersistenceError::SchemaNotReady)));
    }

    #[tokio::test]
    async fn users_and_roles_are_case_insensitive_and_unique() {
        let db = migrated().await;
        let user = db.create_user(admin()).await.unwrap();
        db.create_role("Admin").await.unwrap();

        assert!(db.role_exists("ADMIN").await.unwrap());
        assert!(matches!(db.create_role("admin").await, Err(IdentityError::DuplicateRole(_))));
        assert!(db.find_user_by_email("Admin@ASC.com").await.unwrap().is_some());

        let mut dup = admin();
        dup.email = "ADMIN@asc.com".into();
        assert!(matches!(db.create_user(dup).await, Err(IdentityError::DuplicateUser(_))));

        db.add_to_role(user.id, "admin").await.unwrap();
        db.add_to_role(user.id, "Admin").await.unwrap();
        assert_eq!(db.roles_of(user.id).await.unwrap(), vec!["Admin".to_owned()]);
        assert!(matches!(db.add_to_role(user.id, "Ghost").await, Err(IdentityError::RoleNotFound(_))));
    }

    #[test]
    fn password_rules() {
        assert!(validate_password("P@ssw0rd").is_ok());
        assert!(validate_password("P@s0").is_err());
        assert!(validate_password("password1!").is_err());
        assert!(validate_password("PASSWORD1!").is_err());
        assert!(validate_password("Passw0rd").is_err());
        assert!(validate_password("P@ssword").is_err());
    }

    #[tokio::test]
    async fn weak_password_is_refused() {
        let db = migrated().await;
        let mut user = admin();
        user.password = "secret".into();
        assert!(matches!(db.create_user(user).await, Err(IdentityError::InvalidPassword(_))));
    }

    #[tokio::test]
    async fn sign_in_round_trips_through_the_session() {
        let db = migrated().await;
        let user = db.create_user(admin()).await.unwrap();
        db.create_role("Admin").await.unwrap();
        db.add_to_role(user.id, "Admin").await.unwrap();

        let session = Session::new();
        assert!(matches!(
            sign_in(&session, &db, "admin@asc.com", "wrong").await,
            Err(SignInError::InvalidCredentials)
        ));

        let principal = sign_in(&session, &db, "admin@asc.com", "P@ssw0rd").await.unwrap();
        assert!(principal.is_in_role("Admin"));

        let current = current_user(&session, &db).await.unwrap().unwrap();
        assert_eq!(current, principal);

        sign_out(&session);
        assert!(current_user(&session, &db).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn password_check_needs_the_exact_password() {
        let db = migrated().await;
        let user = db.create_user(admin()).await.unwrap();

        assert!(user.check_password("P@ssw0rd"));
        assert!(!user.check_password("P@ssw0rD"));
        assert!(!user.check_password(""));
    }

    #[tokio::test]
    async fn sign_in_and_out_move_the_session_to_a_new_id() {
        let db = migrated().await;
        db.create_user(admin()).await.unwrap();

        let before = SessionId::generate();
        let session = Session::restore(before.clone(), Default::default());
        sign_in(&session, &db, "admin@asc.com", "P@ssw0rd").await.unwrap();
        assert_eq!(session.id(), None);
        assert_eq!(session.take_retired(), Some(before));

        let (during, _, _) = session.commit();
        sign_out(&session);
        assert_eq!(session.take_retired(), Some(during));
    }

    #[tokio::test]
    async fn garbage_sign_in_state_is_anonymous() {
        let db = migrated().await;
        let session = Session::new();
        session.set(AUTH_SESSION_KEY, Bytes::from_static(b"[1,2"));

        assert!(current_user(&session, &db).await.unwrap().is_none());
        assert!(!session.contains(AUTH_SESSION_KEY));
    }
}
