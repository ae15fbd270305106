//! Startup data seeding.

use thiserror::Error;
use tracing::info;

use crate::config::ApplicationSettings;
use crate::handler::BoxFuture;
use crate::identity::{IdentityError, IdentityStore, NewUser};

#[derive(Debug, Error)]
pub enum SeedError {
    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error("setting `AppSettings:{0}` is required for seeding")]
    MissingSetting(&'static str),
}

/// What a seeding run created. Empty when everything already existed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SeedReport {
    pub roles_created: Vec<String>,
    pub users_created: Vec<String>,
}

impl SeedReport {
    pub fn is_empty(&self) -> bool {
        self.roles_created.is_empty() && self.users_created.is_empty()
    }
}

/// Seeds initial data. Implementations must be idempotent: a second run
/// against the same store creates nothing.
pub trait DataSeed: Send + Sync + 'static {
    fn seed<'a>(
        &'a self,
        identity: &'a dyn IdentityStore,
        settings: &'a ApplicationSettings,
    ) -> BoxFuture<'a, Result<SeedReport, SeedError>>;
}

/// Creates the configured roles, the administrator (role `Admin`) and the
/// service engineer (role `Engineer`).
#[derive(Clone, Copy, Debug, Default)]
pub struct IdentitySeed;

pub const ADMIN_ROLE: &str = "Admin";
pub const ENGINEER_ROLE: &str = "Engineer";

struct Account<'a> {
    name: &'a str,
    email: &'a str,
    password: &'a str,
    role: &'static str,
}

impl DataSeed for IdentitySeed {
    fn seed<'a>(
        &'a self,
        identity: &'a dyn IdentityStore,
        settings: &'a ApplicationSettings,
    ) -> BoxFuture<'a, Result<SeedReport, SeedError>> {
        Box::pin(async move {
            let accounts = accounts(settings)?;
            let mut report = SeedReport::default();

            let mut roles = settings.role_names();
            for required in [ADMIN_ROLE, ENGINEER_ROLE] {
                if !roles.iter().any(|r| r.eq_ignore_ascii_case(required)) {
                    roles.push(required.to_owned());
                }
            }
            for role in roles {
                if !identity.role_exists(&role).await? {
                    identity.create_role(&role).await?;
                    report.roles_created.push(role);
                }
            }

            for account in accounts {
                let user = match identity.find_user_by_email(account.email).await? {
                    Some(user) => user,
                    None => {
                        let user = identity
                            .create_user(NewUser {
                                user_name: account.name.to_owned(),
                                email: account.email.to_owned(),
                                password: account.password.to_owned(),
                                email_confirmed: true,
                            })
                            .await?;
                        report.users_created.push(user.email.clone());
                        user
                    }
                };
                identity.add_to_role(user.id, account.role).await?;
            }

            info!(
                roles = report.roles_created.len(),
                users = report.users_created.len(),
                "identity seeded"
            );
            Ok(report)
        })
    }
}

fn accounts(settings: &ApplicationSettings) -> Result<[Account<'_>; 2], SeedError> {
    Ok([
        Account {
            name: &settings.admin_name,
            email: non_empty(&settings.admin_email, "AdminEmail")?,
            password: non_empty(&settings.admin_password, "AdminPassword")?,
            role: ADMIN_ROLE,
        },
        Account {
            name: &settings.engineer_name,
            email: non_empty(&settings.engineer_email, "EngineerEmail")?,
            password: non_empty(&settings.engineer_password, "EngineerPassword")?,
            role: ENGINEER_ROLE,
        },
    ])
}

fn non_empty<'a>(value: &'a str, key: &'static str) -> Result<&'a str, SeedError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(SeedError::MissingSetting(key));
    }
    Ok(value)
}
