use std::fmt;
use std::sync::Arc;

use crate::config::{ApplicationSettings, Environment};
use crate::identity::IdentityStore;
use crate::notify::{EmailSender, SmsSender};
use crate::persistence::Database;
use crate::request::Request;
use crate::seed::DataSeed;

/// Application services registered during startup and shared with every
/// request as [`App`](crate::App) state.
#[derive(Clone)]
pub struct Services {
    pub environment: Environment,
    pub settings: Arc<ApplicationSettings>,
    pub database: Arc<dyn Database>,
    pub identity: Arc<dyn IdentityStore>,
    pub email: Arc<dyn EmailSender>,
    pub sms: Arc<dyn SmsSender>,
    pub seed: Arc<dyn DataSeed>,
}

impl Services {
    /// The services attached to `req`, if the app was built by the bootstrap.
    pub fn of(req: &Request) -> Option<&Self> {
        req.extensions().get::<Self>()
    }
}

impl fmt::Debug for Services {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Services")
            .field("environment", &self.environment)
            .field("application_title", &self.settings.application_title)
            .finish_non_exhaustive()
    }
}
