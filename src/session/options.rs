use std::time::Duration;

use cookie::SameSite;

/// Session cookie and expiry settings.
#[derive(Clone, Debug)]
pub struct SessionOptions {
    /// Cookie carrying the session identifier.
    pub cookie_name: String,
    /// A session untouched for this long is dropped by the store.
    pub idle_timeout: Duration,
    /// Hide the cookie from client-side script.
    pub http_only: bool,
    /// Write the cookie even when the client has not consented to
    /// non-essential cookies.
    pub essential: bool,
    pub same_site: SameSite,
    pub path: String,
}

impl SessionOptions {
    /// Cookie set by the consent banner once the client accepts
    /// non-essential cookies.
    pub const CONSENT_COOKIE: &'static str = ".AspNet.Consent";

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_cookie_name(mut self, name: impl Into<String>) -> Self {
        self.cookie_name = name.into();
        self
    }

    pub fn with_http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    pub fn with_essential(mut self, essential: bool) -> Self {
        self.essential = essential;
        self
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            cookie_name: ".Asc.Session".to_owned(),
            idle_timeout: Duration::from_secs(30 * 60),
            http_only: true,
            essential: true,
            same_site: SameSite::Lax,
            path: "/".to_owned(),
        }
    }
}
