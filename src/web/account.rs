use http::{Method, StatusCode};
use serde::Deserialize;
use tracing::{info, warn};

use super::page;
use crate::identity::{RETURN_URL_SESSION_KEY, SignInError, sign_in, sign_out};
use crate::request::Request;
use crate::response::Response;
use crate::services::Services;
use crate::session::get_session;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginForm {
    email: String,
    password: String,
}

impl LoginForm {
    /// Browsers post the form url-encoded; API clients send JSON.
    fn from_request(req: &Request) -> Option<Self> {
        if !req.is_form() {
            return req.json().ok();
        }
        let mut fields = req.form();
        Some(Self { email: fields.remove("email")?, password: fields.remove("password")? })
    }
}

const LOGIN_FORM: &str = "<h1>Log in</h1>\n\
    <form method=\"post\" action=\"/Account/Login\">\n\
    <input name=\"email\" type=\"email\">\n\
    <input name=\"password\" type=\"password\">\n\
    <button>Log in</button>\n</form>";

pub(super) async fn login(req: Request) -> Response {
    if req.method() != Method::POST {
        return page(&req, "Log in", LOGIN_FORM);
    }

    let Some(form) = LoginForm::from_request(&req) else {
        return Response::status(StatusCode::BAD_REQUEST);
    };
    let (Some(session), Some(services)) = (req.session(), Services::of(&req)) else {
        return Response::internal_error("login requires the session stage and application services");
    };

    match sign_in(session, services.identity.as_ref(), &form.email, &form.password).await {
        Ok(_) => {
            let target = match get_session::<String, _>(session, RETURN_URL_SESSION_KEY) {
                Ok(url) => url.filter(|u| is_local(u)),
                Err(e) => {
                    warn!(error = %e, "ignoring unreadable return url");
                    None
                }
            };
            session.remove(RETURN_URL_SESSION_KEY);
            Response::redirect(target.as_deref().unwrap_or("/"))
        }
        Err(SignInError::InvalidCredentials) => {
            info!(email = %form.email, "failed login attempt");
            let mut res = page(
                &req,
                "Log in",
                &format!("<p class=\"text-danger\">Invalid login attempt.</p>\n{LOGIN_FORM}"),
            );
            res.status = StatusCode::UNAUTHORIZED;
            res
        }
        Err(e) => Response::internal_error(e.to_string()),
    }
}

pub(super) async fn logout(req: Request) -> Response {
    if let Some(session) = req.session() {
        sign_out(session);
    }
    Response::redirect("/")
}

/// Only same-site paths are followed after login.
fn is_local(url: &str) -> bool {
    url.starts_with('/') && !url.starts_with("//") && !url.starts_with("/\\")
}
