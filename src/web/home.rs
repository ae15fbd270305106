use super::{escape, page};
use crate::request::Request;
use crate::response::Response;

pub(super) async fn index(req: Request) -> Response {
    let greeting = match req.user() {
        Some(user) => format!("<p>Welcome back, {}.</p>", escape(&user.user_name)),
        None => "<p>Book a service for your vehicle in a few steps.</p>".to_owned(),
    };
    page(&req, "Home", &format!("<h1>Automobile Service Center</h1>\n{greeting}"))
}

pub(super) async fn privacy(req: Request) -> Response {
    page(
        &req,
        "Privacy Policy",
        "<h1>Privacy Policy</h1>\n<p>We keep only what is needed to service your vehicle.</p>",
    )
}

/// Target of the production exception handler. Never shows failure detail.
pub(super) async fn error(req: Request) -> Response {
    page(
        &req,
        "Error",
        "<h1 class=\"text-danger\">Error.</h1>\n<p>An error occurred while processing your request.</p>",
    )
}

pub(super) async fn dashboard(req: Request) -> Response {
    let Some(user) = req.user() else {
        return Response::internal_error("dashboard reached without a signed-in user");
    };
    let roles = if user.roles.is_empty() {
        "none".to_owned()
    } else {
        escape(&user.roles.join(", "))
    };
    let body = format!(
        "<h1>Dashboard</h1>\n<p>Signed in as {}.</p>\n<p>Roles: {roles}</p>",
        escape(&user.email)
    );
    page(&req, "Dashboard", &body)
}
