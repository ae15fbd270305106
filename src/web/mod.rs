//! The Automobile Service Center web application: controllers, pages and the
//! route table the bootstrap maps.

mod account;
mod home;
mod service_requests;

use http::Method;

use crate::request::Request;
use crate::response::Response;
use crate::router::{Policy, RouteError, RouteTemplate, Router};
use crate::services::Services;

pub use service_requests::{DRAFT_SESSION_KEY, ServiceRequestDraft};

/// The conventional MVC route.
pub const DEFAULT_ROUTE: &str = "{controller=Home}/{action=Index}/{id?}";

/// Maps the application's controllers and pages onto `router`.
pub fn routes(router: Router) -> Result<Router, RouteError> {
    let default = RouteTemplate::named("default", DEFAULT_ROUTE)?;
    let signed_in = Policy::Authenticated;
    let customers = Policy::roles(["User", "Admin"]);

    Ok(router
        .map_controller_route(&default, Method::GET, "Home", "Index", Policy::Anonymous, home::index)
        .map_controller_route(&default, Method::GET, "Home", "Privacy", Policy::Anonymous, home::privacy)
        .map_controller_route(&default, Method::GET, "Home", "Error", Policy::Anonymous, home::error)
        .map_controller_route(&default, Method::GET, "Dashboard", "Index", signed_in.clone(), home::dashboard)
        .map_controller_route(&default, Method::GET, "ServiceRequests", "Draft", customers.clone(), service_requests::show_draft)
        .map_controller_route(&default, Method::POST, "ServiceRequests", "Draft", customers.clone(), service_requests::update_draft)
        .map_controller_route(&default, Method::POST, "ServiceRequests", "Submit", customers, service_requests::submit)
        .map_page("Account/Login", Policy::Anonymous, account::login)
        .on_authorized(Method::POST, "/Account/Logout", signed_in, account::logout))
}

fn app_title(req: &Request) -> String {
    Services::of(req)
        .map(|s| s.settings.application_title.clone())
        .unwrap_or_else(|| "Automobile Service Center".to_owned())
}

/// Wraps `body` in the site layout.
fn page(req: &Request, title: &str, body: &str) -> Response {
    let app = escape(&app_title(req));
    let user = match req.user() {
        Some(user) => format!(
            r#"<span>{}</span> <form method="post" action="/Account/Logout"><button>Log out</button></form>"#,
            escape(&user.email)
        ),
        None => r#"<a href="/Account/Login">Log in</a>"#.to_owned(),
    };
    Response::html(format!(
        "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>{title} - {app}</title>\
         <link rel=\"stylesheet\" href=\"/css/site.css\"></head>\n\
         <body>\n<header><a href=\"/\">{app}</a> {user}</header>\n<main>\n{body}\n</main>\n</body>\n</html>\n",
        title = escape(title),
    ))
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
