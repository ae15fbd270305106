use std::sync::Arc;

use http::StatusCode;
use tracing::{debug, warn};

use super::{Middleware, Next};
use crate::handler::BoxFuture;
use crate::identity::{IdentityStore, RETURN_URL_SESSION_KEY, current_user};
use crate::request::Request;
use crate::response::Response;
use crate::session::set_session;

/// Enforces the routed endpoint's [`Policy`](crate::router::Policy).
///
/// The signed-in user, if any, is resolved from the session and exposed as
/// [`Request::user`] to every endpoint, protected or not. Anonymous requests
/// to a protected endpoint are redirected to the login path with the
/// original target remembered in the session; signed-in users lacking a
/// required role get `403`.
pub struct Authorization {
    identity: Arc<dyn IdentityStore>,
    login_path: Arc<str>,
}

impl Authorization {
    pub fn new(identity: Arc<dyn IdentityStore>, login_path: &str) -> Self {
        Self { identity, login_path: login_path.into() }
    }
}

impl Middleware for Authorization {
    fn handle(&self, mut req: Request, next: Next) -> BoxFuture<'static, Response> {
        let identity = Arc::clone(&self.identity);
        let login_path = Arc::clone(&self.login_path);
        Box::pin(async move {
            let policy = req.endpoint().map(|e| e.policy().clone()).unwrap_or_default();

            if let Some(session) = req.session() {
                req.user = match current_user(session, identity.as_ref()).await {
                    Ok(user) => user,
                    Err(e) => {
                        warn!(error = %e, "could not resolve signed-in user");
                        None
                    }
                };
            }

            if policy.is_anonymous() {
                return next.run(req).await;
            }

            let Some(user) = req.user() else {
                let target = req.uri().path_and_query().map(|p| p.as_str()).unwrap_or("/").to_owned();
                if let Some(session) = req.session() {
                    if let Err(e) = set_session(session, RETURN_URL_SESSION_KEY, &target) {
                        warn!(error = %e, "could not remember return url");
                    }
                }
                debug!(%target, "challenging anonymous request");
                return Response::redirect(&login_path);
            };

            if !policy.permits(&user.roles) {
                debug!(user = %user.email, path = %req.path(), "forbidden");
                return Response::status(StatusCode::FORBIDDEN);
            }
            next.run(req).await
        })
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use http::Method;
    use http::header::{COOKIE, LOCATION, SET_COOKIE};

    use super::*;
    use crate::identity::{NewUser, sign_in};
    use crate::middleware::{App, Pipeline};
    use crate::persistence::{Database, MemoryDatabase};
    use crate::router::{Policy, Router};
    use crate::session::{MemoryStore, SessionOptions, get_session};

    async fn whoami(req: Request) -> Response {
        Response::text(req.user().map(|u| u.email.clone()).unwrap_or_else(|| "anonymous".into()))
    }

    async fn login(req: Request) -> Response {
        let (Some(session), Some(identity)) =
            (req.session(), req.extensions().get::<Arc<MemoryDatabase>>())
        else {
            return Response::internal_error("missing session or identity");
        };
        match sign_in(session, identity.as_ref(), "engineer@asc.com", "P@ssw0rd").await {
            Ok(_) => {
                let back = get_session::<String, _>(session, RETURN_URL_SESSION_KEY).ok().flatten();
                Response::text(back.unwrap_or_default())
            }
            Err(e) => Response::internal_error(e.to_string()),
        }
    }

    async fn app() -> App {
        let db = Arc::new(MemoryDatabase::connect("Database=ASC").unwrap());
        db.migrate().await.unwrap();
        let user = db
            .create_user(NewUser {
                user_name: "Engineer".into(),
                email: "engineer@asc.com".into(),
                password: "P@ssw0rd".into(),
                email_confirmed: true,
            })
            .await
            .unwrap();
        db.create_role("Engineer").await.unwrap();
        db.add_to_role(user.id, "Engineer").await.unwrap();

        let routes = Router::new()
            .on(Method::GET, "/", whoami)
            .on(Method::GET, "/Account/Login", login)
            .on_authorized(Method::GET, "/Dashboard", Policy::Authenticated, whoami)
            .on_authorized(Method::GET, "/Admin", Policy::roles(["Admin"]), whoami);

        Pipeline::builder()
            .use_routing()
            .use_session(SessionOptions::default(), Arc::new(MemoryStore::new()))
            .use_authorization(Arc::clone(&db) as Arc<dyn IdentityStore>, "/Account/Login")
            .build()
            .unwrap()
            .map_routes(routes)
            .unwrap()
            .with_state(db)
    }

    fn get(uri: &str, cookie: Option<&str>) -> Request {
        let mut req = http::Request::builder().uri(uri);
        if let Some(cookie) = cookie {
            req = req.header(COOKIE, cookie);
        }
        Request::from_http(req.body(Bytes::new()).unwrap())
    }

    fn cookie_of(res: &Response) -> String {
        res.header(SET_COOKIE).unwrap().split(';').next().unwrap().to_owned()
    }

    #[tokio::test]
    async fn anonymous_endpoint_passes_through() {
        let res = app().await.handle(get("/", None)).await;
        assert_eq!(res.body().as_ref(), b"anonymous");
    }

    #[tokio::test]
    async fn anonymous_user_is_sent_to_login_and_back() {
        let app = app().await;

        let challenge = app.handle(get("/Dashboard?tab=open", None)).await;
        assert_eq!(challenge.status_code(), StatusCode::FOUND);
        assert_eq!(challenge.header(LOCATION), Some("/Account/Login"));
        let cookie = cookie_of(&challenge);

        let login = app.handle(get("/Account/Login", Some(&cookie))).await;
        assert_eq!(login.body().as_ref(), b"/Dashboard?tab=open");
        let signed_in = cookie_of(&login);
        assert_ne!(signed_in, cookie);

        let res = app.handle(get("/Dashboard", Some(&signed_in))).await;
        assert_eq!(res.status_code(), StatusCode::OK);
        assert_eq!(res.body().as_ref(), b"engineer@asc.com");

        let res = app.handle(get("/", Some(&signed_in))).await;
        assert_eq!(res.body().as_ref(), b"engineer@asc.com");

        let res = app.handle(get("/", Some(&cookie))).await;
        assert_eq!(res.body().as_ref(), b"anonymous");
    }

    #[tokio::test]
    async fn missing_role_is_forbidden() {
        let app = app().await;
        let cookie = cookie_of(&app.handle(get("/Account/Login", None)).await);

        let res = app.handle(get("/Admin", Some(&cookie))).await;
        assert_eq!(res.status_code(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn protected_endpoint_without_session_stage_still_redirects() {
        let db = Arc::new(MemoryDatabase::connect("Database=ASC").unwrap());
        let app = Pipeline::builder()
            .use_routing()
            .use_authorization(db, "/Account/Login")
            .build()
            .unwrap()
            .map_routes(Router::new().on_authorized(Method::GET, "/Dashboard", Policy::Authenticated, whoami))
            .unwrap();

        let res = app.handle(get("/Dashboard", None)).await;
        assert_eq!(res.status_code(), StatusCode::FOUND);
    }
}
