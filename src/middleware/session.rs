//! Session stage: cookie → store → per-request [`Session`] → store → cookie.

use std::sync::Arc;

use cookie::Cookie;
use http::header::{HeaderValue, SET_COOKIE};
use tracing::{debug, error, warn};

use super::{Middleware, Next};
use crate::handler::BoxFuture;
use crate::request::Request;
use crate::response::Response;
use crate::session::{Session, SessionId, SessionOptions, SessionStore};

/// Attaches a [`Session`] to every request and persists it afterwards.
///
/// - A valid cookie whose session is still in the store restores it; anything
///   else starts an empty session.
/// - After the handler, a session that was written to, or that already
///   existed, is saved, which slides its idle deadline.
/// - The cookie is written when a session is first saved. Unless the options
///   mark it essential, that only happens once the client has consented to
///   non-essential cookies; without consent the session lives for one request.
/// - Store failures are logged and never fail the request.
pub struct SessionMiddleware {
    options: Arc<SessionOptions>,
    store: Arc<dyn SessionStore>,
}

impl SessionMiddleware {
    pub fn new(options: SessionOptions, store: Arc<dyn SessionStore>) -> Self {
        Self { options: Arc::new(options), store }
    }
}

impl Middleware for SessionMiddleware {
    fn handle(&self, mut req: Request, next: Next) -> BoxFuture<'static, Response> {
        let options = Arc::clone(&self.options);
        let store = Arc::clone(&self.store);
        Box::pin(async move {
            let session = load(&req, &options, store.as_ref()).await;
            let may_persist = options.essential
                || req.cookie(SessionOptions::CONSENT_COOKIE).as_deref() == Some("yes");
            let secure = req.is_https();
            req.session = Some(session.clone());

            let mut res = next.run(req).await;

            if !may_persist || !(session.is_modified() || session.id().is_some()) {
                return res;
            }
            if let Some(retired) = session.take_retired() {
                if let Err(e) = store.remove(&retired).await {
                    warn!(error = %e, "failed to drop renewed session");
                }
            }
            let (id, values, is_new) = session.commit();
            if let Err(e) = store.save(&id, values, options.idle_timeout).await {
                error!(error = %e, "failed to save session");
                return res;
            }
            if is_new {
                match HeaderValue::from_str(&session_cookie(&options, &id, secure)) {
                    Ok(value) => {
                        res.headers_mut().append(SET_COOKIE, value);
                    }
                    Err(e) => error!(error = %e, "session cookie is not a valid header"),
                }
            }
            res
        })
    }
}

async fn load(req: &Request, options: &SessionOptions, store: &dyn SessionStore) -> Session {
    let Some(raw) = req.cookie(&options.cookie_name) else {
        return Session::new();
    };
    let Some(id) = SessionId::parse(&raw) else {
        debug!("ignoring malformed session cookie");
        return Session::new();
    };
    match store.load(&id).await {
        Ok(Some(values)) => Session::restore(id, values),
        Ok(None) => Session::new(),
        Err(e) => {
            warn!(error = %e, "session store unavailable, starting empty session");
            Session::new()
        }
    }
}

fn session_cookie(options: &SessionOptions, id: &SessionId, secure: bool) -> String {
    Cookie::build((options.cookie_name.clone(), id.as_str().to_owned()))
        .path(options.path.clone())
        .http_only(options.http_only)
        .same_site(options.same_site)
        .secure(secure)
        .build()
        .to_string()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use http::Method;

    use super::*;
    use crate::middleware::{App, Pipeline};
    use crate::router::Router;
    use crate::session::{MemoryStore, get_session, set_session};

    async fn visit(req: Request) -> Response {
        let Some(session) = req.session() else {
            return Response::text("no session");
        };
        let count = get_session::<u32, _>(session, "visits").ok().flatten().unwrap_or(0) + 1;
        if set_session(session, "visits", &count).is_err() {
            return Response::internal_error("could not store visits");
        }
        Response::text(count.to_string())
    }

    async fn peek(req: Request) -> Response {
        let has = req.session().map(|s| s.contains("visits")).unwrap_or(false);
        Response::text(if has { "yes" } else { "no" })
    }

    async fn rotate(req: Request) -> Response {
        if let Some(session) = req.session() {
            session.renew();
        }
        Response::text("rotated")
    }

    fn session_app(options: SessionOptions, store: Arc<MemoryStore>) -> App {
        Pipeline::builder()
            .use_routing()
            .use_session(options, store)
            .build()
            .unwrap()
            .map_routes(Router::new().on(Method::GET, "/visit", visit).on(Method::GET, "/peek", peek)
                .on(Method::GET, "/rotate", rotate))
            .unwrap()
    }

    fn with_cookie(uri: &str, cookie: &str) -> Request {
        let req = http::Request::builder()
            .uri(uri)
            .header("cookie", cookie)
            .body(Bytes::new())
            .unwrap();
        Request::from_http(req)
    }

    fn cookie_pair(res: &Response) -> String {
        let set_cookie = res.header(SET_COOKIE).expect("set-cookie");
        set_cookie.split(';').next().unwrap().to_owned()
    }

    #[tokio::test]
    async fn session_survives_across_requests() {
        let store = Arc::new(MemoryStore::new());
        let app = session_app(SessionOptions::default(), Arc::clone(&store));

        let first = app.handle(Request::get("/visit")).await;
        assert_eq!(first.body().as_ref(), b"1");
        let cookie = cookie_pair(&first);
        assert!(cookie.starts_with(".Asc.Session="));

        let second = app.handle(with_cookie("/visit", &cookie)).await;
        assert_eq!(second.body().as_ref(), b"2");
        assert!(second.header(SET_COOKIE).is_none());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn cookie_is_http_only_by_default() {
        let app = session_app(SessionOptions::default(), Arc::new(MemoryStore::new()));
        let res = app.handle(Request::get("/visit")).await;
        let set_cookie = res.header(SET_COOKIE).unwrap();
        assert!(set_cookie.contains("HttpOnly"));
        assert!(set_cookie.contains("SameSite=Lax"));
        assert!(set_cookie.contains("Path=/"));

        let app = session_app(
            SessionOptions::default().with_http_only(false),
            Arc::new(MemoryStore::new()),
        );
        let res = app.handle(Request::get("/visit")).await;
        assert!(!res.header(SET_COOKIE).unwrap().contains("HttpOnly"));
    }

    #[tokio::test]
    async fn untouched_session_sets_no_cookie() {
        let store = Arc::new(MemoryStore::new());
        let app = session_app(SessionOptions::default(), Arc::clone(&store));
        let res = app.handle(Request::get("/peek")).await;
        assert_eq!(res.body().as_ref(), b"no");
        assert!(res.header(SET_COOKIE).is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn forged_or_unknown_cookie_starts_fresh() {
        let app = session_app(SessionOptions::default(), Arc::new(MemoryStore::new()));
        let res = app.handle(with_cookie("/visit", ".Asc.Session=not-a-session")).await;
        assert_eq!(res.body().as_ref(), b"1");

        let unknown = format!(".Asc.Session={}", "a".repeat(32));
        let res = app.handle(with_cookie("/visit", &unknown)).await;
        assert_eq!(res.body().as_ref(), b"1");
    }

    #[tokio::test]
    async fn non_essential_cookie_waits_for_consent() {
        let store = Arc::new(MemoryStore::new());
        let app = session_app(SessionOptions::default().with_essential(false), Arc::clone(&store));

        let res = app.handle(Request::get("/visit")).await;
        assert!(res.header(SET_COOKIE).is_none());
        assert!(store.is_empty());

        let res = app.handle(with_cookie("/visit", ".AspNet.Consent=yes")).await;
        assert!(res.header(SET_COOKIE).is_some());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_session_is_forgotten() {
        let store = Arc::new(MemoryStore::new());
        let options = SessionOptions::default().with_idle_timeout(Duration::from_secs(60));
        let app = session_app(options, Arc::clone(&store));

        let cookie = cookie_pair(&app.handle(Request::get("/visit")).await);
        tokio::time::advance(Duration::from_secs(61)).await;

        let res = app.handle(with_cookie("/visit", &cookie)).await;
        assert_eq!(res.body().as_ref(), b"1");
    }

    #[tokio::test]
    async fn corrupt_session_value_does_not_fail_the_request() {
        let store = Arc::new(MemoryStore::new());
        let app = session_app(SessionOptions::default(), Arc::clone(&store));
        let cookie = cookie_pair(&app.handle(Request::get("/visit")).await);
        let id = SessionId::parse(cookie.split('=').nth(1).unwrap()).unwrap();

        let mut values = std::collections::HashMap::new();
        values.insert("visits".to_owned(), Bytes::from_static(b"{not json"));
        store.save(&id, values, Duration::from_secs(60)).await.unwrap();

        let res = app.handle(with_cookie("/visit", &cookie)).await;
        assert_eq!(res.status_code(), http::StatusCode::OK);
        assert_eq!(res.body().as_ref(), b"1");
    }

    #[tokio::test]
    async fn renewed_session_gets_a_new_cookie_and_drops_the_old_one() {
        let store = Arc::new(MemoryStore::new());
        let app = session_app(SessionOptions::default(), Arc::clone(&store));
        let old = cookie_pair(&app.handle(Request::get("/visit")).await);

        let res = app.handle(with_cookie("/rotate", &old)).await;
        let new = cookie_pair(&res);
        assert_ne!(new, old);
        assert_eq!(store.len(), 1);

        let res = app.handle(with_cookie("/visit", &new)).await;
        assert_eq!(res.body().as_ref(), b"2");
        let res = app.handle(with_cookie("/peek", &old)).await;
        assert_eq!(res.body().as_ref(), b"no");
    }
}
