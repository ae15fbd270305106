//! Radix-tree request router.
//!
//! One tree per HTTP method, O(path-length) lookup. On top of plain
//! `method + path` registration the router understands two conventions:
//!
//! - **Conventional controller routes**: a [`RouteTemplate`] such as
//!   `{controller=Home}/{action=Index}/{id?}` is expanded once per registered
//!   action into the concrete paths it can match (`/Home/Index/{id}`,
//!   `/Home/Index`, `/Home`, `/`).
//! - **Pages**: `map_page("Account/Login", …)` answers `/Account/Login`; a
//!   page named `Index` also answers on its folder.
//!
//! Every endpoint carries an authorization [`Policy`] that the authorization
//! middleware enforces.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use http::Method;
use matchit::Router as MatchitRouter;
use thiserror::Error;

use crate::handler::{BoxedHandler, Handler};

/// Route registration failures. Fatal at startup.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("invalid route `{path}`: {source}")]
    Insert {
        path: String,
        #[source]
        source: matchit::InsertError,
    },

    #[error("invalid route template `{template}`: {reason}")]
    Template { template: String, reason: &'static str },

    #[error("route template `{template}` needs a value for `{param}`")]
    MissingValue { template: String, param: String },
}

// ── Policy ────────────────────────────────────────────────────────────────────

/// Who may reach an endpoint.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum Policy {
    #[default]
    Anonymous,
    /// Any signed-in user.
    Authenticated,
    /// A signed-in user holding at least one of these roles.
    Roles(Vec<String>),
}

impl Policy {
    pub fn roles<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Roles(roles.into_iter().map(Into::into).collect())
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous)
    }

    /// True if a user holding `roles` satisfies this policy.
    pub fn permits(&self, roles: &[String]) -> bool {
        match self {
            Self::Anonymous | Self::Authenticated => true,
            Self::Roles(required) => required.iter().any(|r| roles.contains(r)),
        }
    }
}

// ── Endpoint ──────────────────────────────────────────────────────────────────

/// A resolved route target: the handler plus its metadata.
#[derive(Clone)]
pub struct Endpoint {
    pub(crate) handler: BoxedHandler,
    pub(crate) policy: Policy,
    pub(crate) name: Arc<str>,
}

impl Endpoint {
    pub fn name(&self) -> &str { &self.name }
    pub fn policy(&self) -> &Policy { &self.policy }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .finish()
    }
}

/// Outcome of a route lookup.
pub(crate) enum Lookup {
    Found(Endpoint, HashMap<String, String>),
    /// The path exists, but not for this method.
    MethodNotAllowed(Vec<Method>),
    NotFound,
}

// ── Router ────────────────────────────────────────────────────────────────────

/// The application route table.
///
/// Built during startup, then handed to
/// [`Pipeline::map_routes`](crate::middleware::Pipeline::map_routes). Each
/// registration returns `self` so calls chain; the first invalid
/// registration is remembered and reported by `map_routes`.
#[derive(Default)]
pub struct Router {
    routes: HashMap<Method, MatchitRouter<Endpoint>>,
    error: Option<RouteError>,
    count: usize,
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("routes", &self.count)
            .field("error", &self.error)
            .finish()
    }
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an anonymous endpoint for a method + path pair.
    ///
    /// Path parameters use `{name}` syntax; `req.param("name")` retrieves them.
    pub fn on(self, method: Method, path: &str, handler: impl Handler) -> Self {
        self.on_authorized(method, path, Policy::Anonymous, handler)
    }

    /// Register an endpoint guarded by `policy`.
    pub fn on_authorized(
        self,
        method: Method,
        path: &str,
        policy: Policy,
        handler: impl Handler,
    ) -> Self {
        let endpoint = Endpoint {
            handler: handler.into_boxed_handler(),
            policy,
            name: format!("{method} {path}").into(),
        };
        self.add(method, path, endpoint)
    }

    /// Register a controller action under a conventional route template.
    ///
    /// ```rust
    /// # use asc_web::{Policy, Request, Response, RouteTemplate, Router};
    /// # use http::Method;
    /// # async fn index(_: Request) -> Response { Response::text("") }
    /// let default = RouteTemplate::parse("{controller=Home}/{action=Index}/{id?}").unwrap();
    /// Router::new().map_controller_route(&default, Method::GET, "Home", "Index", Policy::Anonymous, index);
    /// ```
    pub fn map_controller_route(
        mut self,
        template: &RouteTemplate,
        method: Method,
        controller: &str,
        action: &str,
        policy: Policy,
        handler: impl Handler,
    ) -> Self {
        let paths = match template.expand(&[("controller", controller), ("action", action)]) {
            Ok(paths) => paths,
            Err(e) => {
                self.error.get_or_insert(e);
                return self;
            }
        };
        let endpoint = Endpoint {
            handler: handler.into_boxed_handler(),
            policy,
            name: format!("{}:{controller}.{action}", template.name()).into(),
        };
        for path in paths {
            self = self.add(method.clone(), &path, endpoint.clone());
        }
        self
    }

    /// Register a page. Pages answer both `GET` and `POST`.
    pub fn map_page(mut self, page: &str, policy: Policy, handler: impl Handler) -> Self {
        let page = page.trim_matches('/');
        let endpoint = Endpoint {
            handler: handler.into_boxed_handler(),
            policy,
            name: format!("page:{page}").into(),
        };
        let mut paths = vec![format!("/{page}")];
        if page == "Index" {
            paths.push("/".to_owned());
        } else if let Some(folder) = page.strip_suffix("/Index") {
            paths.push(format!("/{folder}"));
        }
        for path in &paths {
            for method in [Method::GET, Method::POST] {
                self = self.add(method, path, endpoint.clone());
            }
        }
        self
    }

    /// Number of concrete `method + path` entries registered.
    pub fn len(&self) -> usize { self.count }

    pub fn is_empty(&self) -> bool { self.count == 0 }

    pub(crate) fn check(mut self) -> Result<Self, RouteError> {
        match self.error.take() {
            Some(e) => Err(e),
            None => Ok(self),
        }
    }

    fn add(mut self, method: Method, path: &str, endpoint: Endpoint) -> Self {
        if self.error.is_some() {
            return self;
        }
        match self.routes.entry(method).or_default().insert(path, endpoint) {
            Ok(()) => self.count += 1,
            Err(source) => self.error = Some(RouteError::Insert { path: path.to_owned(), source }),
        }
        self
    }

    pub(crate) fn lookup(&self, method: &Method, path: &str) -> Lookup {
        if let Some(matched) = self.routes.get(method).and_then(|tree| tree.at(path).ok()) {
            let params = matched.params.iter()
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
                .collect();
            return Lookup::Found(matched.value.clone(), params);
        }
        let mut allowed: Vec<Method> = self.routes.iter()
            .filter(|(_, tree)| tree.at(path).is_ok())
            .map(|(m, _)| m.clone())
            .collect();
        if allowed.is_empty() {
            return Lookup::NotFound;
        }
        allowed.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Lookup::MethodNotAllowed(allowed)
    }
}

// ── RouteTemplate ─────────────────────────────────────────────────────────────

/// A conventional route template: `/`-separated segments that are either
/// literals or `{name}`, `{name=default}`, `{name?}` parameters.
#[derive(Clone, Debug)]
pub struct RouteTemplate {
    name: String,
    source: String,
    segments: Vec<Segment>,
}

#[derive(Clone, Debug, PartialEq)]
enum Segment {
    Literal(String),
    Param { name: String, default: Option<String>, optional: bool },
}

impl RouteTemplate {
    /// Parses an unnamed template.
    pub fn parse(template: &str) -> Result<Self, RouteError> {
        Self::named("default", template)
    }

    pub fn named(name: &str, template: &str) -> Result<Self, RouteError> {
        let invalid = |reason| RouteError::Template { template: template.to_owned(), reason };
        let trimmed = template.trim_matches('/');
        let mut segments = Vec::new();
        if !trimmed.is_empty() {
            for raw in trimmed.split('/') {
                segments.push(parse_segment(raw).map_err(invalid)?);
            }
        }
        Ok(Self { name: name.to_owned(), source: template.to_owned(), segments })
    }

    pub fn name(&self) -> &str { &self.name }
    pub fn as_str(&self) -> &str { &self.source }

    /// Expands the template into concrete router paths.
    ///
    /// Parameters named in `values` become literals; the rest stay as
    /// `{name}` captures. Trailing segments are omitted while they are
    /// optional, carry a default equal to the supplied value, or carry a
    /// default and no value. Longest path first.
    pub fn expand(&self, values: &[(&str, &str)]) -> Result<Vec<String>, RouteError> {
        let value_of = |name: &str| values.iter().find(|(k, _)| *k == name).map(|(_, v)| *v);

        let mut parts = Vec::with_capacity(self.segments.len());
        for segment in &self.segments {
            let part = match segment {
                Segment::Literal(lit) => lit.clone(),
                Segment::Param { name, default, optional } => match value_of(name) {
                    Some(v) => v.to_owned(),
                    None if *optional || default.is_some() => format!("{{{name}}}"),
                    None => {
                        return Err(RouteError::MissingValue {
                            template: self.source.clone(),
                            param: name.clone(),
                        });
                    }
                },
            };
            parts.push(part);
        }

        let droppable = |segment: &Segment| match segment {
            Segment::Literal(_) => false,
            Segment::Param { name, default, optional } => match (value_of(name), default) {
                (None, _) => *optional || default.is_some(),
                (Some(v), Some(d)) => v == d,
                (Some(_), None) => false,
            },
        };

        let mut paths = vec![format!("/{}", parts.join("/"))];
        for cut in (0..self.segments.len()).rev() {
            if !droppable(&self.segments[cut]) {
                break;
            }
            paths.push(format!("/{}", parts[..cut].join("/")));
        }
        Ok(paths)
    }
}

fn parse_segment(raw: &str) -> Result<Segment, &'static str> {
    if raw.is_empty() {
        return Err("empty segment");
    }
    let Some(inner) = raw.strip_prefix('{') else {
        if raw.contains(['{', '}']) {
            return Err("parameters must span a whole segment");
        }
        return Ok(Segment::Literal(raw.to_owned()));
    };
    let inner = inner.strip_suffix('}').ok_or("unclosed parameter")?;
    if inner.contains(['{', '}']) {
        return Err("nested braces");
    }
    let (inner, optional) = match inner.strip_suffix('?') {
        Some(rest) => (rest, true),
        None => (inner, false),
    };
    let (name, default) = match inner.split_once('=') {
        Some((name, default)) => (name, Some(default.to_owned())),
        None => (inner, None),
    };
    if name.is_empty() {
        return Err("parameter without a name");
    }
    if optional && default.is_some() {
        return Err("a parameter cannot be both optional and defaulted");
    }
    Ok(Segment::Param { name: name.to_owned(), default, optional })
}
