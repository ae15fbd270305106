#![allow(dead_code)]

use bytes::Bytes;
use http::Method;
use http::header::{CONTENT_TYPE, COOKIE, SET_COOKIE};

use asc_web::{ConfigSource, Request, Response};

pub const ADMIN_EMAIL: &str = "admin@asc.com";
pub const ENGINEER_EMAIL: &str = "engineer@asc.com";
pub const PASSWORD: &str = "P@ssw0rd";

/// A content root with a complete `appsettings.json`. Keep the directory
/// alive for as long as the source is used.
pub fn content_root() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let settings = serde_json::json!({
        "ConnectionStrings": { "DefaultConnection": "Server=(localdb);Database=ASC" },
        "AppSettings": {
            "ApplicationTitle": "Automobile Service Center",
            "AdminEmail": ADMIN_EMAIL,
            "AdminName": "Admin",
            "AdminPassword": PASSWORD,
            "EngineerEmail": ENGINEER_EMAIL,
            "EngineerName": "Engineer",
            "EngineerPassword": PASSWORD,
            "Roles": "Admin,User,Engineer"
        },
        "Session": { "IdleTimeoutMinutes": 30 }
    });
    std::fs::write(dir.path().join("appsettings.json"), settings.to_string()).unwrap();
    dir
}

pub fn source(dir: &tempfile::TempDir) -> ConfigSource {
    ConfigSource::new(dir.path())
}

pub fn request(method: Method, uri: &str, cookie: Option<&str>, json: Option<serde_json::Value>) -> Request {
    let mut builder = http::Request::builder().method(method).uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(COOKIE, cookie);
    }
    let body = match json {
        Some(value) => {
            builder = builder.header(CONTENT_TYPE, "application/json");
            Bytes::from(value.to_string())
        }
        None => Bytes::new(),
    };
    Request::from_http(builder.body(body).unwrap())
}

/// A browser-style form post.
pub fn form_request(uri: &str, cookie: Option<&str>, body: &'static str) -> Request {
    let mut builder = http::Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(CONTENT_TYPE, "application/x-www-form-urlencoded");
    if let Some(cookie) = cookie {
        builder = builder.header(COOKIE, cookie);
    }
    Request::from_http(builder.body(Bytes::from_static(body.as_bytes())).unwrap())
}

/// `name=value` of the response's `set-cookie`, if any.
pub fn cookie_of(res: &Response) -> Option<String> {
    res.header(SET_COOKIE)
        .and_then(|c| c.split(';').next())
        .map(str::to_owned)
}
