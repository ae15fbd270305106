//! Multi-step service request wizard. The draft lives in the session between
//! steps and is only persisted-and-cleared on submit.

use http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::request::Request;
use crate::response::{ContentType, Response};
use crate::services::Services;
use crate::session::{Session, get_session, set_session};

/// Session key of the in-progress service request.
pub const DRAFT_SESSION_KEY: &str = "ServiceRequestDraft";

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceRequestDraft {
    pub vehicle_name: Option<String>,
    pub vehicle_type: Option<String>,
    pub requested_services: Vec<String>,
    pub requested_date: Option<String>,
}

impl ServiceRequestDraft {
    /// Fields set in `update` replace ours; a non-empty service list replaces
    /// the current one.
    fn merge(&mut self, update: ServiceRequestDraft) {
        if update.vehicle_name.is_some() {
            self.vehicle_name = update.vehicle_name;
        }
        if update.vehicle_type.is_some() {
            self.vehicle_type = update.vehicle_type;
        }
        if !update.requested_services.is_empty() {
            self.requested_services = update.requested_services;
        }
        if update.requested_date.is_some() {
            self.requested_date = update.requested_date;
        }
    }

    fn missing(&self) -> Option<&'static str> {
        let blank = |v: &Option<String>| v.as_deref().map_or(true, |s| s.trim().is_empty());
        if blank(&self.vehicle_name) {
            Some("vehicleName")
        } else if blank(&self.vehicle_type) {
            Some("vehicleType")
        } else if self.requested_services.is_empty() {
            Some("requestedServices")
        } else {
            None
        }
    }
}

/// A draft that no longer decodes is dropped; the wizard starts over.
fn load_draft(session: &Session) -> Option<ServiceRequestDraft> {
    match get_session(session, DRAFT_SESSION_KEY) {
        Ok(draft) => draft,
        Err(e) => {
            warn!(error = %e, "discarding unreadable service request draft");
            session.remove(DRAFT_SESSION_KEY);
            None
        }
    }
}

fn json_response(status: StatusCode, body: &impl Serialize) -> Response {
    match serde_json::to_vec(body) {
        Ok(bytes) => Response::builder().status(status).bytes(ContentType::Json, bytes),
        Err(e) => Response::internal_error(format!("serializing response: {e}")),
    }
}

fn no_session() -> Response {
    Response::internal_error("service requests need the session stage")
}

pub(super) async fn show_draft(req: Request) -> Response {
    let Some(session) = req.session() else { return no_session() };
    match load_draft(session) {
        Some(draft) => json_response(StatusCode::OK, &draft),
        None => Response::status(StatusCode::NOT_FOUND),
    }
}

pub(super) async fn update_draft(req: Request) -> Response {
    let Some(session) = req.session() else { return no_session() };
    let update = match req.json::<ServiceRequestDraft>() {
        Ok(update) => update,
        Err(e) => return json_response(StatusCode::BAD_REQUEST, &json!({ "error": e.to_string() })),
    };
    let mut draft = load_draft(session).unwrap_or_default();
    draft.merge(update);
    if let Err(e) = set_session(session, DRAFT_SESSION_KEY, &draft) {
        return Response::internal_error(e.to_string());
    }
    json_response(StatusCode::OK, &draft)
}

pub(super) async fn submit(req: Request) -> Response {
    let Some(session) = req.session() else { return no_session() };
    let Some(draft) = load_draft(session) else {
        return json_response(StatusCode::BAD_REQUEST, &json!({ "error": "no service request in progress" }));
    };
    if let Some(field) = draft.missing() {
        return json_response(StatusCode::BAD_REQUEST, &json!({ "error": format!("{field} is required") }));
    }

    let id = Uuid::new_v4();
    let owner = req.user().map(|u| u.email.clone());
    info!(%id, owner = owner.as_deref().unwrap_or("-"), "service request submitted");

    if let (Some(services), Some(to)) = (Services::of(&req), owner.as_deref()) {
        let subject = format!("Service request {id} received");
        let message = format!(
            "We received your request for {}: {}.",
            draft.vehicle_name.as_deref().unwrap_or_default(),
            draft.requested_services.join(", ")
        );
        if let Err(e) = services.email.send_email(to, &subject, &message).await {
            warn!(error = %e, "could not send service request confirmation");
        }
    }

    session.remove(DRAFT_SESSION_KEY);
    json_response(StatusCode::CREATED, &json!({ "id": id, "request": draft }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_keeps_earlier_steps() {
        let mut draft = ServiceRequestDraft {
            vehicle_name: Some("Swift".into()),
            ..Default::default()
        };
        draft.merge(ServiceRequestDraft {
            vehicle_type: Some("Car".into()),
            requested_services: vec!["Oil change".into()],
            ..Default::default()
        });
        assert_eq!(draft.vehicle_name.as_deref(), Some("Swift"));
        assert_eq!(draft.vehicle_type.as_deref(), Some("Car"));
        assert_eq!(draft.missing(), None);
    }

    #[test]
    fn incomplete_draft_names_the_missing_field() {
        let draft = ServiceRequestDraft { vehicle_name: Some("  ".into()), ..Default::default() };
        assert_eq!(draft.missing(), Some("vehicleName"));
    }
}
