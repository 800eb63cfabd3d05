// Request gate: coarse tier check in front of the /api routes

use axum::{
    extract::{OriginalUri, Request, State},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::api::cookies::extract_session_cookie;
use crate::api::responses::ApiError;
use crate::auth::audit_logger::{AccessEvent, AuditLogger};
use crate::auth::permission::{EventAccess, EventTier, GroupTier, PermissionResolver};
use crate::auth::session::SessionCodec;
use crate::core::errors::AppError;
use crate::core::models::{EventId, GroupId, SessionClaims};

/// What a route family demands of the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    Group(GroupTier),
    /// An attendance row for the event plus at least this event tier.
    /// Admin tiers alone do not satisfy it.
    Participant(EventTier),
}

/// Tier the caller actually holds on the gated resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantedTier {
    Group(GroupTier),
    Event(EventTier),
}

impl GrantedTier {
    pub fn group_tier(&self) -> Option<GroupTier> {
        match self {
            GrantedTier::Group(tier) => Some(*tier),
            GrantedTier::Event(_) => None,
        }
    }

    pub fn event_tier(&self) -> Option<EventTier> {
        match self {
            GrantedTier::Event(tier) => Some(*tier),
            GrantedTier::Group(_) => None,
        }
    }
}

/// A protected path shape
///
/// `shape` segments starting with `:` are captured positionally. With
/// `nested` set the family also covers every deeper path.
#[derive(Debug)]
pub struct RouteFamily {
    pub name: &'static str,
    pub shape: &'static [&'static str],
    pub nested: bool,
    pub requirement: Requirement,
}

/// Evaluated top to bottom; most specific shapes first
pub const ROUTE_FAMILIES: &[RouteFamily] = &[
    RouteFamily {
        name: "event-manage",
        shape: &["api", "groups", ":group", "events", ":event", "manage"],
        nested: true,
        requirement: Requirement::Participant(EventTier::Admin),
    },
    RouteFamily {
        name: "event",
        shape: &["api", "groups", ":group", "events", ":event"],
        nested: true,
        requirement: Requirement::Participant(EventTier::Attendee),
    },
    RouteFamily {
        name: "group-events",
        shape: &["api", "groups", ":group", "events"],
        nested: false,
        requirement: Requirement::Group(GroupTier::Admin),
    },
    RouteFamily {
        name: "group",
        shape: &["api", "groups", ":group"],
        nested: true,
        requirement: Requirement::Group(GroupTier::Admin),
    },
];

/// Raw ids captured from a matched path
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PathIds<'a> {
    pub group: Option<&'a str>,
    pub event: Option<&'a str>,
}

impl RouteFamily {
    fn capture<'a>(&self, segments: &[&'a str]) -> Option<PathIds<'a>> {
        let fits = if self.nested {
            segments.len() >= self.shape.len()
        } else {
            segments.len() == self.shape.len()
        };
        if !fits {
            return None;
        }

        let mut ids = PathIds::default();
        for (expected, actual) in self.shape.iter().zip(segments) {
            match *expected {
                ":group" => ids.group = Some(*actual),
                ":event" => ids.event = Some(*actual),
                literal if literal == *actual => {}
                _ => return None,
            }
        }
        Some(ids)
    }
}

/// First family whose shape fits `path`, with its captured ids
pub fn match_route_family(path: &str) -> Option<(&'static RouteFamily, PathIds<'_>)> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    ROUTE_FAMILIES
        .iter()
        .find_map(|family| family.capture(&segments).map(|ids| (family, ids)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Unauthenticated,
    Forbidden,
}

impl RejectReason {
    fn as_str(&self) -> &'static str {
        match self {
            RejectReason::Unauthenticated => "unauthenticated",
            RejectReason::Forbidden => "forbidden",
        }
    }
}

impl From<RejectReason> for AppError {
    fn from(reason: RejectReason) -> Self {
        match reason {
            RejectReason::Unauthenticated => AppError::Unauthenticated,
            RejectReason::Forbidden => AppError::Forbidden,
        }
    }
}

/// Attached to request extensions for handlers behind the gate
#[derive(Debug, Clone)]
pub struct GatePass {
    pub caller: SessionClaims,
    pub family: &'static str,
    pub granted: GrantedTier,
}

#[derive(Debug, Clone)]
pub enum GateDecision {
    Allow(GatePass),
    Reject(RejectReason),
}

pub struct RequestGate {
    codec: Arc<SessionCodec>,
    resolver: Arc<PermissionResolver>,
    audit_logger: Arc<AuditLogger>,
}

impl RequestGate {
    pub fn new(
        codec: Arc<SessionCodec>,
        resolver: Arc<PermissionResolver>,
        audit_logger: Arc<AuditLogger>,
    ) -> Self {
        Self { codec, resolver, audit_logger }
    }

    /// Decide whether a request for `path` may reach its handler
    ///
    /// An invalid credential makes the caller anonymous rather than failing.
    /// Event families need an attendance row before any tier is considered.
    /// Permission is checked before existence: a missing group or event
    /// resolves to the lowest tier, so ids cannot be enumerated.
    /// Paths outside every route family are refused.
    pub async fn gate_request(
        &self,
        credential: Option<&str>,
        path: &str,
    ) -> Result<GateDecision, AppError> {
        let caller = credential.and_then(|token| match self.codec.verify(token) {
            Ok(claims) => Some(claims),
            Err(e) => {
                debug!(error = %e, "Session credential rejected, continuing as anonymous");
                None
            }
        });

        let Some(caller) = caller else {
            return Ok(self.reject(RejectReason::Unauthenticated, None, path));
        };

        let Some((family, ids)) = match_route_family(path) else {
            warn!(path = %path, "Gated path matches no route family");
            return Ok(self.reject(RejectReason::Forbidden, Some(&caller), path));
        };

        let user = caller.user.id;
        let group_id = ids.group.and_then(|raw| raw.parse::<GroupId>().ok());
        let event_id = ids.event.and_then(|raw| raw.parse::<EventId>().ok());

        let (granted, passes) = match family.requirement {
            Requirement::Group(required) => {
                let tier = match group_id {
                    Some(group_id) => self.resolver.resolve_group_tier(user, group_id).await?,
                    None => GroupTier::None,
                };
                (GrantedTier::Group(tier), tier >= required)
            }
            Requirement::Participant(required) => {
                let access = match (group_id, event_id) {
                    (Some(group_id), Some(event_id)) => {
                        self.resolver
                            .resolve_event_access_in_group(user, group_id, event_id)
                            .await?
                    }
                    _ => EventAccess::NONE,
                };
                if !access.is_attendee {
                    debug!(user_id = %user, family = family.name, "Caller holds no attendance row");
                }
                (
                    GrantedTier::Event(access.tier),
                    access.is_attendee && access.tier >= required,
                )
            }
        };

        if !passes {
            return Ok(self.reject(RejectReason::Forbidden, Some(&caller), path));
        }

        debug!(
            user_id = %user,
            family = family.name,
            granted = ?granted,
            "Gate passed"
        );
        self.audit_logger
            .log_access_event(AccessEvent::GateAllowed, Some(user), Some(path));

        Ok(GateDecision::Allow(GatePass {
            caller,
            family: family.name,
            granted,
        }))
    }

    fn reject(&self, reason: RejectReason, caller: Option<&SessionClaims>, path: &str) -> GateDecision {
        self.audit_logger.log_access_event(
            AccessEvent::GateRejected { reason: reason.as_str().to_string() },
            caller.map(|claims| claims.user.id),
            Some(path),
        );
        GateDecision::Reject(reason)
    }
}

/// Axum middleware applying the gate with `route_layer`
///
/// Uses the original URI so the table sees the full `/api/...` path even
/// inside a nested router.
pub async fn gate_middleware(
    State(gate): State<Arc<RequestGate>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let path = request
        .extensions()
        .get::<OriginalUri>()
        .map(|uri| uri.0.path().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let credential = extract_session_cookie(request.headers());
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    match gate.gate_request(credential.as_deref(), &path).await? {
        GateDecision::Allow(pass) => {
            request.extensions_mut().insert(pass.caller.clone());
            request.extensions_mut().insert(pass);
            Ok(next.run(request).await)
        }
        GateDecision::Reject(reason) => {
            let error = ApiError::from(AppError::from(reason));
            Err(match request_id {
                Some(id) => error.with_request_id(id),
                None => error,
            })
        }
    }
}
