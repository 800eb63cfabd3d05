// Capability tiers for groups and events

use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use crate::api::AccessStore;
use crate::core::errors::AppError;
use crate::core::models::{EventId, EventRecord, GroupId, GroupRecord, UserId};

/// Caller capability on a group; higher implies every lower capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GroupTier {
    None,
    Admin,
    Owner,
}

/// Caller capability on an event; higher implies every lower capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventTier {
    None,
    Attendee,
    Admin,
    Owner,
}

/// A tier-granting predicate
///
/// Grant tables are evaluated top to bottom; the first matching grant wins.
pub struct Grant<F, T> {
    pub tier: T,
    pub via: &'static str,
    pub applies: fn(&F, UserId) -> bool,
}

/// Everything needed to decide an event tier for one user
#[derive(Debug, Clone)]
pub struct EventFacts {
    pub event: EventRecord,
    pub group: Option<GroupRecord>,
    pub is_attendee: bool,
}

/// Event tier together with whether the user holds an attendance row
///
/// Admin tiers do not imply a row, so the two are reported separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventAccess {
    pub tier: EventTier,
    pub is_attendee: bool,
}

impl EventAccess {
    pub const NONE: EventAccess = EventAccess { tier: EventTier::None, is_attendee: false };
}

pub const GROUP_GRANTS: &[Grant<GroupRecord, GroupTier>] = &[
    Grant {
        tier: GroupTier::Owner,
        via: "group-owner",
        applies: |group, user| group.owner_id == user,
    },
    Grant {
        tier: GroupTier::Admin,
        via: "group-administrator",
        applies: |group, user| group.admin_ids.contains(&user),
    },
];

pub const EVENT_GRANTS: &[Grant<EventFacts, EventTier>] = &[
    Grant {
        tier: EventTier::Owner,
        via: "event-owner",
        applies: |facts, user| facts.event.owner_id == user,
    },
    Grant {
        tier: EventTier::Admin,
        via: "group-delegation",
        applies: |facts, user| {
            facts
                .group
                .as_ref()
                .map(|group| group_tier(group, user) >= GroupTier::Admin)
                .unwrap_or(false)
        },
    },
    Grant {
        tier: EventTier::Admin,
        via: "event-administrator",
        applies: |facts, user| facts.event.admin_ids.contains(&user),
    },
    Grant {
        tier: EventTier::Attendee,
        via: "attendance",
        applies: |facts, _| facts.is_attendee,
    },
];

/// First matching grant in `grants`, if any
pub fn first_grant<'a, F, T: Copy>(
    grants: &'a [Grant<F, T>],
    facts: &F,
    user: UserId,
) -> Option<&'a Grant<F, T>> {
    grants.iter().find(|grant| (grant.applies)(facts, user))
}

pub fn group_tier(group: &GroupRecord, user: UserId) -> GroupTier {
    first_grant(GROUP_GRANTS, group, user)
        .map(|grant| grant.tier)
        .unwrap_or(GroupTier::None)
}

pub fn event_tier(facts: &EventFacts, user: UserId) -> EventTier {
    first_grant(EVENT_GRANTS, facts, user)
        .map(|grant| grant.tier)
        .unwrap_or(EventTier::None)
}

/// Resolves caller tiers against the backing store
///
/// Side-effect free: a missing group or event resolves to `None` for every
/// user instead of failing. Store failures are propagated.
pub struct PermissionResolver {
    store: Arc<dyn AccessStore + Send + Sync>,
}

impl PermissionResolver {
    pub fn new(store: Arc<dyn AccessStore + Send + Sync>) -> Self {
        Self { store }
    }

    pub async fn resolve_group_tier(
        &self,
        user: UserId,
        group_id: GroupId,
    ) -> Result<GroupTier, AppError> {
        let Some(group) = self.store.find_group(group_id).await? else {
            return Ok(GroupTier::None);
        };
        let grant = first_grant(GROUP_GRANTS, &group, user);
        debug!(
            user_id = %user,
            group_id = %group_id,
            via = grant.map(|g| g.via).unwrap_or("none"),
            "Group tier resolved"
        );
        Ok(grant.map(|g| g.tier).unwrap_or(GroupTier::None))
    }

    pub async fn resolve_event_tier(
        &self,
        user: UserId,
        event_id: EventId,
    ) -> Result<EventTier, AppError> {
        let facts = self.load_event_facts(user, event_id).await?;
        Ok(Self::tier_from_facts(facts.as_ref(), user))
    }

    /// Event tier, but `None` when the event does not belong to `group_id`
    pub async fn resolve_event_tier_in_group(
        &self,
        user: UserId,
        group_id: GroupId,
        event_id: EventId,
    ) -> Result<EventTier, AppError> {
        Ok(self.resolve_event_access_in_group(user, group_id, event_id).await?.tier)
    }

    /// Tier and attendance row for `event_id` scoped to `group_id`
    ///
    /// A missing event, or one under another group, yields `EventAccess::NONE`.
    pub async fn resolve_event_access_in_group(
        &self,
        user: UserId,
        group_id: GroupId,
        event_id: EventId,
    ) -> Result<EventAccess, AppError> {
        let facts = self
            .load_event_facts(user, event_id)
            .await?
            .filter(|facts| facts.event.group_id == group_id);
        Ok(match facts {
            Some(facts) => EventAccess {
                tier: Self::tier_from_facts(Some(&facts), user),
                is_attendee: facts.is_attendee,
            },
            None => EventAccess::NONE,
        })
    }

    fn tier_from_facts(facts: Option<&EventFacts>, user: UserId) -> EventTier {
        let Some(facts) = facts else {
            return EventTier::None;
        };
        let grant = first_grant(EVENT_GRANTS, facts, user);
        debug!(
            user_id = %user,
            event_id = %facts.event.id,
            via = grant.map(|g| g.via).unwrap_or("none"),
            "Event tier resolved"
        );
        grant.map(|g| g.tier).unwrap_or(EventTier::None)
    }

    async fn load_event_facts(
        &self,
        user: UserId,
        event_id: EventId,
    ) -> Result<Option<EventFacts>, AppError> {
        let Some(event) = self.store.find_event(event_id).await? else {
            return Ok(None);
        };
        let group = self.store.find_group(event.group_id).await?;
        let is_attendee = self.store.is_attendee(event_id, user).await?;
        Ok(Some(EventFacts { event, group, is_attendee }))
    }
}
