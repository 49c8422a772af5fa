//! Effective-permission resolution.
//!
//! Pure computation over a [`Snapshot`] of one user's roles and bindings.
//! Precedence, from weakest to strongest:
//!
//! 1. Role votes. Per permission, the non-expired binding of the
//!    highest-priority active role decides; on an exact priority tie a
//!    grant beats a denial.
//! 2. Non-override user grants add to the role baseline. Non-override
//!    user denials do nothing.
//! 3. Override user bindings are authoritative in both directions.
//!
//! Expired bindings contribute nothing. Deactivated permissions are never
//! allowed, and names nobody mentions fail closed.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use keyward_core::models::binding::{Binding, RolePermission, UserPermission};
use keyward_core::models::role::Role;
use serde::Serialize;
use uuid::Uuid;

/// What decided a single permission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DecisionSource {
    /// Granted by the highest-priority role with an opinion.
    Role { role_id: Uuid, priority: i32 },
    /// Granted by a non-override user binding.
    DirectGrant,
    /// Granted by an override user binding.
    Override,
    /// Denied by the highest-priority role with an opinion.
    RoleDenied { role_id: Uuid, priority: i32 },
    /// Denied by an override user binding.
    OverrideDenied,
    /// The permission exists but is deactivated.
    PermissionInactive,
    /// Nothing grants the permission.
    DenyByDefault,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub allowed: bool,
    pub source: DecisionSource,
}

impl Decision {
    pub const DENY_BY_DEFAULT: Decision = Decision {
        allowed: false,
        source: DecisionSource::DenyByDefault,
    };

    fn allow(source: DecisionSource) -> Self {
        Self {
            allowed: true,
            source,
        }
    }

    fn deny(source: DecisionSource) -> Self {
        Self {
            allowed: false,
            source,
        }
    }
}

/// Everything the resolver needs to know about one user.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub user_id: Uuid,
    /// Roles the user holds. Inactive roles are ignored.
    pub roles: Vec<Role>,
    /// Bindings of those roles. Bindings of roles not in `roles` are ignored.
    pub role_bindings: Vec<RolePermission>,
    pub user_bindings: Vec<UserPermission>,
    pub inactive_permissions: BTreeSet<String>,
}

#[derive(Debug, Clone, Copy)]
struct Vote {
    role_id: Uuid,
    priority: i32,
    granted: bool,
}

impl Vote {
    fn beats(&self, other: &Vote) -> bool {
        self.priority > other.priority
            || (self.priority == other.priority && self.granted && !other.granted)
    }

    fn decision(&self) -> Decision {
        if self.granted {
            Decision::allow(DecisionSource::Role {
                role_id: self.role_id,
                priority: self.priority,
            })
        } else {
            Decision::deny(DecisionSource::RoleDenied {
                role_id: self.role_id,
                priority: self.priority,
            })
        }
    }
}

/// Track the earliest expiry still in the future.
fn note_expiry(acc: &mut Option<DateTime<Utc>>, expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) {
    if let Some(at) = expires_at.filter(|at| *at > now) {
        *acc = Some(acc.map_or(at, |current| current.min(at)));
    }
}

impl Snapshot {
    pub fn role_ids(&self) -> Vec<Uuid> {
        self.roles.iter().map(|r| r.id).collect()
    }

    /// Decide every permission the snapshot mentions.
    pub fn evaluate(&self, now: DateTime<Utc>) -> EffectivePermissions {
        let priorities: HashMap<Uuid, i32> = self
            .roles
            .iter()
            .filter(|r| r.is_active)
            .map(|r| (r.id, r.priority))
            .collect();
        let mut valid_until = None;

        let mut votes: BTreeMap<&str, Vote> = BTreeMap::new();
        for binding in &self.role_bindings {
            let Some(&priority) = priorities.get(&binding.role_id) else {
                continue;
            };
            note_expiry(&mut valid_until, binding.expires_at, now);
            if binding.is_expired(now) {
                continue;
            }
            let vote = Vote {
                role_id: binding.role_id,
                priority,
                granted: binding.is_granted,
            };
            votes
                .entry(binding.permission_name.as_str())
                .and_modify(|current| {
                    if vote.beats(current) {
                        *current = vote;
                    }
                })
                .or_insert(vote);
        }

        let mut decisions: BTreeMap<String, Decision> = votes
            .into_iter()
            .map(|(name, vote)| (name.to_string(), vote.decision()))
            .collect();

        for binding in &self.user_bindings {
            note_expiry(&mut valid_until, binding.expires_at, now);
        }

        let live = |b: &&UserPermission| !b.is_expired(now);

        for binding in self.user_bindings.iter().filter(live) {
            if binding.is_override || !binding.is_granted {
                continue;
            }
            let entry = decisions
                .entry(binding.permission_name.clone())
                .or_insert(Decision::DENY_BY_DEFAULT);
            if !entry.allowed {
                *entry = Decision::allow(DecisionSource::DirectGrant);
            }
        }

        for binding in self.user_bindings.iter().filter(live) {
            if !binding.is_override {
                continue;
            }
            let decision = if binding.is_granted {
                Decision::allow(DecisionSource::Override)
            } else {
                Decision::deny(DecisionSource::OverrideDenied)
            };
            decisions.insert(binding.permission_name.clone(), decision);
        }

        for name in &self.inactive_permissions {
            decisions.insert(
                name.clone(),
                Decision::deny(DecisionSource::PermissionInactive),
            );
        }

        EffectivePermissions {
            user_id: self.user_id,
            decisions,
            computed_at: now,
            valid_until,
        }
    }

    pub fn resolve(&self, permission_name: &str, now: DateTime<Utc>) -> Decision {
        self.evaluate(now).decision(permission_name)
    }

    pub fn resolve_all(&self, now: DateTime<Utc>) -> BTreeSet<String> {
        self.evaluate(now).allowed()
    }
}

/// A user's resolved permissions at `computed_at`.
#[derive(Debug, Clone, Serialize)]
pub struct EffectivePermissions {
    pub user_id: Uuid,
    pub decisions: BTreeMap<String, Decision>,
    pub computed_at: DateTime<Utc>,
    /// Earliest future expiry among the bindings used. Past this instant
    /// the result may be wrong and must be recomputed.
    pub valid_until: Option<DateTime<Utc>>,
}

impl EffectivePermissions {
    pub fn decision(&self, permission_name: &str) -> Decision {
        self.decisions
            .get(permission_name)
            .copied()
            .unwrap_or(Decision::DENY_BY_DEFAULT)
    }

    pub fn is_allowed(&self, permission_name: &str) -> bool {
        self.decision(permission_name).allowed
    }

    pub fn allowed(&self) -> BTreeSet<String> {
        self.decisions
            .iter()
            .filter(|(_, d)| d.allowed)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.valid_until.is_none_or(|until| now < until)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use keyward_core::models::binding::ChangeContext;
    use keyward_core::models::permission::Permission;

    use super::*;

    fn permission(name: &str) -> Permission {
        let now = Utc::now();
        Permission {
            id: Uuid::new_v4(),
            name: name.into(),
            display_name: name.into(),
            description: None,
            category: "Content".into(),
            is_system: false,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn role(name: &str, priority: i32) -> Role {
        let now = Utc::now();
        Role {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            category: "Custom".into(),
            is_system: false,
            is_active: true,
            priority,
            created_at: now,
            updated_at: now,
        }
    }

    fn ctx() -> ChangeContext {
        ChangeContext::new(Some("admin".into()), None)
    }

    fn role_grant(role: &Role, p: &Permission, expires_at: Option<DateTime<Utc>>) -> RolePermission {
        let ctx = ctx();
        let mut rp = RolePermission::blank(role.id, p, &ctx);
        rp.grant(expires_at, &ctx);
        rp
    }

    fn role_deny(role: &Role, p: &Permission) -> RolePermission {
        let ctx = ctx();
        let mut rp = RolePermission::blank(role.id, p, &ctx);
        rp.deny(None, &ctx);
        rp
    }

    fn user_grant(user_id: Uuid, p: &Permission, is_override: bool) -> UserPermission {
        let ctx = ctx();
        let mut up = UserPermission::blank(user_id, p, &ctx);
        up.grant(is_override, None, &ctx);
        up
    }

    fn user_deny(user_id: Uuid, p: &Permission) -> UserPermission {
        let ctx = ctx();
        let mut up = UserPermission::blank(user_id, p, &ctx);
        up.deny(None, &ctx);
        up
    }

    /// Moderator(10) grants `content.delete`, Trial(1) denies it.
    fn moderator_and_trial() -> (Snapshot, Permission, Role) {
        let delete = permission("content.delete");
        let moderator = role("Moderator", 10);
        let trial = role("Trial", 1);
        let snapshot = Snapshot {
            user_id: Uuid::new_v4(),
            role_bindings: vec![role_grant(&moderator, &delete, None), role_deny(&trial, &delete)],
            roles: vec![moderator.clone(), trial],
            ..Default::default()
        };
        (snapshot, delete, moderator)
    }

    #[test]
    fn higher_priority_role_grant_wins() {
        let (snapshot, _, moderator) = moderator_and_trial();
        let decision = snapshot.resolve("content.delete", Utc::now());
        assert!(decision.allowed);
        assert_eq!(
            decision.source,
            DecisionSource::Role {
                role_id: moderator.id,
                priority: 10
            }
        );
    }

    #[test]
    fn higher_priority_role_denial_wins() {
        let delete = permission("content.delete");
        let member = role("Member", 1);
        let restricted = role("Restricted", 50);
        let snapshot = Snapshot {
            role_bindings: vec![role_grant(&member, &delete, None), role_deny(&restricted, &delete)],
            roles: vec![member, restricted.clone()],
            ..Default::default()
        };
        let decision = snapshot.resolve("content.delete", Utc::now());
        assert!(!decision.allowed);
        assert_eq!(
            decision.source,
            DecisionSource::RoleDenied {
                role_id: restricted.id,
                priority: 50
            }
        );
    }

    #[test]
    fn priority_tie_is_permissive() {
        let edit = permission("content.edit");
        let a = role("A", 5);
        let b = role("B", 5);
        let snapshot = Snapshot {
            role_bindings: vec![role_deny(&a, &edit), role_grant(&b, &edit, None)],
            roles: vec![a, b],
            ..Default::default()
        };
        assert!(snapshot.resolve("content.edit", Utc::now()).allowed);
    }

    #[test]
    fn override_deny_beats_every_role_grant() {
        let (mut snapshot, delete, _) = moderator_and_trial();
        snapshot.user_bindings = vec![user_deny(snapshot.user_id, &delete)];
        let decision = snapshot.resolve("content.delete", Utc::now());
        assert!(!decision.allowed);
        assert_eq!(decision.source, DecisionSource::OverrideDenied);
    }

    #[test]
    fn override_grant_adds_unbound_permission() {
        let publish = permission("content.publish");
        let user_id = Uuid::new_v4();
        let snapshot = Snapshot {
            user_id,
            user_bindings: vec![user_grant(user_id, &publish, true)],
            ..Default::default()
        };
        let decision = snapshot.resolve("content.publish", Utc::now());
        assert_eq!(decision, Decision::allow(DecisionSource::Override));
    }

    #[test]
    fn override_grant_beats_role_denial() {
        let (mut snapshot, _, _) = moderator_and_trial();
        let ban = permission("community.ban_users");
        let strict = role("Strict", 100);
        snapshot.role_bindings.push(role_deny(&strict, &ban));
        snapshot.roles.push(strict);
        snapshot.user_bindings = vec![user_grant(snapshot.user_id, &ban, true)];
        assert!(snapshot.resolve("community.ban_users", Utc::now()).allowed);
    }

    #[test]
    fn non_override_deny_is_ignored() {
        let (mut snapshot, delete, _) = moderator_and_trial();
        let ctx = ctx();
        let mut revoked = user_grant(snapshot.user_id, &delete, false);
        revoked.revoke(&ctx);
        snapshot.user_bindings = vec![revoked];
        assert!(snapshot.resolve("content.delete", Utc::now()).allowed);
    }

    #[test]
    fn direct_grant_is_additive() {
        let (mut snapshot, _, _) = moderator_and_trial();
        let feature = permission("content.feature");
        snapshot.user_bindings = vec![user_grant(snapshot.user_id, &feature, false)];
        let all = snapshot.resolve_all(Utc::now());
        assert!(all.contains("content.feature"));
        assert!(all.contains("content.delete"));
        assert_eq!(
            snapshot.resolve("content.feature", Utc::now()).source,
            DecisionSource::DirectGrant
        );
    }

    #[test]
    fn direct_grant_overrules_role_denial() {
        let edit = permission("content.edit");
        let strict = role("Strict", 100);
        let user_id = Uuid::new_v4();
        let snapshot = Snapshot {
            user_id,
            role_bindings: vec![role_deny(&strict, &edit)],
            roles: vec![strict],
            user_bindings: vec![user_grant(user_id, &edit, false)],
            ..Default::default()
        };
        assert!(snapshot.resolve("content.edit", Utc::now()).allowed);
    }

    #[test]
    fn expired_role_grant_is_ignored() {
        let delete = permission("content.delete");
        let moderator = role("Moderator", 10);
        let yesterday = Utc::now() - Duration::days(1);
        let snapshot = Snapshot {
            role_bindings: vec![role_grant(&moderator, &delete, Some(yesterday))],
            roles: vec![moderator],
            ..Default::default()
        };
        assert_eq!(
            snapshot.resolve("content.delete", Utc::now()),
            Decision::DENY_BY_DEFAULT
        );
    }

    #[test]
    fn expired_denial_does_not_block_lower_grant() {
        let delete = permission("content.delete");
        let member = role("Member", 1);
        let strict = role("Strict", 100);
        let ctx = ctx();
        let mut lapsed = RolePermission::blank(strict.id, &delete, &ctx);
        lapsed.deny(Some(ctx.now - Duration::minutes(1)), &ctx);
        let snapshot = Snapshot {
            role_bindings: vec![role_grant(&member, &delete, None), lapsed],
            roles: vec![member, strict],
            ..Default::default()
        };
        assert!(snapshot.resolve("content.delete", Utc::now()).allowed);
    }

    #[test]
    fn expired_override_deny_restores_baseline() {
        let (mut snapshot, delete, _) = moderator_and_trial();
        let ctx = ctx();
        let mut up = UserPermission::blank(snapshot.user_id, &delete, &ctx);
        up.deny(Some(ctx.now - Duration::seconds(1)), &ctx);
        snapshot.user_bindings = vec![up];
        assert!(snapshot.resolve("content.delete", Utc::now()).allowed);
    }

    #[test]
    fn inactive_role_contributes_nothing() {
        let (mut snapshot, _, _) = moderator_and_trial();
        for role in &mut snapshot.roles {
            if role.name == "Moderator" {
                role.is_active = false;
            }
        }
        let decision = snapshot.resolve("content.delete", Utc::now());
        assert!(!decision.allowed);
        assert!(matches!(decision.source, DecisionSource::RoleDenied { .. }));
    }

    #[test]
    fn inactive_permission_is_denied() {
        let (mut snapshot, _, _) = moderator_and_trial();
        snapshot.inactive_permissions.insert("content.delete".into());
        let decision = snapshot.resolve("content.delete", Utc::now());
        assert_eq!(decision, Decision::deny(DecisionSource::PermissionInactive));
        assert!(snapshot.resolve_all(Utc::now()).is_empty());
    }

    #[test]
    fn unknown_name_fails_closed() {
        let (snapshot, _, _) = moderator_and_trial();
        assert_eq!(
            snapshot.resolve("does.not_exist", Utc::now()),
            Decision::DENY_BY_DEFAULT
        );
    }

    #[test]
    fn valid_until_tracks_earliest_future_expiry() {
        let delete = permission("content.delete");
        let edit = permission("content.edit");
        let moderator = role("Moderator", 10);
        let now = Utc::now();
        let soon = now + Duration::minutes(5);
        let later = now + Duration::hours(5);
        let snapshot = Snapshot {
            role_bindings: vec![
                role_grant(&moderator, &delete, Some(later)),
                role_grant(&moderator, &edit, Some(soon)),
                role_grant(&moderator, &permission("content.view"), Some(now - Duration::days(1))),
            ],
            roles: vec![moderator],
            ..Default::default()
        };

        let effective = snapshot.evaluate(now);
        assert_eq!(effective.valid_until, Some(soon));
        assert!(effective.is_fresh(now));
        assert!(!effective.is_fresh(soon));
    }
}
