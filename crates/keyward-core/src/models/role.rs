//! Role domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{KeywardError, KeywardResult};
use crate::models::permission::validate_name;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub category: String,
    pub is_system: bool,
    pub is_active: bool,
    /// Higher wins when two roles disagree about the same permission.
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Role {
    fn ensure_mutable(&self) -> KeywardResult<()> {
        if self.is_system {
            return Err(KeywardError::invalid_operation(format!(
                "system role '{}' cannot be modified",
                self.name
            )));
        }
        Ok(())
    }

    pub fn update_details(
        &mut self,
        description: Option<String>,
        category: String,
        now: DateTime<Utc>,
    ) -> KeywardResult<()> {
        self.ensure_mutable()?;
        self.description = description;
        self.category = category;
        self.updated_at = now;
        Ok(())
    }

    pub fn update_priority(&mut self, priority: i32, now: DateTime<Utc>) -> KeywardResult<()> {
        self.ensure_mutable()?;
        self.priority = priority;
        self.updated_at = now;
        Ok(())
    }

    pub fn activate(&mut self, now: DateTime<Utc>) -> KeywardResult<()> {
        self.ensure_mutable()?;
        self.is_active = true;
        self.updated_at = now;
        Ok(())
    }

    pub fn deactivate(&mut self, now: DateTime<Utc>) -> KeywardResult<()> {
        self.ensure_mutable()?;
        self.is_active = false;
        self.updated_at = now;
        Ok(())
    }

    pub fn ensure_deletable(&self) -> KeywardResult<()> {
        self.ensure_mutable()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRole {
    pub name: String,
    pub description: Option<String>,
    pub category: String,
    pub priority: i32,
    pub is_system: bool,
}

impl CreateRole {
    pub fn validate(&self) -> KeywardResult<()> {
        validate_name("role", &self.name)?;
        if self.category.trim().is_empty() {
            return Err(KeywardError::validation("role category is required"));
        }
        Ok(())
    }
}

/// Membership of a user in a role. At most one per (user, role) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub user_id: Uuid,
    pub role_id: Uuid,
    pub assigned_by: Option<String>,
    pub assigned_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn role(is_system: bool) -> Role {
        let now = Utc::now();
        Role {
            id: Uuid::new_v4(),
            name: "Moderator".into(),
            description: None,
            category: "Community".into(),
            is_system,
            is_active: true,
            priority: 10,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn system_role_is_immutable() {
        let mut r = role(true);
        let now = Utc::now();
        assert!(r.update_priority(99, now).is_err());
        assert!(r.deactivate(now).is_err());
        assert!(r.update_details(None, "Other".into(), now).is_err());
        assert!(r.ensure_deletable().is_err());
        assert_eq!(r.priority, 10);
        assert!(r.is_active);
    }

    #[test]
    fn regular_role_updates_priority() {
        let mut r = role(false);
        r.update_priority(42, Utc::now()).unwrap();
        assert_eq!(r.priority, 42);
    }
}
