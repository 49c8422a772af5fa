//! Permission domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{KeywardError, KeywardResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub id: Uuid,
    /// Globally unique dotted name (e.g. `content.delete`). Never changes
    /// after creation; bindings and the resolver join on it.
    pub name: String,
    pub display_name: String,
    pub description: Option<String>,
    pub category: String,
    pub is_system: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Permission {
    fn ensure_mutable(&self) -> KeywardResult<()> {
        if self.is_system {
            return Err(KeywardError::invalid_operation(format!(
                "system permission '{}' cannot be modified",
                self.name
            )));
        }
        Ok(())
    }

    pub fn update_details(
        &mut self,
        display_name: String,
        description: Option<String>,
        now: DateTime<Utc>,
    ) -> KeywardResult<()> {
        self.ensure_mutable()?;
        self.display_name = display_name;
        self.description = description;
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

    /// Guard for physical deletion; reference checks happen in the
    /// service since they need the binding store.
    pub fn ensure_deletable(&self) -> KeywardResult<()> {
        self.ensure_mutable()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePermission {
    pub name: String,
    pub display_name: String,
    pub category: String,
    pub description: Option<String>,
    pub is_system: bool,
}

impl CreatePermission {
    pub fn validate(&self) -> KeywardResult<()> {
        validate_name("permission", &self.name)?;
        if self.category.trim().is_empty() {
            return Err(KeywardError::validation("permission category is required"));
        }
        Ok(())
    }
}

/// Names are join keys: non-empty, no whitespace.
pub fn validate_name(entity: &str, name: &str) -> KeywardResult<()> {
    if name.is_empty() {
        return Err(KeywardError::validation(format!("{entity} name is required")));
    }
    if name.chars().any(char::is_whitespace) {
        return Err(KeywardError::validation(format!(
            "{entity} name '{name}' must not contain whitespace"
        )));
    }
    Ok(())
}
