//! Department categories (e.g. "Software", "Marketing").

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use deptforum_core::{CategoryId, Entity, ForumError, ForumResult, UserId};

const MAX_NAME_LEN: usize = 100;

/// A category owns its topics and its category restrictions (cascade delete).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    /// Unique across categories (enforced by the store).
    pub name: String,
    pub description: Option<String>,
    pub owner: UserId,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Category {
    pub fn new(
        id: CategoryId,
        name: impl Into<String>,
        description: Option<String>,
        owner: UserId,
        created_at: DateTime<Utc>,
    ) -> ForumResult<Self> {
        let name = name.into().trim().to_string();
        if name.is_empty() {
            return Err(ForumError::validation("category name cannot be empty"));
        }
        if name.chars().count() > MAX_NAME_LEN {
            return Err(ForumError::validation(format!(
                "category name cannot exceed {MAX_NAME_LEN} characters"
            )));
        }
        Ok(Self {
            id,
            name,
            description: description.filter(|d| !d.trim().is_empty()),
            owner,
            active: true,
            created_at,
        })
    }
}

impl Entity for Category {
    type Id = CategoryId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_name_and_drops_blank_description() {
        let c = Category::new(
            CategoryId::new(),
            "  Marketing ",
            Some("   ".to_string()),
            UserId::new(),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(c.name, "Marketing");
        assert!(c.description.is_none());
        assert!(c.active);
    }

    #[test]
    fn empty_name_is_rejected() {
        let err = Category::new(CategoryId::new(), " ", None, UserId::new(), Utc::now()).unwrap_err();
        assert!(matches!(err, ForumError::Validation(_)));
    }
}
