use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::validation::ValidationErrors;
use crate::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub quantity: i64,
    pub category: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub images: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

impl Item {
    pub fn from_row(row: Value) -> AppResult<Self> {
        serde_json::from_value(row).map_err(|err| {
            AppError::from(err)
                .with_context("operation", "decode_item")
                .with_context("table", "items")
        })
    }

    pub fn draft(&self) -> ItemDraft {
        ItemDraft {
            name: self.name.clone(),
            description: self.description.clone(),
            quantity: self.quantity,
            category: self.category.clone(),
        }
    }
}

/// The editable fields of an item, as entered in the add / edit forms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemDraft {
    pub name: String,
    pub description: String,
    pub quantity: i64,
    pub category: String,
}

impl ItemDraft {
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        errors.check(!self.name.trim().is_empty(), "name", "Name is required");
        errors.check(
            !self.description.trim().is_empty(),
            "description",
            "Description is required",
        );
        errors.check(self.quantity >= 1, "quantity", "Quantity must be at least 1");
        errors.check(
            !self.category.trim().is_empty(),
            "category",
            "Category is required",
        );
        errors.into_result()
    }

    /// Column values for an insert or update.
    pub fn to_columns(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("name".into(), Value::from(self.name.trim()));
        map.insert("description".into(), Value::from(self.description.trim()));
        map.insert("quantity".into(), Value::from(self.quantity));
        map.insert("category".into(), Value::from(self.category.trim()));
        map
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemEdit {
    pub id: i64,
    #[serde(flatten)]
    pub draft: ItemDraft,
}

impl ItemEdit {
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = match self.draft.validate() {
            Ok(()) => ValidationErrors::new(),
            Err(errors) => errors,
        };
        errors.check(self.id >= 0, "id", "Id must not be negative");
        errors.into_result()
    }
}

/// Partial edit: only the provided fields replace the current values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemChanges {
    pub name: Option<String>,
    pub description: Option<String>,
    pub quantity: Option<i64>,
    pub category: Option<String>,
}

impl ItemChanges {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.quantity.is_none()
            && self.category.is_none()
    }

    pub fn apply_to(self, item: &Item) -> ItemEdit {
        let current = item.draft();
        ItemEdit {
            id: item.id,
            draft: ItemDraft {
                name: self.name.unwrap_or(current.name),
                description: self.description.unwrap_or(current.description),
                quantity: self.quantity.unwrap_or(current.quantity),
                category: self.category.unwrap_or(current.category),
            },
        }
    }
}

/// Case-insensitive substring match over name, description and category.
pub fn matches_search(item: &Item, term: &str) -> bool {
    let needle = term.trim().to_lowercase();
    if needle.is_empty() {
        return true;
    }
    [&item.name, &item.description, &item.category]
        .iter()
        .any(|field| field.to_lowercase().contains(&needle))
}
