/// Searchable fields of the classifieds entities and their default weights.

use chrono::{DateTime, Utc};

use super::{Searchable, SearchableField};
use crate::store::{Advertisement, Category};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategoryField {
    Name,
    Description,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvertisementField {
    Title,
    Description,
    CategoryName,
}

impl Searchable for Category {
    type Field = CategoryField;
    const LABEL: &'static str = "categories";

    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn field_text(&self, field: CategoryField) -> Option<&str> {
        match field {
            CategoryField::Name => Some(&self.name),
            CategoryField::Description => self.description.as_deref(),
        }
    }
}

impl Searchable for Advertisement {
    type Field = AdvertisementField;
    const LABEL: &'static str = "advertisements";

    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn field_text(&self, field: AdvertisementField) -> Option<&str> {
        match field {
            AdvertisementField::Title => Some(&self.title),
            AdvertisementField::Description => self.description.as_deref(),
            AdvertisementField::CategoryName => Some(&self.category_name),
        }
    }
}

/// Category search: name and description weighted equally.
pub fn category_fields() -> Vec<SearchableField<CategoryField>> {
    vec![
        SearchableField { field: CategoryField::Name, weight: 1.0 },
        SearchableField { field: CategoryField::Description, weight: 1.0 },
    ]
}

/// Advertisement search: title over description over category name.
pub fn advertisement_fields() -> Vec<SearchableField<AdvertisementField>> {
    vec![
        SearchableField { field: AdvertisementField::Title, weight: 1.5 },
        SearchableField { field: AdvertisementField::Description, weight: 1.2 },
        SearchableField { field: AdvertisementField::CategoryName, weight: 1.0 },
    ]
}
