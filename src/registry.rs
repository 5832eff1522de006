//! Entity descriptors and the relation registry.
//!
//! Entities describe themselves at compile time through [`CrudEntity`]:
//!
//! ```rust,ignore
//! pub struct Product;
//!
//! impl CrudEntity for Product {
//!     const NAME: &'static str = "Product";
//!     const TABLE: &'static str = "products";
//!     const COLUMNS: &'static [&'static str] = &["id", "title", "price", "category_id"];
//!     const RELATIONS: &'static [RelationDescriptor] = &[RelationDescriptor {
//!         property: "category",
//!         column: "category_id",
//!         target: Category::descriptor,
//!     }];
//! }
//! ```
//!
//! The [`EntityRegistry`] is built once at startup and answers "which entity
//! does the relation property `category` point to?" for operations that
//! need to query the related table directly, such as `peek`.

use std::collections::HashMap;

/// A relation property on an entity, backed by a foreign-key column
#[derive(Debug, Clone, Copy)]
pub struct RelationDescriptor {
    /// Property name used in filters and in loaded results (e.g. `category`)
    pub property: &'static str,
    /// Foreign-key column on the owning table (e.g. `category_id`)
    pub column: &'static str,
    /// Descriptor of the referenced entity
    pub target: fn() -> EntityDescriptor,
}

impl RelationDescriptor {
    #[must_use]
    pub fn target(&self) -> EntityDescriptor {
        (self.target)()
    }
}

/// Runtime view of a [`CrudEntity`]
#[derive(Debug, Clone, Copy)]
pub struct EntityDescriptor {
    pub name: &'static str,
    pub table: &'static str,
    pub id_column: &'static str,
    pub columns: &'static [&'static str],
    pub relations: &'static [RelationDescriptor],
}

impl EntityDescriptor {
    #[must_use]
    pub fn relation(&self, property: &str) -> Option<&'static RelationDescriptor> {
        self.relations.iter().find(|r| r.property == property)
    }

    #[must_use]
    pub fn is_relation(&self, property: &str) -> bool {
        self.relation(property).is_some()
    }

    /// Relation property names, in declaration order
    #[must_use]
    pub fn relation_properties(&self) -> Vec<&'static str> {
        self.relations.iter().map(|r| r.property).collect()
    }

    #[must_use]
    pub fn has_column(&self, column: &str) -> bool {
        column == self.id_column || self.columns.contains(&column)
    }
}

pub trait CrudEntity: Send + Sync + 'static {
    /// Human readable name used in response messages (e.g. `Product`)
    const NAME: &'static str;
    const TABLE: &'static str;
    const ID_COLUMN: &'static str = "id";
    /// Scalar columns, including foreign-key columns
    const COLUMNS: &'static [&'static str];
    const RELATIONS: &'static [RelationDescriptor] = &[];

    #[must_use]
    fn descriptor() -> EntityDescriptor {
        EntityDescriptor {
            name: Self::NAME,
            table: Self::TABLE,
            id_column: Self::ID_COLUMN,
            columns: Self::COLUMNS,
            relations: Self::RELATIONS,
        }
    }
}

/// Maps relation property names to the entity they reference.
///
/// Property names are global: two entities declaring `category` must point to
/// the same target. The last registration wins and a warning is logged.
#[derive(Debug, Clone, Default)]
pub struct EntityRegistry {
    relations: HashMap<&'static str, EntityDescriptor>,
}

impl EntityRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every relation of `E`
    #[must_use]
    pub fn register<E: CrudEntity>(mut self) -> Self {
        self.register_descriptor(&E::descriptor());
        self
    }

    pub fn register_descriptor(&mut self, entity: &EntityDescriptor) {
        for relation in entity.relations {
            let target = relation.target();
            if let Some(previous) = self.relations.insert(relation.property, target)
                && previous.table != target.table
            {
                tracing::warn!(
                    property = relation.property,
                    previous = previous.table,
                    current = target.table,
                    "Relation property re-registered with a different target"
                );
            }
        }
    }

    /// Entity referenced by `property`, `None` when it is not a relation
    #[must_use]
    pub fn resolve(&self, property: &str) -> Option<&EntityDescriptor> {
        self.relations.get(property)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.relations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }
}
