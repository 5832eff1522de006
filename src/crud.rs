//! # CRUD operations
//!
//! [`Crud`] is a per-request context bound to one entity. Every operation
//! returns `Result<Envelope<T>, ApiError>`, so handlers can return it as is:
//!
//! ```rust,ignore
//! async fn list_products(
//!     State(state): State<CrudState>,
//!     Query(params): Query<FilterOptions>,
//! ) -> Result<Envelope<Vec<Row>>, ApiError> {
//!     state
//!         .crud::<Product>()
//!         .find(params.to_query()?, &["category"], CrudOptions::default())
//!         .await
//! }
//! ```
//!
//! `find`, `update`, `delete`, `delete_all`, `peek` and `is_exists` accept
//! the flat filter shape (`{"category": 3}`) and normalize it first;
//! `get_all` passes its filter through unchanged.

use axum::http::StatusCode;
use futures_util::future::try_join_all;
use sea_orm::{
    Condition, ConnectionTrait, Database, DatabaseConnection, DbBackend, DbErr,
    sea_query::{Alias, Expr},
};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::config::{self, CrudConfig};
use crate::errors::ApiError;
use crate::filter::{self, Filter, build_condition, to_db_value};
use crate::models::{Envelope, Existence, FindQuery, PeekResult, ResponseOverride, Row};
use crate::pagination::{build_meta, skip_take};
use crate::password::{PASSWORD_FIELD, hash_password};
use crate::registry::{CrudEntity, EntityDescriptor, EntityRegistry};
use crate::repository::{FindOptions, Repository, SeaOrmRepository};

/// Shared application state handed to every handler
#[derive(Debug, Clone)]
pub struct CrudState {
    pub db: DatabaseConnection,
    pub registry: Arc<EntityRegistry>,
    pub config: Arc<CrudConfig>,
}

impl CrudState {
    /// Build the state and record the configured environment process-wide
    #[must_use]
    pub fn new(db: DatabaseConnection, registry: EntityRegistry, config: CrudConfig) -> Self {
        config::init(&config);
        Self {
            db,
            registry: Arc::new(registry),
            config: Arc::new(config),
        }
    }

    /// Open a sea-orm connection to `url` and build the state around it.
    ///
    /// # Errors
    ///
    /// Returns the driver error when the connection cannot be established.
    pub async fn connect(
        url: &str,
        registry: EntityRegistry,
        config: CrudConfig,
    ) -> Result<Self, DbErr> {
        let db = Database::connect(url).await?;
        tracing::debug!(backend = ?db.get_database_backend(), "Connected to database");
        Ok(Self::new(db, registry, config))
    }

    /// [`connect`](Self::connect) using `DATABASE_URL` and [`CrudConfig::from_env`].
    ///
    /// # Errors
    ///
    /// Returns `DbErr::Custom` when `DATABASE_URL` is unset, or the driver error.
    pub async fn from_env(registry: EntityRegistry) -> Result<Self, DbErr> {
        let url = std::env::var("DATABASE_URL")
            .map_err(|_| DbErr::Custom("DATABASE_URL is not set".to_string()))?;
        Self::connect(&url, registry, CrudConfig::from_env()).await
    }

    #[must_use]
    pub fn repository(&self, entity: EntityDescriptor) -> SeaOrmRepository {
        SeaOrmRepository::new(self.db.clone(), entity)
    }

    #[must_use]
    pub fn crud<E: CrudEntity>(&self) -> Crud<'_> {
        Crud::new(self, E::descriptor())
    }
}

type Fallback = Box<dyn FnOnce() + Send>;

/// Per-call options shared by every operation
#[derive(Default)]
pub struct CrudOptions {
    fallback: Option<Fallback>,
    response: ResponseOverride,
}

impl CrudOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cleanup to run when the operation fails, before the error is returned
    #[must_use]
    pub fn fallback(mut self, fallback: impl FnOnce() + Send + 'static) -> Self {
        self.fallback = Some(Box::new(fallback));
        self
    }

    /// Overrides merged into the success envelope
    #[must_use]
    pub fn response(mut self, response: ResponseOverride) -> Self {
        self.response = response;
        self
    }

    fn settle<T>(self, result: Result<Envelope<T>, ApiError>) -> Result<Envelope<T>, ApiError> {
        match result {
            Ok(envelope) => Ok(envelope.apply(self.response)),
            Err(err) => Err(self.fail(err)),
        }
    }

    fn fail(self, err: ApiError) -> ApiError {
        if let Some(fallback) = self.fallback {
            tracing::debug!("Running fallback after failed operation");
            fallback();
        }
        err
    }
}

impl std::fmt::Debug for CrudOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrudOptions")
            .field("fallback", &self.fallback.is_some())
            .field("response", &self.response)
            .finish()
    }
}

/// What a single peek property resolved to
enum PeekFetch {
    Many(Vec<Row>),
    One(Option<Row>),
    Skipped,
}

/// CRUD context bound to one entity
#[derive(Debug)]
pub struct Crud<'a> {
    state: &'a CrudState,
    entity: EntityDescriptor,
    repository: SeaOrmRepository,
}

impl<'a> Crud<'a> {
    #[must_use]
    pub fn new(state: &'a CrudState, entity: EntityDescriptor) -> Self {
        Self {
            state,
            entity,
            repository: state.repository(entity),
        }
    }

    #[must_use]
    pub fn entity(&self) -> &EntityDescriptor {
        &self.entity
    }

    fn backend(&self) -> DbBackend {
        self.state.db.get_database_backend()
    }

    /// Rewrite flat relation values (`{"category": 3}`) into `{"category": {"id": 3}}`
    #[must_use]
    pub fn purify_where(&self, filter: &Filter) -> Filter {
        filter::purify_where(filter, &self.entity.relation_properties())
    }

    /// Relation properties referenced by `filter`
    #[must_use]
    pub fn relations_for_where(&self, filter: &Filter) -> BTreeSet<String> {
        filter::relations_for_where(filter, &self.entity.relation_properties())
    }

    fn explicit_relations(&self, relations: &[&str]) -> Result<BTreeSet<String>, ApiError> {
        relations
            .iter()
            .map(|relation| {
                if self.entity.is_relation(relation) {
                    Ok((*relation).to_string())
                } else {
                    Err(ApiError::bad_request(format!(
                        "{} has no relation '{relation}'",
                        self.entity.name
                    )))
                }
            })
            .collect()
    }

    fn normalized_condition(&self, criteria: &Filter) -> Result<Condition, ApiError> {
        build_condition(&self.purify_where(criteria), &self.entity, self.backend())
    }

    async fn hash_password_field(&self, data: &mut Map<String, JsonValue>) -> Result<(), ApiError> {
        if let Some(JsonValue::String(password)) = data.get(PASSWORD_FIELD)
            && !password.is_empty()
        {
            let hashed = hash_password(password, self.state.config.bcrypt_cost).await?;
            data.insert(PASSWORD_FIELD.to_string(), JsonValue::String(hashed));
        }
        Ok(())
    }

    /// Paginated lookup with flat-filter normalization and relation loading.
    ///
    /// Relations referenced by the filter are loaded in addition to
    /// `relations`. `meta` is attached when more than one row is returned.
    ///
    /// # Errors
    ///
    /// `NotFound` when nothing matches, `BadRequest` for invalid filters or
    /// relations, `Database` when the query fails.
    pub async fn find(
        &self,
        query: FindQuery,
        relations: &[&str],
        options: CrudOptions,
    ) -> Result<Envelope<Vec<Row>>, ApiError> {
        let result = self.run_find(query, relations).await;
        options.settle(result)
    }

    async fn run_find(
        &self,
        query: FindQuery,
        relations: &[&str],
    ) -> Result<Envelope<Vec<Row>>, ApiError> {
        let name = self.entity.name;
        let mut wanted = self.relations_for_where(&query.filter);
        wanted.extend(self.explicit_relations(relations)?);
        tracing::debug!(entity = name, filter = ?query.filter, relations = ?wanted, "find");

        let condition = self.normalized_condition(&query.filter)?;
        let (skip, take) = skip_take(query.page, query.take);
        let find_options = FindOptions::new(condition)
            .relations(wanted)
            .skip(skip)
            .take(take);

        let (rows, total) = self.repository.find_and_count(&find_options).await?;
        if rows.is_empty() {
            return Err(ApiError::not_found(name));
        }

        let message = format!("{name} fetched Successfully");
        let many = rows.len() > 1;
        let envelope = Envelope::new(rows, message.clone(), message);
        Ok(if many {
            envelope.with_meta(build_meta(query.page, query.take, total))
        } else {
            envelope
        })
    }

    /// Paginated listing. The filter is used as given and an empty page is a success.
    ///
    /// # Errors
    ///
    /// `BadRequest` for invalid filters or relations, `Database` when the query fails.
    pub async fn get_all(
        &self,
        query: FindQuery,
        relations: &[&str],
        options: CrudOptions,
    ) -> Result<Envelope<Vec<Row>>, ApiError> {
        let result = self.run_get_all(query, relations).await;
        options.settle(result)
    }

    async fn run_get_all(
        &self,
        query: FindQuery,
        relations: &[&str],
    ) -> Result<Envelope<Vec<Row>>, ApiError> {
        let name = self.entity.name;
        tracing::debug!(entity = name, filter = ?query.filter, "get_all");

        let condition = build_condition(&query.filter, &self.entity, self.backend())?;
        let (skip, take) = skip_take(query.page, query.take);
        let find_options = FindOptions::new(condition)
            .relations(self.explicit_relations(relations)?)
            .skip(skip)
            .take(take);

        let (rows, total) = self.repository.find_and_count(&find_options).await?;
        let message = format!("{name}s fetched Successfully");
        Ok(Envelope::new(rows, message.clone(), message)
            .with_meta(build_meta(query.page, query.take, total)))
    }

    /// Insert a row built from `data`, hashing a `password` field when present.
    ///
    /// # Errors
    ///
    /// `BadRequest` when `data` is not an object or carries no known field,
    /// `DuplicateField` on a unique violation.
    pub async fn create(
        &self,
        data: JsonValue,
        options: CrudOptions,
    ) -> Result<Envelope<Row>, ApiError> {
        let result = self.run_create(data).await;
        options.settle(result)
    }

    async fn run_create(&self, data: JsonValue) -> Result<Envelope<Row>, ApiError> {
        let name = self.entity.name;
        let JsonValue::Object(mut data) = data else {
            return Err(ApiError::bad_request(format!("{name} data must be a JSON object")));
        };
        self.hash_password_field(&mut data).await?;

        let record = self.repository.create(&data);
        if record.is_empty() {
            return Err(ApiError::bad_request(format!("No {name} fields to create")));
        }
        tracing::debug!(entity = name, fields = ?record.keys().collect::<Vec<_>>(), "create");

        let row = self.repository.save(record).await?;
        Ok(Envelope::new(
            row,
            format!("{name} created Successfully."),
            format!("{name} was created Successfully."),
        )
        .with_status(StatusCode::CREATED))
    }

    /// Apply `partial` to every row matching `criteria` and return the first updated row.
    ///
    /// Matching rows are identified by primary key before the update, so
    /// criteria on a field the update changes still find the updated row.
    ///
    /// # Errors
    ///
    /// `NotFound` when nothing matches `criteria`, `BadRequest` for invalid
    /// input, `DuplicateField` on a unique violation.
    pub async fn update(
        &self,
        criteria: Filter,
        partial: JsonValue,
        options: CrudOptions,
    ) -> Result<Envelope<Row>, ApiError> {
        let result = self.run_update(criteria, partial).await;
        options.settle(result)
    }

    async fn run_update(&self, criteria: Filter, partial: JsonValue) -> Result<Envelope<Row>, ApiError> {
        let name = self.entity.name;
        let id_column = self.entity.id_column;
        let JsonValue::Object(mut partial) = partial else {
            return Err(ApiError::bad_request(format!("{name} data must be a JSON object")));
        };
        self.hash_password_field(&mut partial).await?;

        let changes = self.repository.create(&partial);
        if changes.is_empty() {
            return Err(ApiError::bad_request(format!("No {name} fields to update")));
        }

        let condition = self.normalized_condition(&criteria)?;
        let matched = self.repository.find(&FindOptions::new(condition)).await?;
        let ids: Vec<JsonValue> = matched
            .iter()
            .filter_map(|row| row.get(id_column).cloned())
            .collect();
        let Some(first_id) = ids.first().cloned() else {
            return Err(ApiError::not_found(name));
        };
        tracing::debug!(entity = name, matched = ids.len(), "update");

        let backend = self.backend();
        let by_id = Condition::all().add(
            Expr::col(Alias::new(id_column)).is_in(ids.iter().map(|id| to_db_value(id, backend))),
        );
        self.repository.update(by_id, &changes).await?;

        let refetch_id = changes
            .get(id_column)
            .filter(|id| !id.is_null())
            .cloned()
            .unwrap_or(first_id);
        let row = self
            .repository
            .find_by_id(&refetch_id)
            .await?
            .ok_or_else(|| ApiError::not_found(name))?;

        Ok(Envelope::new(
            row,
            format!("{name} updated Successfully."),
            format!("{name} was updated Successfully."),
        ))
    }

    /// Remove the first row matching `criteria` and return it.
    ///
    /// # Errors
    ///
    /// `NotFound` when nothing matches.
    pub async fn delete(
        &self,
        criteria: Filter,
        options: CrudOptions,
    ) -> Result<Envelope<Row>, ApiError> {
        let result = self.run_delete(criteria).await;
        options.settle(result)
    }

    async fn run_delete(&self, criteria: Filter) -> Result<Envelope<Row>, ApiError> {
        let name = self.entity.name;
        let condition = self.normalized_condition(&criteria)?;
        let row = self
            .repository
            .find_one(&FindOptions::new(condition))
            .await?
            .ok_or_else(|| ApiError::not_found(name))?;

        self.repository.remove(&row).await?;
        tracing::debug!(entity = name, id = ?row.get(self.entity.id_column), "delete");

        let message = format!("{name} delete Successfully.");
        Ok(Envelope::new(row, message.clone(), message))
    }

    /// Remove every row matching `criteria` inside one transaction.
    ///
    /// # Errors
    ///
    /// Any failure rolls the whole deletion back and is returned.
    pub async fn delete_all(
        &self,
        criteria: Filter,
        options: CrudOptions,
    ) -> Result<Envelope<Vec<Row>>, ApiError> {
        let result = self.run_delete_all(criteria).await;
        options.settle(result)
    }

    async fn run_delete_all(&self, criteria: Filter) -> Result<Envelope<Vec<Row>>, ApiError> {
        let name = self.entity.name;
        let condition = self.normalized_condition(&criteria)?;
        let rows = self.repository.find(&FindOptions::new(condition)).await?;
        let removed = self.repository.remove_all(&rows).await?;
        tracing::debug!(entity = name, removed, "delete_all");

        Ok(Envelope::new(
            Vec::new(),
            "Deletion Successful",
            format!("{name}s deleted Successfully."),
        ))
    }

    /// Look up the rows referenced by each property of `criteria`.
    ///
    /// The identifier column is looked up on this entity, every other
    /// property on the entity it refers to. A property may be a bare id
    /// (`{"category": 3}`), an id object (`{"category": {"id": 3}}`) or an id
    /// list (`{"category": {"id": [3, 4]}}`); ids that do not exist are
    /// dropped. `options.response` is not used.
    ///
    /// # Errors
    ///
    /// `BadRequest` for properties that are not relations, `Database` when a
    /// lookup fails. The fallback runs first.
    pub async fn peek(&self, criteria: Filter, options: CrudOptions) -> Result<PeekResult, ApiError> {
        match self.run_peek(criteria).await {
            Ok(result) => Ok(result),
            Err(err) => Err(options.fail(err)),
        }
    }

    async fn run_peek(&self, criteria: Filter) -> Result<PeekResult, ApiError> {
        let purified = self.purify_where(&criteria);

        let mut lookups = Vec::with_capacity(purified.len());
        for (property, value) in purified {
            let repository = if property == self.entity.id_column {
                self.repository.clone()
            } else {
                let target = self.state.registry.resolve(&property).ok_or_else(|| {
                    ApiError::bad_request(format!("'{property}' is not a relation"))
                })?;
                self.state.repository(*target)
            };
            lookups.push(peek_property(repository, property, value));
        }

        let mut object_data = Map::new();
        let mut data = Vec::new();
        for (property, fetched) in try_join_all(lookups).await? {
            match fetched {
                PeekFetch::Many(rows) => {
                    data.extend(rows.iter().cloned());
                    accumulate(&mut object_data, property, rows);
                }
                PeekFetch::One(row) => {
                    if let Some(row) = &row {
                        data.push(row.clone());
                    }
                    let value = row.unwrap_or(JsonValue::Null);
                    if object_data.contains_key(&property) {
                        accumulate(&mut object_data, property, vec![value]);
                    } else {
                        object_data.insert(property, value);
                    }
                }
                PeekFetch::Skipped => {}
            }
        }

        tracing::debug!(entity = self.entity.name, resolved = data.len(), "peek");
        Ok(PeekResult {
            is_peek_success: !data.is_empty(),
            data,
            object_data,
        })
    }

    /// Whether a row matches `criteria`, with relations it references loaded.
    ///
    /// # Errors
    ///
    /// `BadRequest` for invalid filters, `Database` when the query fails.
    pub async fn is_exists(&self, criteria: Filter) -> Result<Existence, ApiError> {
        let relations = self.relations_for_where(&criteria);
        let condition = self.normalized_condition(&criteria)?;
        let row = self
            .repository
            .find_one(&FindOptions::new(condition).relations(relations))
            .await?;
        Ok(Existence {
            is_exists: row.is_some(),
            data: row,
        })
    }
}

async fn peek_property(
    repository: SeaOrmRepository,
    property: String,
    value: JsonValue,
) -> Result<(String, PeekFetch), DbErr> {
    let fetched = match &value {
        JsonValue::Object(nested) => match nested.get("id") {
            Some(JsonValue::Array(ids)) if !ids.is_empty() => {
                let rows = try_join_all(ids.iter().map(|id| repository.find_by_id(id))).await?;
                PeekFetch::Many(rows.into_iter().flatten().collect())
            }
            Some(id @ (JsonValue::Number(_) | JsonValue::String(_))) => {
                PeekFetch::One(repository.find_by_id(id).await?)
            }
            _ => PeekFetch::Skipped,
        },
        JsonValue::Number(_) | JsonValue::String(_) => {
            PeekFetch::One(repository.find_by_id(&value).await?)
        }
        _ => PeekFetch::Skipped,
    };
    Ok((property, fetched))
}

/// Append `rows` to the array stored under `property`, promoting a single value to an array
fn accumulate(object_data: &mut Map<String, JsonValue>, property: String, rows: Vec<Row>) {
    match object_data.get_mut(&property) {
        Some(JsonValue::Array(existing)) => existing.extend(rows),
        Some(existing) => {
            let first = existing.take();
            let mut merged = vec![first];
            merged.extend(rows);
            *existing = JsonValue::Array(merged);
        }
        None => {
            object_data.insert(property, JsonValue::Array(rows));
        }
    }
}
