//! # Repository
//!
//! The persistence boundary of the crate. CRUD operations only talk to the
//! [`Repository`] trait; [`SeaOrmRepository`] implements it on top of a
//! sea-orm `DatabaseConnection` using dynamically built sea-query statements,
//! so one implementation serves every [`EntityDescriptor`].
//!
//! Rows are returned as JSON objects. Requested relations are loaded after
//! the main query with one `IN (...)` query per relation and attached to each
//! row under the relation property:
//!
//! ```json
//! {"id": 7, "title": "Mug", "category_id": 3, "category": {"id": 3, "name": "Kitchen"}}
//! ```

use async_trait::async_trait;
use sea_orm::{
    Condition, ConnectionTrait, DatabaseConnection, DbBackend, DbErr, FromQueryResult,
    TransactionTrait,
    sea_query::{Alias, Asterisk, Expr, Func, Order, Query, SelectStatement, SimpleExpr},
};
use serde_json::{Map, Value as JsonValue};
use std::collections::{BTreeSet, HashMap};

use crate::filter::{coerce_key_value, to_db_value};
use crate::models::Row;
use crate::registry::EntityDescriptor;

/// Query shape handed to a repository
#[derive(Debug, Clone)]
pub struct FindOptions {
    pub condition: Condition,
    /// Relation properties to load with each row
    pub relations: BTreeSet<String>,
    pub skip: Option<u64>,
    pub take: Option<u64>,
}

impl FindOptions {
    #[must_use]
    pub fn new(condition: Condition) -> Self {
        Self {
            condition,
            relations: BTreeSet::new(),
            skip: None,
            take: None,
        }
    }

    #[must_use]
    pub fn relations(mut self, relations: BTreeSet<String>) -> Self {
        self.relations = relations;
        self
    }

    #[must_use]
    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    #[must_use]
    pub fn take(mut self, take: u64) -> Self {
        self.take = Some(take);
        self
    }
}

#[async_trait]
pub trait Repository: Send + Sync {
    fn entity(&self) -> &EntityDescriptor;

    fn backend(&self) -> DbBackend;

    async fn find_one(&self, options: &FindOptions) -> Result<Option<Row>, DbErr>;

    async fn find(&self, options: &FindOptions) -> Result<Vec<Row>, DbErr>;

    /// Rows for the requested page plus the total number of matching rows
    async fn find_and_count(&self, options: &FindOptions) -> Result<(Vec<Row>, u64), DbErr>;

    async fn find_by_id(&self, id: &JsonValue) -> Result<Option<Row>, DbErr> {
        let entity = self.entity();
        let id = to_db_value(&coerce_key_value(id), self.backend());
        let condition = Condition::all().add(Expr::col(Alias::new(entity.id_column)).eq(id));
        self.find_one(&FindOptions::new(condition)).await
    }

    /// Shape request data into an insertable record without persisting it.
    ///
    /// Relation properties become their foreign-key column (`{"category": 3}`
    /// and `{"category": {"id": 3}}` both set `category_id`); unknown fields
    /// are dropped.
    fn create(&self, data: &Map<String, JsonValue>) -> Map<String, JsonValue> {
        let entity = self.entity();
        let mut record = Map::new();
        for (key, value) in data {
            if let Some(relation) = entity.relation(key) {
                let foreign_key = match value {
                    JsonValue::Object(nested) => nested
                        .get("id")
                        .or_else(|| nested.get(relation.target().id_column))
                        .cloned()
                        .unwrap_or(JsonValue::Null),
                    other => other.clone(),
                };
                record.insert(relation.column.to_string(), foreign_key);
            } else if entity.has_column(key) {
                record.insert(key.clone(), value.clone());
            } else {
                tracing::debug!(entity = entity.name, field = %key, "Ignoring unknown field");
            }
        }
        record
    }

    /// Insert a record and return the stored row
    async fn save(&self, record: Map<String, JsonValue>) -> Result<Row, DbErr>;

    /// Apply `changes` to every row matching `condition`, returning the number of rows affected
    async fn update(&self, condition: Condition, changes: &Map<String, JsonValue>)
    -> Result<u64, DbErr>;

    async fn remove(&self, row: &Row) -> Result<(), DbErr>;

    /// Remove `rows` one by one inside a single transaction
    async fn remove_all(&self, rows: &[Row]) -> Result<u64, DbErr>;
}

#[derive(Debug, Clone)]
pub struct SeaOrmRepository {
    db: DatabaseConnection,
    entity: EntityDescriptor,
}

impl SeaOrmRepository {
    #[must_use]
    pub fn new(db: DatabaseConnection, entity: EntityDescriptor) -> Self {
        Self { db, entity }
    }

    fn select(&self, options: &FindOptions) -> SelectStatement {
        let mut query = Query::select();
        query
            .column(Asterisk)
            .from(Alias::new(self.entity.table))
            .cond_where(options.condition.clone())
            .order_by(Alias::new(self.entity.id_column), Order::Asc);
        if let Some(take) = options.take {
            query.limit(take);
        }
        if let Some(skip) = options.skip {
            query.offset(skip);
        }
        query
    }

    async fn fetch(&self, query: &SelectStatement) -> Result<Vec<Row>, DbErr> {
        let backend = self.db.get_database_backend();
        let rows = self.db.query_all(backend.build(query)).await?;
        rows.iter()
            .map(|row| JsonValue::from_query_result(row, ""))
            .collect()
    }

    async fn count(&self, condition: &Condition) -> Result<u64, DbErr> {
        let backend = self.db.get_database_backend();
        let mut query = Query::select();
        query
            .expr_as(Func::count(Expr::col(Asterisk)), Alias::new("total"))
            .from(Alias::new(self.entity.table))
            .cond_where(condition.clone());

        let total: i64 = match self.db.query_one(backend.build(&query)).await? {
            Some(row) => row.try_get("", "total")?,
            None => 0,
        };
        Ok(u64::try_from(total).unwrap_or_default())
    }

    async fn load_relations(
        &self,
        rows: &mut [Row],
        relations: &BTreeSet<String>,
    ) -> Result<(), DbErr> {
        if rows.is_empty() {
            return Ok(());
        }
        let backend = self.db.get_database_backend();

        for property in relations {
            let relation = self.entity.relation(property).ok_or_else(|| {
                DbErr::Custom(format!(
                    "{} has no relation '{property}'",
                    self.entity.name
                ))
            })?;
            let target = relation.target();

            let mut keys: Vec<JsonValue> = Vec::new();
            for row in rows.iter() {
                if let Some(key) = row.get(relation.column)
                    && !key.is_null()
                    && !keys.contains(key)
                {
                    keys.push(key.clone());
                }
            }

            let related: HashMap<String, Row> = if keys.is_empty() {
                HashMap::new()
            } else {
                let mut query = Query::select();
                query
                    .column(Asterisk)
                    .from(Alias::new(target.table))
                    .and_where(
                        Expr::col(Alias::new(target.id_column))
                            .is_in(keys.iter().map(|k| to_db_value(k, backend))),
                    );
                self.fetch(&query)
                    .await?
                    .into_iter()
                    .filter_map(|row| {
                        let key = row.get(target.id_column).map(lookup_key)?;
                        Some((key, row))
                    })
                    .collect()
            };

            tracing::debug!(
                entity = self.entity.name,
                relation = %property,
                loaded = related.len(),
                "Loaded relation"
            );

            for row in rows.iter_mut() {
                let value = row
                    .get(relation.column)
                    .map(lookup_key)
                    .and_then(|key| related.get(&key).cloned())
                    .unwrap_or(JsonValue::Null);
                if let Some(object) = row.as_object_mut() {
                    object.insert(property.clone(), value);
                }
            }
        }
        Ok(())
    }

    fn id_condition(&self, row: &Row) -> Result<Condition, DbErr> {
        let id = row
            .get(self.entity.id_column)
            .filter(|id| !id.is_null())
            .ok_or_else(|| {
                DbErr::Custom(format!(
                    "{} row has no '{}' value",
                    self.entity.name, self.entity.id_column
                ))
            })?;
        let backend = self.db.get_database_backend();
        Ok(Condition::all()
            .add(Expr::col(Alias::new(self.entity.id_column)).eq(to_db_value(id, backend))))
    }
}

/// Key used to match foreign keys against primary keys across JSON types
fn lookup_key(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

async fn delete_where<C: ConnectionTrait>(
    conn: &C,
    table: &str,
    condition: Condition,
) -> Result<u64, DbErr> {
    let mut delete = Query::delete();
    delete.from_table(Alias::new(table)).cond_where(condition);
    let result = conn.execute(conn.get_database_backend().build(&delete)).await?;
    Ok(result.rows_affected())
}

#[async_trait]
impl Repository for SeaOrmRepository {
    fn entity(&self) -> &EntityDescriptor {
        &self.entity
    }

    fn backend(&self) -> DbBackend {
        self.db.get_database_backend()
    }

    async fn find_one(&self, options: &FindOptions) -> Result<Option<Row>, DbErr> {
        let mut query = self.select(options);
        query.limit(1);
        let mut rows = self.fetch(&query).await?;
        self.load_relations(&mut rows, &options.relations).await?;
        Ok(rows.into_iter().next())
    }

    async fn find(&self, options: &FindOptions) -> Result<Vec<Row>, DbErr> {
        let mut rows = self.fetch(&self.select(options)).await?;
        self.load_relations(&mut rows, &options.relations).await?;
        Ok(rows)
    }

    async fn find_and_count(&self, options: &FindOptions) -> Result<(Vec<Row>, u64), DbErr> {
        let rows = self.find(options).await?;
        let total = self.count(&options.condition).await?;
        Ok((rows, total))
    }

    async fn save(&self, record: Map<String, JsonValue>) -> Result<Row, DbErr> {
        if record.is_empty() {
            return Err(DbErr::Custom(format!(
                "Nothing to insert into {}",
                self.entity.table
            )));
        }
        let backend = self.db.get_database_backend();

        let mut insert = Query::insert();
        insert
            .into_table(Alias::new(self.entity.table))
            .columns(record.keys().map(|key| Alias::new(key.as_str())));
        insert
            .values(
                record
                    .values()
                    .map(|value| SimpleExpr::Value(to_db_value(value, backend))),
            )
            .map_err(|e| DbErr::Custom(e.to_string()))?;

        if backend.support_returning() {
            insert.returning_all();
            let row = self
                .db
                .query_one(backend.build(&insert))
                .await?
                .ok_or(DbErr::RecordNotInserted)?;
            return JsonValue::from_query_result(&row, "");
        }

        let result = self.db.execute(backend.build(&insert)).await?;
        let id = match record.get(self.entity.id_column) {
            Some(id) if !id.is_null() => id.clone(),
            _ => JsonValue::from(result.last_insert_id()),
        };
        self.find_by_id(&id).await?.ok_or(DbErr::RecordNotInserted)
    }

    async fn update(
        &self,
        condition: Condition,
        changes: &Map<String, JsonValue>,
    ) -> Result<u64, DbErr> {
        let backend = self.db.get_database_backend();
        let mut update = Query::update();
        update
            .table(Alias::new(self.entity.table))
            .values(changes.iter().map(|(column, value)| {
                (
                    Alias::new(column.as_str()),
                    SimpleExpr::Value(to_db_value(value, backend)),
                )
            }))
            .cond_where(condition);
        let result = self.db.execute(backend.build(&update)).await?;
        Ok(result.rows_affected())
    }

    async fn remove(&self, row: &Row) -> Result<(), DbErr> {
        delete_where(&self.db, self.entity.table, self.id_condition(row)?).await?;
        Ok(())
    }

    async fn remove_all(&self, rows: &[Row]) -> Result<u64, DbErr> {
        let txn = self.db.begin().await?;
        let mut removed = 0;
        for row in rows {
            removed += delete_where(&txn, self.entity.table, self.id_condition(row)?).await?;
        }
        txn.commit().await?;
        Ok(removed)
    }
}
