use axum::Router;
use crudbase::config::{CrudConfig, Environment};
use crudbase::routes::{
    create_handler, delete_all_handler, delete_handler, find_handler, get_all_handler,
    peek_handler, update_handler,
};
use crudbase::{CrudEntity, CrudState, EntityRegistry, RelationDescriptor};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr};

pub struct Category;

impl CrudEntity for Category {
    const NAME: &'static str = "Category";
    const TABLE: &'static str = "categories";
    const COLUMNS: &'static [&'static str] = &["name"];
}

pub struct Product;

impl CrudEntity for Product {
    const NAME: &'static str = "Product";
    const TABLE: &'static str = "products";
    const COLUMNS: &'static [&'static str] = &["title", "price", "category_id"];
    const RELATIONS: &'static [RelationDescriptor] = &[RelationDescriptor {
        property: "category",
        column: "category_id",
        target: Category::descriptor,
    }];
}

pub struct User;

impl CrudEntity for User {
    const NAME: &'static str = "User";
    const TABLE: &'static str = "users";
    const COLUMNS: &'static [&'static str] = &["email", "password", "name"];
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE categories (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE
    )",
    "CREATE TABLE products (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        title TEXT NOT NULL,
        price INTEGER NOT NULL DEFAULT 0,
        category_id INTEGER NULL REFERENCES categories(id)
    )",
    "CREATE TABLE users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        email TEXT NOT NULL UNIQUE,
        password TEXT NOT NULL,
        name TEXT NULL
    )",
];

// Category ids 1..=3, product ids 1..=6 in insertion order
const SEED: &[&str] = &[
    "INSERT INTO categories (name) VALUES ('Kitchen'), ('Garden'), ('Office')",
    "INSERT INTO products (title, price, category_id) VALUES
        ('Mug', 8, 1),
        ('Kettle', 25, 1),
        ('Shovel', 30, 2),
        ('Pen', 2, 3),
        ('Notebook', 5, 3),
        ('Loose', 10, NULL)",
];

pub async fn setup_test_db() -> Result<DatabaseConnection, DbErr> {
    // One connection so every query sees the same in-memory database
    let mut options = ConnectOptions::new("sqlite::memory:");
    options.max_connections(1).min_connections(1).sqlx_logging(false);
    let db = Database::connect(options).await?;

    for statement in SCHEMA.iter().chain(SEED) {
        db.execute_unprepared(statement).await?;
    }
    Ok(db)
}

pub fn test_registry() -> EntityRegistry {
    EntityRegistry::new()
        .register::<Category>()
        .register::<Product>()
        .register::<User>()
}

pub fn test_config() -> CrudConfig {
    CrudConfig {
        environment: Environment::Development,
        bcrypt_cost: 4,
    }
}

pub async fn setup_test_state() -> CrudState {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let db = setup_test_db().await.expect("Failed to setup test database");
    CrudState::new(db, test_registry(), test_config())
}

#[allow(dead_code)]
pub fn setup_test_app(state: CrudState) -> Router {
    let api = Router::new()
        .route(
            "/products",
            axum::routing::get(find_handler::<Product>)
                .post(create_handler::<Product>)
                .delete(delete_all_handler::<Product>),
        )
        .route("/products/all", axum::routing::get(get_all_handler::<Product>))
        .route("/products/peek", axum::routing::get(peek_handler::<Product>))
        .route(
            "/products/{id}",
            axum::routing::put(update_handler::<Product>).delete(delete_handler::<Product>),
        )
        .route("/users", axum::routing::post(create_handler::<User>))
        .with_state(state);

    Router::new().nest("/api/v1", api)
}

#[allow(dead_code)]
pub fn titles(rows: &[serde_json::Value]) -> Vec<&str> {
    rows.iter()
        .filter_map(|row| row["title"].as_str())
        .collect()
}
