pub mod config;
pub mod crud;
pub mod errors;
pub mod filter;
pub mod models;
pub mod pagination;
pub mod password;
pub mod registry;
pub mod repository;
pub mod routes;

pub use config::{CrudConfig, Environment};
pub use crud::{Crud, CrudOptions, CrudState};
pub use errors::ApiError;
pub use filter::{Filter, purify_where, relations_for_where};
pub use models::{Envelope, Existence, FilterOptions, FindQuery, PeekResult, ResponseOverride, Row};
pub use pagination::PaginationMeta;
pub use registry::{CrudEntity, EntityDescriptor, EntityRegistry, RelationDescriptor};
pub use repository::{FindOptions, Repository, SeaOrmRepository};
