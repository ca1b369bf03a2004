use std::sync::Arc;

use crate::application::service::InvalidationService;
use crate::infra::db::PostgresRepositories;

#[derive(Clone)]
pub struct ApiState {
    pub service: Arc<InvalidationService>,
    /// Present when the service runs against Postgres.
    pub db: Option<Arc<PostgresRepositories>>,
    pub api_token: Option<Arc<str>>,
}
