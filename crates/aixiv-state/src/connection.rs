//! SurrealDB connection set-up for the decision log.
//!
//! [`DbTarget::resolve`] picks the first backend whose settings are present:
//! 1. Authenticated remote (`SURREALDB_ENDPOINT`, `SURREALDB_USERNAME`,
//!    `SURREALDB_PASSWORD`, optional `SURREALDB_ROOT`)
//! 2. `SURREALDB_URL` (any engine URL, e.g. `ws://localhost:8000`)
//! 3. Local persistence under `AIXIV_DB_PATH` (default `.aixiv/db`)
//!
//! Every target lands in the same [`DbScope`], which defaults to the
//! `aixiv` namespace and `decisions` database and can be moved with
//! `SURREALDB_NAMESPACE` / `SURREALDB_DATABASE`. The schema is applied on
//! every connect.

use std::fmt;
use std::path::PathBuf;

use surrealdb::engine::any::Any;
use surrealdb::opt::auth::{Database, Root};
use surrealdb::Surreal;
use tracing::info;

use crate::error::StateError;
use crate::migrations;
use crate::Result;

const DEFAULT_NAMESPACE: &str = "aixiv";
const DEFAULT_DATABASE: &str = "decisions";
const DEFAULT_LOCAL_PATH: &str = ".aixiv/db";

/// Namespace and database the decision log lives in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbScope {
    pub namespace: String,
    pub database: String,
}

impl Default for DbScope {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            database: DEFAULT_DATABASE.to_string(),
        }
    }
}

impl DbScope {
    fn resolve(var: &impl Fn(&str) -> Option<String>) -> Self {
        let default = Self::default();
        Self {
            namespace: var("SURREALDB_NAMESPACE").unwrap_or(default.namespace),
            database: var("SURREALDB_DATABASE").unwrap_or(default.database),
        }
    }
}

/// Where the decision log is stored.
#[derive(Clone, PartialEq, Eq)]
pub enum DbTarget {
    /// In-process `mem://` engine
    Memory,
    /// Remote instance with sign-in; `root` selects root over database auth
    Authenticated {
        endpoint: String,
        username: String,
        password: String,
        root: bool,
    },
    /// Engine URL without credentials
    Url(String),
    /// SurrealKV files on local disk
    Local(PathBuf),
}

// Keeps the password out of logs.
impl fmt::Debug for DbTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbTarget::Memory => write!(f, "Memory"),
            DbTarget::Authenticated {
                endpoint,
                username,
                root,
                ..
            } => f
                .debug_struct("Authenticated")
                .field("endpoint", endpoint)
                .field("username", username)
                .field("root", root)
                .finish_non_exhaustive(),
            DbTarget::Url(url) => f.debug_tuple("Url").field(url).finish(),
            DbTarget::Local(path) => f.debug_tuple("Local").field(path).finish(),
        }
    }
}

impl DbTarget {
    /// Pick a target from variables read through `var`.
    ///
    /// Remote credentials are used only when all three are present.
    pub fn resolve(var: impl Fn(&str) -> Option<String>) -> (Self, DbScope) {
        let scope = DbScope::resolve(&var);
        let credentials = (
            var("SURREALDB_ENDPOINT"),
            var("SURREALDB_USERNAME"),
            var("SURREALDB_PASSWORD"),
        );
        let target = match credentials {
            (Some(endpoint), Some(username), Some(password)) => DbTarget::Authenticated {
                endpoint,
                username,
                password,
                root: var("SURREALDB_ROOT")
                    .map(|v| v.eq_ignore_ascii_case("true"))
                    .unwrap_or(false),
            },
            _ => match var("SURREALDB_URL") {
                Some(url) => DbTarget::Url(url),
                None => DbTarget::Local(PathBuf::from(
                    var("AIXIV_DB_PATH").unwrap_or_else(|| DEFAULT_LOCAL_PATH.to_string()),
                )),
            },
        };
        (target, scope)
    }

    /// Engine URL handed to `surrealdb::engine::any::connect`.
    fn url(&self) -> String {
        match self {
            DbTarget::Memory => "mem://".to_string(),
            DbTarget::Authenticated { endpoint, .. } => endpoint.clone(),
            DbTarget::Url(url) => url.clone(),
            DbTarget::Local(path) => format!("surrealkv://{}", path.display()),
        }
    }
}

/// Open `target`, sign in if needed, select `scope` and apply the schema.
pub async fn connect(target: &DbTarget, scope: &DbScope) -> Result<Surreal<Any>> {
    if let DbTarget::Local(path) = target {
        std::fs::create_dir_all(path).map_err(|e| {
            StateError::Connection(format!("cannot create {}: {e}", path.display()))
        })?;
    }

    let url = target.url();
    let db = surrealdb::engine::any::connect(url.as_str())
        .await
        .map_err(|e| StateError::Connection(format!("{url}: {e}")))?;

    if let DbTarget::Authenticated {
        username,
        password,
        root,
        ..
    } = target
    {
        let signed_in = if *root {
            db.signin(Root { username, password }).await.map(|_| ())
        } else {
            db.signin(Database {
                namespace: &scope.namespace,
                database: &scope.database,
                username,
                password,
            })
            .await
            .map(|_| ())
        };
        signed_in.map_err(|e| StateError::Connection(format!("sign-in as {username}: {e}")))?;
    }

    db.use_ns(&scope.namespace)
        .use_db(&scope.database)
        .await
        .map_err(|e| StateError::Connection(e.to_string()))?;
    migrations::init_schema(&db).await?;

    info!(
        backend = ?target,
        namespace = %scope.namespace,
        database = %scope.database,
        "decision log connected"
    );
    Ok(db)
}

/// In-memory database with the schema applied.
pub async fn connect_memory() -> Result<Surreal<Any>> {
    connect(&DbTarget::Memory, &DbScope::default()).await
}

/// Resolve the target from the process environment and connect.
pub async fn connect_from_env() -> Result<Surreal<Any>> {
    let (target, scope) = DbTarget::resolve(|k| std::env::var(k).ok());
    connect(&target, &scope).await
}
