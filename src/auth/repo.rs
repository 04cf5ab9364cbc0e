use async_trait::async_trait;
use sqlx::PgPool;

use crate::auth::principal::{NewPrincipal, Principal, PrincipalKind};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0} identifier already registered")]
    Duplicate(PrincipalKind),
    #[error("identity store unavailable")]
    Unavailable(#[source] anyhow::Error),
}

/// Durable principal storage keyed by `(kind, identifier)`.
///
/// `insert` is the only place uniqueness is decided: implementations must
/// reject a second row for the same key atomically and report it as
/// [`StoreError::Duplicate`].
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn find_by_identifier(
        &self,
        kind: PrincipalKind,
        identifier: &str,
    ) -> Result<Option<Principal>, StoreError>;

    async fn insert(&self, kind: PrincipalKind, new: NewPrincipal)
        -> Result<Principal, StoreError>;
}

#[derive(Clone)]
pub struct PgIdentityStore {
    db: PgPool,
}

impl PgIdentityStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl IdentityStore for PgIdentityStore {
    async fn find_by_identifier(
        &self,
        kind: PrincipalKind,
        identifier: &str,
    ) -> Result<Option<Principal>, StoreError> {
        // Table and column names come from PrincipalKind, never from input.
        let sql = format!(
            r#"
            SELECT {id} AS identifier, name, email, password_hash, created_at
            FROM {table}
            WHERE {id} = $1
            "#,
            id = kind.id_field(),
            table = kind.table(),
        );
        sqlx::query_as::<_, Principal>(&sql)
            .bind(identifier)
            .fetch_optional(&self.db)
            .await
            .map_err(|e| StoreError::Unavailable(e.into()))
    }

    async fn insert(
        &self,
        kind: PrincipalKind,
        new: NewPrincipal,
    ) -> Result<Principal, StoreError> {
        let sql = format!(
            r#"
            INSERT INTO {table} ({id}, name, email, password_hash)
            VALUES ($1, $2, $3, $4)
            RETURNING {id} AS identifier, name, email, password_hash, created_at
            "#,
            id = kind.id_field(),
            table = kind.table(),
        );
        sqlx::query_as::<_, Principal>(&sql)
            .bind(&new.identifier)
            .bind(&new.name)
            .bind(&new.email)
            .bind(&new.password_hash)
            .fetch_one(&self.db)
            .await
            .map_err(|e| {
                if let sqlx::Error::Database(db_err) = &e {
                    if db_err.is_unique_violation() {
                        return StoreError::Duplicate(kind);
                    }
                }
                StoreError::Unavailable(e.into())
            })
    }
}

#[cfg(test)]
pub(crate) mod memory {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use time::OffsetDateTime;

    use super::{IdentityStore, StoreError};
    use crate::auth::principal::{NewPrincipal, Principal, PrincipalKind};

    /// In-process stand-in for Postgres. The check and the insert happen
    /// under one lock, which gives the same guarantee as a unique index.
    #[derive(Default)]
    pub struct MemoryIdentityStore {
        rows: Mutex<HashMap<(PrincipalKind, String), Principal>>,
    }

    impl MemoryIdentityStore {
        pub fn len(&self, kind: PrincipalKind) -> usize {
            self.rows
                .lock()
                .unwrap()
                .keys()
                .filter(|(k, _)| *k == kind)
                .count()
        }
    }

    #[async_trait]
    impl IdentityStore for MemoryIdentityStore {
        async fn find_by_identifier(
            &self,
            kind: PrincipalKind,
            identifier: &str,
        ) -> Result<Option<Principal>, StoreError> {
            let rows = self.rows.lock().unwrap();
            Ok(rows.get(&(kind, identifier.to_string())).cloned())
        }

        async fn insert(
            &self,
            kind: PrincipalKind,
            new: NewPrincipal,
        ) -> Result<Principal, StoreError> {
            let mut rows = self.rows.lock().unwrap();
            let key = (kind, new.identifier.clone());
            if rows.contains_key(&key) {
                return Err(StoreError::Duplicate(kind));
            }
            let principal = Principal {
                identifier: new.identifier,
                name: new.name,
                email: new.email,
                password_hash: new.password_hash,
                created_at: OffsetDateTime::now_utc(),
            };
            rows.insert(key, principal.clone());
            Ok(principal)
        }
    }

    /// Store whose backend is always down.
    pub struct UnreachableStore;

    #[async_trait]
    impl IdentityStore for UnreachableStore {
        async fn find_by_identifier(
            &self,
            _kind: PrincipalKind,
            _identifier: &str,
        ) -> Result<Option<Principal>, StoreError> {
            Err(StoreError::Unavailable(anyhow::anyhow!(
                "pool timed out while waiting for an open connection"
            )))
        }

        async fn insert(
            &self,
            _kind: PrincipalKind,
            _new: NewPrincipal,
        ) -> Result<Principal, StoreError> {
            Err(StoreError::Unavailable(anyhow::anyhow!(
                "pool timed out while waiting for an open connection"
            )))
        }
    }

    mod tests {
        use super::*;

        fn new_row(id: &str, name: &str) -> NewPrincipal {
            NewPrincipal {
                identifier: id.into(),
                name: name.into(),
                email: "x@y.z".into(),
                password_hash: "hash".into(),
            }
        }

        #[tokio::test]
        async fn absent_identifier_is_not_an_error() {
            let store = MemoryIdentityStore::default();
            let found = store
                .find_by_identifier(PrincipalKind::Student, "nobody")
                .await
                .unwrap();
            assert!(found.is_none());
        }

        #[tokio::test]
        async fn duplicate_insert_leaves_first_row_intact() {
            let store = MemoryIdentityStore::default();
            let first = store
                .insert(PrincipalKind::Student, new_row("R1", "First"))
                .await
                .unwrap();
            let err = store
                .insert(PrincipalKind::Student, new_row("R1", "Second"))
                .await
                .unwrap_err();
            assert!(matches!(err, StoreError::Duplicate(PrincipalKind::Student)));

            let stored = store
                .find_by_identifier(PrincipalKind::Student, "R1")
                .await
                .unwrap()
                .unwrap();
            assert_eq!(stored, first);
            assert_eq!(store.len(PrincipalKind::Student), 1);
        }

        #[tokio::test]
        async fn namespaces_are_disjoint() {
            let store = MemoryIdentityStore::default();
            store
                .insert(PrincipalKind::Student, new_row("42", "Student"))
                .await
                .unwrap();
            store
                .insert(PrincipalKind::Teacher, new_row("42", "Teacher"))
                .await
                .unwrap();
            assert_eq!(store.len(PrincipalKind::Student), 1);
            assert_eq!(store.len(PrincipalKind::Teacher), 1);
        }
    }
}

#[cfg(test)]
mod pg_tests {
    use super::*;
    use sqlx::postgres::PgPoolOptions;
    use time::OffsetDateTime;

    /// Skips quietly when no database is configured.
    async fn pool_from_env() -> Option<PgPool> {
        dotenvy::dotenv().ok();
        let url = std::env::var("DATABASE_URL").ok()?;
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(&url)
            .await
            .expect("DATABASE_URL is set but unreachable");
        crate::db::migrate(&pool).await.expect("migrations apply");
        Some(pool)
    }

    fn row(identifier: &str, name: &str) -> NewPrincipal {
        NewPrincipal {
            identifier: identifier.into(),
            name: name.into(),
            email: "pg@x.com".into(),
            password_hash: "$argon2id$placeholder".into(),
        }
    }

    #[tokio::test]
    async fn unique_violation_becomes_duplicate() {
        let Some(pool) = pool_from_env().await else {
            eprintln!("DATABASE_URL not set; skipping postgres store test");
            return;
        };
        let store = PgIdentityStore::new(pool.clone());
        let identifier = format!("T{}", OffsetDateTime::now_utc().unix_timestamp_nanos());

        for kind in PrincipalKind::ALL {
            let first = store.insert(kind, row(&identifier, "First")).await.unwrap();
            let err = store
                .insert(kind, row(&identifier, "Second"))
                .await
                .unwrap_err();
            assert!(matches!(err, StoreError::Duplicate(k) if k == kind));

            let stored = store
                .find_by_identifier(kind, &identifier)
                .await
                .unwrap()
                .expect("first row persisted");
            assert_eq!(stored, first);

            sqlx::query(&format!(
                "DELETE FROM {} WHERE {} = $1",
                kind.table(),
                kind.id_field()
            ))
            .bind(&identifier)
            .execute(&pool)
            .await
            .unwrap();
        }
    }
}
