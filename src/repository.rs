use crate::models::{
    Brand, CodeCheck, CreateBrandRequest, CreateShowRequest, Credential, EmailAddress,
    RecoveryCode, Show, UpdateShowRequest, User,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, postgres::PgPoolOptions};
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};
use thiserror::Error;
use uuid::Uuid;

/// RepoError
///
/// Failures of the authoritative store. Handlers surface them as
/// `StoreUnavailable` without retrying.
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// CredentialStore
///
/// Identities, password hashes and recovery codes. Codes and passwords live in
/// the same store so that consuming a code and replacing the password can be a
/// single atomic unit.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_credential(&self, email: &EmailAddress) -> Result<Option<Credential>, RepoError>;
    async fn get_user(&self, id: Uuid) -> Result<Option<User>, RepoError>;
    async fn create_user(
        &self,
        email: &EmailAddress,
        name: &str,
        role: &str,
        password_hash: &str,
    ) -> Result<User, RepoError>;

    /// Stores `code` as the only record for its email, superseding any previous
    /// one. No-op returning `false` when no user owns the email.
    async fn replace_recovery_code(&self, code: &RecoveryCode) -> Result<bool, RepoError>;

    /// Requested -> Verified when the hash matches an active record; burns an
    /// attempt on a mismatch.
    async fn verify_recovery_code(
        &self,
        email: &EmailAddress,
        code_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<CodeCheck, RepoError>;

    /// Marks the code consumed and overwrites the password hash, atomically.
    /// Burns an attempt on a mismatch, exactly like `verify_recovery_code`.
    async fn redeem_recovery_code(
        &self,
        email: &EmailAddress,
        code_hash: &str,
        new_password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<CodeCheck, RepoError>;
}

/// ContentRepository
///
/// Persistence for the portfolio resources served through the cache-aside
/// handlers.
#[async_trait]
pub trait ContentRepository: Send + Sync {
    async fn list_shows(&self) -> Result<Vec<Show>, RepoError>;
    async fn list_featured_shows(&self, limit: i64) -> Result<Vec<Show>, RepoError>;
    async fn get_show(&self, id: Uuid) -> Result<Option<Show>, RepoError>;
    async fn create_show(&self, req: CreateShowRequest) -> Result<Show, RepoError>;
    // Partial update; `None` fields keep their value.
    async fn update_show(&self, id: Uuid, req: UpdateShowRequest) -> Result<Option<Show>, RepoError>;
    async fn delete_show(&self, id: Uuid) -> Result<bool, RepoError>;

    async fn list_brands(&self) -> Result<Vec<Brand>, RepoError>;
    async fn create_brand(&self, req: CreateBrandRequest) -> Result<Brand, RepoError>;
    async fn delete_brand(&self, id: Uuid) -> Result<bool, RepoError>;
}

pub type CredentialState = Arc<dyn CredentialStore>;
pub type ContentState = Arc<dyn ContentRepository>;

// --- Postgres ---

/// PostgresRepository
///
/// Store handle backed by a connection pool. Opened explicitly at startup and
/// closed explicitly on shutdown.
#[derive(Clone)]
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects and applies pending migrations.
    pub async fn open(db_url: &str, max_connections: u32) -> Result<Self, RepoError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(db_url)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::info!(max_connections, "postgres store opened");
        Ok(Self { pool })
    }

    /// Waits for in-flight queries, then closes every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!("postgres store closed");
    }

    async fn burn_attempt(
        &self,
        email: &EmailAddress,
        now: DateTime<Utc>,
    ) -> Result<CodeCheck, RepoError> {
        let remaining: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE recovery_codes
            SET attempts_remaining = attempts_remaining - 1
            WHERE email = $1 AND consumed_at IS NULL AND expires_at > $2 AND attempts_remaining > 0
            RETURNING attempts_remaining
            "#,
        )
        .bind(email.as_str())
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match remaining {
            Some(attempts_remaining) => CodeCheck::Mismatch { attempts_remaining },
            None => CodeCheck::NoActiveCode,
        })
    }
}

const USER_COLUMNS: &str = "id, email, name, role, created_at";
const SHOW_COLUMNS: &str =
    "id, title, venue, starts_at, description, is_featured, created_at, updated_at";

#[async_trait]
impl CredentialStore for PostgresRepository {
    async fn find_credential(&self, email: &EmailAddress) -> Result<Option<Credential>, RepoError> {
        let row = sqlx::query_as::<_, Credential>(&format!(
            "SELECT {USER_COLUMNS}, password_hash FROM users WHERE email = $1"
        ))
        .bind(email.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, RepoError> {
        let row = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn create_user(
        &self,
        email: &EmailAddress,
        name: &str,
        role: &str,
        password_hash: &str,
    ) -> Result<User, RepoError> {
        let row = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (id, email, name, role, password_hash, created_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(email.as_str())
        .bind(name)
        .bind(role)
        .bind(password_hash)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    /// Upsert keyed by email, guarded by the existence of the user. The primary
    /// key on `recovery_codes.email` is what keeps one record per address.
    async fn replace_recovery_code(&self, code: &RecoveryCode) -> Result<bool, RepoError> {
        let result = sqlx::query(
            r#"
            INSERT INTO recovery_codes
                (email, code_hash, created_at, expires_at, verified_at, consumed_at, attempts_remaining)
            SELECT $1, $2, $3, $4, NULL, NULL, $5
            WHERE EXISTS (SELECT 1 FROM users WHERE email = $1)
            ON CONFLICT (email) DO UPDATE SET
                code_hash = EXCLUDED.code_hash,
                created_at = EXCLUDED.created_at,
                expires_at = EXCLUDED.expires_at,
                verified_at = NULL,
                consumed_at = NULL,
                attempts_remaining = EXCLUDED.attempts_remaining
            "#,
        )
        .bind(&code.email)
        .bind(&code.code_hash)
        .bind(code.created_at)
        .bind(code.expires_at)
        .bind(code.attempts_remaining)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn verify_recovery_code(
        &self,
        email: &EmailAddress,
        code_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<CodeCheck, RepoError> {
        let result = sqlx::query(
            r#"
            UPDATE recovery_codes
            SET verified_at = $3
            WHERE email = $1 AND code_hash = $2
              AND consumed_at IS NULL AND expires_at > $3 AND attempts_remaining > 0
            "#,
        )
        .bind(email.as_str())
        .bind(code_hash)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(CodeCheck::Accepted);
        }
        self.burn_attempt(email, now).await
    }

    async fn redeem_recovery_code(
        &self,
        email: &EmailAddress,
        code_hash: &str,
        new_password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<CodeCheck, RepoError> {
        let mut tx = self.pool.begin().await?;

        // The row lock taken here serializes concurrent redemptions; the loser
        // re-evaluates `consumed_at IS NULL` and matches nothing.
        let consumed = sqlx::query(
            r#"
            UPDATE recovery_codes
            SET consumed_at = $3
            WHERE email = $1 AND code_hash = $2
              AND consumed_at IS NULL AND expires_at > $3 AND attempts_remaining > 0
            "#,
        )
        .bind(email.as_str())
        .bind(code_hash)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if consumed.rows_affected() == 0 {
            tx.rollback().await?;
            return self.burn_attempt(email, now).await;
        }

        let updated = sqlx::query("UPDATE users SET password_hash = $2 WHERE email = $1")
            .bind(email.as_str())
            .bind(new_password_hash)
            .execute(&mut *tx)
            .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(CodeCheck::NoActiveCode);
        }

        tx.commit().await?;
        Ok(CodeCheck::Accepted)
    }
}

#[async_trait]
impl ContentRepository for PostgresRepository {
    async fn list_shows(&self) -> Result<Vec<Show>, RepoError> {
        let rows = sqlx::query_as::<_, Show>(&format!(
            "SELECT {SHOW_COLUMNS} FROM shows ORDER BY starts_at ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn list_featured_shows(&self, limit: i64) -> Result<Vec<Show>, RepoError> {
        let rows = sqlx::query_as::<_, Show>(&format!(
            "SELECT {SHOW_COLUMNS} FROM shows WHERE is_featured = true ORDER BY starts_at ASC LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn get_show(&self, id: Uuid) -> Result<Option<Show>, RepoError> {
        let row = sqlx::query_as::<_, Show>(&format!(
            "SELECT {SHOW_COLUMNS} FROM shows WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn create_show(&self, req: CreateShowRequest) -> Result<Show, RepoError> {
        let row = sqlx::query_as::<_, Show>(&format!(
            r#"
            INSERT INTO shows (id, title, venue, starts_at, description, is_featured, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW(), NOW())
            RETURNING {SHOW_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(req.title)
        .bind(req.venue)
        .bind(req.starts_at)
        .bind(req.description)
        .bind(req.is_featured)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn update_show(&self, id: Uuid, req: UpdateShowRequest) -> Result<Option<Show>, RepoError> {
        let row = sqlx::query_as::<_, Show>(&format!(
            r#"
            UPDATE shows
            SET title = COALESCE($2, title),
                venue = COALESCE($3, venue),
                starts_at = COALESCE($4, starts_at),
                description = COALESCE($5, description),
                is_featured = COALESCE($6, is_featured),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {SHOW_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(req.title)
        .bind(req.venue)
        .bind(req.starts_at)
        .bind(req.description)
        .bind(req.is_featured)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn delete_show(&self, id: Uuid) -> Result<bool, RepoError> {
        let result = sqlx::query("DELETE FROM shows WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_brands(&self) -> Result<Vec<Brand>, RepoError> {
        let rows = sqlx::query_as::<_, Brand>(
            "SELECT id, name, website, created_at FROM brands ORDER BY name ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn create_brand(&self, req: CreateBrandRequest) -> Result<Brand, RepoError> {
        let row = sqlx::query_as::<_, Brand>(
            r#"
            INSERT INTO brands (id, name, website, created_at)
            VALUES ($1, $2, $3, NOW())
            RETURNING id, name, website, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(req.name)
        .bind(req.website)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn delete_brand(&self, id: Uuid) -> Result<bool, RepoError> {
        let result = sqlx::query("DELETE FROM brands WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

// --- In-memory ---

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, Credential>,
    codes: HashMap<String, RecoveryCode>,
    shows: HashMap<Uuid, Show>,
    brands: HashMap<Uuid, Brand>,
}

/// InMemoryRepository
///
/// Implements both store traits over a single mutex-guarded set of tables, so
/// every operation (including code redemption) is atomic. Used by the test
/// suites and for running the server without Postgres.
#[derive(Default)]
pub struct InMemoryRepository {
    tables: Mutex<Tables>,
    /// When true, every call fails with `RepoError::Unavailable`.
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of store operations served so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Current recovery-code record for `email`, if any.
    pub fn recovery_code(&self, email: &str) -> Option<RecoveryCode> {
        self.lock_tables().codes.get(email).cloned()
    }

    fn lock_tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn enter(&self) -> Result<MutexGuard<'_, Tables>, RepoError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(RepoError::Unavailable("in-memory store set to fail".into()));
        }
        Ok(self.lock_tables())
    }
}

fn burn_attempt(tables: &mut Tables, email: &str, now: DateTime<Utc>) -> CodeCheck {
    match tables.codes.get_mut(email) {
        Some(code) if code.is_active(now) => {
            code.attempts_remaining -= 1;
            CodeCheck::Mismatch {
                attempts_remaining: code.attempts_remaining,
            }
        }
        _ => CodeCheck::NoActiveCode,
    }
}

fn matches_active(tables: &Tables, email: &str, code_hash: &str, now: DateTime<Utc>) -> bool {
    tables
        .codes
        .get(email)
        .is_some_and(|code| code.is_active(now) && code.code_hash == code_hash)
}

#[async_trait]
impl CredentialStore for InMemoryRepository {
    async fn find_credential(&self, email: &EmailAddress) -> Result<Option<Credential>, RepoError> {
        let tables = self.enter()?;
        Ok(tables
            .users
            .values()
            .find(|c| c.user.email == email.as_str())
            .cloned())
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, RepoError> {
        let tables = self.enter()?;
        Ok(tables.users.get(&id).map(|c| c.user.clone()))
    }

    async fn create_user(
        &self,
        email: &EmailAddress,
        name: &str,
        role: &str,
        password_hash: &str,
    ) -> Result<User, RepoError> {
        let mut tables = self.enter()?;
        if tables.users.values().any(|c| c.user.email == email.as_str()) {
            return Err(RepoError::Unavailable(format!("duplicate email {email}")));
        }
        let user = User {
            id: Uuid::new_v4(),
            email: email.as_str().to_string(),
            name: name.to_string(),
            role: role.to_string(),
            created_at: Utc::now(),
        };
        tables.users.insert(
            user.id,
            Credential {
                user: user.clone(),
                password_hash: password_hash.to_string(),
            },
        );
        Ok(user)
    }

    async fn replace_recovery_code(&self, code: &RecoveryCode) -> Result<bool, RepoError> {
        let mut tables = self.enter()?;
        if !tables.users.values().any(|c| c.user.email == code.email) {
            return Ok(false);
        }
        tables.codes.insert(code.email.clone(), code.clone());
        Ok(true)
    }

    async fn verify_recovery_code(
        &self,
        email: &EmailAddress,
        code_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<CodeCheck, RepoError> {
        let mut tables = self.enter()?;
        if matches_active(&tables, email.as_str(), code_hash, now) {
            if let Some(code) = tables.codes.get_mut(email.as_str()) {
                code.verified_at = Some(now);
            }
            return Ok(CodeCheck::Accepted);
        }
        Ok(burn_attempt(&mut tables, email.as_str(), now))
    }

    async fn redeem_recovery_code(
        &self,
        email: &EmailAddress,
        code_hash: &str,
        new_password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<CodeCheck, RepoError> {
        let mut tables = self.enter()?;
        if !matches_active(&tables, email.as_str(), code_hash, now) {
            return Ok(burn_attempt(&mut tables, email.as_str(), now));
        }

        let Some(credential) = tables
            .users
            .values_mut()
            .find(|c| c.user.email == email.as_str())
        else {
            return Ok(CodeCheck::NoActiveCode);
        };
        credential.password_hash = new_password_hash.to_string();
        if let Some(code) = tables.codes.get_mut(email.as_str()) {
            code.consumed_at = Some(now);
        }
        Ok(CodeCheck::Accepted)
    }
}

#[async_trait]
impl ContentRepository for InMemoryRepository {
    async fn list_shows(&self) -> Result<Vec<Show>, RepoError> {
        let tables = self.enter()?;
        let mut shows: Vec<Show> = tables.shows.values().cloned().collect();
        shows.sort_by_key(|s| s.starts_at);
        Ok(shows)
    }

    async fn list_featured_shows(&self, limit: i64) -> Result<Vec<Show>, RepoError> {
        let mut shows = self.list_shows().await?;
        shows.retain(|s| s.is_featured);
        shows.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(shows)
    }

    async fn get_show(&self, id: Uuid) -> Result<Option<Show>, RepoError> {
        let tables = self.enter()?;
        Ok(tables.shows.get(&id).cloned())
    }

    async fn create_show(&self, req: CreateShowRequest) -> Result<Show, RepoError> {
        let mut tables = self.enter()?;
        let now = Utc::now();
        let show = Show {
            id: Uuid::new_v4(),
            title: req.title,
            venue: req.venue,
            starts_at: req.starts_at,
            description: req.description,
            is_featured: req.is_featured,
            created_at: now,
            updated_at: now,
        };
        tables.shows.insert(show.id, show.clone());
        Ok(show)
    }

    async fn update_show(&self, id: Uuid, req: UpdateShowRequest) -> Result<Option<Show>, RepoError> {
        let mut tables = self.enter()?;
        let Some(show) = tables.shows.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(title) = req.title {
            show.title = title;
        }
        if let Some(venue) = req.venue {
            show.venue = venue;
        }
        if let Some(starts_at) = req.starts_at {
            show.starts_at = starts_at;
        }
        if let Some(description) = req.description {
            show.description = Some(description);
        }
        if let Some(is_featured) = req.is_featured {
            show.is_featured = is_featured;
        }
        show.updated_at = Utc::now();
        Ok(Some(show.clone()))
    }

    async fn delete_show(&self, id: Uuid) -> Result<bool, RepoError> {
        let mut tables = self.enter()?;
        Ok(tables.shows.remove(&id).is_some())
    }

    async fn list_brands(&self) -> Result<Vec<Brand>, RepoError> {
        let tables = self.enter()?;
        let mut brands: Vec<Brand> = tables.brands.values().cloned().collect();
        brands.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(brands)
    }

    async fn create_brand(&self, req: CreateBrandRequest) -> Result<Brand, RepoError> {
        let mut tables = self.enter()?;
        let brand = Brand {
            id: Uuid::new_v4(),
            name: req.name,
            website: req.website,
            created_at: Utc::now(),
        };
        tables.brands.insert(brand.id, brand.clone());
        Ok(brand)
    }

    async fn delete_brand(&self, id: Uuid) -> Result<bool, RepoError> {
        let mut tables = self.enter()?;
        Ok(tables.brands.remove(&id).is_some())
    }
}
