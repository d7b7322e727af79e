use chrono::{DateTime, Datelike, Duration, SecondsFormat, Utc};

use crate::models::*;

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("not found")] NotFound,
    #[error("conflict")] Conflict,
    #[error("constraint violation: {0}")] Constraint(String),
    #[error("internal: {0}")] Internal(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

impl From<sqlx::Error> for RepoError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::RowNotFound => RepoError::NotFound,
            sqlx::Error::Database(db) if db.is_unique_violation() => RepoError::Conflict,
            sqlx::Error::Database(db)
                if db.is_foreign_key_violation() || db.is_check_violation() =>
            {
                RepoError::Constraint(db.message().to_string())
            }
            _ => RepoError::Internal(e.to_string()),
        }
    }
}

use async_trait::async_trait;

#[async_trait]
pub trait AccountRepo: Send + Sync {
    /// Fails with `Conflict` when the email is taken.
    async fn create_account(&self, new: NewAccount) -> RepoResult<Account>;
    async fn get_account(&self, id: Id) -> RepoResult<Option<Account>>;
    async fn get_account_by_email(&self, email: &str) -> RepoResult<Option<Account>>;
    async fn update_password(&self, id: Id, password_hash: &str) -> RepoResult<()>;
    /// Cascades to the account's reports, comments on them, and its own comments.
    async fn delete_account(&self, id: Id) -> RepoResult<()>;
}

#[async_trait]
pub trait ReportRepo: Send + Sync {
    /// The owner must exist; a dangling `account_id` is a `Constraint` error.
    async fn create_report(&self, new: NewReport) -> RepoResult<Report>;
    async fn get_report(&self, id: Id) -> RepoResult<Option<Report>>;
    /// Reports created within `[start, end]`, newest first. An inverted range
    /// is empty.
    async fn reports_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> RepoResult<Vec<Report>>;
    async fn delete_report(&self, id: Id) -> RepoResult<()>;
    async fn oldest_report_with_image(&self) -> RepoResult<Option<Report>>;
    /// Stored image paths of every report the account owns.
    async fn image_paths_of(&self, account_id: Id) -> RepoResult<Vec<String>>;
}

#[async_trait]
pub trait CommentRepo: Send + Sync {
    async fn create_comment(&self, new: NewComment) -> RepoResult<Comment>;
    async fn list_comments(&self, report_id: Id) -> RepoResult<Vec<Comment>>;
}

#[async_trait]
pub trait ExpRepo: Send + Sync {
    /// Relative increment; concurrent calls never lose updates.
    async fn add_exp(&self, account_id: Id, amount: i64) -> RepoResult<()>;
    /// Ordered by exp descending, then account id ascending.
    async fn top_by_exp(&self, limit: u32) -> RepoResult<Vec<LeaderboardEntry>>;
    async fn rank_of(&self, account_id: Id) -> RepoResult<Option<Rank>>;
}

pub trait Repo: AccountRepo + ReportRepo + CommentRepo + ExpRepo {}

impl<T> Repo for T where T: AccountRepo + ReportRepo + CommentRepo + ExpRepo {}

const EARLIEST_STAMP: &str = "0000-01-01T00:00:00.000000Z";
const LATEST_STAMP: &str = "9999-12-31T23:59:59.999999Z";

/// Fixed-width UTC text, so lexical order in the store is time order.
/// Instants outside years 0000..=9999 clamp to the nearest representable one.
fn encode_ts(ts: &DateTime<Utc>) -> String {
    match ts.year() {
        y if y < 0 => EARLIEST_STAMP.to_string(),
        y if y > 9999 => LATEST_STAMP.to_string(),
        _ => ts.to_rfc3339_opts(SecondsFormat::Micros, true),
    }
}

/// Lower range bound: round up to the next microsecond so a sub-microsecond
/// start never admits an earlier stored instant.
fn encode_lower_bound(ts: &DateTime<Utc>) -> String {
    if ts.timestamp_subsec_nanos() % 1_000 == 0 {
        return encode_ts(ts);
    }
    encode_ts(&(*ts + Duration::microseconds(1)))
}

fn decode_ts(raw: &str) -> RepoResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| RepoError::Internal(format!("bad timestamp '{raw}': {e}")))
}

pub mod sql {
    use super::*;
    use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
    use std::str::FromStr;
    use tracing::{debug, info};

    #[derive(sqlx::FromRow)]
    struct AccountRow {
        id: Id,
        name: String,
        email: String,
        password: String,
        is_admin: bool,
        exp: i64,
        created_at: String,
        updated_at: String,
    }

    impl TryFrom<AccountRow> for Account {
        type Error = RepoError;
        fn try_from(r: AccountRow) -> RepoResult<Self> {
            Ok(Account {
                id: r.id,
                name: r.name,
                email: r.email,
                password_hash: r.password,
                is_admin: r.is_admin,
                exp: r.exp,
                created_at: decode_ts(&r.created_at)?,
                updated_at: decode_ts(&r.updated_at)?,
            })
        }
    }

    #[derive(sqlx::FromRow)]
    struct ReportRow {
        id: Id,
        account_id: Id,
        latitude: f64,
        longitude: f64,
        image_path: Option<String>,
        description: String,
        trail: Option<String>,
        created_at: String,
        owner_name: String,
        owner_email: String,
        owner_is_admin: bool,
    }

    impl TryFrom<ReportRow> for Report {
        type Error = RepoError;
        fn try_from(r: ReportRow) -> RepoResult<Self> {
            Ok(Report {
                id: r.id,
                account_id: r.account_id,
                owner: PublicProfile {
                    id: r.account_id,
                    name: r.owner_name,
                    email: r.owner_email,
                    is_admin: r.owner_is_admin,
                },
                latitude: r.latitude,
                longitude: r.longitude,
                image_path: r.image_path.filter(|p| !p.is_empty()),
                description: r.description,
                trail: r.trail.filter(|t| !t.is_empty()),
                created_at: decode_ts(&r.created_at)?,
            })
        }
    }

    #[derive(sqlx::FromRow)]
    struct CommentRow {
        id: Id,
        report_id: Id,
        account_id: Id,
        content: String,
        created_at: String,
        author_name: String,
        author_email: String,
        author_is_admin: bool,
    }

    impl TryFrom<CommentRow> for Comment {
        type Error = RepoError;
        fn try_from(r: CommentRow) -> RepoResult<Self> {
            Ok(Comment {
                id: r.id,
                report_id: r.report_id,
                account_id: r.account_id,
                author: PublicProfile {
                    id: r.account_id,
                    name: r.author_name,
                    email: r.author_email,
                    is_admin: r.author_is_admin,
                },
                content: r.content,
                created_at: decode_ts(&r.created_at)?,
            })
        }
    }

    #[derive(sqlx::FromRow)]
    struct LeaderRow {
        id: Id,
        name: String,
        email: String,
        is_admin: bool,
        exp: i64,
    }

    const ACCOUNT_COLUMNS: &str =
        "id, name, email, password, is_admin, exp, created_at, updated_at";

    const REPORT_SELECT: &str = r#"
        SELECT r.id, r.account_id, r.latitude, r.longitude, r.image_path, r.description,
               r.trail, r.created_at,
               a.name AS owner_name, a.email AS owner_email, a.is_admin AS owner_is_admin
        FROM reports r
        JOIN accounts a ON a.id = r.account_id
    "#;

    const COMMENT_SELECT: &str = r#"
        SELECT c.id, c.report_id, c.account_id, c.content, c.created_at,
               a.name AS author_name, a.email AS author_email, a.is_admin AS author_is_admin
        FROM comments c
        JOIN accounts a ON a.id = c.account_id
    "#;

    #[derive(Clone)]
    pub struct SqlRepo { pool: SqlitePool }

    impl SqlRepo {
        pub fn new(pool: SqlitePool) -> Self { Self { pool } }

        /// Opens a pool with foreign keys enforced on every connection.
        pub async fn connect(url: &str, max_connections: u32) -> RepoResult<Self> {
            let opts = SqliteConnectOptions::from_str(url)?
                .create_if_missing(true)
                .foreign_keys(true)
                .journal_mode(SqliteJournalMode::Wal)
                .busy_timeout(std::time::Duration::from_secs(5));
            let pool = SqlitePoolOptions::new()
                .max_connections(max_connections.max(1))
                .connect_with(opts)
                .await?;
            info!(url, "connected to sqlite store");
            Ok(Self { pool })
        }

        pub async fn migrate(&self) -> RepoResult<()> {
            sqlx::migrate!("./migrations")
                .run(&self.pool)
                .await
                .map_err(|e| RepoError::Internal(e.to_string()))?;
            debug!("migrations applied");
            Ok(())
        }

        pub fn pool(&self) -> &SqlitePool { &self.pool }

        async fn fetch_report(&self, where_clause: &str, id: Option<Id>) -> RepoResult<Option<Report>> {
            let sql = format!("{REPORT_SELECT} {where_clause}");
            let mut q = sqlx::query_as::<_, ReportRow>(&sql);
            if let Some(id) = id {
                q = q.bind(id);
            }
            q.fetch_optional(&self.pool).await?.map(Report::try_from).transpose()
        }
    }

    #[async_trait]
    impl AccountRepo for SqlRepo {
        async fn create_account(&self, new: NewAccount) -> RepoResult<Account> {
            let now = now();
            let stamp = encode_ts(&now);
            let id = sqlx::query(
                "INSERT INTO accounts (name, email, password, is_admin, exp, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, 0, ?5, ?5)",
            )
            .bind(&new.name)
            .bind(&new.email)
            .bind(&new.password_hash)
            .bind(new.is_admin)
            .bind(&stamp)
            .execute(&self.pool)
            .await?
            .last_insert_rowid();
            Ok(Account {
                id,
                name: new.name,
                email: new.email,
                password_hash: new.password_hash,
                is_admin: new.is_admin,
                exp: 0,
                created_at: now,
                updated_at: now,
            })
        }

        async fn get_account(&self, id: Id) -> RepoResult<Option<Account>> {
            let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?1");
            sqlx::query_as::<_, AccountRow>(&sql)
                .bind(id)
                .fetch_optional(&self.pool)
                .await?
                .map(Account::try_from)
                .transpose()
        }

        async fn get_account_by_email(&self, email: &str) -> RepoResult<Option<Account>> {
            let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE email = ?1");
            sqlx::query_as::<_, AccountRow>(&sql)
                .bind(email)
                .fetch_optional(&self.pool)
                .await?
                .map(Account::try_from)
                .transpose()
        }

        async fn update_password(&self, id: Id, password_hash: &str) -> RepoResult<()> {
            let res = sqlx::query("UPDATE accounts SET password = ?1, updated_at = ?2 WHERE id = ?3")
                .bind(password_hash)
                .bind(encode_ts(&now()))
                .bind(id)
                .execute(&self.pool)
                .await?;
            if res.rows_affected() == 0 { return Err(RepoError::NotFound); }
            Ok(())
        }

        async fn delete_account(&self, id: Id) -> RepoResult<()> {
            let res = sqlx::query("DELETE FROM accounts WHERE id = ?1")
                .bind(id)
                .execute(&self.pool)
                .await?;
            if res.rows_affected() == 0 { return Err(RepoError::NotFound); }
            Ok(())
        }
    }

    #[async_trait]
    impl ReportRepo for SqlRepo {
        async fn create_report(&self, new: NewReport) -> RepoResult<Report> {
            let id = sqlx::query(
                "INSERT INTO reports (account_id, latitude, longitude, image_path, description, trail, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )
            .bind(new.account_id)
            .bind(new.latitude)
            .bind(new.longitude)
            .bind(new.image_path.as_deref())
            .bind(&new.description)
            .bind(new.trail.as_deref())
            .bind(encode_ts(&now()))
            .execute(&self.pool)
            .await?
            .last_insert_rowid();
            // Re-select with the owner join to populate the struct
            self.get_report(id)
                .await?
                .ok_or_else(|| RepoError::Internal(format!("report {id} vanished after insert")))
        }

        async fn get_report(&self, id: Id) -> RepoResult<Option<Report>> {
            self.fetch_report("WHERE r.id = ?1", Some(id)).await
        }

        async fn reports_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> RepoResult<Vec<Report>> {
            if start > end {
                return Ok(Vec::new());
            }
            let sql = format!(
                "{REPORT_SELECT} WHERE r.created_at BETWEEN ?1 AND ?2 ORDER BY r.created_at DESC, r.id DESC"
            );
            sqlx::query_as::<_, ReportRow>(&sql)
                .bind(encode_lower_bound(&start))
                .bind(encode_ts(&end))
                .fetch_all(&self.pool)
                .await?
                .into_iter()
                .map(Report::try_from)
                .collect()
        }

        async fn delete_report(&self, id: Id) -> RepoResult<()> {
            let res = sqlx::query("DELETE FROM reports WHERE id = ?1")
                .bind(id)
                .execute(&self.pool)
                .await?;
            if res.rows_affected() == 0 { return Err(RepoError::NotFound); }
            Ok(())
        }

        async fn oldest_report_with_image(&self) -> RepoResult<Option<Report>> {
            self.fetch_report(
                "WHERE r.image_path IS NOT NULL AND r.image_path <> '' \
                 ORDER BY r.created_at ASC, r.id ASC LIMIT 1",
                None,
            )
            .await
        }

        async fn image_paths_of(&self, account_id: Id) -> RepoResult<Vec<String>> {
            let paths = sqlx::query_scalar(
                "SELECT image_path FROM reports \
                 WHERE account_id = ?1 AND image_path IS NOT NULL AND image_path <> '' \
                 ORDER BY id",
            )
            .bind(account_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(paths)
        }
    }

    #[async_trait]
    impl CommentRepo for SqlRepo {
        async fn create_comment(&self, new: NewComment) -> RepoResult<Comment> {
            let id = sqlx::query(
                "INSERT INTO comments (report_id, account_id, content, created_at) \
                 VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(new.report_id)
            .bind(new.account_id)
            .bind(&new.content)
            .bind(encode_ts(&now()))
            .execute(&self.pool)
            .await?
            .last_insert_rowid();
            let sql = format!("{COMMENT_SELECT} WHERE c.id = ?1");
            sqlx::query_as::<_, CommentRow>(&sql)
                .bind(id)
                .fetch_one(&self.pool)
                .await?
                .try_into()
        }

        async fn list_comments(&self, report_id: Id) -> RepoResult<Vec<Comment>> {
            let sql = format!("{COMMENT_SELECT} WHERE c.report_id = ?1 ORDER BY c.created_at ASC, c.id ASC");
            sqlx::query_as::<_, CommentRow>(&sql)
                .bind(report_id)
                .fetch_all(&self.pool)
                .await?
                .into_iter()
                .map(Comment::try_from)
                .collect()
        }
    }

    #[async_trait]
    impl ExpRepo for SqlRepo {
        async fn add_exp(&self, account_id: Id, amount: i64) -> RepoResult<()> {
            let res = sqlx::query("UPDATE accounts SET exp = exp + ?1, updated_at = ?2 WHERE id = ?3")
                .bind(amount)
                .bind(encode_ts(&now()))
                .bind(account_id)
                .execute(&self.pool)
                .await?;
            if res.rows_affected() == 0 { return Err(RepoError::NotFound); }
            Ok(())
        }

        async fn top_by_exp(&self, limit: u32) -> RepoResult<Vec<LeaderboardEntry>> {
            let rows = sqlx::query_as::<_, LeaderRow>(
                "SELECT id, name, email, is_admin, exp FROM accounts ORDER BY exp DESC, id ASC LIMIT ?1",
            )
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
            Ok(rows
                .into_iter()
                .zip(1..)
                .map(|(r, position)| LeaderboardEntry {
                    position,
                    account: PublicProfile { id: r.id, name: r.name, email: r.email, is_admin: r.is_admin },
                    exp: r.exp,
                })
                .collect())
        }

        async fn rank_of(&self, account_id: Id) -> RepoResult<Option<Rank>> {
            let row: Option<(i64, i64)> = sqlx::query_as(
                "SELECT (SELECT COUNT(*) FROM accounts o WHERE o.exp > a.exp) + 1, a.exp \
                 FROM accounts a WHERE a.id = ?1",
            )
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row.map(|(rank, exp)| Rank { rank, exp }))
        }
    }
}
