use chrono::NaiveDate;
use sqlx::MySqlPool;
use sqlx::mysql::MySqlConnection;
use sqlx::pool::PoolConnection;

pub async fn init_db(database_url: &str) -> MySqlPool {
    MySqlPool::connect(database_url)
        .await
        .expect("Failed to connect to database")
}

/// A MySQL named lock serializing work per (tenant, employee, day).
/// Named locks live on a connection, so the lock pins one for its lifetime;
/// if `release` is never called the pooled connection is torn down, which
/// also frees the lock server-side.
pub struct DayLock {
    conn: Option<PoolConnection<sqlx::MySql>>,
    name: String,
}

/// Acquire the per-(tenant, employee, day) lock, waiting up to 5 seconds.
pub async fn lock_day(
    pool: &MySqlPool,
    tenant_id: u64,
    employee_id: u64,
    day: NaiveDate,
) -> Result<DayLock, sqlx::Error> {
    let name = format!("pointage:day:{}:{}:{}", tenant_id, employee_id, day);
    let mut conn = pool.acquire().await?;
    let granted: Option<i64> = sqlx::query_scalar("SELECT GET_LOCK(?, 5)")
        .bind(&name)
        .fetch_one(&mut *conn)
        .await?;
    if granted != Some(1) {
        return Err(sqlx::Error::PoolTimedOut);
    }
    Ok(DayLock {
        conn: Some(conn),
        name,
    })
}

impl DayLock {
    pub async fn release(mut self) {
        if let Some(mut conn) = self.conn.take() {
            if let Err(e) = sqlx::query("SELECT RELEASE_LOCK(?)")
                .bind(&self.name)
                .execute(&mut *conn)
                .await
            {
                tracing::warn!(error = %e, lock = %self.name, "Failed to release day lock");
            }
        }
    }
}

impl Drop for DayLock {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            // Close the connection instead of returning it locked.
            let raw: MySqlConnection = conn.detach();
            drop(raw);
        }
    }
}
