use async_trait::async_trait;
use harvester_core::{
    config::DatabaseConfig, Account, ChannelRecord, ChannelRepository, HarvesterError, Proxy,
    Result,
};
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use std::time::Duration;
use tracing::{debug, info, warn};

/// 按配置创建PostgreSQL连接池
///
/// 连接按需建立，启动时数据库不可用不会失败，由首次查询报告错误。
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
        .connect_lazy(&config.url)
        .map_err(HarvesterError::Database)?;

    info!(max_connections = config.max_connections, "数据库连接池已创建");
    Ok(pool)
}

/// PostgreSQL频道仓储实现
///
/// 表结构由管理后台维护，频道类型以枚举名（如 `TIKTOK`）存储。
pub struct PostgresChannelRepository {
    pool: PgPool,
}

impl PostgresChannelRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 将数据库行转换为ChannelRecord模型
    fn row_to_channel(row: &sqlx::postgres::PgRow) -> Result<ChannelRecord> {
        let source_type: String = row.try_get("type")?;
        Ok(ChannelRecord {
            id: row.try_get("id")?,
            link: row.try_get("link")?,
            source_type: source_type.parse()?,
            user_id: row.try_get("user_id")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl ChannelRepository for PostgresChannelRepository {
    async fn get_all(&self) -> Result<Vec<ChannelRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id::bigint AS id, link, type::text AS type, user_id::bigint AS user_id, created_at
            FROM channels
            ORDER BY created_at, id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(HarvesterError::Database)?;

        let mut channels = Vec::with_capacity(rows.len());
        for row in &rows {
            match Self::row_to_channel(row) {
                Ok(channel) => channels.push(channel),
                Err(e) => warn!(error = %e, "跳过无法识别的频道记录"),
            }
        }

        debug!(count = channels.len(), "读取频道列表");
        Ok(channels)
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<ChannelRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id::bigint AS id, link, type::text AS type, user_id::bigint AS user_id, created_at
            FROM channels
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(HarvesterError::Database)?;

        row.as_ref().map(Self::row_to_channel).transpose()
    }

    async fn get_active_accounts(&self) -> Result<Vec<Account>> {
        let rows = sqlx::query(
            "SELECT id::bigint AS id, account_str, is_active FROM account WHERE is_active = true ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(HarvesterError::Database)?;

        rows.iter()
            .map(|row| {
                Ok(Account {
                    id: row.try_get("id")?,
                    account_str: row.try_get("account_str")?,
                    is_active: row.try_get("is_active")?,
                })
            })
            .collect()
    }

    async fn get_active_proxies(&self) -> Result<Vec<Proxy>> {
        let rows = sqlx::query(
            r#"
            SELECT id::bigint AS id, proxy_str, is_active, COALESCE(for_likee, false) AS for_likee
            FROM proxies
            WHERE is_active = true
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(HarvesterError::Database)?;

        rows.iter()
            .map(|row| {
                Ok(Proxy {
                    id: row.try_get("id")?,
                    proxy_str: row.try_get("proxy_str")?,
                    is_active: row.try_get("is_active")?,
                    for_likee: row.try_get("for_likee")?,
                })
            })
            .collect()
    }
}
