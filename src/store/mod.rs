//! 业务数据存储（SQLite）
//!
//! 两张表：production_logs（生产记录）与 inventory（库存）。
//! 建表幂等；库存名匹配分两级：先不区分大小写的精确匹配，再子串匹配。

use std::path::Path;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;

/// 库存条目（查找结果）
#[derive(Debug, Clone)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub quantity: i64,
}

/// 存储句柄：内部为 sqlx 连接池，可克隆共享
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// 打开（必要时创建）数据库文件并初始化 schema
    pub async fn connect(db_path: impl AsRef<Path>) -> Result<Self, sqlx::Error> {
        let db_url = format!("sqlite:{}?mode=rwc", db_path.as_ref().display());
        let pool = SqlitePoolOptions::new()
            .max_connections(3)
            .acquire_timeout(std::time::Duration::from_secs(5))
            .connect(&db_url)
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// 内存数据库（测试用）
    pub async fn in_memory() -> Result<Self, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS production_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                machine_id TEXT NOT NULL,
                rolls_produced INTEGER NOT NULL,
                timestamp TEXT NOT NULL DEFAULT (datetime('now'))
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS inventory (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                product_name TEXT NOT NULL UNIQUE,
                quantity INTEGER NOT NULL DEFAULT 0
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// 写入一条生产记录，返回自增 id
    pub async fn insert_production(
        &self,
        machine_id: &str,
        rolls: i64,
    ) -> Result<i64, sqlx::Error> {
        let row = sqlx::query(
            "INSERT INTO production_logs (machine_id, rolls_produced) VALUES (?, ?) RETURNING id",
        )
        .bind(machine_id)
        .bind(rolls)
        .fetch_one(&self.pool)
        .await?;
        row.try_get("id")
    }

    /// 不区分大小写的精确名称查找
    pub async fn find_product_exact(&self, name: &str) -> Result<Option<Product>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT id, product_name, quantity FROM inventory
             WHERE LOWER(product_name) = LOWER(?)",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| Product {
            id: r.get("id"),
            name: r.get("product_name"),
            quantity: r.get("quantity"),
        }))
    }

    /// 不区分大小写的子串查找（可能多条，按名称排序）
    pub async fn find_products_partial(&self, name: &str) -> Result<Vec<Product>, sqlx::Error> {
        let pattern = format!("%{}%", name.to_lowercase());
        let rows = sqlx::query(
            "SELECT id, product_name, quantity FROM inventory
             WHERE LOWER(product_name) LIKE ?
             ORDER BY product_name",
        )
        .bind(pattern)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| Product {
                id: r.get("id"),
                name: r.get("product_name"),
                quantity: r.get("quantity"),
            })
            .collect())
    }

    /// 以 0 库存创建产品，返回 id
    pub async fn create_product(&self, name: &str) -> Result<i64, sqlx::Error> {
        let row = sqlx::query(
            "INSERT INTO inventory (product_name, quantity) VALUES (?, 0) RETURNING id",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        row.try_get("id")
    }

    /// 按 id 加减库存，返回调整后的数量（允许为负，不设下限）
    pub async fn adjust_quantity(&self, product_id: i64, delta: i64) -> Result<i64, sqlx::Error> {
        let row = sqlx::query(
            "UPDATE inventory SET quantity = quantity + ? WHERE id = ? RETURNING quantity",
        )
        .bind(delta)
        .bind(product_id)
        .fetch_one(&self.pool)
        .await?;
        row.try_get("quantity")
    }
}
