use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::Transport;
use sqlx::{postgres::PgRow, types::Json, PgPool, Row};

use crate::repository::DeviceRepository;
use crate::types::{Device, DeviceCredentials, DeviceStatus, StatusPatch};

const DEVICE_COLUMNS: &str = "id, name, transport, address, vendor, username, password, \
                              stream_url, status, created_at, updated_at";

pub struct PgDeviceRepository {
    pool: PgPool,
}

impl PgDeviceRepository {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .context("failed to connect to database")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to run migrations")?;

        Ok(Self { pool })
    }

    fn row_to_device(row: &PgRow) -> Result<Device> {
        let transport: String = row.try_get("transport")?;
        let transport: Transport = transport.parse().map_err(|e: String| anyhow!(e))?;
        let Json(status): Json<DeviceStatus> = row.try_get("status")?;
        Ok(Device {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            transport,
            address: row.try_get("address")?,
            vendor: row.try_get("vendor")?,
            credentials: DeviceCredentials {
                username: row.try_get("username")?,
                password: row.try_get("password")?,
                stream_url: row.try_get("stream_url")?,
            },
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
            updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
            status,
        })
    }
}

#[async_trait]
impl DeviceRepository for PgDeviceRepository {
    async fn create(&self, device: Device) -> Result<Device> {
        sqlx::query(
            r#"
            INSERT INTO bridge_devices (
                id, name, transport, address, vendor, username, password,
                stream_url, status, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(&device.id)
        .bind(&device.name)
        .bind(device.transport.as_str())
        .bind(&device.address)
        .bind(&device.vendor)
        .bind(&device.credentials.username)
        .bind(&device.credentials.password)
        .bind(&device.credentials.stream_url)
        .bind(Json(&device.status))
        .bind(device.created_at)
        .bind(device.updated_at)
        .execute(&self.pool)
        .await
        .context("failed to insert device")?;

        Ok(device)
    }

    async fn get(&self, id: &str) -> Result<Option<Device>> {
        let row = sqlx::query(&format!(
            "SELECT {DEVICE_COLUMNS} FROM bridge_devices WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to fetch device")?;

        row.as_ref().map(Self::row_to_device).transpose()
    }

    async fn list(&self) -> Result<Vec<Device>> {
        let rows = sqlx::query(&format!(
            "SELECT {DEVICE_COLUMNS} FROM bridge_devices ORDER BY created_at, id"
        ))
        .fetch_all(&self.pool)
        .await
        .context("failed to list devices")?;

        rows.iter().map(Self::row_to_device).collect()
    }

    async fn merge_status(&self, id: &str, patch: &StatusPatch) -> Result<Option<Device>> {
        let mut tx = self.pool.begin().await.context("failed to begin transaction")?;

        let row = sqlx::query(&format!(
            "SELECT {DEVICE_COLUMNS} FROM bridge_devices WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .context("failed to lock device")?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut device = Self::row_to_device(&row)?;
        patch.apply(&mut device.status);
        device.updated_at = Utc::now();

        sqlx::query("UPDATE bridge_devices SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(id)
            .bind(Json(&device.status))
            .bind(device.updated_at)
            .execute(&mut *tx)
            .await
            .context("failed to update device status")?;

        tx.commit().await.context("failed to commit status update")?;
        Ok(Some(device))
    }

    async fn set_stream_url(&self, id: &str, stream_url: &str) -> Result<Option<Device>> {
        let row = sqlx::query(&format!(
            "UPDATE bridge_devices SET stream_url = $2, updated_at = NOW() \
             WHERE id = $1 RETURNING {DEVICE_COLUMNS}"
        ))
        .bind(id)
        .bind(stream_url)
        .fetch_optional(&self.pool)
        .await
        .context("failed to update stream url")?;

        row.as_ref().map(Self::row_to_device).transpose()
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("database health check failed")?;
        Ok(())
    }
}
