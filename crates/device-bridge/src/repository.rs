use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::types::{Device, StatusPatch};

/// Device persistence as seen by the bridge.
///
/// `merge_status` and `set_stream_url` must be atomic per device and bump `updated_at`.
/// Both return `None` for an unknown id.
#[async_trait]
pub trait DeviceRepository: Send + Sync {
    async fn create(&self, device: Device) -> Result<Device>;
    async fn get(&self, id: &str) -> Result<Option<Device>>;
    async fn list(&self) -> Result<Vec<Device>>;
    async fn merge_status(&self, id: &str, patch: &StatusPatch) -> Result<Option<Device>>;
    async fn set_stream_url(&self, id: &str, stream_url: &str) -> Result<Option<Device>>;
    async fn health_check(&self) -> Result<()>;
}

#[derive(Default)]
pub struct MemoryDeviceRepository {
    devices: RwLock<HashMap<String, Device>>,
}

impl MemoryDeviceRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeviceRepository for MemoryDeviceRepository {
    async fn create(&self, device: Device) -> Result<Device> {
        let mut devices = self.devices.write().await;
        if devices.contains_key(&device.id) {
            anyhow::bail!("device {} already exists", device.id);
        }
        devices.insert(device.id.clone(), device.clone());
        Ok(device)
    }

    async fn get(&self, id: &str) -> Result<Option<Device>> {
        Ok(self.devices.read().await.get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<Device>> {
        let mut devices: Vec<Device> = self.devices.read().await.values().cloned().collect();
        devices.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(devices)
    }

    async fn merge_status(&self, id: &str, patch: &StatusPatch) -> Result<Option<Device>> {
        let mut devices = self.devices.write().await;
        let Some(device) = devices.get_mut(id) else {
            return Ok(None);
        };
        patch.apply(&mut device.status);
        device.updated_at = Utc::now();
        Ok(Some(device.clone()))
    }

    async fn set_stream_url(&self, id: &str, stream_url: &str) -> Result<Option<Device>> {
        let mut devices = self.devices.write().await;
        let Some(device) = devices.get_mut(id) else {
            return Ok(None);
        };
        device.credentials.stream_url = Some(stream_url.to_string());
        device.updated_at = Utc::now();
        Ok(Some(device.clone()))
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}
