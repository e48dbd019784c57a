//! Tenant configuration registry.
//!
//! Reads sit on the hot path of every publish decision, so the contract is
//! a single point lookup. `get` never fails: an unconfigured tenant
//! resolves to the safe-default record (everything relayed, default
//! limits).

use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

use tokio::sync::RwLock;

use crate::{
    error::Result,
    models::{TenantId, TenantRecord},
    time::Clock,
};

/// Storage contract for tenant records.
pub trait TenantRegistry: Send + Sync + 'static {
    /// Resolves the record for a tenant, falling back to defaults.
    fn get(&self, tenant: &TenantId) -> Pin<Box<dyn Future<Output = TenantRecord> + Send + '_>>;

    /// Stores a tenant record. Reached only through the admin route.
    fn put(&self, record: TenantRecord) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// In-memory tenant registry.
pub struct MemoryTenantRegistry {
    records: RwLock<HashMap<TenantId, TenantRecord>>,
    clock: Arc<dyn Clock>,
}

impl MemoryTenantRegistry {
    /// Creates an empty registry.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { records: RwLock::new(HashMap::new()), clock }
    }
}

impl TenantRegistry for MemoryTenantRegistry {
    fn get(&self, tenant: &TenantId) -> Pin<Box<dyn Future<Output = TenantRecord> + Send + '_>> {
        let tenant = tenant.clone();
        Box::pin(async move {
            self.records
                .read()
                .await
                .get(&tenant)
                .cloned()
                .unwrap_or_else(|| TenantRecord::with_defaults(tenant, self.clock.now()))
        })
    }

    fn put(&self, record: TenantRecord) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.records.write().await.insert(record.id.clone(), record);
            Ok(())
        })
    }
}
