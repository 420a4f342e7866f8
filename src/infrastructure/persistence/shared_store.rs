use async_trait::async_trait;
use object_store::ObjectStore;
use object_store::local::LocalFileSystem;
use object_store::path::Path as StorePath;
use std::path::Path;
use std::sync::Arc;

/// The store both environments copy state through during a failover
/// cutover. Neither side assumes shared local disk.
#[async_trait]
pub trait SharedStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> anyhow::Result<()>;

    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;
}

/// `object_store`-backed implementation. The default backend is a local
/// filesystem prefix (an NFS or fuse mount in deployment); the interface
/// is the same for bucket-backed stores.
pub struct ObjectSharedStore {
    store: Arc<dyn ObjectStore>,
}

impl ObjectSharedStore {
    pub fn local(root: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(root)?;
        let store = LocalFileSystem::new_with_prefix(root)?;
        Ok(Self {
            store: Arc::new(store),
        })
    }
}

#[async_trait]
impl SharedStore for ObjectSharedStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> anyhow::Result<()> {
        let path = StorePath::from(key);
        self.store.put(&path, bytes.into()).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let path = StorePath::from(key);
        match self.store.get(&path).await {
            Ok(result) => Ok(Some(result.bytes().await?.to_vec())),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
