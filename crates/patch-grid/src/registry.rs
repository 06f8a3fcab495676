//! Registry of the current index manager per data split.
//!
//! Components that resolve coordinates (dataset, running-average buffer)
//! take a registry handle explicitly. [`GridIndexRegistry::global`] exists
//! for callers that cannot thread one through.
//!
//! Replacing an entry is not synchronised with readers that already hold
//! the previous `Arc`: register every split before spawning workers.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use split_common::{DataSplit, SplitError, SplitResult};
use tracing::info;

use crate::index::GridIndexManager;

#[derive(Debug, Default)]
pub struct GridIndexRegistry {
    managers: RwLock<HashMap<DataSplit, Arc<GridIndexManager>>>,
}

static GLOBAL_REGISTRY: OnceLock<GridIndexRegistry> = OnceLock::new();

impl GridIndexRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry.
    pub fn global() -> &'static GridIndexRegistry {
        GLOBAL_REGISTRY.get_or_init(GridIndexRegistry::new)
    }

    /// Make `manager` the current one for `split`, replacing any previous one.
    pub fn register(&self, split: DataSplit, manager: GridIndexManager) -> Arc<GridIndexManager> {
        let manager = Arc::new(manager);
        let mut managers = self.managers.write().unwrap_or_else(|e| e.into_inner());
        let replaced = managers.insert(split, Arc::clone(&manager)).is_some();

        info!(
            split = %split,
            shape = %manager.get_data_shape(),
            grid_size = %manager.grid_size(),
            patch_size = manager.patch_size(),
            grid_count = manager.grid_count(),
            replaced,
            "Registered grid index manager"
        );

        manager
    }

    /// Current manager for `split`.
    pub fn get_instance(&self, split: DataSplit) -> SplitResult<Arc<GridIndexManager>> {
        self.managers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&split)
            .cloned()
            .ok_or(SplitError::NotRegistered(split))
    }

    pub fn contains(&self, split: DataSplit) -> bool {
        self.managers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&split)
    }

    /// Drop the manager for `split`, returning it if present.
    pub fn remove(&self, split: DataSplit) -> Option<Arc<GridIndexManager>> {
        self.managers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&split)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use split_common::{GridAlignment, GridSize, TilingMode};

    fn manager(frames: usize) -> GridIndexManager {
        GridIndexManager::new(
            (frames, 64, 64, 2).into(),
            GridSize::square(32),
            32,
            GridAlignment::LeftTop,
            TilingMode::ShiftBoundary,
        )
        .unwrap()
    }

    #[test]
    fn test_register_and_get() {
        let registry = GridIndexRegistry::new();
        assert!(matches!(
            registry.get_instance(DataSplit::Train),
            Err(SplitError::NotRegistered(DataSplit::Train))
        ));

        registry.register(DataSplit::Train, manager(2));
        assert!(registry.contains(DataSplit::Train));
        assert!(!registry.contains(DataSplit::Val));
        assert_eq!(registry.get_instance(DataSplit::Train).unwrap().grid_count(), 8);
    }

    #[test]
    fn test_register_replaces_previous() {
        let registry = GridIndexRegistry::new();
        let first = registry.register(DataSplit::Val, manager(1));
        registry.register(DataSplit::Val, manager(3));

        assert_eq!(first.grid_count(), 4);
        assert_eq!(registry.get_instance(DataSplit::Val).unwrap().grid_count(), 12);
    }

    #[test]
    fn test_remove() {
        let registry = GridIndexRegistry::new();
        registry.register(DataSplit::Test, manager(1));
        assert!(registry.remove(DataSplit::Test).is_some());
        assert!(registry.get_instance(DataSplit::Test).is_err());
    }

    #[test]
    fn test_global_is_shared() {
        let a = GridIndexRegistry::global();
        let b = GridIndexRegistry::global();
        assert!(std::ptr::eq(a, b));

        a.register(DataSplit::Train, manager(1));
        assert_eq!(b.get_instance(DataSplit::Train).unwrap().grid_count(), 4);
    }
}
