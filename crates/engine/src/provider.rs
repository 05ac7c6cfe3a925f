//! Change providers and the builder interface they report through

use dashmap::DashMap;
use std::sync::Arc;
use vcsync_core::{Change, FilePath, ProgressHandle, ScanError, VcsKey};
use vcsync_dirty::DirtyScope;

/// Receives everything a provider discovers inside the scope it was given
///
/// Reports about paths outside the current scope are dropped.
pub trait ChangelistBuilder {
    /// A change, optionally with the name of the list it should go to
    fn process_change(&mut self, change: Change, list_hint: Option<&str>);

    fn process_unversioned_file(&mut self, file: &FilePath);

    fn process_ignored_file(&mut self, file: &FilePath);

    fn process_locally_deleted_file(&mut self, file: &FilePath);

    fn process_modified_without_checkout(&mut self, file: &FilePath);

    fn process_locked_folder(&mut self, file: &FilePath);

    fn process_logically_locked_folder(&mut self, file: &FilePath);

    fn process_switched_file(&mut self, file: &FilePath, branch: &str, recursive: bool);

    /// Diagnostic banner text for the user (first report of a pass wins)
    fn report_additional_info(&mut self, text: &str);
}

/// Enumerates the state of one version-control backend
///
/// Called from the update worker thread, never concurrently with itself.
/// An error aborts the current pass; [`ScanError::Cancelled`] aborts it
/// silently.
pub trait ChangeProvider: Send + Sync {
    fn get_changes(
        &self,
        scope: &DirtyScope,
        builder: &mut dyn ChangelistBuilder,
        progress: &ProgressHandle,
    ) -> Result<(), ScanError>;
}

/// Change providers keyed by backend
#[derive(Default)]
pub struct ProviderRegistry {
    providers: DashMap<VcsKey, Arc<dyn ChangeProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `provider` for `vcs`, returning the provider it replaced
    pub fn register(
        &self,
        vcs: VcsKey,
        provider: Arc<dyn ChangeProvider>,
    ) -> Option<Arc<dyn ChangeProvider>> {
        self.providers.insert(vcs, provider)
    }

    pub fn unregister(&self, vcs: &VcsKey) -> bool {
        self.providers.remove(vcs).is_some()
    }

    pub fn get(&self, vcs: &VcsKey) -> Option<Arc<dyn ChangeProvider>> {
        self.providers.get(vcs).map(|entry| entry.value().clone())
    }

    pub fn keys(&self) -> Vec<VcsKey> {
        self.providers.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Silent;

    impl ChangeProvider for Silent {
        fn get_changes(
            &self,
            _scope: &DirtyScope,
            _builder: &mut dyn ChangelistBuilder,
            _progress: &ProgressHandle,
        ) -> Result<(), ScanError> {
            Ok(())
        }
    }

    #[test]
    fn test_register_and_unregister() {
        let registry = ProviderRegistry::new();
        let git = VcsKey::new("git");

        assert!(registry.register(git.clone(), Arc::new(Silent)).is_none());
        assert!(registry.register(git.clone(), Arc::new(Silent)).is_some());
        assert!(registry.get(&git).is_some());
        assert_eq!(registry.keys(), vec![git.clone()]);

        assert!(registry.unregister(&git));
        assert!(!registry.unregister(&git));
        assert!(registry.is_empty());
    }
}
