use std::sync::Arc;

use super::attributes::AttributeCatalog;
use super::blocks::{CapacityOracle, TreeAggregator};
use super::enrollment::collaborators::{FileStorage, Notifier};
use super::enrollment::EnrollmentCoordinator;
use super::store::RegistryStore;

/// Bundle of engine services sharing one store, used as router state.
pub struct RegistrationDesk<S, F, N> {
    pub coordinator: EnrollmentCoordinator<S, F, N>,
    pub oracle: CapacityOracle<S>,
    pub trees: TreeAggregator<S>,
    pub catalog: AttributeCatalog<S>,
    files: Arc<F>,
}

impl<S, F, N> RegistrationDesk<S, F, N>
where
    S: RegistryStore + 'static,
    F: FileStorage + 'static,
    N: Notifier + 'static,
{
    pub fn new(store: Arc<S>, files: Arc<F>, notifier: Arc<N>, max_tree_depth: usize) -> Self {
        Self {
            coordinator: EnrollmentCoordinator::new(Arc::clone(&store), Arc::clone(&files), notifier),
            oracle: CapacityOracle::new(Arc::clone(&store)),
            trees: TreeAggregator::with_max_depth(Arc::clone(&store), max_tree_depth),
            catalog: AttributeCatalog::new(store),
            files,
        }
    }

    pub fn files(&self) -> &F {
        &self.files
    }
}
