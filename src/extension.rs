use crate::cluster::Cluster;
use crate::crd::Kappnav;
use crate::error::Result;
use crate::logging::PassLog;
use async_trait::async_trait;
use kube::runtime::controller::Action;

/// Hook for distributions that manage resources beyond the standard set.
///
/// Runs after every successful pass with the resolved instance, whose status
/// already records the success. The returned action replaces the one the
/// pass would otherwise have produced.
#[async_trait]
pub trait Extension<C: Cluster>: Send + Sync {
    async fn reconcile_additional_resources(
        &self,
        cluster: &C,
        log: &PassLog,
        instance: &mut Kappnav,
    ) -> Result<Action>;
}
