use crate::cluster::Cluster;
use crate::defaults::DefaultsSource;
use crate::extension::Extension;
use crate::templates::TemplateSet;
use std::sync::Arc;

/// Shared by every reconciliation pass.
pub struct ControllerContext<C: Cluster> {
    pub(crate) cluster: C,
    pub(crate) defaults: DefaultsSource,
    pub(crate) kam_defaults: Option<DefaultsSource>,
    pub(crate) templates: TemplateSet,
    pub(crate) extension: Option<Arc<dyn Extension<C>>>,
}
