use crate::crd::{Application, Kappnav, KindActionMapping, Route};
use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service, ServiceAccount};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::api::rbac::v1::ClusterRoleBinding;
use kube::api::{Patch, PatchParams, PostParams};
use kube::{Api, Client, Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::fmt::Debug;
use tracing::debug;

static KAPPNAV_FIELD_MANAGER: &str = "kappnav-operator";

/// A resource kind the operator reads or converges.
pub trait ClusterResource
where
    Self: Resource<DynamicType = ()>
        + Clone
        + Debug
        + PartialEq
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static,
{
    /// Cluster scoped kinds cannot be owned by a namespaced instance.
    const NAMESPACED: bool = true;

    fn kind_name() -> String {
        Self::kind(&()).into_owned()
    }

    /// Cluster scoped kinds ignore `namespace`.
    fn api(client: Client, namespace: &str) -> Api<Self>;
}

macro_rules! namespaced_resources {
    ($($kind:ty),* $(,)?) => {
        $(
            impl ClusterResource for $kind {
                fn api(client: Client, namespace: &str) -> Api<Self> {
                    Api::namespaced(client, namespace)
                }
            }
        )*
    };
}

namespaced_resources!(
    Kappnav,
    KindActionMapping,
    Application,
    Route,
    ConfigMap,
    Deployment,
    Ingress,
    Secret,
    Service,
    ServiceAccount,
);

impl ClusterResource for ClusterRoleBinding {
    const NAMESPACED: bool = false;

    fn api(client: Client, _namespace: &str) -> Api<Self> {
        Api::all(client)
    }
}

/// The cluster API as seen by the reconciler. Every call is one round trip.
#[async_trait]
pub trait Cluster: Send + Sync {
    /// `Ok(None)` when the object does not exist.
    async fn get<K: ClusterResource>(&self, namespace: &str, name: &str) -> Result<Option<K>>;

    async fn create<K: ClusterResource>(&self, namespace: &str, object: &K) -> Result<K>;

    async fn replace<K: ClusterResource>(&self, namespace: &str, object: &K) -> Result<K>;

    /// Persists the status sub-document of the instance.
    async fn update_status(&self, instance: &Kappnav) -> Result<()>;
}

#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        KubeCluster { client }
    }
}

#[async_trait]
impl Cluster for KubeCluster {
    async fn get<K: ClusterResource>(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        let api = K::api(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn create<K: ClusterResource>(&self, namespace: &str, object: &K) -> Result<K> {
        let api = K::api(self.client.clone(), namespace);
        Ok(api.create(&post_params(), object).await?)
    }

    async fn replace<K: ClusterResource>(&self, namespace: &str, object: &K) -> Result<K> {
        let api = K::api(self.client.clone(), namespace);
        Ok(api.replace(&object.name_any(), &post_params(), object).await?)
    }

    async fn update_status(&self, instance: &Kappnav) -> Result<()> {
        let namespace = instance.namespace().unwrap_or_default();
        let name = instance.name_any();
        let api: Api<Kappnav> = Api::namespaced(self.client.clone(), &namespace);
        let patch = json!({ "status": instance.status });

        debug!("Patching status of Kappnav {}/{}", namespace, name);
        api.patch_status(
            &name,
            &PatchParams::apply(KAPPNAV_FIELD_MANAGER),
            &Patch::Merge(&patch),
        )
        .await
        .map_err(Error::from)?;
        Ok(())
    }
}

fn post_params() -> PostParams {
    PostParams {
        field_manager: Some(KAPPNAV_FIELD_MANAGER.to_string()),
        ..Default::default()
    }
}
