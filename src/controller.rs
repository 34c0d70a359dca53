use crate::cluster::{Cluster, KubeCluster};
use crate::console;
use crate::converge::create_or_update;
use crate::crd::{
    Application, ApplicationSpec, Kappnav, KindActionMapping, KindActionMappingSpec, Route,
    RouteSpec,
};
use crate::defaults;
use crate::environment::{Topology, classify};
use crate::error::{Error, Result};
use crate::logging::PassLog;
use crate::resources::{self, object_meta};
use crate::state::ControllerContext;
use crate::status::{MIN_RETRY_INTERVAL, manage_error, manage_success};
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service, ServiceAccount};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::api::rbac::v1::ClusterRoleBinding;
use k8s_openapi::NamespaceResourceScope;
use kube::api::ObjectMeta;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::{WatchStreamExt, predicates, reflector, watcher};
use kube::{Api, Client, Resource, ResourceExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

pub async fn create_client() -> anyhow::Result<Client> {
    info!("Initializing K8s client");
    let client = Client::try_default().await?;
    let api_server_info = client.apiserver_version().await?;
    info!(
        "Connected to namespace {}, Kubernetes API server with version {}.{}",
        client.default_namespace(),
        api_server_info.major,
        api_server_info.minor
    );
    Ok(client)
}

fn api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
{
    match namespace {
        Some(namespace) => Api::namespaced(client.clone(), namespace),
        None => Api::all(client.clone()),
    }
}

/// Watches Kappnav instances and the resources they own until a shutdown
/// signal arrives.
pub async fn run(
    client: Client,
    ctx: Arc<ControllerContext<KubeCluster>>,
    watch_namespace: Option<&str>,
    ready: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let config = watcher::Config::default();
    match watch_namespace {
        Some(namespace) => info!("Watching Kappnav instances in namespace {}", namespace),
        None => info!("Watching Kappnav instances in all namespaces"),
    }

    let (reader, writer) = reflector::store();
    let instances = watcher(api::<Kappnav>(&client, watch_namespace), config.clone())
        .default_backoff()
        .reflect(writer)
        .applied_objects();

    let controller = Controller::for_stream(spec_changes(instances), reader)
        .owns(api::<Deployment>(&client, watch_namespace), config.clone())
        .owns(api::<ConfigMap>(&client, watch_namespace), config.clone())
        .owns(api::<Secret>(&client, watch_namespace), config.clone())
        .owns(api::<Service>(&client, watch_namespace), config.clone())
        .owns(api::<ServiceAccount>(&client, watch_namespace), config.clone())
        .owns(api::<Ingress>(&client, watch_namespace), config)
        .shutdown_on_signal();

    ready.store(true, Ordering::Relaxed);
    controller
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((object, action)) => debug!("Reconciled {:?}, next {:?}", object, action),
                Err(e) => warn!("Reconcile failed: {}", e),
            }
        })
        .await;
    ready.store(false, Ordering::Relaxed);

    info!("Controller stopped");
    Ok(())
}

/// Drops instance events that leave the generation unchanged. Status writes
/// made by a pass therefore never trigger the next one.
fn spec_changes<S>(instances: S) -> impl Stream<Item = Result<Kappnav, watcher::Error>> + Send
where
    S: Stream<Item = Result<Kappnav, watcher::Error>> + Send,
{
    instances.predicate_filter(predicates::generation)
}

async fn reconcile(
    instance: Arc<Kappnav>,
    ctx: Arc<ControllerContext<KubeCluster>>,
) -> Result<Action> {
    let namespace = instance.namespace().unwrap_or_default();
    reconcile_instance(&ctx, &namespace, &instance.name_any(), Utc::now()).await
}

fn error_policy(
    instance: Arc<Kappnav>,
    error: &Error,
    _ctx: Arc<ControllerContext<KubeCluster>>,
) -> Action {
    warn!(
        "Failed to read Kappnav {}/{}: {}",
        instance.namespace().unwrap_or_default(),
        instance.name_any(),
        error
    );
    Action::requeue(MIN_RETRY_INTERVAL)
}

/// One reconciliation pass for the instance at `namespace/name`.
///
/// Only a failure to read the instance is returned as an error. Every other
/// failure is recorded on the instance status and turned into a retry.
pub async fn reconcile_instance<C: Cluster>(
    ctx: &ControllerContext<C>,
    namespace: &str,
    name: &str,
    now: DateTime<Utc>,
) -> Result<Action> {
    info!("Reconciling Kappnav {}/{}", namespace, name);
    let Some(mut instance) = ctx.cluster.get::<Kappnav>(namespace, name).await? else {
        debug!("Kappnav {}/{} no longer exists", namespace, name);
        return Ok(Action::await_change());
    };

    let defaults = match ctx.defaults.kappnav() {
        Ok(defaults) => defaults,
        Err(e) => {
            let log = PassLog::for_instance(&instance);
            log.error(format!("Failed to process default values file, Error: {}", e));
            return Ok(manage_error(&ctx.cluster, &log, &e, &mut instance, now).await);
        }
    };
    defaults::resolve(&mut instance.spec, &defaults);
    let log = PassLog::for_instance(&instance);
    log.debug(format!("Log level set to {:?}", log.level()));

    if let Err(e) = converge(ctx, &log, &instance).await {
        log.error(format!("Failed to reconcile Kappnav, Error: {}", e));
        return Ok(manage_error(&ctx.cluster, &log, &e, &mut instance, now).await);
    }

    let action = manage_success(&ctx.cluster, &log, &mut instance, now).await;
    match &ctx.extension {
        Some(extension) => {
            extension
                .reconcile_additional_resources(&ctx.cluster, &log, &mut instance)
                .await
        }
        None => Ok(action),
    }
}

/// Converges every owned resource in a fixed order, stopping at the first
/// failure.
async fn converge<C: Cluster>(
    ctx: &ControllerContext<C>,
    log: &PassLog,
    instance: &Kappnav,
) -> Result<()> {
    log.entry("converge");
    let cluster = &ctx.cluster;

    log.info("Create or update service account");
    let account = ServiceAccount {
        metadata: object_meta(instance, resources::service_account_name(instance)),
        ..Default::default()
    };
    create_or_update(cluster, log, instance, account, |account| {
        resources::customize_service_account(account, instance);
        Ok(())
    })
    .await?;

    log.info("Create or update cluster role binding");
    let binding = ClusterRoleBinding {
        metadata: ObjectMeta {
            name: Some(resources::cluster_role_binding_name(instance)),
            ..Default::default()
        },
        ..Default::default()
    };
    let converged = create_or_update(cluster, log, instance, binding, |binding| {
        resources::customize_cluster_role_binding(binding, instance);
        Ok(())
    })
    .await;
    match converged {
        Err(e) if e.is_already_exists() => {
            log.debug(format!("Cluster role binding already exists: {}", e));
        }
        other => {
            other?;
        }
    }

    log.info("Create or update kappnav application");
    let mut application = Application::new(resources::APPLICATION_NAME, ApplicationSpec::default());
    application.metadata.namespace = instance.namespace();
    create_or_update(cluster, log, instance, application, |application| {
        resources::customize_application(application, instance);
        Ok(())
    })
    .await?;

    let topology = classify(instance.kube_env());
    log.debug(format!("Converging {:?} topology", topology));
    let kappnav_url = converge_networking(ctx, log, instance, topology).await?;

    log.info("Create or update action, section and status config maps");
    for template in ctx.templates.iter() {
        log.debug(format!("Render template {}", template.name));
        let rendered = template.render(instance)?;
        let name = rendered
            .metadata
            .name
            .clone()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| Error::Template {
                name: template.name.clone(),
                message: "rendered config map has no name".to_string(),
            })?;
        let map = ConfigMap {
            metadata: object_meta(instance, name),
            ..Default::default()
        };
        create_or_update(cluster, log, instance, map, |map| {
            resources::customize_template_map(map, &rendered, instance, template.map_type);
            Ok(())
        })
        .await?;
    }

    let console = match topology {
        Topology::OpenShift(flavor) => console::discover(cluster, log, flavor).await,
        Topology::LocalCluster => None,
    };
    log.info("Create or update builtin config");
    let builtin = ConfigMap {
        metadata: object_meta(instance, resources::BUILTIN_CONFIG_NAME),
        ..Default::default()
    };
    create_or_update(cluster, log, instance, builtin, |map| {
        resources::customize_builtin_map(map, instance, topology, console.as_ref());
        Ok(())
    })
    .await?;

    log.info("Create or update kappnav-config");
    let kappnav_config = ConfigMap {
        metadata: object_meta(instance, resources::KAPPNAV_CONFIG_NAME),
        ..Default::default()
    };
    create_or_update(cluster, log, instance, kappnav_config, |map| {
        resources::customize_kappnav_config_map(map, instance, topology, &kappnav_url);
        Ok(())
    })
    .await?;

    if let Some(source) = &ctx.kam_defaults {
        log.info("Create or update default kind action mapping");
        let defaults = source.kind_action_mapping()?;
        let mut mapping =
            KindActionMapping::new(resources::DEFAULT_KAM_NAME, KindActionMappingSpec::default());
        mapping.metadata.namespace = instance.namespace();
        create_or_update(cluster, log, instance, mapping, |mapping| {
            resources::customize_kind_action_mapping(mapping, &defaults, instance);
            Ok(())
        })
        .await?;
    }

    log.info("Create or update UI deployment");
    let ui = Deployment {
        metadata: object_meta(instance, resources::ui_deployment_name(instance)),
        ..Default::default()
    };
    create_or_update(cluster, log, instance, ui, |deployment| {
        resources::customize_ui_deployment(deployment, instance, topology);
        Ok(())
    })
    .await?;

    log.info("Create or update controller deployment");
    let controller = Deployment {
        metadata: object_meta(instance, resources::controller_deployment_name(instance)),
        ..Default::default()
    };
    create_or_update(cluster, log, instance, controller, |deployment| {
        resources::customize_controller_deployment(deployment, instance);
        Ok(())
    })
    .await?;

    log.exit("converge");
    Ok(())
}

/// Converges the resources exposing the UI and returns its external URL,
/// which is empty until a route host has been assigned.
async fn converge_networking<C: Cluster>(
    ctx: &ControllerContext<C>,
    log: &PassLog,
    instance: &Kappnav,
    topology: Topology,
) -> Result<String> {
    let cluster = &ctx.cluster;
    let service = Service {
        metadata: object_meta(instance, resources::ui_service_name(instance)),
        ..Default::default()
    };

    match topology {
        Topology::LocalCluster => {
            log.info("Create or update dummy secret");
            let secret = Secret {
                metadata: object_meta(instance, resources::tls_secret_name(instance)),
                ..Default::default()
            };
            create_or_update(cluster, log, instance, secret, |secret| {
                resources::customize_secret(secret, instance);
                Ok(())
            })
            .await?;

            log.info("Create or update UI service");
            create_or_update(cluster, log, instance, service, |service| {
                resources::customize_ui_service(service, instance, topology);
                Ok(())
            })
            .await?;

            log.info("Create or update UI ingress");
            let ingress = Ingress {
                metadata: object_meta(instance, resources::ui_ingress_name(instance)),
                ..Default::default()
            };
            create_or_update(cluster, log, instance, ingress, |ingress| {
                resources::customize_ui_ingress(ingress, instance);
                Ok(())
            })
            .await?;
            Ok(String::new())
        }
        Topology::OpenShift(_) => {
            log.info("Create or update UI service");
            create_or_update(cluster, log, instance, service, |service| {
                resources::customize_ui_service(service, instance, topology);
                Ok(())
            })
            .await?;

            log.info("Create or update UI route");
            let mut route = Route::new(&resources::ui_service_name(instance), RouteSpec::default());
            route.metadata.namespace = instance.namespace();
            let converged = create_or_update(cluster, log, instance, route, |route| {
                resources::customize_ui_route(route, instance);
                Ok(())
            })
            .await?;
            Ok(converged.object.url())
        }
    }
}
