//! Sets the fields the operator owns on each converged resource.
//!
//! Every customizer starts from the stored object (or a blank one carrying
//! only name and namespace) and leaves fields it does not own alone.

use crate::console::ConsoleUrls;
use crate::containers;
use crate::crd::{
    Application, Kappnav, KindActionMapping, KindActionMappingSpec, Route, TlsConfig,
};
use crate::defaults;
use crate::environment::Topology;
use crate::templates::MapType;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{
    ConfigMap, Container, LocalObjectReference, Secret, Service, ServiceAccount, ServicePort,
    Volume,
};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, ServiceBackendPort,
};
use k8s_openapi::api::rbac::v1::{ClusterRoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use kube::api::ObjectMeta;
use std::collections::BTreeMap;

pub const NAME_LABEL: &str = "app.kubernetes.io/name";
pub const INSTANCE_LABEL: &str = "app.kubernetes.io/instance";
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const COMPONENT_LABEL: &str = "app.kubernetes.io/component";
pub const MAP_TYPE_LABEL: &str = "kappnav.io/map-type";
pub const MANAGED_BY: &str = "kappnav-operator";

pub const APPLICATION_NAME: &str = "kappnav";
pub const BUILTIN_CONFIG_NAME: &str = "builtin";
pub const KAPPNAV_CONFIG_NAME: &str = "kappnav-config";
pub const DEFAULT_KAM_NAME: &str = "default";

const OAUTH_REDIRECT_ANNOTATION: &str =
    "serviceaccounts.openshift.io/oauth-redirectreference.primary";
const SERVING_CERT_ANNOTATION: &str = "service.alpha.openshift.io/serving-cert-secret-name";
const HIDDEN_APPLICATION_ANNOTATION: &str = "kappnav.application.hidden";

const UI_PORT: i32 = 3000;
const LOCAL_CONSOLE_URL: &str =
    "http://127.0.0.1:8001/api/v1/namespaces/kube-system/services/http:kubernetes-dashboard:/proxy/#!";

const STATUS_COLOR_MAPPING: &str = r##"{ "values": { "Normal": "GREEN", "Completed": "GREEN", "Pending": "YELLOW", "Warning": "YELLOW", "Problem": "RED", "Failed": "RED", "Unknown": "GREY", "In Progress": "BLUE"},"colors": { "GREEN": "#5aa700", "BLUE": "#4589ff", "YELLOW": "#B4B017", "RED": "#A74343", "GREY": "#808080"} }"##;
const APP_STATUS_PRECEDENCE: &str =
    r#"[ "Failed", "Problem", "Warning", "Pending", "In Progress", "Unknown", "Normal", "Completed" ]"#;

const DASHBOARDS: [(&str, &str); 4] = [
    ("liberty-problems-dashboard", "Liberty-Problems-K5-20190909"),
    ("liberty-traffic-dashboard", "Liberty-Traffic-K5-20190909"),
    ("grafana-dashboard", "Liberty-Metrics-G5-20190521"),
    ("grafana-m2-dashboard", "Liberty-Metrics-M2-G5-20190521"),
];

fn suffixed(instance: &Kappnav, suffix: &str) -> String {
    format!("{}-{}", instance.name_any(), suffix)
}

pub fn service_account_name(instance: &Kappnav) -> String {
    suffixed(instance, "sa")
}

pub fn cluster_role_binding_name(instance: &Kappnav) -> String {
    format!(
        "{}-{}-crb",
        instance.name_any(),
        instance.namespace().unwrap_or_default()
    )
}

/// Shared by the UI service and the route in front of it.
pub fn ui_service_name(instance: &Kappnav) -> String {
    suffixed(instance, "ui-service")
}

pub fn tls_secret_name(instance: &Kappnav) -> String {
    suffixed(instance, "ui-service-tls")
}

pub fn ui_ingress_name(instance: &Kappnav) -> String {
    suffixed(instance, "ui-ingress")
}

pub fn ui_deployment_name(instance: &Kappnav) -> String {
    suffixed(instance, "ui")
}

pub fn controller_deployment_name(instance: &Kappnav) -> String {
    suffixed(instance, "controller")
}

/// Metadata of a blank object in the instance's namespace.
pub fn object_meta(instance: &Kappnav, name: impl Into<String>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.into()),
        namespace: instance.namespace(),
        ..Default::default()
    }
}

/// Labels for an owned object, merged over the labels already stored on it.
///
/// The instance's own labels pass through, except the keys that identify the
/// instance and component. The map type label is never changed once set.
pub fn labels(
    instance: &Kappnav,
    existing: Option<&BTreeMap<String, String>>,
    component: Option<&str>,
    map_type: Option<MapType>,
) -> BTreeMap<String, String> {
    let mut labels = existing.cloned().unwrap_or_default();
    labels.insert(NAME_LABEL.to_string(), instance.name_any());
    labels.insert(INSTANCE_LABEL.to_string(), instance.name_any());
    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string());

    let has_map_type = existing
        .and_then(|labels| labels.get(MAP_TYPE_LABEL))
        .is_some_and(|value| !value.is_empty());
    if let (Some(map_type), false) = (map_type, has_map_type) {
        labels.insert(MAP_TYPE_LABEL.to_string(), map_type.as_str().to_string());
    }

    if let Some(component) = component.filter(|c| !c.is_empty()) {
        labels.insert(COMPONENT_LABEL.to_string(), component.to_string());
    }

    for (key, value) in instance.labels() {
        if key != INSTANCE_LABEL && key != COMPONENT_LABEL && key != MANAGED_BY_LABEL {
            labels.insert(key.clone(), value.clone());
        }
    }
    labels
}

/// Labels an object as its own component.
fn label(meta: &mut ObjectMeta, instance: &Kappnav, map_type: Option<MapType>) {
    let merged = labels(
        instance,
        meta.labels.as_ref(),
        meta.name.as_deref(),
        map_type,
    );
    meta.labels = Some(merged);
}

fn annotate(meta: &mut ObjectMeta, annotations: &[(&str, String)]) {
    let existing = meta.annotations.get_or_insert_with(BTreeMap::new);
    for (key, value) in annotations {
        existing.insert(key.to_string(), value.clone());
    }
}

/// Fills `key` unless it already holds a non-empty value.
fn seed(data: &mut BTreeMap<String, String>, key: &str, value: impl Into<String>) {
    let current = data.entry(key.to_string()).or_default();
    if current.is_empty() {
        *current = value.into();
    }
}

pub fn customize_service_account(account: &mut ServiceAccount, instance: &Kappnav) {
    label(&mut account.metadata, instance, None);
    let redirect = format!(
        r#"{{"kind":"OAuthRedirectReference","apiVersion":"v1","reference":{{"kind":"Route","name":"{}"}}}}"#,
        ui_service_name(instance)
    );
    annotate(
        &mut account.metadata,
        &[(OAUTH_REDIRECT_ANNOTATION, redirect)],
    );

    let namespace = account.namespace().unwrap_or_default();
    let pull_secrets = std::iter::once(format!("sa-{}", namespace))
        .chain(instance.pull_secrets().iter().cloned())
        .map(|name| LocalObjectReference { name })
        .collect();
    account.image_pull_secrets = Some(pull_secrets);
}

pub fn customize_cluster_role_binding(binding: &mut ClusterRoleBinding, instance: &Kappnav) {
    label(&mut binding.metadata, instance, None);
    binding.subjects = Some(vec![Subject {
        kind: "ServiceAccount".to_string(),
        name: service_account_name(instance),
        namespace: instance.namespace(),
        ..Default::default()
    }]);
    binding.role_ref = RoleRef {
        api_group: "rbac.authorization.k8s.io".to_string(),
        kind: "ClusterRole".to_string(),
        name: "cluster-admin".to_string(),
    };
}

pub fn customize_application(application: &mut Application, instance: &Kappnav) {
    label(&mut application.metadata, instance, None);
    annotate(
        &mut application.metadata,
        &[(HIDDEN_APPLICATION_ANNOTATION, "true".to_string())],
    );
}

pub fn customize_secret(secret: &mut Secret, instance: &Kappnav) {
    label(&mut secret.metadata, instance, None);
}

/// The UI service: a NodePort on local clusters, otherwise a ClusterIP
/// service fronting the OAuth proxy. Ports are rebuilt when the type changes.
pub fn customize_ui_service(service: &mut Service, instance: &Kappnav, topology: Topology) {
    label(&mut service.metadata, instance, None);
    annotate(
        &mut service.metadata,
        &[(SERVING_CERT_ANNOTATION, tls_secret_name(instance))],
    );

    let spec = service.spec.get_or_insert_with(Default::default);
    let service_type = match topology {
        Topology::LocalCluster => "NodePort",
        Topology::OpenShift(_) => "ClusterIP",
    };
    if spec.type_.as_deref() != Some(service_type) {
        spec.type_ = Some(service_type.to_string());
        spec.ports = None;
    }
    if spec.ports.as_ref().is_none_or(Vec::is_empty) {
        let port = match topology {
            Topology::LocalCluster => ServicePort {
                name: Some("https".to_string()),
                port: UI_PORT,
                target_port: Some(IntOrString::Int(UI_PORT)),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            },
            Topology::OpenShift(_) => ServicePort {
                name: Some("proxy".to_string()),
                port: 443,
                target_port: Some(IntOrString::Int(8443)),
                ..Default::default()
            },
        };
        spec.ports = Some(vec![port]);
    }
    spec.selector = Some(BTreeMap::from([(
        COMPONENT_LABEL.to_string(),
        ui_deployment_name(instance),
    )]));
}

/// Routes `/kappnav-ui` and `/kappnav` to the UI service. Rules edited on the
/// cluster are left in place.
pub fn customize_ui_ingress(ingress: &mut Ingress, instance: &Kappnav) {
    label(&mut ingress.metadata, instance, None);
    let spec = ingress.spec.get_or_insert_with(Default::default);
    if spec.rules.as_ref().is_some_and(|rules| !rules.is_empty()) {
        return;
    }

    let path = |path: &str| HTTPIngressPath {
        path: Some(path.to_string()),
        path_type: "Prefix".to_string(),
        backend: IngressBackend {
            service: Some(IngressServiceBackend {
                name: ui_service_name(instance),
                port: Some(ServiceBackendPort {
                    number: Some(UI_PORT),
                    ..Default::default()
                }),
            }),
            ..Default::default()
        },
    };
    spec.rules = Some(vec![IngressRule {
        http: Some(HTTPIngressRuleValue {
            paths: vec![path("/kappnav-ui"), path("/kappnav")],
        }),
        ..Default::default()
    }]);
}

pub fn customize_ui_route(route: &mut Route, instance: &Kappnav) {
    label(&mut route.metadata, instance, None);
    let tls = route.spec.tls.get_or_insert_with(TlsConfig::default);
    tls.termination = "reencrypt".to_string();
    route.spec.to.kind = "Service".to_string();
    route.spec.to.name = ui_service_name(instance);
}

/// Labels a template-driven document and seeds its data once.
pub fn customize_template_map(
    map: &mut ConfigMap,
    rendered: &ConfigMap,
    instance: &Kappnav,
    map_type: Option<MapType>,
) {
    label(&mut map.metadata, instance, map_type);
    if map.data.as_ref().is_none_or(BTreeMap::is_empty) {
        map.data = rendered.data.clone();
    }
}

/// Seeds the `builtin` document, restoring keys someone emptied.
pub fn customize_builtin_map(
    map: &mut ConfigMap,
    instance: &Kappnav,
    topology: Topology,
    console: Option<&ConsoleUrls>,
) {
    label(&mut map.metadata, instance, Some(MapType::Builtin));
    let data = map.data.get_or_insert_with(BTreeMap::new);

    match topology {
        Topology::LocalCluster => seed(data, "openshift-console-url", LOCAL_CONSOLE_URL),
        Topology::OpenShift(_) => {
            if let Some(console) = console {
                if !console.console.is_empty() {
                    seed(data, "openshift-console-url", console.console.clone());
                }
                if !console.admin_console.is_empty() {
                    seed(data, "openshift-admin-console-url", console.admin_console.clone());
                }
            }
        }
    }
    for (key, value) in DASHBOARDS {
        seed(data, key, value);
    }
}

/// Seeds `kappnav-config`. The UI URL is only published on recognised
/// OpenShift flavors, and only once the route has a host.
pub fn customize_kappnav_config_map(
    map: &mut ConfigMap,
    instance: &Kappnav,
    topology: Topology,
    kappnav_url: &str,
) {
    label(&mut map.metadata, instance, None);
    let data = map.data.get_or_insert_with(BTreeMap::new);
    seed(data, "status-color-mapping", STATUS_COLOR_MAPPING);
    seed(data, "app-status-precedence", APP_STATUS_PRECEDENCE);
    seed(data, "status-unknown", "Unknown");
    seed(data, "kappnav-sa-name", service_account_name(instance));
    if topology.is_recognized_openshift() && !kappnav_url.is_empty() {
        seed(data, "kappnav-url", kappnav_url);
    }
}

pub fn customize_kind_action_mapping(
    mapping: &mut KindActionMapping,
    defaults: &KindActionMappingSpec,
    instance: &Kappnav,
) {
    label(&mut mapping.metadata, instance, None);
    defaults::resolve_kind_action_mapping(mapping, defaults);
}

/// Deployment level fields plus a fresh pod template around `containers`.
pub fn customize_deployment(
    deployment: &mut Deployment,
    instance: &Kappnav,
    containers: Vec<Container>,
    volumes: Option<Vec<Volume>>,
) {
    label(&mut deployment.metadata, instance, None);
    let name = deployment.name_any();
    let spec = deployment.spec.get_or_insert_with(Default::default);
    if spec.replicas.is_none_or(|replicas| replicas < 1) {
        spec.replicas = Some(1);
    }
    spec.selector = LabelSelector {
        match_labels: Some(BTreeMap::from([(COMPONENT_LABEL.to_string(), name.clone())])),
        ..Default::default()
    };

    let template = &mut spec.template;
    let meta = template.metadata.get_or_insert_with(Default::default);
    meta.labels = Some(labels(instance, meta.labels.as_ref(), Some(&name), None));

    let pod = template.spec.get_or_insert_with(Default::default);
    pod.containers = containers;
    pod.restart_policy = Some("Always".to_string());
    pod.service_account_name = Some(service_account_name(instance));
    pod.volumes = volumes;
    pod.host_network = Some(false);
    pod.host_pid = Some(false);
    pod.host_ipc = Some(false);
    let security = pod.security_context.get_or_insert_with(Default::default);
    security.run_as_non_root = Some(true);
    security.run_as_user = Some(1001);
}

/// Containers currently running in the deployment, if any.
pub fn existing_containers(deployment: &Deployment) -> &[Container] {
    deployment
        .spec
        .as_ref()
        .and_then(|spec| spec.template.spec.as_ref())
        .map(|pod| pod.containers.as_slice())
        .unwrap_or_default()
}

pub fn customize_ui_deployment(
    deployment: &mut Deployment,
    instance: &Kappnav,
    topology: Topology,
) {
    let containers =
        containers::ui_containers(existing_containers(deployment), instance, topology);
    customize_deployment(
        deployment,
        instance,
        containers,
        Some(containers::ui_volumes(instance)),
    );
}

pub fn customize_controller_deployment(deployment: &mut Deployment, instance: &Kappnav) {
    let containers = containers::controller_containers(existing_containers(deployment), instance);
    customize_deployment(deployment, instance, containers, None);
}
