use crate::crd::{ContainerConfig, Kappnav, ResourceQuantities};
use crate::environment::Topology;
use crate::resources;
use k8s_openapi::api::core::v1::{
    Capabilities, Container, ContainerPort, EnvVar, ExecAction, HTTPGetAction, Probe,
    ResourceRequirements, SecretVolumeSource, SecurityContext, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

pub const API_CONTAINER: &str = "kappnav-api";
pub const UI_CONTAINER: &str = "kappnav-ui";
pub const CONTROLLER_CONTAINER: &str = "kappnav-controller";
pub const OAUTH_PROXY_CONTAINER: &str = "oauth-proxy";

/// Key of the OAuth proxy image in `spec.extensionContainers`.
pub const OAUTH_PROXY_CONFIG_KEY: &str = "oauthProxy";

const OAUTH_VOLUME_MOUNT_PATH: &str = "/etc/tls/private";

/// Env vars owned by the operator. Any other var found on the running
/// container is carried over.
const OWNED_ENV: [&str; 3] = ["KAPPNAV_CR_NAME", "KAPPNAV_CONFIG_NAMESPACE", "KUBE_ENV"];

static QUANTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[+-]?(\d+(\.\d*)?|\.\d+)([eE][+-]?\d+|Ki|Mi|Gi|Ti|Pi|Ei|n|u|m|k|M|G|T|P|E)?$")
        .expect("valid quantity regex")
});

/// Everything a container needs besides its name, image and env.
#[derive(Default)]
struct ContainerShape {
    readiness_probe: Option<Probe>,
    liveness_probe: Option<Probe>,
    ports: Option<Vec<ContainerPort>>,
    args: Option<Vec<String>>,
    volume_mount: Option<VolumeMount>,
}

/// Containers of the UI deployment. The OAuth proxy only runs where the UI is
/// reached through a route.
pub fn ui_containers(
    existing: &[Container],
    instance: &Kappnav,
    topology: Topology,
) -> Vec<Container> {
    let spec = &instance.spec;
    let mut containers = vec![
        build_container(
            API_CONTAINER,
            instance,
            spec.app_nav_api.as_ref(),
            previous(existing, API_CONTAINER),
            api_shape(),
        ),
        build_container(
            UI_CONTAINER,
            instance,
            spec.app_nav_ui.as_ref(),
            previous(existing, UI_CONTAINER),
            ui_shape(),
        ),
    ];

    if !topology.is_local() {
        let oauth_proxy = spec
            .extension_containers
            .as_ref()
            .and_then(|containers| containers.get(OAUTH_PROXY_CONFIG_KEY))
            .and_then(Option::as_ref);
        containers.push(build_container(
            OAUTH_PROXY_CONTAINER,
            instance,
            oauth_proxy,
            previous(existing, OAUTH_PROXY_CONTAINER),
            oauth_proxy_shape(instance),
        ));
    }
    containers
}

pub fn controller_containers(existing: &[Container], instance: &Kappnav) -> Vec<Container> {
    let spec = &instance.spec;
    vec![
        build_container(
            API_CONTAINER,
            instance,
            spec.app_nav_api.as_ref(),
            previous(existing, API_CONTAINER),
            api_shape(),
        ),
        build_container(
            CONTROLLER_CONTAINER,
            instance,
            spec.app_nav_controller.as_ref(),
            previous(existing, CONTROLLER_CONTAINER),
            controller_shape(),
        ),
    ]
}

/// The serving certificate mounted by the OAuth proxy.
pub fn ui_volumes(instance: &Kappnav) -> Vec<Volume> {
    let name = resources::tls_secret_name(instance);
    vec![Volume {
        name: name.clone(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(name),
            default_mode: Some(0o644),
            ..Default::default()
        }),
        ..Default::default()
    }]
}

fn previous<'a>(existing: &'a [Container], name: &str) -> Option<&'a Container> {
    existing.iter().find(|c| c.name == name)
}

/// Starts from the running container so fields filled in by the API server
/// survive, then overwrites the fields the operator owns.
fn build_container(
    name: &str,
    instance: &Kappnav,
    config: Option<&ContainerConfig>,
    previous: Option<&Container>,
    shape: ContainerShape,
) -> Container {
    let mut container = previous.cloned().unwrap_or_default();

    let mut env = vec![
        env_var("KAPPNAV_CR_NAME", &instance.name_any()),
        env_var(
            "KAPPNAV_CONFIG_NAMESPACE",
            &instance.namespace().unwrap_or_default(),
        ),
        env_var("KUBE_ENV", instance.kube_env()),
    ];
    env.extend(
        container
            .env
            .take()
            .unwrap_or_default()
            .into_iter()
            .filter(|var| !OWNED_ENV.contains(&var.name.as_str())),
    );

    container.name = name.to_string();
    container.image = Some(config.map(ContainerConfig::image).unwrap_or_else(|| ":".to_string()));
    if let Some(policy) = instance.pull_policy() {
        container.image_pull_policy = Some(policy);
    }
    container.env = Some(env);
    container.readiness_probe =
        merge_probe(container.readiness_probe.take(), shape.readiness_probe);
    container.liveness_probe = merge_probe(container.liveness_probe.take(), shape.liveness_probe);
    container.ports = shape.ports;
    container.args = shape.args;
    container.volume_mounts = shape.volume_mount.map(|mount| vec![mount]);
    container.resources = config.and_then(resource_requirements);
    restrict(container.security_context.get_or_insert_with(Default::default));
    container
}

/// Timeout and success threshold are left to the server default.
fn merge_probe(current: Option<Probe>, desired: Option<Probe>) -> Option<Probe> {
    let desired = desired?;
    let current = current.unwrap_or_default();
    Some(Probe {
        timeout_seconds: current.timeout_seconds,
        success_threshold: current.success_threshold,
        termination_grace_period_seconds: current.termination_grace_period_seconds,
        ..desired
    })
}

fn env_var(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    }
}

fn resource_requirements(config: &ContainerConfig) -> Option<ResourceRequirements> {
    let constraints = config.resources.as_ref().filter(|r| r.enabled)?;
    Some(ResourceRequirements {
        limits: quantities(constraints.limits.as_ref()),
        requests: quantities(constraints.requests.as_ref()),
        ..Default::default()
    })
}

/// Quantities that do not parse are left out.
fn quantities(values: Option<&ResourceQuantities>) -> Option<BTreeMap<String, Quantity>> {
    let values = values?;
    let list: BTreeMap<String, Quantity> = [("cpu", &values.cpu), ("memory", &values.memory)]
        .into_iter()
        .filter(|(_, quantity)| is_valid_quantity(quantity))
        .map(|(resource, quantity)| (resource.to_string(), Quantity(quantity.clone())))
        .collect();
    (!list.is_empty()).then_some(list)
}

pub fn is_valid_quantity(quantity: &str) -> bool {
    QUANTITY.is_match(quantity)
}

/// Fields added by admission (user id, SELinux options) are kept.
fn restrict(context: &mut SecurityContext) {
    context.privileged = Some(false);
    context.read_only_root_filesystem = Some(false);
    context.allow_privilege_escalation = Some(false);
    context.capabilities = Some(Capabilities {
        drop: Some(vec!["ALL".to_string()]),
        ..Default::default()
    });
}

fn http_probe(path: &str, scheme: &str, port: i32, delay: i32, period: i32) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(path.to_string()),
            scheme: Some(scheme.to_string()),
            port: IntOrString::Int(port),
            ..Default::default()
        }),
        initial_delay_seconds: Some(delay),
        period_seconds: Some(period),
        failure_threshold: Some(6),
        ..Default::default()
    }
}

fn api_shape() -> ContainerShape {
    ContainerShape {
        readiness_probe: Some(http_probe("/kappnav/health", "HTTPS", 9443, 60, 15)),
        liveness_probe: Some(http_probe("/kappnav/health", "HTTPS", 9443, 120, 15)),
        ..Default::default()
    }
}

fn ui_shape() -> ContainerShape {
    ContainerShape {
        readiness_probe: Some(http_probe("/health", "HTTP", 3000, 20, 10)),
        liveness_probe: Some(http_probe("/health", "HTTP", 3000, 40, 30)),
        ports: Some(vec![ContainerPort {
            container_port: 3000,
            name: Some("http".to_string()),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        ..Default::default()
    }
}

fn controller_probe(delay: i32, period: i32) -> Probe {
    Probe {
        exec: Some(ExecAction {
            command: Some(vec![
                "/bin/bash".to_string(),
                "-c".to_string(),
                "testcntlr.sh".to_string(),
            ]),
        }),
        initial_delay_seconds: Some(delay),
        period_seconds: Some(period),
        failure_threshold: Some(6),
        ..Default::default()
    }
}

fn controller_shape() -> ContainerShape {
    ContainerShape {
        readiness_probe: Some(controller_probe(30, 5)),
        liveness_probe: Some(controller_probe(120, 30)),
        ..Default::default()
    }
}

fn oauth_proxy_shape(instance: &Kappnav) -> ContainerShape {
    let args = [
        "--https-address=:8443".to_string(),
        "--provider=openshift".to_string(),
        format!(
            "--openshift-service-account={}",
            resources::service_account_name(instance)
        ),
        "--upstream=http://localhost:3000".to_string(),
        format!("--tls-cert={}/tls.crt", OAUTH_VOLUME_MOUNT_PATH),
        format!("--tls-key={}/tls.key", OAUTH_VOLUME_MOUNT_PATH),
        "--cookie-secret=SECRET".to_string(),
        "--cookie-name=ssn".to_string(),
        "--cookie-expire=2h".to_string(),
        "--skip-provider-button=true".to_string(),
        "--skip-auth-regex=.*appLauncher.js|.*featuredApp.js|.*appNavIcon.css|.*KAppNavlogo.svg"
            .to_string(),
    ];
    ContainerShape {
        ports: Some(vec![ContainerPort {
            container_port: 8443,
            name: Some("public".to_string()),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        args: Some(args.to_vec()),
        volume_mount: Some(VolumeMount {
            mount_path: OAUTH_VOLUME_MOUNT_PATH.to_string(),
            name: resources::tls_secret_name(instance),
            ..Default::default()
        }),
        ..Default::default()
    }
}
