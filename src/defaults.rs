use crate::crd::{
    ContainerConfig, EnvironmentConfig, ImageConfig, Kappnav, KappnavSpec, KindActionMapping,
    KindActionMappingSpec, ResourceQuantities,
};
use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use tracing::debug;

/// Where a defaults document comes from. Read on every pass so that edits to
/// the mounted file are picked up without a restart.
#[derive(Debug, Clone)]
pub enum DefaultsSource {
    File(PathBuf),
    #[cfg(test)]
    Inline(String),
}

impl DefaultsSource {
    fn read(&self) -> Result<String> {
        match self {
            DefaultsSource::File(path) => {
                debug!("Reading defaults from {}", path.display());
                fs::read_to_string(path).map_err(|e| {
                    Error::DefaultsUnavailable(format!("{}: {}", path.display(), e))
                })
            }
            #[cfg(test)]
            DefaultsSource::Inline(text) => Ok(text.clone()),
        }
    }

    fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        let text = self.read()?;
        serde_yaml_ng::from_str(&text).map_err(|e| Error::DefaultsUnavailable(e.to_string()))
    }

    pub fn kappnav(&self) -> Result<KappnavSpec> {
        Ok(self.parse::<Kappnav>()?.spec)
    }

    pub fn kind_action_mapping(&self) -> Result<KindActionMappingSpec> {
        Ok(self.parse::<KindActionMapping>()?.spec)
    }
}

/// Fills every unset field of `spec` from `defaults`. Values already present
/// on the instance are never overwritten, so applying this twice is the same
/// as applying it once.
pub fn resolve(spec: &mut KappnavSpec, defaults: &KappnavSpec) {
    resolve_container(&mut spec.app_nav_api, defaults.app_nav_api.as_ref());
    resolve_container(&mut spec.app_nav_ui, defaults.app_nav_ui.as_ref());
    resolve_container(
        &mut spec.app_nav_controller,
        defaults.app_nav_controller.as_ref(),
    );
    resolve_extension_containers(
        &mut spec.extension_containers,
        defaults.extension_containers.as_ref(),
    );
    resolve_image(&mut spec.image, defaults.image.as_ref());
    resolve_environment(&mut spec.env, defaults.env.as_ref());
    resolve_logging(&mut spec.logging, defaults.logging.as_ref());
}

fn resolve_container(config: &mut Option<ContainerConfig>, defaults: Option<&ContainerConfig>) {
    match config {
        None => *config = defaults.cloned(),
        Some(config) => {
            if let Some(defaults) = defaults {
                merge_container(config, defaults);
            }
        }
    }
}

fn merge_container(config: &mut ContainerConfig, defaults: &ContainerConfig) {
    fill(&mut config.repository, &defaults.repository);
    fill(&mut config.tag, &defaults.tag);

    match config.resources.as_mut() {
        None => config.resources = defaults.resources.clone(),
        Some(resources) if resources.enabled => {
            let default_resources = defaults.resources.as_ref();
            resolve_quantities(
                &mut resources.requests,
                default_resources.and_then(|r| r.requests.as_ref()),
            );
            resolve_quantities(
                &mut resources.limits,
                default_resources.and_then(|r| r.limits.as_ref()),
            );
        }
        // Disabled constraints are left exactly as the user wrote them.
        Some(_) => {}
    }
}

fn resolve_quantities(
    quantities: &mut Option<ResourceQuantities>,
    defaults: Option<&ResourceQuantities>,
) {
    match quantities {
        None => *quantities = defaults.cloned(),
        Some(quantities) => {
            if let Some(defaults) = defaults {
                fill(&mut quantities.cpu, &defaults.cpu);
                fill(&mut quantities.memory, &defaults.memory);
            }
        }
    }
}

/// Like the logging map: entries are only added when the instance has no map
/// at all.
fn resolve_extension_containers(
    containers: &mut Option<BTreeMap<String, Option<ContainerConfig>>>,
    defaults: Option<&BTreeMap<String, Option<ContainerConfig>>>,
) {
    let Some(defaults) = defaults else {
        return;
    };
    match containers {
        None => *containers = Some(defaults.clone()),
        Some(containers) => {
            for (name, config) in containers.iter_mut() {
                if let Some(default_config) = defaults.get(name) {
                    resolve_container(config, default_config.as_ref());
                }
            }
        }
    }
}

fn resolve_image(image: &mut Option<ImageConfig>, defaults: Option<&ImageConfig>) {
    match image {
        None => *image = defaults.cloned(),
        Some(image) => {
            if let Some(defaults) = defaults {
                fill(&mut image.pull_policy, &defaults.pull_policy);
                if image.pull_secrets.is_none() {
                    image.pull_secrets = defaults.pull_secrets.clone();
                }
            }
        }
    }
}

fn resolve_environment(env: &mut Option<EnvironmentConfig>, defaults: Option<&EnvironmentConfig>) {
    match env {
        None => *env = defaults.cloned(),
        Some(env) => {
            if let Some(defaults) = defaults {
                fill(&mut env.kube_env, &defaults.kube_env);
            }
        }
    }
}

/// Keys missing from a present logging map are not added; only empty values
/// are filled. The whole map is copied only when the instance has none.
fn resolve_logging(
    logging: &mut Option<BTreeMap<String, String>>,
    defaults: Option<&BTreeMap<String, String>>,
) {
    match logging {
        None => *logging = defaults.cloned(),
        Some(logging) => {
            let Some(defaults) = defaults else {
                return;
            };
            for (component, level) in logging.iter_mut() {
                if !component.is_empty() && level.is_empty() {
                    if let Some(default_level) = defaults.get(component) {
                        *level = default_level.clone();
                    }
                }
            }
        }
    }
}

fn fill(value: &mut String, default: &str) {
    if value.is_empty() {
        *value = default.to_string();
    }
}

/// The default mapping is owned wholesale by the defaults document.
pub fn resolve_kind_action_mapping(
    mapping: &mut KindActionMapping,
    defaults: &KindActionMappingSpec,
) {
    mapping.spec = defaults.clone();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::ResourceConstraints;

    const DEFAULTS: &str = r#"
    apiVersion: kappnav.operator.kappnav.io/v1
    kind: Kappnav
    metadata:
      name: defaults
    spec:
      appNavAPI:
        repository: kappnav/api
        tag: latest
        resources:
          enabled: false
          requests:
            cpu: 500m
            memory: 512Mi
          limits:
            cpu: 1000m
            memory: 1Gi
      appNavUI:
        repository: kappnav/ui
        tag: latest
      appNavController:
        repository: kappnav/controller
        tag: latest
      extensionContainers:
        oauthProxy:
          repository: openshift/oauth-proxy
          tag: latest
      image:
        pullPolicy: Always
        pullSecrets: []
      env:
        kubeEnv: okd
      logging:
        operator: info
        apis: info
        controller: info
    "#;

    fn defaults() -> KappnavSpec {
        DefaultsSource::Inline(DEFAULTS.to_string())
            .kappnav()
            .expect("Defaults should parse")
    }

    #[test]
    fn test_empty_instance_takes_all_defaults() {
        let mut spec = KappnavSpec::default();
        resolve(&mut spec, &defaults());

        let api = spec.app_nav_api.as_ref().unwrap();
        assert_eq!(api.repository, "kappnav/api");
        assert_eq!(api.tag, "latest");
        assert_eq!(spec.kube_env_for_test(), "okd");
        assert_eq!(spec, defaults());
    }

    #[test]
    fn test_partial_container_is_filled() {
        let mut spec = KappnavSpec {
            app_nav_api: Some(ContainerConfig {
                tag: "1.0.0".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        };
        resolve(&mut spec, &defaults());

        let api = spec.app_nav_api.as_ref().unwrap();
        assert_eq!(api.repository, "kappnav/api");
        assert_eq!(api.tag, "1.0.0");
        assert_eq!(api.resources, defaults().app_nav_api.unwrap().resources);
    }

    #[test]
    fn test_enabled_resources_default_cpu_and_memory_independently() {
        let mut spec = KappnavSpec {
            app_nav_api: Some(ContainerConfig {
                resources: Some(ResourceConstraints {
                    enabled: true,
                    requests: Some(ResourceQuantities {
                        cpu: "250m".to_string(),
                        memory: String::new(),
                    }),
                    limits: None,
                }),
                ..Default::default()
            }),
            ..Default::default()
        };
        resolve(&mut spec, &defaults());

        let resources = spec.app_nav_api.unwrap().resources.unwrap();
        let requests = resources.requests.unwrap();
        assert_eq!(requests.cpu, "250m");
        assert_eq!(requests.memory, "512Mi");
        assert_eq!(resources.limits.unwrap().memory, "1Gi");
    }

    #[test]
    fn test_disabled_resources_are_not_descended_into() {
        let mut spec = KappnavSpec {
            app_nav_api: Some(ContainerConfig {
                resources: Some(ResourceConstraints {
                    enabled: false,
                    requests: None,
                    limits: None,
                }),
                ..Default::default()
            }),
            ..Default::default()
        };
        resolve(&mut spec, &defaults());

        let resources = spec.app_nav_api.unwrap().resources.unwrap();
        assert!(resources.requests.is_none());
        assert!(resources.limits.is_none());
    }

    #[test]
    fn test_logging_map_fills_empty_values_only() {
        let mut spec = KappnavSpec {
            logging: Some(BTreeMap::from([
                ("operator".to_string(), "debug".to_string()),
                ("apis".to_string(), String::new()),
                ("custom".to_string(), String::new()),
            ])),
            ..Default::default()
        };
        resolve(&mut spec, &defaults());

        let logging = spec.logging.unwrap();
        assert_eq!(logging["operator"], "debug");
        assert_eq!(logging["apis"], "info");
        assert_eq!(logging["custom"], "");
        // keys only present in the defaults are not merged into an existing map
        assert!(!logging.contains_key("controller"));
    }

    #[test]
    fn test_extension_containers_merge_per_key() {
        let mut spec = KappnavSpec {
            extension_containers: Some(BTreeMap::from([
                (
                    "oauthProxy".to_string(),
                    Some(ContainerConfig {
                        tag: "v4.2".to_string(),
                        ..Default::default()
                    }),
                ),
                ("sidecar".to_string(), None),
            ])),
            ..Default::default()
        };
        resolve(&mut spec, &defaults());

        let containers = spec.extension_containers.unwrap();
        let proxy = containers["oauthProxy"].as_ref().unwrap();
        assert_eq!(proxy.repository, "openshift/oauth-proxy");
        assert_eq!(proxy.tag, "v4.2");
        assert!(containers["sidecar"].is_none());
    }

    #[test]
    fn test_extension_containers_only_default_declared_entries() {
        let mut spec = KappnavSpec {
            extension_containers: Some(BTreeMap::from([(
                "sidecar".to_string(),
                Some(ContainerConfig {
                    repository: "acme/sidecar".to_string(),
                    ..Default::default()
                }),
            )])),
            ..Default::default()
        };
        resolve(&mut spec, &defaults());

        let containers = spec.extension_containers.unwrap();
        assert_eq!(containers.keys().collect::<Vec<_>>(), vec!["sidecar"]);
        assert_eq!(
            containers["sidecar"].as_ref().unwrap().repository,
            "acme/sidecar"
        );
    }

    #[test]
    fn test_image_and_env_keep_explicit_values() {
        let mut spec = KappnavSpec {
            image: Some(ImageConfig {
                pull_policy: "IfNotPresent".to_string(),
                pull_secrets: None,
            }),
            env: Some(EnvironmentConfig {
                kube_env: "minikube".to_string(),
            }),
            ..Default::default()
        };
        resolve(&mut spec, &defaults());

        let image = spec.image.as_ref().unwrap();
        assert_eq!(image.pull_policy, "IfNotPresent");
        assert_eq!(image.pull_secrets, Some(vec![]));
        assert_eq!(spec.kube_env_for_test(), "minikube");
    }

    #[test]
    fn test_resolve_is_a_fixed_point() {
        let mut spec = KappnavSpec {
            app_nav_ui: Some(ContainerConfig {
                repository: "example/ui".to_string(),
                ..Default::default()
            }),
            logging: Some(BTreeMap::from([("operator".to_string(), String::new())])),
            ..Default::default()
        };
        resolve(&mut spec, &defaults());
        let once = spec.clone();
        resolve(&mut spec, &defaults());
        assert_eq!(spec, once);
    }

    #[test]
    fn test_unparsable_defaults_are_unavailable() {
        let error = DefaultsSource::Inline("spec: [".to_string())
            .kappnav()
            .unwrap_err();
        assert!(matches!(error, Error::DefaultsUnavailable(_)));
    }

    #[test]
    fn test_defaults_from_file() {
        let tmp_file = tempfile::NamedTempFile::new().expect("Failed to create temp file");
        fs::write(tmp_file.path(), DEFAULTS).expect("Failed to write to temp file");

        let spec = DefaultsSource::File(tmp_file.path().to_path_buf())
            .kappnav()
            .expect("Should load defaults");
        assert_eq!(spec, defaults());

        let missing = DefaultsSource::File(PathBuf::from("/nonexistent/default_values.yaml"));
        assert!(matches!(missing.kappnav(), Err(Error::DefaultsUnavailable(_))));
    }

    #[test]
    fn test_kind_action_mapping_is_replaced_wholesale() {
        let source = DefaultsSource::Inline(
            r#"
            apiVersion: actions.kappnav.io/v1
            kind: KindActionMapping
            metadata:
              name: default
            spec:
              precedence: 1
              mappings:
                - apiVersion: apps/v1
                  kind: Deployment
                  mapname: kappnav.actions.deployment
            "#
            .to_string(),
        );
        let defaults = source.kind_action_mapping().expect("Should parse mapping");

        let mut mapping = KindActionMapping::new("default", KindActionMappingSpec::default());
        resolve_kind_action_mapping(&mut mapping, &defaults);
        assert_eq!(mapping.spec.precedence, 1);
        assert_eq!(mapping.spec.mappings[0].kind, "Deployment");
        assert_eq!(mapping.spec.mappings[0].mapname, "kappnav.actions.deployment");
    }

    impl KappnavSpec {
        fn kube_env_for_test(&self) -> &str {
            self.env.as_ref().map(|e| e.kube_env.as_str()).unwrap_or_default()
        }
    }
}
