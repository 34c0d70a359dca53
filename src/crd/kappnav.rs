use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Desired state of the application navigator.
///
/// Every block is optional so that an instance only needs to carry the values
/// that differ from the defaults document.
#[derive(CustomResource, Serialize, Deserialize, Debug, Clone, Default, PartialEq, JsonSchema)]
#[kube(
    group = "kappnav.operator.kappnav.io",
    version = "v1",
    kind = "Kappnav",
    namespaced,
    status = "KappnavStatus",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct KappnavSpec {
    #[serde(rename = "appNavAPI", default, skip_serializing_if = "Option::is_none")]
    pub app_nav_api: Option<ContainerConfig>,
    #[serde(rename = "appNavController", default, skip_serializing_if = "Option::is_none")]
    pub app_nav_controller: Option<ContainerConfig>,
    #[serde(rename = "appNavUI", default, skip_serializing_if = "Option::is_none")]
    pub app_nav_ui: Option<ContainerConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension_containers: Option<BTreeMap<String, Option<ContainerConfig>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<EnvironmentConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<BTreeMap<String, String>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContainerConfig {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub repository: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceConstraints>,
}

impl ContainerConfig {
    pub fn image(&self) -> String {
        format!("{}:{}", self.repository, self.tag)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceConstraints {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests: Option<ResourceQuantities>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<ResourceQuantities>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceQuantities {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cpu: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub memory: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImageConfig {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pull_policy: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_secrets: Option<Vec<String>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentConfig {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kube_env: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KappnavStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<StatusCondition>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatusCondition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default)]
    pub status: ConditionStatus,
    #[serde(rename = "type", default)]
    pub condition_type: ConditionType,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, JsonSchema)]
pub enum ConditionStatus {
    True,
    #[default]
    False,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, JsonSchema)]
pub enum ConditionType {
    #[default]
    Reconciled,
}

impl KappnavStatus {
    pub fn condition(&self, condition_type: ConditionType) -> Option<&StatusCondition> {
        self.conditions
            .iter()
            .find(|c| c.condition_type == condition_type)
    }

    /// Replaces the condition of the same type in place, or appends it.
    pub fn set_condition(&mut self, condition: StatusCondition) {
        match self
            .conditions
            .iter_mut()
            .find(|c| c.condition_type == condition.condition_type)
        {
            Some(existing) => *existing = condition,
            None => self.conditions.push(condition),
        }
    }
}

impl Kappnav {
    pub fn kube_env(&self) -> &str {
        self.spec
            .env
            .as_ref()
            .map(|env| env.kube_env.as_str())
            .unwrap_or_default()
    }

    pub fn pull_policy(&self) -> Option<String> {
        self.spec
            .image
            .as_ref()
            .map(|image| image.pull_policy.clone())
            .filter(|policy| !policy.is_empty())
    }

    pub fn pull_secrets(&self) -> &[String] {
        self.spec
            .image
            .as_ref()
            .and_then(|image| image.pull_secrets.as_deref())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_instance() {
        let yaml = r#"
        apiVersion: kappnav.operator.kappnav.io/v1
        kind: Kappnav
        metadata:
          name: kappnav
          namespace: kappnav
        spec:
          appNavAPI:
            repository: kappnav/apis
            tag: "0.1.2"
            resources:
              enabled: true
              requests:
                cpu: 500m
          extensionContainers:
            oauthProxy:
              repository: openshift/oauth-proxy
          env:
            kubeEnv: okd
          logging:
            operator: debug
        status:
          conditions:
            - type: Reconciled
              status: "False"
              reason: Invalid
              lastUpdateTime: "2020-01-01T00:00:00Z"
        "#;

        let instance: Kappnav = serde_yaml_ng::from_str(yaml).expect("Should parse instance");
        let api = instance.spec.app_nav_api.as_ref().unwrap();
        assert_eq!(api.image(), "kappnav/apis:0.1.2");
        assert_eq!(
            api.resources.as_ref().unwrap().requests.as_ref().unwrap().cpu,
            "500m"
        );
        assert_eq!(instance.kube_env(), "okd");
        assert_eq!(
            instance.spec.logging.as_ref().unwrap().get("operator").map(String::as_str),
            Some("debug")
        );
        let status = instance.status.as_ref().unwrap();
        let condition = status.condition(ConditionType::Reconciled).unwrap();
        assert_eq!(condition.status, ConditionStatus::False);
        assert!(condition.last_transition_time.is_none());
    }

    #[test]
    fn test_set_condition_replaces_in_place() {
        let mut status = KappnavStatus::default();
        status.set_condition(StatusCondition {
            reason: "Invalid".to_string(),
            ..Default::default()
        });
        status.set_condition(StatusCondition {
            status: ConditionStatus::True,
            ..Default::default()
        });

        assert_eq!(status.conditions.len(), 1);
        assert_eq!(status.conditions[0].status, ConditionStatus::True);
        assert_eq!(status.conditions[0].reason, "");
    }
}
