use crate::cluster::Cluster;
use crate::environment::OpenShiftFlavor;
use crate::logging::PassLog;
use k8s_openapi::api::core::v1::ConfigMap;
use serde::Deserialize;

/// Web console addresses published in the `builtin` document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsoleUrls {
    pub console: String,
    pub admin_console: String,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct OcpConsoleConfig {
    #[serde(default)]
    cluster_info: OcpClusterInfo,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct OcpClusterInfo {
    #[serde(default)]
    console_base_address: String,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct OkdConsoleConfig {
    #[serde(default)]
    cluster_info: OkdClusterInfo,
}

#[derive(Deserialize, Default)]
struct OkdClusterInfo {
    #[serde(rename = "consolePublicURL", default)]
    console_public_url: String,
    #[serde(rename = "adminConsolePublicURL", default)]
    admin_console_public_url: String,
}

/// Where each flavor keeps its console configuration.
struct ConsoleSource {
    namespace: &'static str,
    name: &'static str,
    key: &'static str,
}

const OCP_CONSOLE: ConsoleSource = ConsoleSource {
    namespace: "openshift-console",
    name: "console-config",
    key: "console-config.yaml",
};

const OKD_CONSOLE: ConsoleSource = ConsoleSource {
    namespace: "openshift-web-console",
    name: "webconsole-config",
    key: "webconsole-config.yaml",
};

/// Reads the console addresses of the cluster. Any failure is logged and
/// yields `None`; the pass carries on without them.
pub async fn discover<C: Cluster>(
    cluster: &C,
    log: &PassLog,
    flavor: OpenShiftFlavor,
) -> Option<ConsoleUrls> {
    let source = match flavor {
        OpenShiftFlavor::Ocp => &OCP_CONSOLE,
        OpenShiftFlavor::Okd => &OKD_CONSOLE,
        OpenShiftFlavor::Generic => return None,
    };

    let map: ConfigMap = match cluster.get(source.namespace, source.name).await {
        Ok(Some(map)) => map,
        Ok(None) => {
            log.info(format!(
                "Could not find {}/{}, console URLs are not set",
                source.namespace, source.name
            ));
            return None;
        }
        Err(e) => {
            log.error(format!(
                "Could not retrieve {}/{}, Error: {}",
                source.namespace, source.name, e
            ));
            return None;
        }
    };

    let document = map
        .data
        .as_ref()
        .and_then(|data| data.get(source.key))
        .filter(|document| !document.is_empty())?;

    match parse(flavor, document) {
        Ok(urls) => Some(urls),
        Err(e) => {
            log.error(format!("Could not parse {}, Error: {}", source.key, e));
            None
        }
    }
}

fn parse(flavor: OpenShiftFlavor, document: &str) -> Result<ConsoleUrls, serde_yaml_ng::Error> {
    let urls = match flavor {
        OpenShiftFlavor::Ocp => {
            let config: OcpConsoleConfig = serde_yaml_ng::from_str(document)?;
            let address = trim_slash(config.cluster_info.console_base_address);
            ConsoleUrls {
                console: address.clone(),
                admin_console: address,
            }
        }
        OpenShiftFlavor::Okd | OpenShiftFlavor::Generic => {
            let config: OkdConsoleConfig = serde_yaml_ng::from_str(document)?;
            ConsoleUrls {
                console: trim_slash(config.cluster_info.console_public_url),
                admin_console: trim_slash(config.cluster_info.admin_console_public_url),
            }
        }
    };
    Ok(urls)
}

fn trim_slash(mut url: String) -> String {
    if url.ends_with('/') {
        url.pop();
    }
    url
}
