mod actions;
mod application;
mod kappnav;
mod route;

pub use actions::{KindActionMapping, KindActionMappingSpec};
pub use application::{Application, ApplicationSpec};
pub use kappnav::{
    ConditionStatus, ConditionType, ContainerConfig, EnvironmentConfig, ImageConfig, Kappnav,
    KappnavSpec, ResourceConstraints, ResourceQuantities, StatusCondition,
};
pub use route::{Route, RouteSpec, TlsConfig};
