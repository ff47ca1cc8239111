#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod duration;
pub mod labels;
pub mod policy;

pub use self::labels::Labels;
pub use k8s_openapi::api::{
    self,
    core::v1::{Namespace, Service},
};
pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
pub use kube::api::{
    Api, DeleteParams, ListParams, ObjectMeta, Patch, PatchParams, ResourceExt,
};
pub use kube::{Client, Resource};
