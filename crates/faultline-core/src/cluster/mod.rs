//! Cluster integration: the API seam executors submit resources
//! through, the minimal chaos CRD surface, the kube-backed
//! implementation, and the controller that turns resource transitions
//! into pipeline events.

pub mod api;
pub mod callbacks;
pub mod chaos;
pub mod controller;
pub mod kube_impl;
pub mod workqueue;

pub use api::{ChaosResourceRequest, ChaosStatus, ClusterApi, JobRequest};
pub use controller::ClusterController;
