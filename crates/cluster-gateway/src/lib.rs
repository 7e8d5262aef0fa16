//! Cluster Gateway
//!
//! Typed accessor over the cluster store used by the replica controller and
//! the upgrade engine. One generic trait, [`ResourceGateway`], covers every
//! resource kind; per-kind scope adapters decide how the underlying
//! `kube::Api` is addressed.
//!
//! # Example
//!
//! ```no_run
//! use cluster_gateway::{ClusterClients, KubeGateway, ListOptions};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), cluster_gateway::GatewayError> {
//! let clients = ClusterClients::from_gateway(Arc::new(KubeGateway::new(None)));
//! let pools = clients.pools.list(None, &ListOptions::labels("openebs.io/storage-pool-claim=spc1")).await?;
//! # let _ = pools;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod clients;
pub mod error;
pub mod filter;
pub mod scope;
#[path = "trait.rs"]
pub mod gateway_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::KubeGateway;
pub use clients::{ClusterClients, ClusterGateway};
pub use error::GatewayError;
pub use filter::{Predicate, filter, has_label, is_healthy, not_in_uids};
pub use gateway_trait::{ListOptions, PatchBody, PatchKind, PodExec, ResourceGateway};
pub use scope::ApiScope;
#[cfg(any(test, feature = "test-util"))]
pub use mock::{MockCall, MockCluster, MockFailure, Verb};
