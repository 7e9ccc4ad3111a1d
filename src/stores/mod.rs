//! Backend adapters.
//!
//! Each store takes its SDK client as a trait object, so the network side
//! stays outside this crate and tests can drive the stores with mocks.

pub mod apollo;
pub mod etcd;
pub mod memory;
pub mod nacos;

pub use apollo::{ApolloCollaborators, ApolloConfig, ApolloConfigStore, ApolloOpenApi, ApolloRepository};
pub use etcd::{EtcdClient, EtcdConfigStore, WatchResponse};
pub use memory::InMemoryConfigStore;
pub use nacos::{NacosClient, NacosConfig, NacosConfigStore};
