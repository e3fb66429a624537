//! Mock EC2 instance metadata service.
//!
//! Serves the read-only instance metadata API (identity fields, security groups, mock role
//! credentials and userdata) from a static JSON document, so software that queries the
//! metadata endpoint can run unmodified against a local process.

pub mod config;
pub mod error;
pub mod routes;
pub mod runtime;
pub mod service;

pub use crate::config::{Config, ConfigError, RuntimeConfig, RuntimeConfigBuilder};
pub use crate::error::{MockMetadataError, Result};
pub use crate::routes::{Endpoint, METADATA_ENDPOINTS, RouteTable};
pub use crate::runtime::{MetadataRuntime, run, serve, serve_on};
pub use crate::service::MetadataService;
pub use mock_ec2_metadata_store::{
    Field, MetadataStore, MetadataValues, Network, SecurityCredentials, UserdataValues,
};
