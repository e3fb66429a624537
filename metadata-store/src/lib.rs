//! Immutable instance metadata snapshot.
//!
//! The [`MetadataStore`] owns everything the mock metadata service can report about the
//! emulated instance: identity fields, security groups, the network interface table, the
//! mock role credentials and the userdata map. It is built once from the configuration
//! document and shared read-only between request tasks.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// MAC address whose security-group ids are exposed under the network interface tree.
pub const PRIMARY_MAC: &str = "00:00:00:00:00:00";

/// Mock temporary credentials handed out for the instance role.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityCredentials {
    #[serde(rename = "AccessKeyId")]
    pub access_key_id: String,
    #[serde(rename = "SecretAccessKey")]
    pub secret_access_key: String,
    #[serde(rename = "Token")]
    pub token: String,
    #[serde(rename = "Expiration")]
    pub expiration: String,
    #[serde(rename = "Code")]
    pub code: String,
}

/// Network interfaces keyed by MAC address.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Network {
    /// Security-group ids attached to each interface, in configured order.
    pub interfaces: BTreeMap<String, Vec<String>>,
}

/// Per-instance values as they appear under `MetadataValues` in the config document.
///
/// Every field falls back to its empty value when the document omits it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataValues {
    #[serde(rename = "ami-id")]
    pub ami_id: String,
    #[serde(rename = "ami-launch-index")]
    pub ami_launch_index: String,
    #[serde(rename = "ami-manifest-path")]
    pub ami_manifest_path: String,
    #[serde(rename = "availability-zone")]
    pub availability_zone: String,
    pub hostname: String,
    #[serde(rename = "instance-action")]
    pub instance_action: String,
    #[serde(rename = "instance-id")]
    pub instance_id: String,
    #[serde(rename = "instance-type")]
    pub instance_type: String,
    #[serde(rename = "local-hostname")]
    pub local_hostname: String,
    #[serde(rename = "local-ipv4")]
    pub local_ipv4: String,
    pub mac: String,
    pub profile: String,
    #[serde(rename = "reservation-id")]
    pub reservation_id: String,
    /// Name of the single IAM role the instance can assume.
    #[serde(rename = "User")]
    pub user: String,
    #[serde(rename = "security-groups")]
    pub security_groups: Vec<String>,
    #[serde(rename = "security-credentials")]
    pub security_credentials: SecurityCredentials,
    pub network: Network,
}

/// Free-form userdata pairs. Sorted so repeated renders are identical.
pub type UserdataValues = BTreeMap<String, String>;

/// Scalar metadata fields that are served verbatim.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Field {
    AmiId,
    AmiLaunchIndex,
    AmiManifestPath,
    AvailabilityZone,
    Hostname,
    InstanceAction,
    InstanceId,
    InstanceType,
    LocalHostname,
    LocalIpv4,
    Mac,
    Profile,
    ReservationId,
    User,
}

/// Cheaply clonable, read-only handle over the configured metadata.
#[derive(Clone, Debug, Default)]
pub struct MetadataStore {
    inner: Arc<StoreInner>,
}

#[derive(Debug, Default)]
struct StoreInner {
    metadata: MetadataValues,
    userdata: UserdataValues,
}

impl MetadataStore {
    /// Freezes the provided values into a shareable store.
    pub fn new(metadata: MetadataValues, userdata: UserdataValues) -> Self {
        Self {
            inner: Arc::new(StoreInner { metadata, userdata }),
        }
    }

    /// Returns the value of a scalar field.
    pub fn field(&self, field: Field) -> &str {
        let values = &self.inner.metadata;
        match field {
            Field::AmiId => &values.ami_id,
            Field::AmiLaunchIndex => &values.ami_launch_index,
            Field::AmiManifestPath => &values.ami_manifest_path,
            Field::AvailabilityZone => &values.availability_zone,
            Field::Hostname => &values.hostname,
            Field::InstanceAction => &values.instance_action,
            Field::InstanceId => &values.instance_id,
            Field::InstanceType => &values.instance_type,
            Field::LocalHostname => &values.local_hostname,
            Field::LocalIpv4 => &values.local_ipv4,
            Field::Mac => &values.mac,
            Field::Profile => &values.profile,
            Field::ReservationId => &values.reservation_id,
            Field::User => &values.user,
        }
    }

    /// AMI the instance was launched from.
    pub fn ami_id(&self) -> &str {
        self.field(Field::AmiId)
    }

    /// Launch order of the instance within its reservation.
    pub fn ami_launch_index(&self) -> &str {
        self.field(Field::AmiLaunchIndex)
    }

    /// Manifest path of the AMI.
    pub fn ami_manifest_path(&self) -> &str {
        self.field(Field::AmiManifestPath)
    }

    /// Availability zone served under `placement/`.
    pub fn availability_zone(&self) -> &str {
        self.field(Field::AvailabilityZone)
    }

    /// Private DNS hostname.
    pub fn hostname(&self) -> &str {
        self.field(Field::Hostname)
    }

    /// Pending maintenance action, usually `none`.
    pub fn instance_action(&self) -> &str {
        self.field(Field::InstanceAction)
    }

    /// Instance identifier.
    pub fn instance_id(&self) -> &str {
        self.field(Field::InstanceId)
    }

    /// Instance type, e.g. `t3.micro`.
    pub fn instance_type(&self) -> &str {
        self.field(Field::InstanceType)
    }

    /// Hostname on the local network.
    pub fn local_hostname(&self) -> &str {
        self.field(Field::LocalHostname)
    }

    /// Private IPv4 address.
    pub fn local_ipv4(&self) -> &str {
        self.field(Field::LocalIpv4)
    }

    /// MAC address of the primary interface.
    pub fn mac(&self) -> &str {
        self.field(Field::Mac)
    }

    /// Virtualization profile.
    pub fn profile(&self) -> &str {
        self.field(Field::Profile)
    }

    /// Reservation the instance belongs to.
    pub fn reservation_id(&self) -> &str {
        self.field(Field::ReservationId)
    }

    /// Returns the configured role name.
    pub fn user(&self) -> &str {
        self.field(Field::User)
    }

    /// Indicates whether `name` is exactly the configured role name.
    pub fn is_role(&self, name: &str) -> bool {
        name == self.user()
    }

    /// Security-group names in configured order.
    pub fn security_groups(&self) -> &[String] {
        &self.inner.metadata.security_groups
    }

    /// Returns the whole interface table.
    pub fn network_interfaces(&self) -> &BTreeMap<String, Vec<String>> {
        &self.inner.metadata.network.interfaces
    }

    /// Returns the security-group ids for `mac`, or an empty slice when the MAC is unknown.
    pub fn security_group_ids(&self, mac: &str) -> &[String] {
        self.network_interfaces()
            .get(mac)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Mock credentials for the configured role.
    pub fn security_credentials(&self) -> &SecurityCredentials {
        &self.inner.metadata.security_credentials
    }

    /// Renders the userdata map as `key=value` lines, each terminated by `\n`.
    pub fn userdata_lines(&self) -> String {
        self.inner
            .userdata
            .iter()
            .map(|(key, value)| format!("{key}={value}\n"))
            .collect()
    }
}
