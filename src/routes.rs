//! Path table construction and lookup.
//!
//! Every metadata prefix is expanded against [`METADATA_ENDPOINTS`], every userdata prefix
//! gets a single listing route, and the bare root serves the service banner. The resulting
//! [`RouteTable`] is built once and never changes while serving.

use std::collections::HashMap;

use mock_ec2_metadata_store::{Field, PRIMARY_MAC};

use crate::config::Config;

/// Suffix under a metadata prefix whose trailing segment names the requested role.
const CREDENTIALS_SUFFIX: &str = "/iam/security-credentials/";

/// What a matched path serves.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Endpoint {
    /// `Mock EC2 Metadata Service` at the bare root.
    Banner,
    /// Fixed directory listing under a metadata prefix.
    MetadataIndex,
    /// A scalar store field written verbatim.
    Field(Field),
    /// `security-credentials/`
    IamIndex,
    /// 301 to the credentials listing with a trailing slash.
    CredentialsRedirect { location: String },
    /// The configured role name.
    CredentialsRole,
    /// JSON credentials for the captured role name.
    CredentialDetails { username: String },
    /// Newline-joined security-group names.
    SecurityGroups,
    /// Security-group ids of one network interface.
    SecurityGroupIds { mac: &'static str },
    /// `key=value` lines for every userdata pair.
    Userdata,
}

/// Endpoints mounted under every metadata prefix, in registration order.
///
/// The credentials redirect and the role capture depend on the prefix and are added by
/// [`RouteTable::build`].
pub const METADATA_ENDPOINTS: &[(&str, Endpoint)] = &[
    ("/", Endpoint::MetadataIndex),
    ("/ami-id", Endpoint::Field(Field::AmiId)),
    ("/ami-launch-index", Endpoint::Field(Field::AmiLaunchIndex)),
    ("/ami-manifest-path", Endpoint::Field(Field::AmiManifestPath)),
    (
        "/placement/availability-zone",
        Endpoint::Field(Field::AvailabilityZone),
    ),
    ("/hostname", Endpoint::Field(Field::Hostname)),
    ("/instance-action", Endpoint::Field(Field::InstanceAction)),
    ("/instance-id", Endpoint::Field(Field::InstanceId)),
    ("/instance-type", Endpoint::Field(Field::InstanceType)),
    ("/iam/", Endpoint::IamIndex),
    (CREDENTIALS_SUFFIX, Endpoint::CredentialsRole),
    ("/local-hostname", Endpoint::Field(Field::LocalHostname)),
    ("/local-ipv4", Endpoint::Field(Field::LocalIpv4)),
    ("/mac", Endpoint::Field(Field::Mac)),
    ("/profile", Endpoint::Field(Field::Profile)),
    ("/reservation-id", Endpoint::Field(Field::ReservationId)),
    ("/security-groups", Endpoint::SecurityGroups),
    (
        "/network/interfaces/macs/00:00:00:00:00:00/security-group-ids",
        Endpoint::SecurityGroupIds { mac: PRIMARY_MAC },
    ),
];

/// Immutable mapping from request path to [`Endpoint`].
#[derive(Clone, Debug, Default)]
pub struct RouteTable {
    exact: HashMap<String, Endpoint>,
    /// Bases (`{prefix}/iam/security-credentials/`) whose next segment is a role name.
    credential_bases: Vec<String>,
}

impl RouteTable {
    /// Expands the configured prefixes into a route table.
    ///
    /// The banner is registered first, then metadata prefixes, then userdata prefixes, each
    /// in configured order. When two registrations produce the same path the first one wins.
    pub fn build(config: &Config) -> Self {
        let mut table = Self::default();
        table.insert("/".to_owned(), Endpoint::Banner);

        for (index, prefix) in config.metadata_prefixes.iter().enumerate() {
            tracing::info!(index, %prefix, "adding metadata prefix");

            for (suffix, endpoint) in METADATA_ENDPOINTS {
                table.insert(format!("{prefix}{suffix}"), endpoint.clone());
            }

            let base = format!("{prefix}{CREDENTIALS_SUFFIX}");
            table.insert(
                format!("{prefix}/iam/security-credentials"),
                Endpoint::CredentialsRedirect {
                    location: base.clone(),
                },
            );
            if !table.credential_bases.contains(&base) {
                table.credential_bases.push(base);
            }
        }

        for (index, prefix) in config.userdata_prefixes.iter().enumerate() {
            tracing::info!(index, %prefix, "adding userdata prefix");
            table.insert(format!("{prefix}/"), Endpoint::Userdata);
        }

        table
    }

    fn insert(&mut self, path: String, endpoint: Endpoint) {
        if let Some(existing) = self.exact.get(&path) {
            tracing::warn!(
                %path,
                kept = ?existing,
                shadowed = ?endpoint,
                "route already registered; keeping the first registration"
            );
            return;
        }
        self.exact.insert(path, endpoint);
    }

    /// Resolves a request path.
    ///
    /// Literal routes are tried first. Otherwise a path made of a credentials base plus one
    /// non-empty segment without `/` resolves to [`Endpoint::CredentialDetails`].
    pub fn resolve(&self, path: &str) -> Option<Endpoint> {
        if let Some(endpoint) = self.exact.get(path) {
            return Some(endpoint.clone());
        }

        self.credential_bases.iter().find_map(|base| {
            let username = path.strip_prefix(base.as_str())?;
            (!username.is_empty() && !username.contains('/')).then(|| {
                Endpoint::CredentialDetails {
                    username: username.to_owned(),
                }
            })
        })
    }

    /// Number of literal paths in the table.
    pub fn len(&self) -> usize {
        self.exact.len()
    }

    /// Indicates whether no literal path is registered.
    pub fn is_empty(&self) -> bool {
        self.exact.is_empty()
    }

    /// Iterates over every literal path.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.exact.keys().map(String::as_str)
    }
}
