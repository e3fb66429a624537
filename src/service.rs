use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::header::{ALLOW, CONTENT_TYPE, LOCATION};
use axum::http::{HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use mock_ec2_metadata_store::MetadataStore;
use percent_encoding::percent_decode_str;

use crate::config::Config;
use crate::routes::{Endpoint, RouteTable};

const PLAIN_TEXT: &str = "text/plain; charset=utf-8";
const JSON: &str = "application/json; charset=utf-8";

/// Body of the bare root.
pub const BANNER: &str = "Mock EC2 Metadata Service";
/// Directory listing served at `{prefix}/`, independent of the configured values.
pub const METADATA_INDEX: &str = "hostname\ninstance-id\ninstance-type\niam";
/// Body of `{prefix}/iam/`.
pub const IAM_INDEX: &str = "security-credentials/";

/// Read-only metadata service: the frozen store plus the route table built from it.
#[derive(Clone, Debug)]
pub struct MetadataService {
    store: MetadataStore,
    routes: Arc<RouteTable>,
}

impl MetadataService {
    /// Builds the store and the route table from a loaded configuration.
    pub fn new(config: &Config) -> Self {
        Self::with_parts(config.store(), RouteTable::build(config))
    }

    /// Assembles a service from an already built store and route table.
    pub fn with_parts(store: MetadataStore, routes: RouteTable) -> Self {
        Self {
            store,
            routes: Arc::new(routes),
        }
    }

    /// Returns the metadata snapshot being served.
    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    /// Returns the route table requests are resolved against.
    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Wraps the service in an Axum router that dispatches every request through
    /// [`MetadataService::respond`].
    pub fn into_router(self) -> Router {
        Router::new().fallback(dispatch).with_state(self)
    }

    /// Produces the response for a request.
    ///
    /// `path` is percent-decoded before lookup, so `%3A` in a MAC or an escaped role name
    /// match their literal routes.
    ///
    /// GET (and HEAD, whose body hyper strips) is the only supported method; other methods
    /// on a known path get 405, unknown paths get 404.
    pub fn respond(&self, method: &Method, path: &str) -> Response {
        let Ok(path) = percent_decode_str(path).decode_utf8() else {
            tracing::debug!(%method, path, "path is not valid UTF-8 once decoded");
            return StatusCode::NOT_FOUND.into_response();
        };
        let path: &str = &path;

        let Some(endpoint) = self.routes.resolve(path) else {
            tracing::debug!(%method, path, "no route");
            return StatusCode::NOT_FOUND.into_response();
        };

        if method != Method::GET && method != Method::HEAD {
            tracing::debug!(%method, path, "method not allowed");
            return (
                StatusCode::METHOD_NOT_ALLOWED,
                [(ALLOW, HeaderValue::from_static("GET, HEAD"))],
            )
                .into_response();
        }

        tracing::debug!(%method, path, ?endpoint, "serving");
        self.serve(endpoint)
    }

    fn serve(&self, endpoint: Endpoint) -> Response {
        let store = &self.store;
        match endpoint {
            Endpoint::Banner => plain_text(BANNER),
            Endpoint::MetadataIndex => plain_text(METADATA_INDEX),
            Endpoint::Field(field) => plain_text(store.field(field).to_owned()),
            Endpoint::IamIndex => plain_text(IAM_INDEX),
            Endpoint::CredentialsRedirect { location } => moved_permanently(&location),
            Endpoint::CredentialsRole => plain_text(store.user().to_owned()),
            Endpoint::CredentialDetails { username } => self.credential_details(&username),
            Endpoint::SecurityGroups => plain_text(store.security_groups().join("\n")),
            Endpoint::SecurityGroupIds { mac } => {
                plain_text(store.security_group_ids(mac).join("\n"))
            }
            Endpoint::Userdata => plain_text(store.userdata_lines()),
        }
    }

    fn credential_details(&self, username: &str) -> Response {
        if !self.store.is_role(username) {
            tracing::warn!(username, "IAM user not found");
            return StatusCode::NOT_FOUND.into_response();
        }

        let credentials = self.store.security_credentials();
        match serde_json::to_vec(credentials) {
            Ok(mut body) => {
                body.push(b'\n');
                tracing::info!(
                    username,
                    access_key_id = %credentials.access_key_id,
                    "returning security credentials"
                );
                ([(CONTENT_TYPE, HeaderValue::from_static(JSON))], Body::from(body)).into_response()
            }
            Err(err) => {
                tracing::error!(%err, "failed to encode security credentials");
                StatusCode::NOT_FOUND.into_response()
            }
        }
    }
}

async fn dispatch(
    State(service): State<MetadataService>,
    method: Method,
    uri: Uri,
) -> Response {
    service.respond(&method, uri.path())
}

fn plain_text(body: impl Into<Body>) -> Response {
    (
        [(CONTENT_TYPE, HeaderValue::from_static(PLAIN_TEXT))],
        body.into(),
    )
        .into_response()
}

fn moved_permanently(location: &str) -> Response {
    match HeaderValue::try_from(location) {
        Ok(location) => (StatusCode::MOVED_PERMANENTLY, [(LOCATION, location)]).into_response(),
        Err(err) => {
            tracing::error!(location, %err, "redirect target is not a valid header value");
            StatusCode::NOT_FOUND.into_response()
        }
    }
}
