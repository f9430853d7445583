//! Scaleway Instances API access behind [`ServerApi`].
//!
//! Server listing and creation go through the REST API directly so the
//! creation request can carry cloud-init user data; image lookup and server
//! actions reuse the `scaleway_rs` client.

use std::sync::LazyLock;
use std::time::Duration;

use reqwest::StatusCode;
use scaleway_rs::{ScalewayApi, ScalewayImage, ScalewayListInstanceImagesBuilder};
use serde::{Deserialize, Serialize};

use crate::driver::DriverFuture;

use super::error::ScalewayDriverError;
use super::image::select_image_id;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const SCALEWAY_INSTANCE_API_BASE: &str = "https://api.scaleway.com/instance/v1";

/// Tag carried by every server this crate creates.
pub const TESTBED_TAG: &str = "testbed";

static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

/// Point-in-time view of a server.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServerSnapshot {
    /// Provider identifier.
    pub id: String,
    /// Server name, equal to the instance name.
    pub name: String,
    /// Provider state (`running`, `starting`, `stopped`, ...).
    pub state: String,
    /// Actions the provider currently allows.
    pub allowed_actions: Vec<String>,
    /// Public IPv4 address, once assigned.
    pub public_ip: Option<String>,
}

impl ServerSnapshot {
    /// Whether the provider allows `action` right now.
    #[must_use]
    pub fn allows(&self, action: &str) -> bool {
        self.allowed_actions.iter().any(|allowed| allowed == action)
    }
}

/// Image lookup parameters.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ImageQuery {
    /// Human readable image label.
    pub label: String,
    /// CPU architecture.
    pub architecture: String,
    /// Zone to search.
    pub zone: String,
    /// Project whose private images are searched first.
    pub project_id: String,
    /// Optional organisation scope.
    pub organisation_id: Option<String>,
}

/// Parameters for creating a server.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServerRequest {
    /// Server name.
    pub name: String,
    /// Target zone.
    pub zone: String,
    /// Commercial type (for example `DEV1-S`).
    pub commercial_type: String,
    /// Resolved image identifier.
    pub image_id: String,
    /// Owning project.
    pub project_id: String,
    /// Optional organisation.
    pub organisation_id: Option<String>,
    /// Tags applied to the server.
    pub tags: Vec<String>,
    /// First-boot user data.
    pub cloud_init: Option<String>,
}

/// Operations the cloud driver needs from the provider.
pub trait ServerApi: Send + Sync {
    /// Servers in `zone` carrying [`TESTBED_TAG`].
    fn list_servers<'a>(
        &'a self,
        zone: &'a str,
    ) -> DriverFuture<'a, Vec<ServerSnapshot>, ScalewayDriverError>;

    /// The server in `zone` named exactly `name`, if any.
    fn find_server<'a>(
        &'a self,
        zone: &'a str,
        name: &'a str,
    ) -> DriverFuture<'a, Option<ServerSnapshot>, ScalewayDriverError>;

    /// Resolves an image label to a concrete image identifier.
    fn resolve_image<'a>(
        &'a self,
        query: &'a ImageQuery,
    ) -> DriverFuture<'a, String, ScalewayDriverError>;

    /// Creates a stopped server.
    fn create_server<'a>(
        &'a self,
        request: &'a ServerRequest,
    ) -> DriverFuture<'a, ServerSnapshot, ScalewayDriverError>;

    /// Performs a server action such as `poweron` or `terminate`.
    fn perform_action<'a>(
        &'a self,
        zone: &'a str,
        server_id: &'a str,
        action: &'a str,
    ) -> DriverFuture<'a, (), ScalewayDriverError>;

    /// Deletes a stopped server.
    fn delete_server<'a>(
        &'a self,
        zone: &'a str,
        server_id: &'a str,
    ) -> DriverFuture<'a, (), ScalewayDriverError>;
}

#[derive(Debug, Deserialize)]
struct PublicIpRecord {
    address: String,
}

#[derive(Debug, Deserialize)]
struct ServerRecord {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    allowed_actions: Vec<String>,
    #[serde(default)]
    public_ip: Option<PublicIpRecord>,
}

impl From<ServerRecord> for ServerSnapshot {
    fn from(record: ServerRecord) -> Self {
        Self {
            id: record.id,
            name: record.name,
            state: record.state,
            allowed_actions: record.allowed_actions,
            public_ip: record.public_ip.map(|ip| ip.address),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListServersResponse {
    #[serde(default)]
    servers: Vec<ServerRecord>,
}

#[derive(Debug, Deserialize)]
struct CreateServerResponse {
    server: ServerRecord,
}

#[derive(Serialize)]
struct CreateServerPayload<'a> {
    name: &'a str,
    commercial_type: &'a str,
    image: &'a str,
    project: &'a str,
    routed_ip_enabled: bool,
    dynamic_ip_required: bool,
    tags: &'a [String],
    stopped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    cloud_init: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    organization: Option<&'a str>,
}

/// [`ServerApi`] talking to the public Scaleway endpoints.
#[derive(Clone)]
pub struct ScalewayHttpApi {
    api: ScalewayApi,
    secret_key: String,
}

impl ScalewayHttpApi {
    /// Creates a client authenticated with `secret_key`.
    #[must_use]
    pub fn new(secret_key: &str) -> Self {
        Self {
            api: ScalewayApi::new(secret_key),
            secret_key: secret_key.to_owned(),
        }
    }

    fn provider_error(err: impl ToString) -> ScalewayDriverError {
        ScalewayDriverError::Provider {
            message: err.to_string(),
        }
    }

    async fn get_servers(
        &self,
        zone: &str,
        name: Option<&str>,
    ) -> Result<Vec<ServerSnapshot>, ScalewayDriverError> {
        let url = format!("{SCALEWAY_INSTANCE_API_BASE}/zones/{zone}/servers");
        let mut query = vec![("tags", TESTBED_TAG), ("per_page", "100")];
        if let Some(server_name) = name {
            query.push(("name", server_name));
        }
        let response = HTTP_CLIENT
            .get(&url)
            .header("X-Auth-Token", &self.secret_key)
            .query(&query)
            .send()
            .await
            .map_err(Self::provider_error)?;
        let status = response.status();
        let body = response.bytes().await.map_err(Self::provider_error)?;
        if !status.is_success() {
            return Err(ScalewayDriverError::Provider {
                message: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        let parsed: ListServersResponse =
            serde_json::from_slice(&body).map_err(Self::provider_error)?;
        Ok(parsed.servers.into_iter().map(ServerSnapshot::from).collect())
    }

    async fn fetch_images(
        &self,
        query: &ImageQuery,
        project_scoped: bool,
    ) -> Result<Vec<ScalewayImage>, ScalewayDriverError> {
        let mut builder = ScalewayListInstanceImagesBuilder::new(self.api.clone(), &query.zone)
            .public(true)
            .name(&query.label)
            .arch(&query.architecture);
        if project_scoped {
            builder = builder.project(&query.project_id);
            if let Some(org) = &query.organisation_id {
                builder = builder.organization(org);
            }
        }
        builder.run_async().await.map_err(Self::provider_error)
    }
}

impl ServerApi for ScalewayHttpApi {
    fn list_servers<'a>(
        &'a self,
        zone: &'a str,
    ) -> DriverFuture<'a, Vec<ServerSnapshot>, ScalewayDriverError> {
        Box::pin(async move { self.get_servers(zone, None).await })
    }

    fn find_server<'a>(
        &'a self,
        zone: &'a str,
        name: &'a str,
    ) -> DriverFuture<'a, Option<ServerSnapshot>, ScalewayDriverError> {
        Box::pin(async move {
            let servers = self.get_servers(zone, Some(name)).await?;
            Ok(servers.into_iter().find(|server| server.name == name))
        })
    }

    fn resolve_image<'a>(
        &'a self,
        query: &'a ImageQuery,
    ) -> DriverFuture<'a, String, ScalewayDriverError> {
        Box::pin(async move {
            let project_images = if query.project_id.is_empty() {
                Vec::new()
            } else {
                self.fetch_images(query, true).await?
            };
            let candidates = if project_images.is_empty() {
                self.fetch_images(query, false).await?
            } else {
                project_images
            };
            select_image_id(candidates, query)
        })
    }

    fn create_server<'a>(
        &'a self,
        request: &'a ServerRequest,
    ) -> DriverFuture<'a, ServerSnapshot, ScalewayDriverError> {
        Box::pin(async move {
            let url = format!("{SCALEWAY_INSTANCE_API_BASE}/zones/{}/servers", request.zone);
            let payload = CreateServerPayload {
                name: &request.name,
                commercial_type: &request.commercial_type,
                image: &request.image_id,
                project: &request.project_id,
                routed_ip_enabled: true,
                dynamic_ip_required: true,
                tags: &request.tags,
                stopped: true,
                cloud_init: request.cloud_init.as_deref(),
                organization: request.organisation_id.as_deref(),
            };
            let response = HTTP_CLIENT
                .post(&url)
                .header("X-Auth-Token", &self.secret_key)
                .json(&payload)
                .send()
                .await
                .map_err(Self::provider_error)?;
            let status = response.status();
            let body = response.bytes().await.map_err(Self::provider_error)?;
            if status.is_success() {
                let parsed: CreateServerResponse =
                    serde_json::from_slice(&body).map_err(Self::provider_error)?;
                return Ok(parsed.server.into());
            }
            if is_instance_type_rejection(status, &body, &request.commercial_type) {
                return Err(ScalewayDriverError::InstanceTypeUnavailable {
                    instance_type: request.commercial_type.clone(),
                    zone: request.zone.clone(),
                });
            }
            Err(ScalewayDriverError::Provider {
                message: String::from_utf8_lossy(&body).into_owned(),
            })
        })
    }

    fn perform_action<'a>(
        &'a self,
        zone: &'a str,
        server_id: &'a str,
        action: &'a str,
    ) -> DriverFuture<'a, (), ScalewayDriverError> {
        Box::pin(async move {
            self.api
                .perform_instance_action_async(zone, server_id, action)
                .await
                .map_err(Self::provider_error)?;
            Ok(())
        })
    }

    fn delete_server<'a>(
        &'a self,
        zone: &'a str,
        server_id: &'a str,
    ) -> DriverFuture<'a, (), ScalewayDriverError> {
        Box::pin(async move {
            self.api
                .delete_instance_async(zone, server_id)
                .await
                .map_err(Self::provider_error)?;
            Ok(())
        })
    }
}

fn is_instance_type_rejection(status: StatusCode, body: &[u8], instance_type: &str) -> bool {
    if !status.is_client_error() {
        return false;
    }
    serde_json::from_slice::<scaleway_rs::ScalewayApiError>(body).is_ok_and(|api_err| {
        matches!(api_err.resource.as_deref(), Some("commercial_type"))
            || api_err.resource_id.as_deref() == Some(instance_type)
            || (api_err.etype == "invalid_arguments"
                && api_err
                    .message
                    .to_ascii_lowercase()
                    .contains("commercial_type"))
    })
}
