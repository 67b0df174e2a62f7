//! CKAN client for harvesting packages and resource payloads from CKAN portals.
//!
//! Only the read-only action API is used: `package_list`, `group_show` and
//! `package_show`. Resource payloads are fetched from the URL the catalog
//! publishes for each resource, which is often hosted outside the portal.

use futures::StreamExt;
use futures::TryStreamExt;
use futures::stream::{self, BoxStream};
use granary_core::error::AppError;
use granary_core::models::{Package, Resource};
use granary_core::traits::{ByteStream, CatalogClient};
use granary_core::HttpConfig;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;

/// Path of the action API relative to a portal root.
const ACTION_PATH: &str = "api/3/action/";

/// Generic wrapper for CKAN API responses.
///
/// CKAN API reference: <https://docs.ckan.org/en/2.9/api/>
///
/// Successful calls carry `result`; failed calls carry `error` instead, often
/// together with a 4xx status:
/// ```json
/// {
///     "success": false,
///     "error": {"message": "Not found", "__type": "Not Found Error"}
/// }
/// ```
#[derive(Deserialize, Debug)]
struct CkanResponse<T> {
    success: bool,
    result: Option<T>,
    error: Option<Value>,
}

impl<T> CkanResponse<T> {
    fn error_message(&self) -> String {
        self.error
            .as_ref()
            .and_then(|e| e.get("message").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| "success: false".to_string())
    }
}

/// Package entry embedded in a `group_show` result.
#[derive(Deserialize, Debug)]
struct GroupPackage {
    id: String,
    name: Option<String>,
}

#[derive(Deserialize, Debug)]
struct GroupShowResult {
    #[serde(default)]
    packages: Vec<GroupPackage>,
}

/// Resource entry of a `package_show` result.
///
/// Only the fields the harvester acts on are typed; the whole payload is kept
/// verbatim in [`Package::metadata`].
#[derive(Deserialize, Debug)]
struct CkanResource {
    id: Option<String>,
    url: Option<String>,
    name: Option<String>,
    format: Option<String>,
    mimetype: Option<String>,
}

/// Builds the HTTP session shared by every catalog and download request.
///
/// The returned client is cheap to clone; all clones share one connection pool.
/// Only connection setup and idle reads are bounded, never the whole transfer.
///
/// # Errors
///
/// Returns `AppError::NetworkError` if the TLS backend cannot be initialized.
pub fn build_session(config: &HttpConfig) -> Result<Client, AppError> {
    Client::builder()
        .user_agent(config.user_agent.as_str())
        .connect_timeout(config.connect_timeout)
        .read_timeout(config.read_timeout)
        .build()
        .map_err(|e| AppError::NetworkError(format!("Failed to build HTTP session: {}", e)))
}

/// HTTP client for a CKAN open data portal.
///
/// # Examples
///
/// ```no_run
/// use futures::TryStreamExt;
/// use granary_client::{CkanClient, build_session};
/// use granary_core::{CatalogClient, HttpConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let http = HttpConfig::default();
/// let session = build_session(&http)?;
/// let client = CkanClient::new(session, "https://dati.gov.it", &http)?;
/// let ids: Vec<String> = client.list_packages().try_collect().await?;
/// println!("Found {} packages", ids.len());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct CkanClient {
    client: Client,
    action_url: Url,
    page_size: usize,
    upgrade_insecure: bool,
    read_timeout: Duration,
}

impl CkanClient {
    /// Creates a client for the portal at `base_url`.
    ///
    /// `base_url` is either a portal root (`https://dati.gov.it`), whose actions
    /// live under `api/3/action/`, or an action root ending in `/action/`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidCatalogUrl` if the URL is malformed or cannot
    /// carry a path.
    pub fn new(session: Client, base_url: &str, http: &HttpConfig) -> Result<Self, AppError> {
        let action_url = action_root(base_url)?;
        Ok(Self {
            client: session,
            action_url,
            page_size: http.page_size.max(1),
            upgrade_insecure: http.upgrade_insecure,
            read_timeout: http.read_timeout,
        })
    }

    /// The resolved action API root.
    pub fn action_url(&self) -> &Url {
        &self.action_url
    }

    fn endpoint(&self, action: &str) -> Result<Url, AppError> {
        self.action_url
            .join(action)
            .map_err(|e| AppError::InvalidCatalogUrl(e.to_string()))
    }

    /// Calls one action and unwraps the CKAN envelope.
    async fn call_action<T: DeserializeOwned>(
        &self,
        action: &str,
        params: &[(&str, String)],
    ) -> Result<T, AppError> {
        let mut url = self.endpoint(action)?;
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in params {
                pairs.append_pair(key, value);
            }
        }

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| {
                transport_error(e, self.read_timeout, |msg| {
                    AppError::CatalogError(format!("{}: {}", action, msg))
                })
            })?;
        let status = resp.status();
        let body = resp
            .bytes()
            .await
            .map_err(|e| {
                transport_error(e, self.read_timeout, |msg| {
                    AppError::CatalogError(format!("{}: {}", action, msg))
                })
            })?;

        let http_error = || AppError::CatalogError(format!("{}: HTTP {}", action, status));
        let envelope = match serde_json::from_slice::<CkanResponse<T>>(&body) {
            Ok(envelope) => envelope,
            Err(_) if !status.is_success() => return Err(http_error()),
            Err(e) => {
                return Err(AppError::CatalogError(format!(
                    "{}: invalid response: {}",
                    action, e
                )));
            }
        };

        if !envelope.success {
            return Err(AppError::CatalogError(format!(
                "{}: {}",
                action,
                envelope.error_message()
            )));
        }
        if !status.is_success() {
            return Err(http_error());
        }

        envelope
            .result
            .ok_or_else(|| AppError::CatalogError(format!("{}: response without result", action)))
    }

    /// Fetches one page of `package_list`.
    async fn package_list_page(&self, offset: usize) -> Result<Vec<String>, AppError> {
        self.call_action(
            "package_list",
            &[
                ("limit", self.page_size.to_string()),
                ("offset", offset.to_string()),
            ],
        )
        .await
    }

    /// Builds a [`Resource`] from one `package_show` entry.
    ///
    /// Returns `Ok(None)` for entries without a URL.
    fn convert_resource(
        &self,
        package_id: &str,
        raw: CkanResource,
    ) -> Result<Option<Resource>, AppError> {
        let id = raw.id.filter(|id| !id.trim().is_empty()).ok_or_else(|| {
            AppError::CatalogError(format!(
                "package_show {}: resource without an id",
                package_id
            ))
        })?;

        let Some(url) = raw.url.map(|u| u.trim().to_string()).filter(|u| !u.is_empty()) else {
            tracing::warn!(
                package = package_id,
                resource = id.as_str(),
                "Resource has no URL, dropping it"
            );
            return Ok(None);
        };

        let url = if self.upgrade_insecure {
            upgrade_to_https(&url)
        } else {
            url
        };

        Ok(Some(Resource {
            id,
            package_id: package_id.to_string(),
            url,
            name: raw.name.filter(|n| !n.is_empty()),
            format: raw.format.filter(|f| !f.is_empty()),
            mimetype: raw.mimetype.filter(|m| !m.is_empty()),
        }))
    }
}

/// Resolves the action API root for a base URL.
fn action_root(base_url: &str) -> Result<Url, AppError> {
    let invalid = || AppError::InvalidCatalogUrl(base_url.to_string());
    let mut url = Url::parse(base_url.trim()).map_err(|_| invalid())?;
    if url.cannot_be_a_base() {
        return Err(invalid());
    }

    let path = url.path().trim_end_matches('/').to_string();
    if path.ends_with("/action") {
        url.set_path(&format!("{}/", path));
        return Ok(url);
    }

    url.set_path(&format!("{}/", path));
    url.join(ACTION_PATH).map_err(|_| invalid())
}

/// Rewrites `http://` to `https://`, leaving every other URL untouched.
fn upgrade_to_https(url: &str) -> String {
    match url.get(..7) {
        Some(scheme) if scheme.eq_ignore_ascii_case("http://") => format!("https://{}", &url[7..]),
        _ => url.to_string(),
    }
}

/// Maps a transport error; timeouts keep their own variant.
fn transport_error(
    err: reqwest::Error,
    read_timeout: Duration,
    wrap: impl FnOnce(String) -> AppError,
) -> AppError {
    if err.is_timeout() {
        AppError::Timeout(read_timeout.as_secs())
    } else {
        wrap(describe(&err))
    }
}

/// Short description of a transport error.
fn describe(err: &reqwest::Error) -> String {
    if err.is_connect() {
        format!("connection failed ({})", err)
    } else {
        err.to_string()
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

impl CatalogClient for CkanClient {
    fn list_packages(&self) -> BoxStream<'_, Result<String, AppError>> {
        let page_size = self.page_size;
        stream::try_unfold(Some(0usize), move |offset| async move {
            let Some(offset) = offset else {
                return Ok::<_, AppError>(None);
            };
            let page = self.package_list_page(offset).await?;
            tracing::debug!(offset, count = page.len(), "Fetched package_list page");
            // A short page is the last one. Portals that ignore `limit` return
            // everything at once, which also ends the listing.
            let next = (page.len() == page_size).then_some(offset + page_size);
            Ok(Some((page, next)))
        })
        .map_ok(|page| stream::iter(page.into_iter().map(Ok::<_, AppError>)))
        .try_flatten()
        .boxed()
    }

    async fn list_group_packages(&self, group: &str) -> Result<Vec<String>, AppError> {
        let result: GroupShowResult = self
            .call_action(
                "group_show",
                &[
                    ("id", group.to_string()),
                    ("include_datasets", "true".to_string()),
                ],
            )
            .await?;

        Ok(result
            .packages
            .into_iter()
            .map(|p| p.name.filter(|n| !n.is_empty()).unwrap_or(p.id))
            .collect())
    }

    async fn get_package_details(&self, id: &str) -> Result<Package, AppError> {
        let metadata: Value = self
            .call_action("package_show", &[("id", id.to_string())])
            .await?;

        let raw_resources = match metadata.get("resources") {
            None | Some(Value::Null) => Vec::new(),
            Some(value) => Vec::<CkanResource>::deserialize(value).map_err(|e| {
                AppError::CatalogError(format!("package_show {}: malformed resources: {}", id, e))
            })?,
        };

        let mut resources = Vec::with_capacity(raw_resources.len());
        for raw in raw_resources {
            if let Some(resource) = self.convert_resource(id, raw)? {
                resources.push(resource);
            }
        }

        Ok(Package {
            id: id.to_string(),
            resources,
            metadata,
        })
    }

    async fn download_resource(&self, resource: &Resource) -> Result<ByteStream, AppError> {
        let url = Url::parse(&resource.url)
            .map_err(|e| AppError::DownloadError(format!("invalid URL {}: {}", resource.url, e)))?;

        let resp = self.client.get(url).send().await.map_err(|e| {
            transport_error(e, self.read_timeout, |msg| {
                AppError::DownloadError(format!("{}: {}", resource.url, msg))
            })
        })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(AppError::DownloadError(format!(
                "HTTP {} for {}",
                status, resource.url
            )));
        }

        let source = resource.url.clone();
        let read_timeout = self.read_timeout;
        Ok(resp
            .bytes_stream()
            .map_err(move |e| {
                transport_error(e, read_timeout, |msg| {
                    AppError::DownloadError(format!("{}: {}", source, msg))
                })
            })
            .boxed())
    }
}
