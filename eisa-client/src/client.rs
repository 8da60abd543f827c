use crate::error::{ApiError, FetchCause, Result};
use crate::flatten::{Record, flatten_record};
use crate::page::{Page, parse_catalog};
use futures::stream::{self, Stream, StreamExt, TryStreamExt};
use reqwest::{Client, RequestBuilder};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Path of the OData service root, relative to the configured base address.
pub const API_ROOT: &str = "odata/v1/";

/// Date field used to order responses when a resource exposes it.
pub const SUBMIT_DATE_FIELD: &str = "ResponseSubmitDate";

pub const DEFAULT_PAGE_SIZE: u32 = 100;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    Basic {
        username: String,
        password: Option<String>,
    },
    Bearer(String),
    Anonymous,
}

impl Credentials {
    fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        match self {
            Credentials::Basic { username, password } => {
                request.basic_auth(username, password.as_deref())
            }
            Credentials::Bearer(token) => request.bearer_auth(token),
            Credentials::Anonymous => request,
        }
    }
}

pub struct EisaClient {
    client: Client,
    api_root: Url,
    credentials: Credentials,
    page_size: u32,
}

impl EisaClient {
    pub fn new(base_url: &str, credentials: Credentials) -> Result<Self> {
        Self::with_timeout(base_url, credentials, DEFAULT_TIMEOUT_SECS)
    }

    pub fn with_timeout(base_url: &str, credentials: Credentials, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("eisa/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(timeout_secs.div_ceil(2)))
            .build()?;

        Ok(Self {
            client,
            api_root: api_root(base_url)?,
            credentials,
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// The `<base>/odata/v1/` address every resource is resolved against.
    pub fn api_root(&self) -> &Url {
        &self.api_root
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Fetch the catalog and return resource name -> resource url.
    pub async fn get_resources(&self) -> Result<BTreeMap<String, String>> {
        let url = self.api_root.as_str();
        debug!("Fetching resource catalog from {}", url);

        let response = self.credentials.apply(self.client.get(url)).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(ApiError::Discovery {
                url: url.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let document: serde_json::Value = serde_json::from_str(&body)?;
        let resources = parse_catalog(&document);
        info!("Discovered {} resources at {}", resources.len(), url);
        Ok(resources)
    }

    /// Resolve a catalog url against the API root. Relative names land under
    /// `odata/v1/`, absolute urls are kept.
    pub fn resource_url(&self, resource: &str) -> Result<Url> {
        self.api_root
            .join(resource)
            .map_err(|e| ApiError::InvalidUrl(format!("{}: {}", resource, e)))
    }

    /// Query parameters sent with the first request of a resource.
    pub fn default_params(&self, resource_url: &str) -> Vec<(String, String)> {
        let mut params = vec![("$top".to_string(), self.page_size.to_string())];
        if resource_url.contains(SUBMIT_DATE_FIELD) {
            params.push(("$orderby".to_string(), format!("{} asc", SUBMIT_DATE_FIELD)));
        }
        params
    }

    /// Lazily walk a paginated resource.
    ///
    /// `params` go out with the first request only; every later request uses
    /// the server's next link verbatim. The stream yields at most one error and
    /// ends right after it.
    pub fn pages(
        &self,
        url: Url,
        params: Vec<(String, String)>,
    ) -> impl Stream<Item = Result<Page>> + '_ {
        stream::try_unfold(Some((url, Some(params))), move |cursor| async move {
            match cursor {
                None => Ok(None),
                Some((url, params)) => self
                    .next_page(url, params)
                    .await
                    .map(|(page, next)| Some((page, next.map(|url| (url, None))))),
            }
        })
    }

    /// Flattened records of a resource, page by page, in server order.
    pub fn records(
        &self,
        url: Url,
        params: Vec<(String, String)>,
    ) -> impl Stream<Item = Result<Record>> + '_ {
        self.pages(url, params)
            .map_ok(|page| stream::iter(page.records.into_iter().map(Ok::<Record, ApiError>)))
            .try_flatten()
            .map(|record| record.map(flatten_record))
    }

    /// Fetch one page and resolve the address of the following one.
    async fn next_page(
        &self,
        url: Url,
        params: Option<Vec<(String, String)>>,
    ) -> Result<(Page, Option<Url>)> {
        let page = self
            .fetch_page(&url, params.as_deref())
            .await
            .map_err(|source| ApiError::Fetch {
                url: url.to_string(),
                source,
            })?;

        let next = match page.next_link.as_deref() {
            Some(link) => Some(url.join(link).map_err(|reason| ApiError::Fetch {
                url: url.to_string(),
                source: FetchCause::NextLink {
                    link: link.to_string(),
                    reason,
                },
            })?),
            None => None,
        };

        Ok((page, next))
    }

    async fn fetch_page(
        &self,
        url: &Url,
        params: Option<&[(String, String)]>,
    ) -> std::result::Result<Page, FetchCause> {
        debug!("Fetching page {}", url);

        let mut request = self.client.get(url.clone());
        if let Some(params) = params {
            request = request.query(params);
        }

        let response = self.credentials.apply(request).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(FetchCause::Status {
                status: status.as_u16(),
                body,
            });
        }

        let page: Page = serde_json::from_str(&body)?;
        debug!(
            "Got {} records from {} (next: {})",
            page.records.len(),
            url,
            page.next_link.as_deref().unwrap_or("none")
        );
        Ok(page)
    }
}

fn api_root(base_url: &str) -> Result<Url> {
    let base = Url::parse(&format!("{}/", base_url.trim_end_matches('/')))
        .map_err(|e| ApiError::InvalidUrl(format!("{}: {}", base_url, e)))?;
    base.join(API_ROOT)
        .map_err(|e| ApiError::InvalidUrl(format!("{}: {}", base_url, e)))
}
