//! Blocking HTTP/JSON client for the Service Directory REST surface.
//!
//! Every request targets `{api_base_url}/{resource path}`. Base URL and the
//! name of the token variable come from the [`SettingsHandle`] at call
//! time. Each call is attempted once.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use cnwan_core::SettingsHandle;

use crate::error::RegistryError;
use crate::registry::{Endpoint, Listing, Namespace, Page, Service, ServiceRegistry};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EndpointPage {
    #[serde(default)]
    endpoints: Vec<Endpoint>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServicePage {
    #[serde(default)]
    services: Vec<Service>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Clone)]
pub struct DirectoryClient {
    agent: ureq::Agent,
    settings: SettingsHandle,
}

impl DirectoryClient {
    pub fn new(settings: SettingsHandle) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build();
        Self { agent, settings }
    }

    fn url(&self, path: &str) -> String {
        url_for(&self.settings.load().api_base_url, path)
    }

    fn request(&self, method: &str, path: &str) -> ureq::Request {
        let settings = self.settings.load();
        let request = self.agent.request(method, &url_for(&settings.api_base_url, path));
        match std::env::var(&settings.token_env) {
            Ok(token) if !token.is_empty() => {
                request.set("Authorization", &format!("Bearer {token}"))
            }
            _ => request,
        }
    }

    fn get<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, RegistryError> {
        tracing::debug!("GET {}", self.url(path));
        match self.request("GET", path).call() {
            Ok(response) => decode(path, response).map(Some),
            Err(ureq::Error::Status(404, _)) => Ok(None),
            Err(err) => Err(classify(path, err)),
        }
    }

    fn create<T>(&self, parent: &str, collection: &str, id_param: &str, id: &str, body: &T) -> Result<T, RegistryError>
    where
        T: Serialize + DeserializeOwned,
    {
        let path = format!("{parent}/{collection}/{id}");
        tracing::debug!("POST {}/{} ({}={})", self.url(parent), collection, id_param, id);
        self.request("POST", &format!("{parent}/{collection}"))
            .query(id_param, id)
            .send_json(body)
            .map_err(|e| classify(&path, e))
            .and_then(|response| decode(&path, response))
    }

    fn patch<T>(&self, path: &str, mask: &[&str], body: &T) -> Result<T, RegistryError>
    where
        T: Serialize + DeserializeOwned,
    {
        tracing::debug!("PATCH {}", self.url(path));
        self.request("PATCH", path)
            .query("updateMask", &mask.join(","))
            .send_json(body)
            .map_err(|e| classify(path, e))
            .and_then(|response| decode(path, response))
    }

    fn delete(&self, path: &str) -> Result<(), RegistryError> {
        tracing::debug!("DELETE {}", self.url(path));
        self.request("DELETE", path)
            .call()
            .map(|_| ())
            .map_err(|e| classify(path, e))
    }

    fn page<P: DeserializeOwned>(
        &self,
        parent: &str,
        collection: &str,
        token: Option<&str>,
    ) -> Result<P, RegistryError> {
        let path = format!("{parent}/{collection}");
        let mut request = self.request("GET", &path);
        if let Some(token) = token {
            request = request.query("pageToken", token);
        }
        tracing::debug!("GET {} (page {})", self.url(&path), token.unwrap_or("first"));
        request
            .call()
            .map_err(|e| classify(&path, e))
            .and_then(|response| decode(&path, response))
    }
}

/// Join base URL and resource path with exactly one slash.
pub fn url_for(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

fn decode<T: DeserializeOwned>(path: &str, response: ureq::Response) -> Result<T, RegistryError> {
    response
        .into_json()
        .map_err(|e| RegistryError::Decode(format!("{path}: {e}")))
}

/// Map a failed request onto the registry error taxonomy.
fn classify(path: &str, err: ureq::Error) -> RegistryError {
    match err {
        ureq::Error::Status(404, _) => RegistryError::NotFound {
            path: path.to_string(),
        },
        ureq::Error::Status(409, _) => RegistryError::AlreadyExists {
            path: path.to_string(),
        },
        ureq::Error::Status(status, response) => {
            let body = response.into_string().unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&body)
                .map(|b| b.error.message)
                .unwrap_or(body);
            RegistryError::Remote { status, message }
        }
        ureq::Error::Transport(transport) => RegistryError::Transport(transport.to_string()),
    }
}

impl ServiceRegistry for DirectoryClient {
    fn get_namespace(&self, path: &str) -> Result<Option<Namespace>, RegistryError> {
        self.get(path)
    }

    fn get_service(&self, path: &str) -> Result<Option<Service>, RegistryError> {
        self.get(path)
    }

    fn get_endpoint(&self, path: &str) -> Result<Option<Endpoint>, RegistryError> {
        self.get(path)
    }

    fn create_namespace(
        &self,
        parent: &str,
        id: &str,
        mut namespace: Namespace,
    ) -> Result<Namespace, RegistryError> {
        namespace.name.clear();
        self.create(parent, "namespaces", "namespaceId", id, &namespace)
    }

    fn create_service(&self, parent: &str, id: &str, mut service: Service) -> Result<Service, RegistryError> {
        service.name.clear();
        self.create(parent, "services", "serviceId", id, &service)
    }

    fn create_endpoint(
        &self,
        parent: &str,
        id: &str,
        mut endpoint: Endpoint,
    ) -> Result<Endpoint, RegistryError> {
        endpoint.name.clear();
        self.create(parent, "endpoints", "endpointId", id, &endpoint)
    }

    fn update_service(&self, service: Service, mask: &[&str]) -> Result<Service, RegistryError> {
        let path = service.name.clone();
        self.patch(&path, mask, &service)
    }

    fn update_endpoint(&self, endpoint: Endpoint, mask: &[&str]) -> Result<Endpoint, RegistryError> {
        let path = endpoint.name.clone();
        self.patch(&path, mask, &endpoint)
    }

    fn delete_namespace(&self, path: &str) -> Result<(), RegistryError> {
        self.delete(path)
    }

    fn delete_service(&self, path: &str) -> Result<(), RegistryError> {
        self.delete(path)
    }

    fn delete_endpoint(&self, path: &str) -> Result<(), RegistryError> {
        self.delete(path)
    }

    fn list_endpoints(&self, parent: &str) -> Listing<'_, Endpoint> {
        let parent = parent.to_string();
        Listing::new(move |token| {
            let page: EndpointPage = self.page(&parent, "endpoints", token)?;
            Ok(Page {
                items: page.endpoints,
                next_page_token: page.next_page_token,
            })
        })
    }

    fn list_services(&self, parent: &str) -> Listing<'_, Service> {
        let parent = parent.to_string();
        Listing::new(move |token| {
            let page: ServicePage = self.page(&parent, "services", token)?;
            Ok(Page {
                items: page.services,
                next_page_token: page.next_page_token,
            })
        })
    }
}
