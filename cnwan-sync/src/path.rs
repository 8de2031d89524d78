//! Resource path construction.
//!
//! ```text
//! projects/{project}/locations/{region}[/namespaces/{ns}[/services/{svc}[/endpoints/{endp}]]]
//! ```
//!
//! Project and region are read from the [`SettingsHandle`] on every call, so a
//! settings swap between two calls changes the second result. No name
//! validation happens here.

use cnwan_core::SettingsHandle;

#[derive(Debug, Clone)]
pub struct PathResolver {
    settings: SettingsHandle,
}

impl PathResolver {
    pub fn new(settings: SettingsHandle) -> Self {
        Self { settings }
    }

    /// Resolve a path, appending one level per supplied non-empty name.
    ///
    /// Levels are strictly ordered: a missing namespace stops the service
    /// and endpoint from being appended, a missing service stops the endpoint.
    pub fn path(
        &self,
        namespace: Option<&str>,
        service: Option<&str>,
        endpoint: Option<&str>,
    ) -> String {
        let settings = self.settings.load();
        let mut path = format!(
            "projects/{}/locations/{}",
            settings.project, settings.region
        );

        let levels = [
            ("namespaces", namespace),
            ("services", service),
            ("endpoints", endpoint),
        ];
        for (segment, name) in levels {
            match name.filter(|n| !n.is_empty()) {
                Some(name) => {
                    path.push('/');
                    path.push_str(segment);
                    path.push('/');
                    path.push_str(name);
                }
                None => break,
            }
        }
        path
    }

    pub fn base(&self) -> String {
        self.path(None, None, None)
    }

    pub fn namespace(&self, namespace: &str) -> String {
        self.path(Some(namespace), None, None)
    }

    pub fn service(&self, namespace: &str, service: &str) -> String {
        self.path(Some(namespace), Some(service), None)
    }

    pub fn endpoint(&self, namespace: &str, service: &str, endpoint: &str) -> String {
        self.path(Some(namespace), Some(service), Some(endpoint))
    }
}

/// Last segment of a resource path (the resource's own id).
pub fn leaf_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}
