//! Kubernetes manifest templates and their rendering context
//!
//! Templates are compiled into the binary and rendered with minijinja in
//! strict mode, so a template referring to a variable the context does not
//! provide fails instead of rendering an empty string.

use crate::certs::CertificateBundle;
use crate::error::{ReconcileError, Result};
use minijinja::{Environment, UndefinedBehavior};
use serde::Serialize;
use serde_json::Value;

/// A named manifest template
#[derive(Debug, Clone, Copy)]
pub struct ManifestTemplate {
    pub name: &'static str,
    pub source: &'static str,
}

pub const AUTH_MANIFESTS: ManifestTemplate = ManifestTemplate {
    name: "auth_manifests.yaml.j2",
    source: include_str!("../templates/auth_manifests.yaml.j2"),
};

pub const CRD_MANIFESTS: ManifestTemplate = ManifestTemplate {
    name: "crd_manifests.yaml.j2",
    source: include_str!("../templates/crd_manifests.yaml.j2"),
};

pub const WEBHOOK_MANIFESTS: ManifestTemplate = ManifestTemplate {
    name: "webhook_manifests.yaml.j2",
    source: include_str!("../templates/webhook_manifests.yaml.j2"),
};

/// The manifests owned by the `kubernetes:auth-and-crds` component
pub fn pvcviewer_templates() -> Vec<ManifestTemplate> {
    vec![AUTH_MANIFESTS, CRD_MANIFESTS, WEBHOOK_MANIFESTS]
}

/// Variables available to the manifest templates
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestContext {
    pub app_name: String,
    pub namespace: String,
    /// Base64-encoded PEM of the CA, used as webhook `caBundle`
    pub cert: String,
    pub webhook_service_name: String,
}

impl ManifestContext {
    pub fn new(app_name: &str, namespace: &str, certs: &CertificateBundle) -> Self {
        Self {
            app_name: app_name.to_string(),
            namespace: namespace.to_string(),
            cert: certs.ca_base64(),
            webhook_service_name: app_name.to_string(),
        }
    }
}

/// A set of compiled templates
pub struct TemplateRenderer {
    env: Environment<'static>,
    names: Vec<&'static str>,
}

impl TemplateRenderer {
    pub fn new(templates: &[ManifestTemplate]) -> Result<Self> {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);

        for template in templates {
            env.add_template(template.name, template.source)
                .map_err(|e| ReconcileError::template_error(template.name, e.to_string()))?;
        }

        Ok(Self {
            env,
            names: templates.iter().map(|t| t.name).collect(),
        })
    }

    /// Render every template in order and split the output into objects
    pub fn render<S: Serialize>(&self, context: &S) -> Result<Vec<Value>> {
        let mut documents = Vec::new();

        for name in &self.names {
            let rendered = self
                .env
                .get_template(name)
                .and_then(|t| t.render(context))
                .map_err(|e| ReconcileError::template_error(*name, e.to_string()))?;
            documents.extend(pvcviewer_core::yaml_documents(&rendered)?);
        }

        Ok(documents)
    }
}
