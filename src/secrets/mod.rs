//! Setup-time propagation of credentials into per-environment stores

use crate::adapters::SecretStore;
use crate::core::Environment;
use anyhow::{Context, Result};
use regex::Regex;
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, LazyLock};
use tracing::{info, warn};

static SECRET_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("secret name pattern is valid")
});

/// Named secret values for one environment scope
#[derive(Default)]
pub struct SecretSet {
    entries: BTreeMap<String, SecretString>,
}

impl SecretSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries
            .insert(name.into(), SecretString::from(value.into()));
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for SecretSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.entries.keys()).finish()
    }
}

impl From<BTreeMap<String, String>> for SecretSet {
    fn from(values: BTreeMap<String, String>) -> Self {
        let mut set = SecretSet::new();
        for (name, value) in values {
            set.insert(name, value);
        }
        set
    }
}

/// Secrets file with one optional section per environment
#[derive(Deserialize)]
struct SecretsFile {
    #[serde(default)]
    test: BTreeMap<String, String>,

    #[serde(default)]
    production: Option<BTreeMap<String, String>>,
}

/// Secret values for both scopes, loaded from a YAML file
#[derive(Debug)]
pub struct SecretBundle {
    pub test: SecretSet,

    /// Absent when the file has no `production` section
    pub production: Option<SecretSet>,
}

impl SecretBundle {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read secrets file {}", path.display()))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let file: SecretsFile = serde_yaml::from_str(yaml).context("Invalid secrets file")?;
        Ok(Self {
            test: file.test.into(),
            production: file.production.map(SecretSet::from),
        })
    }
}

/// Result of writing one scope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropagationReport {
    pub environment: Environment,
    pub written: Vec<String>,

    /// Secret name and error
    pub failed: Vec<(String, String)>,

    /// Values were copied from the test scope
    pub mirrored: bool,

    /// Nothing was written because no values were available
    pub skipped: bool,
}

impl PropagationReport {
    pub fn new(environment: Environment) -> Self {
        Self {
            environment,
            written: Vec::new(),
            failed: Vec::new(),
            mirrored: false,
            skipped: false,
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Pushes named credentials into an environment's secret store
///
/// Test and production are independent scopes. Production only receives the
/// test values when mirroring is enabled and no production values are given.
pub struct SecretPropagator {
    store: Arc<dyn SecretStore>,
    mirror_test_to_production: bool,
}

impl SecretPropagator {
    pub fn new(store: Arc<dyn SecretStore>, mirror_test_to_production: bool) -> Self {
        Self {
            store,
            mirror_test_to_production,
        }
    }

    /// Write every secret of `secrets` into `environment`, continuing past
    /// individual failures
    pub async fn propagate(&self, environment: Environment, secrets: &SecretSet) -> PropagationReport {
        let mut report = PropagationReport::new(environment);

        for (name, value) in &secrets.entries {
            if !SECRET_NAME.is_match(name) {
                warn!("Skipping invalid secret name {:?}", name);
                report.failed.push((name.clone(), "invalid secret name".to_string()));
                continue;
            }

            match self.store.put(environment, name, value).await {
                Ok(()) => report.written.push(name.clone()),
                Err(e) => {
                    warn!("Failed to store {} in {}: {}", name, environment, e);
                    report.failed.push((name.clone(), e.to_string()));
                }
            }
        }

        info!(
            "Propagated {}/{} secret(s) to {}",
            report.written.len(),
            secrets.len(),
            environment
        );
        report
    }

    /// Provision both scopes, applying the mirroring policy to production
    pub async fn provision(&self, bundle: &SecretBundle) -> Vec<PropagationReport> {
        let test = self.propagate(Environment::Test, &bundle.test).await;
        let production = self.provision_production(bundle).await;
        vec![test, production]
    }

    /// Provision the production scope only
    pub async fn provision_production(&self, bundle: &SecretBundle) -> PropagationReport {
        match &bundle.production {
            Some(values) => self.propagate(Environment::Production, values).await,
            None if self.mirror_test_to_production => {
                warn!("No production secrets given; reusing test values for production");
                let mut report = self.propagate(Environment::Production, &bundle.test).await;
                report.mirrored = true;
                report
            }
            None => {
                info!("No production secrets given; production scope left untouched");
                PropagationReport {
                    skipped: true,
                    ..PropagationReport::new(Environment::Production)
                }
            }
        }
    }
}
