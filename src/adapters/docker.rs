//! Container build and registry push through the docker CLI

use crate::adapters::{AdapterError, ArtifactRegistry, CommandRunner};
use crate::core::config::RegistryConfig;
use crate::core::{ImageRef, Release, Version};
use async_trait::async_trait;
use tracing::info;

/// Builds images with `docker build` and publishes them with `docker push`
#[derive(Debug, Clone)]
pub struct DockerRegistry {
    runner: CommandRunner,
    repository: String,
    build_context: String,
    dockerfile: Option<String>,
}

impl DockerRegistry {
    pub fn new(config: &RegistryConfig) -> Self {
        Self {
            runner: CommandRunner::new(config.docker.clone(), config.timeout_secs),
            repository: config.repository.clone(),
            build_context: config.build_context.clone(),
            dockerfile: config.dockerfile.clone(),
        }
    }

    fn build_args(&self, release: &Release, image: &ImageRef) -> Vec<String> {
        let mut args = vec![
            "build".to_string(),
            "--tag".to_string(),
            image.to_string(),
            "--label".to_string(),
            format!("org.opencontainers.image.revision={}", release.source_ref),
            "--label".to_string(),
            format!("org.opencontainers.image.version={}", release.version),
        ];
        if let Some(dockerfile) = &self.dockerfile {
            args.push("--file".to_string());
            args.push(dockerfile.clone());
        }
        args.push(self.build_context.clone());
        args
    }
}

#[async_trait]
impl ArtifactRegistry for DockerRegistry {
    async fn build(&self, release: &Release) -> Result<ImageRef, AdapterError> {
        let image = self.image_for(&release.version);
        info!("Building {}", image);
        self.runner.run(self.build_args(release, &image)).await?;
        Ok(image)
    }

    async fn push(&self, image: &ImageRef) -> Result<ImageRef, AdapterError> {
        info!("Pushing {}", image);
        self.runner.run(["push", image.as_str()]).await?;
        Ok(image.clone())
    }

    async fn alias(&self, image: &ImageRef, alias: &str) -> Result<ImageRef, AdapterError> {
        let target = ImageRef::tagged(image.repository(), alias);
        self.runner.run(["tag", image.as_str(), target.as_str()]).await?;
        self.runner.run(["push", target.as_str()]).await?;
        info!("Aliased {} as {}", image, target);
        Ok(target)
    }

    fn image_for(&self, version: &Version) -> ImageRef {
        ImageRef::tagged(&self.repository, &version.tag())
    }
}
