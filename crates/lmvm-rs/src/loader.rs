//! From a bundle name to a ready conversation.
//!
//! [`BundleLoader`] runs the whole loading pipeline (bundle file,
//! extraction, namespace evaluation, descriptor validation) and only then
//! builds the provider, so a broken bundle never costs a provider call.

use crate::bundle::ToolBundle;
use crate::conversation::{Conversation, ConversationConfig};
use crate::error::Result;
use crate::extract::{Extraction, Extractor};
use crate::namespace::{Namespace, NamespaceBuilder};
use crate::provider::Provider;
use crate::schema::{SchemaOptions, ToolDescriptor, build_descriptors};
use std::path::PathBuf;
use tracing::info;

/// Everything loaded for one bundle.
#[derive(Debug)]
pub struct LoadedBundle {
    pub bundle: ToolBundle,
    pub extraction: Extraction,
    pub namespace: Namespace,
    pub descriptors: Vec<ToolDescriptor>,
}

/// Loads bundles with one extractor and one namespace builder.
pub struct BundleLoader {
    bundles_dir: PathBuf,
    extractor: Extractor,
    builder: NamespaceBuilder,
    schema: SchemaOptions,
}

impl BundleLoader {
    pub fn new(bundles_dir: impl Into<PathBuf>, extractor: Extractor) -> Self {
        Self {
            bundles_dir: bundles_dir.into(),
            extractor,
            builder: NamespaceBuilder::default(),
            schema: SchemaOptions::default(),
        }
    }

    pub fn with_namespace_builder(mut self, builder: NamespaceBuilder) -> Self {
        self.builder = builder;
        self
    }

    pub fn with_schema_options(mut self, schema: SchemaOptions) -> Self {
        self.schema = schema;
        self
    }

    /// Read `bundle`, extract its tools, evaluate them, and build their
    /// descriptors.
    pub async fn load(&self, bundle: &str) -> Result<LoadedBundle> {
        let bundle = ToolBundle::load(&self.bundles_dir, bundle).await?;
        info!(
            "Bundle '{}': {} tools",
            bundle.name,
            bundle.tool_ids.len()
        );
        let extraction = self.extractor.extract(&bundle.tool_ids).await?;
        let namespace = self.builder.build_extraction(&extraction).await?;
        let descriptors = build_descriptors(&namespace, &extraction.functions, self.schema)?;
        Ok(LoadedBundle {
            bundle,
            extraction,
            namespace,
            descriptors,
        })
    }

    /// Load `bundle`, then call `provider` to build the client. `provider`
    /// is not called when loading fails.
    pub async fn conversation<'a>(
        &self,
        bundle: &str,
        provider: impl FnOnce() -> Result<Box<dyn Provider>>,
        config: ConversationConfig,
    ) -> Result<Conversation<'a>> {
        let loaded = self.load(bundle).await?;
        let config = config.with_schema_options(self.schema);
        Ok(Conversation::new(provider()?, loaded.namespace, config))
    }
}
