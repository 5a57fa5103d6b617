//! Template sections of the configuration.
//!
//! ```yaml
//! templates:
//!   - name: servers
//!     source:
//!       key: [[{ kind: column, name: tag }, string]]
//!       value: [[{ kind: column, name: ram }, integer]]
//!       options: { table: inventory }
//!     destination:
//!       key: [[{ kind: node, bundle: server, id: title }, string]]
//!       value: [[{ kind: field, name: field_ram }, decimal]]
//!     transform:
//!       forward: [{ kind: scale, column: 1, divide: 1024, decimals: 1 }]
//!       reverse: [{ kind: scale, column: 1, multiply: 1024, decimals: 0 }]
//! ```

use super::{build_callbacks, ConfigError};
use crate::callback::{CallbackSpec, ChangeCallback};
use crate::filter::KeyFilter;
use crate::registry::Registry;
use crate::transform::{Pipeline, TransformSpec};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use sync_core::{CvChain, SideOptions, TemplateSide};
use sync_sql::{DeleteScope, QueryBackend};

/// One side of a template as written in the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SideConfig {
    pub key: CvChain,
    pub value: CvChain,
    #[serde(default, skip_serializing_if = "SideOptions::is_empty")]
    pub options: SideOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransformConfig {
    /// Applied to source rows
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub forward: Vec<TransformSpec>,

    /// Applied to destination rows when the run is reversed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reverse: Vec<TransformSpec>,
}

impl TransformConfig {
    fn is_empty(&self) -> bool {
        self.forward.is_empty() && self.reverse.is_empty()
    }
}

/// A template as written in the configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TemplateConfig {
    pub name: String,

    /// Several values may exist per key; rows match on key and value
    #[serde(default)]
    pub multivalued: bool,

    pub source: SideConfig,
    pub destination: SideConfig,

    #[serde(default, skip_serializing_if = "TransformConfig::is_empty")]
    pub transform: TransformConfig,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub change_callbacks: Vec<CallbackSpec>,

    /// Key filter of this template, ANDed with the global one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keys: Option<KeyFilter>,

    /// Delete destination values of a key that the source no longer has
    /// (multi-valued templates)
    #[serde(default)]
    pub prune: bool,

    #[serde(default)]
    pub delete_scope: DeleteScope,
}

impl TemplateConfig {
    fn shape_error(&self, message: impl Into<String>) -> ConfigError {
        ConfigError::Shape {
            template: self.name.clone(),
            message: message.into(),
        }
    }

    fn pipeline(&self, specs: &[TransformSpec], width: usize, registry: &Registry) -> Result<Pipeline, ConfigError> {
        if let Some(spec) = specs.iter().find(|s| s.column().is_some_and(|c| c >= width)) {
            return Err(self.shape_error(format!(
                "transform {spec} is out of range for rows of {width} columns"
            )));
        }
        Pipeline::build(specs, registry).map_err(|name| ConfigError::UnknownTransform {
            template: self.name.clone(),
            name,
        })
    }

    pub(super) fn validate(
        &self,
        source: &dyn QueryBackend,
        destination: &dyn QueryBackend,
        registry: &Registry,
    ) -> Result<Template, ConfigError> {
        let side = |role: &'static str, backend: &dyn QueryBackend, config: &SideConfig| {
            backend
                .prepare(config.key.clone(), config.value.clone(), &config.options)
                .map_err(|source| ConfigError::Side {
                    template: self.name.clone(),
                    role,
                    source,
                })
        };
        let source_side = side("source", source, &self.source)?;
        let destination_side = side("destination", destination, &self.destination)?;

        if source_side.key.len() != destination_side.key.len() {
            return Err(self.shape_error(format!(
                "source has {} key columns, destination has {}",
                source_side.key.len(),
                destination_side.key.len()
            )));
        }
        if source_side.value.len() != destination_side.value.len() {
            return Err(self.shape_error(format!(
                "source has {} value columns, destination has {}",
                source_side.value.len(),
                destination_side.value.len()
            )));
        }
        if self.prune && !self.multivalued {
            return Err(self.shape_error("prune needs a multi-valued template"));
        }

        let width = source_side.width();
        let custom_transforms = self
            .transform
            .forward
            .iter()
            .chain(&self.transform.reverse)
            .any(TransformSpec::is_named);
        Ok(Template {
            name: self.name.clone(),
            multivalued: self.multivalued,
            forward: self.pipeline(&self.transform.forward, width, registry)?,
            reverse: self.pipeline(&self.transform.reverse, width, registry)?,
            source: source_side,
            destination: destination_side,
            callbacks: build_callbacks(&self.change_callbacks, registry)?,
            keys: self.keys.clone(),
            prune: self.prune,
            delete_scope: self.delete_scope,
            custom_transforms,
        })
    }
}

/// A validated template.
#[derive(Clone)]
pub struct Template {
    pub name: String,
    pub multivalued: bool,
    pub source: TemplateSide,
    pub destination: TemplateSide,
    /// Transforms of source rows
    pub forward: Pipeline,
    /// Transforms of source rows of a reversed run
    pub reverse: Pipeline,
    pub callbacks: Vec<Arc<dyn ChangeCallback>>,
    pub keys: Option<KeyFilter>,
    pub prune: bool,
    pub delete_scope: DeleteScope,
    /// Registered transforms may change the row shape; checked per row
    pub custom_transforms: bool,
}

impl Template {
    /// The template of a reversed run: sides and pipelines swapped.
    pub fn reversed(&self) -> Self {
        Self {
            source: self.destination.clone(),
            destination: self.source.clone(),
            forward: self.reverse.clone(),
            reverse: self.forward.clone(),
            ..self.clone()
        }
    }
}

impl fmt::Debug for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Template")
            .field("name", &self.name)
            .field("multivalued", &self.multivalued)
            .field("source", &self.source)
            .field("destination", &self.destination)
            .field("forward", &self.forward)
            .field("reverse", &self.reverse)
            .field("callbacks", &self.callbacks.len())
            .field("keys", &self.keys)
            .field("prune", &self.prune)
            .field("delete_scope", &self.delete_scope)
            .finish()
    }
}
