//! Named transforms and callbacks supplied by the host program.
//!
//! Configuration files refer to them with `{ kind: named, name: ... }`.
//! Names are resolved once, when the configuration is validated.

use crate::callback::ChangeCallback;
use crate::transform::RowTransform;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct Registry {
    transforms: HashMap<String, Arc<dyn RowTransform>>,
    callbacks: HashMap<String, Arc<dyn ChangeCallback>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_transform(&mut self, name: impl Into<String>, transform: Arc<dyn RowTransform>) {
        self.transforms.insert(name.into(), transform);
    }

    pub fn register_callback(&mut self, name: impl Into<String>, callback: Arc<dyn ChangeCallback>) {
        self.callbacks.insert(name.into(), callback);
    }

    pub fn transform(&self, name: &str) -> Option<Arc<dyn RowTransform>> {
        self.transforms.get(name).cloned()
    }

    pub fn callback(&self, name: &str) -> Option<Arc<dyn ChangeCallback>> {
        self.callbacks.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{Pipeline, TransformError, TransformSpec};
    use sync_core::Row;

    struct DropEmpty;

    impl RowTransform for DropEmpty {
        fn name(&self) -> &str {
            "drop_empty"
        }

        fn apply(&self, row: Row) -> Result<Option<Row>, TransformError> {
            Ok((!row.values_all_null()).then_some(row))
        }
    }

    #[test]
    fn test_named_transform_resolves() {
        let mut registry = Registry::new();
        registry.register_transform("drop_empty", Arc::new(DropEmpty));
        let specs = vec![TransformSpec::Named {
            name: "drop_empty".into(),
        }];
        let pipeline = Pipeline::build(&specs, &registry).unwrap();

        let empty = Row::new(vec!["srv1".into()], vec![sync_core::Value::Null]);
        assert_eq!(pipeline.apply(empty).unwrap(), None);
        assert!(registry.callback("drop_empty").is_none());
    }
}
