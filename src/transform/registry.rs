use std::collections::HashMap;

use crate::transform::{BlendInterpolator, FrameTransform, MaskFillInpainter, ResampleEnhancer};

type TransformFactory = Box<dyn Fn() -> Box<dyn FrameTransform> + Send + Sync>;

/// Registry for managing available frame transforms
///
/// Transforms are registered by name and instantiated on demand. The
/// built-ins are the CPU reference transforms; callers with real models
/// register their own factories under the same or new names.
pub struct TransformRegistry {
    transforms: HashMap<String, TransformFactory>,
}

impl TransformRegistry {
    /// Create a new registry with all built-in transforms
    pub fn new() -> Self {
        let mut registry = Self {
            transforms: HashMap::new(),
        };

        registry.register_builtin_transforms();
        registry
    }

    fn register_builtin_transforms(&mut self) {
        self.register("enhance", || Box::new(ResampleEnhancer::new()));
        self.register("interpolate", || Box::new(BlendInterpolator::new()));
        self.register("inpaint", || Box::new(MaskFillInpainter::new()));
    }

    /// Register a transform factory, replacing any previous one with that name
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn FrameTransform> + Send + Sync + 'static,
    {
        self.transforms.insert(name.into(), Box::new(factory));
    }

    /// Create a new instance of the named transform
    pub fn create(&self, name: &str) -> Option<Box<dyn FrameTransform>> {
        self.transforms.get(name).map(|factory| factory())
    }

    /// Get all available transform names, sorted
    pub fn available_transforms(&self) -> Vec<String> {
        let mut names: Vec<String> = self.transforms.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn has_transform(&self, name: &str) -> bool {
        self.transforms.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }
}

impl Default for TransformRegistry {
    fn default() -> Self {
        Self::new()
    }
}
