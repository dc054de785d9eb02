//! [`ExamplePool`] – few-shot examples available to a planner.
//!
//! Base examples ship with the benchmark; dynamic examples come from a
//! previous run through the memory extractor and are stored per
//! [`CategoryKey`]. The pool is filled before an evaluation set starts and
//! only read afterwards.

use std::collections::HashMap;

use planbench_types::CategoryKey;

#[derive(Debug, Clone, Default)]
pub struct ExamplePool {
    base: Vec<String>,
    /// Base examples keyed by task family (`pick`, `stack`, ...).
    base_by_family: HashMap<String, Vec<String>>,
    success: HashMap<CategoryKey, Vec<String>>,
    failure: HashMap<CategoryKey, Vec<String>>,
}

impl ExamplePool {
    pub fn new(base: Vec<String>) -> Self {
        Self {
            base,
            ..Default::default()
        }
    }

    /// Pool whose base examples depend on the category's task family.
    pub fn with_families(base_by_family: HashMap<String, Vec<String>>) -> Self {
        Self {
            base_by_family,
            ..Default::default()
        }
    }

    /// Replace the dynamic examples of `category`.
    pub fn add_dynamic(&mut self, category: CategoryKey, success: Vec<String>, failure: Vec<String>) {
        self.success.insert(category.clone(), success);
        self.failure.insert(category, failure);
    }

    pub fn base_for(&self, category: Option<&CategoryKey>) -> &[String] {
        category
            .and_then(|c| self.base_by_family.get(c.family()))
            .map(Vec::as_slice)
            .unwrap_or(self.base.as_slice())
    }

    pub fn success_for(&self, category: &CategoryKey) -> &[String] {
        self.success.get(category).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn failure_for(&self, category: &CategoryKey) -> &[String] {
        self.failure.get(category).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Base, then dynamic success, then dynamic failure examples.
    pub fn examples_for(&self, category: Option<&CategoryKey>) -> Vec<String> {
        let mut all = self.base_for(category).to_vec();
        if let Some(category) = category {
            all.extend_from_slice(self.success_for(category));
            all.extend_from_slice(self.failure_for(category));
        }
        all
    }

    pub fn has_dynamic(&self, category: &CategoryKey) -> bool {
        !self.success_for(category).is_empty() || !self.failure_for(category).is_empty()
    }
}
