//! Function Catalog
//!
//! A registry from qualified name to invocable function, populated at
//! registration time and read-only afterwards. The planner sees it through a
//! [`CatalogFilter`]-restricted [`CatalogView`].

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::error::{Result, SkeinError};
use crate::function::{FunctionSpec, Invocable};

/// Include/exclude filter over namespaces and qualified function names.
///
/// Empty include lists admit everything; exclusions always win.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogFilter {
    pub included_namespaces: BTreeSet<String>,
    pub excluded_namespaces: BTreeSet<String>,
    pub included_functions: BTreeSet<String>,
    pub excluded_functions: BTreeSet<String>,
}

impl CatalogFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn include_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.included_namespaces.insert(namespace.into());
        self
    }

    pub fn exclude_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.excluded_namespaces.insert(namespace.into());
        self
    }

    pub fn include_function(mut self, qualified_name: impl Into<String>) -> Self {
        self.included_functions.insert(qualified_name.into());
        self
    }

    pub fn exclude_function(mut self, qualified_name: impl Into<String>) -> Self {
        self.excluded_functions.insert(qualified_name.into());
        self
    }

    pub fn admits(&self, spec: &FunctionSpec) -> bool {
        let qualified = spec.qualified_name();

        if self.excluded_functions.contains(&qualified) || self.excluded_namespaces.contains(&spec.namespace) {
            return false;
        }
        if !self.included_namespaces.is_empty() && !self.included_namespaces.contains(&spec.namespace) {
            return false;
        }
        self.included_functions.is_empty() || self.included_functions.contains(&qualified)
    }
}

/// Registry of invocable functions keyed by qualified name
#[derive(Default, Clone)]
pub struct FunctionCatalog {
    functions: BTreeMap<String, Arc<dyn Invocable>>,
}

impl FunctionCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a function; qualified names must be unique
    pub fn register(&mut self, function: Arc<dyn Invocable>) -> Result<()> {
        let name = function.describe().qualified_name();
        if self.functions.contains_key(&name) {
            return Err(SkeinError::DuplicateFunction(name));
        }
        tracing::debug!("Function registered: {}", name);
        self.functions.insert(name, function);
        Ok(())
    }

    /// Builder-style registration
    pub fn with_function(mut self, function: impl Invocable + 'static) -> Result<Self> {
        self.register(Arc::new(function))?;
        Ok(self)
    }

    pub fn get(&self, qualified_name: &str) -> Option<Arc<dyn Invocable>> {
        self.functions.get(qualified_name).cloned()
    }

    pub fn contains(&self, qualified_name: &str) -> bool {
        self.functions.contains_key(qualified_name)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Specs admitted by `filter`, ordered by qualified name
    pub fn list(&self, filter: &CatalogFilter) -> Vec<FunctionSpec> {
        self.functions
            .values()
            .map(|f| f.describe())
            .filter(|spec| filter.admits(spec))
            .cloned()
            .collect()
    }

    /// Filtered subset handed to the planner
    pub fn view(&self, filter: &CatalogFilter) -> CatalogView {
        CatalogView {
            functions: self
                .functions
                .iter()
                .filter(|(_, f)| filter.admits(f.describe()))
                .map(|(name, f)| (name.clone(), Arc::clone(f)))
                .collect(),
        }
    }
}

impl std::fmt::Debug for FunctionCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.functions.keys()).finish()
    }
}

/// Read-only filtered subset of a catalog
#[derive(Clone, Default)]
pub struct CatalogView {
    functions: BTreeMap<String, Arc<dyn Invocable>>,
}

impl CatalogView {
    pub fn get(&self, qualified_name: &str) -> Option<&FunctionSpec> {
        self.functions.get(qualified_name).map(|f| f.describe())
    }

    pub fn contains(&self, qualified_name: &str) -> bool {
        self.functions.contains_key(qualified_name)
    }

    /// Callable for a function admitted by this view
    pub fn function(&self, qualified_name: &str) -> Option<Arc<dyn Invocable>> {
        self.functions.get(qualified_name).cloned()
    }

    pub fn specs(&self) -> impl Iterator<Item = &FunctionSpec> {
        self.functions.values().map(|f| f.describe())
    }

    pub fn names(&self) -> Vec<String> {
        self.functions.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl std::fmt::Debug for CatalogView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.functions.keys()).finish()
    }
}
