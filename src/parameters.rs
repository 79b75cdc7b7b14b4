//! Named fit parameters and the components that own them.
//!
//! Everything an optimiser can adjust (template normalisations, systematic
//! parameters) implements [`FitComponent`]. The [`ComponentRegistry`] joins
//! them into one flat namespace without owning them: it stores
//! [`ComponentKey`]s and resolves them through a [`ComponentSource`] on every
//! call.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{FitError, Result};

/// Parameter name to value. Names are unique across a whole fit.
pub type ParameterDict = BTreeMap<String, f64>;

/// Capability shared by everything that exposes fit parameters.
pub trait FitComponent {
    /// Name of the component, used in error messages and for deduplication.
    fn name(&self) -> &str;

    /// Parameter names in the component's own order.
    fn parameter_names(&self) -> Vec<String>;

    fn parameter(&self, name: &str) -> Result<f64>;

    fn set_parameter(&mut self, name: &str, value: f64) -> Result<()>;

    fn rename_parameter(&mut self, old: &str, new: &str) -> Result<()>;

    fn parameter_count(&self) -> usize {
        self.parameter_names().len()
    }

    fn parameters(&self) -> ParameterDict {
        self.parameter_names()
            .into_iter()
            .filter_map(|name| self.parameter(&name).ok().map(|v| (name, v)))
            .collect()
    }

    /// Sets every parameter of this component found in `params`; names
    /// belonging to other components are ignored.
    fn set_parameters(&mut self, params: &ParameterDict) -> Result<()> {
        for name in self.parameter_names() {
            if let Some(&value) = params.get(&name) {
                self.set_parameter(&name, value)?;
            }
        }
        Ok(())
    }
}

/// Ordered list of named values implementing [`FitComponent`].
///
/// Systematics embed one of these instead of repeating the bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSet {
    owner: String,
    names: Vec<String>,
    values: Vec<f64>,
}

impl ParameterSet {
    pub fn new(owner: &str) -> Self {
        Self {
            owner: owner.to_string(),
            names: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Adds a parameter, builder style.
    pub fn with(mut self, name: &str, value: f64) -> Self {
        self.names.push(name.to_string());
        self.values.push(value);
        self
    }

    /// Value of the `index`-th parameter.
    pub fn value(&self, index: usize) -> f64 {
        self.values[index]
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    fn index(&self, name: &str) -> Result<usize> {
        self.names.iter().position(|n| n == name).ok_or_else(|| {
            FitError::Parameter(format!(
                "{}: unknown parameter '{name}', has {:?}",
                self.owner, self.names
            ))
        })
    }
}

impl FitComponent for ParameterSet {
    fn name(&self) -> &str {
        &self.owner
    }

    fn parameter_names(&self) -> Vec<String> {
        self.names.clone()
    }

    fn parameter(&self, name: &str) -> Result<f64> {
        Ok(self.values[self.index(name)?])
    }

    fn set_parameter(&mut self, name: &str, value: f64) -> Result<()> {
        let idx = self.index(name)?;
        self.values[idx] = value;
        Ok(())
    }

    fn rename_parameter(&mut self, old: &str, new: &str) -> Result<()> {
        let idx = self.index(old)?;
        if old != new && self.names.iter().any(|n| n == new) {
            return Err(FitError::Parameter(format!(
                "{}: cannot rename '{old}' to '{new}', name already in use",
                self.owner
            )));
        }
        self.names[idx] = new.to_string();
        Ok(())
    }
}

/// Identifies a registered component inside its [`ComponentSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentKey {
    /// The template manager's normalisations.
    Normalisations,
    /// A systematic, by name.
    Systematic(String),
}

/// Resolves [`ComponentKey`]s to the components themselves.
pub trait ComponentSource {
    fn component(&self, key: &ComponentKey) -> Option<&dyn FitComponent>;
    fn component_mut(&mut self, key: &ComponentKey) -> Option<&mut dyn FitComponent>;
}

/// Flat parameter namespace over several components.
#[derive(Debug, Clone, Default)]
pub struct ComponentRegistry {
    keys: Vec<ComponentKey>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.keys.clear();
    }

    pub fn keys(&self) -> &[ComponentKey] {
        &self.keys
    }

    pub fn is_registered(&self, key: &ComponentKey) -> bool {
        self.keys.contains(key)
    }

    /// Registers a component. Fails if one of its parameter names is already
    /// owned by another registered component.
    pub fn add_component<S: ComponentSource + ?Sized>(
        &mut self,
        key: ComponentKey,
        source: &S,
    ) -> Result<()> {
        let component = resolve(source, &key)?;
        let taken = self.parameter_names(source)?;
        if let Some(clash) = component
            .parameter_names()
            .into_iter()
            .find(|n| taken.contains(n))
        {
            return Err(FitError::Configuration(format!(
                "parameter '{clash}' of component '{}' is already registered by another component",
                component.name()
            )));
        }
        self.keys.push(key);
        Ok(())
    }

    pub fn parameter_names<S: ComponentSource + ?Sized>(
        &self,
        source: &S,
    ) -> Result<BTreeSet<String>> {
        let mut names = BTreeSet::new();
        for key in &self.keys {
            names.extend(resolve(source, key)?.parameter_names());
        }
        Ok(names)
    }

    pub fn total_parameter_count<S: ComponentSource + ?Sized>(&self, source: &S) -> Result<usize> {
        let mut count = 0;
        for key in &self.keys {
            count += resolve(source, key)?.parameter_count();
        }
        Ok(count)
    }

    pub fn parameters<S: ComponentSource + ?Sized>(&self, source: &S) -> Result<ParameterDict> {
        let mut params = ParameterDict::new();
        for key in &self.keys {
            params.extend(resolve(source, key)?.parameters());
        }
        Ok(params)
    }

    pub fn parameter<S: ComponentSource + ?Sized>(&self, source: &S, name: &str) -> Result<f64> {
        let key = self.owner_of(source, name)?;
        resolve(source, &key)?.parameter(name)
    }

    pub fn set_parameter<S: ComponentSource + ?Sized>(
        &self,
        source: &mut S,
        name: &str,
        value: f64,
    ) -> Result<()> {
        let key = self.owner_of(source, name)?;
        resolve_mut(source, &key)?.set_parameter(name, value)
    }

    /// Routes every entry of `params` to the component owning it. Unknown
    /// names are rejected before anything is changed; registered parameters
    /// missing from `params` keep their values.
    pub fn set_parameters<S: ComponentSource + ?Sized>(
        &self,
        source: &mut S,
        params: &ParameterDict,
    ) -> Result<()> {
        let known = self.parameter_names(source)?;
        if let Some(unknown) = params.keys().find(|n| !known.contains(*n)) {
            return Err(FitError::Parameter(format!(
                "unknown parameter '{unknown}', registered parameters are {known:?}"
            )));
        }
        for key in &self.keys {
            resolve_mut(source, key)?
                .set_parameters(params)
                .map_err(|e| e.context(&format!("{key:?}: ")))?;
        }
        Ok(())
    }

    pub fn rename_parameter<S: ComponentSource + ?Sized>(
        &self,
        source: &mut S,
        old: &str,
        new: &str,
    ) -> Result<()> {
        let key = self.owner_of(source, old)?;
        if old != new && self.parameter_names(source)?.contains(new) {
            return Err(FitError::Parameter(format!(
                "cannot rename '{old}' to '{new}', name already registered"
            )));
        }
        resolve_mut(source, &key)?.rename_parameter(old, new)
    }

    fn owner_of<S: ComponentSource + ?Sized>(&self, source: &S, name: &str) -> Result<ComponentKey> {
        for key in &self.keys {
            if resolve(source, key)?
                .parameter_names()
                .iter()
                .any(|n| n == name)
            {
                return Ok(key.clone());
            }
        }
        Err(FitError::Parameter(format!(
            "no registered component has a parameter named '{name}'"
        )))
    }
}

fn resolve<'a, S: ComponentSource + ?Sized>(
    source: &'a S,
    key: &ComponentKey,
) -> Result<&'a dyn FitComponent> {
    source
        .component(key)
        .ok_or_else(|| FitError::Logic(format!("registered component {key:?} no longer exists")))
}

fn resolve_mut<'a, S: ComponentSource + ?Sized>(
    source: &'a mut S,
    key: &ComponentKey,
) -> Result<&'a mut dyn FitComponent> {
    source
        .component_mut(key)
        .ok_or_else(|| FitError::Logic(format!("registered component {key:?} no longer exists")))
}
