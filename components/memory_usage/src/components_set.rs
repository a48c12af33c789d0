//! Registry of components and categories.
//!
//! A component is a logical subsystem memory is attributed to; categories
//! group components for aggregate reporting. Classes are mapped to components
//! by exact class name, by the enclosing class of nested classes, and by the
//! longest registered prefix of their package name.

use std::collections::{HashMap, HashSet};

use heap_model::{ClassInfo, HeapHost, ObjectRef};
use parking_lot::Mutex;

use crate::configuration::MemoryUsageReportConfiguration;
use crate::ConfigurationError;

/// Label of the category every unowned object falls into.
pub const UNCATEGORIZED_CATEGORY_LABEL: &str = "android:uncategorized";
/// Label of the component every unowned object falls into.
pub const UNCATEGORIZED_COMPONENT_LABEL: &str = "uncategorized_main";
/// One bit per component in a `u64` ownership mask.
pub const MAX_COMPONENTS: usize = 64;
/// One bit per category in a `u64` category mask.
pub const MAX_CATEGORIES: usize = 64;
/// Threshold used by [`ComponentsSet::default`].
pub const DEFAULT_EXTENDED_REPORT_THRESHOLD: u64 = 100_000_000;

/// A group of components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentCategory {
    id: usize,
    label: String,
    extended_report_threshold_bytes: u64,
    tracked_fqns: Option<HashSet<String>>,
}

impl ComponentCategory {
    /// Dense id, equal to the registration index.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Owned size above which the category counts as exceeded.
    pub fn extended_report_threshold_bytes(&self) -> u64 {
        self.extended_report_threshold_bytes
    }

    /// Tracked class names, `None` if nothing is tracked.
    pub fn tracked_fqns(&self) -> Option<&HashSet<String>> {
        self.tracked_fqns.as_ref()
    }

    /// Returns true if instances of `class_name` are counted individually.
    pub fn is_tracked(&self, class_name: &str) -> bool {
        self.tracked_fqns
            .as_ref()
            .is_some_and(|fqns| fqns.contains(class_name))
    }

    /// Bit of this category in a category mask.
    pub fn mask(&self) -> u64 {
        1 << self.id
    }
}

/// A logical subsystem memory is attributed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Component {
    id: usize,
    label: String,
    extended_report_threshold_bytes: u64,
    category: usize,
    tracked_fqns: Option<HashSet<String>>,
    custom_class_loaders: Vec<String>,
}

impl Component {
    /// Dense id, equal to the registration index.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Owned size above which the component counts as exceeded.
    pub fn extended_report_threshold_bytes(&self) -> u64 {
        self.extended_report_threshold_bytes
    }

    /// Id of the owning category.
    pub fn category_id(&self) -> usize {
        self.category
    }

    /// Tracked class names, `None` if nothing is tracked.
    pub fn tracked_fqns(&self) -> Option<&HashSet<String>> {
        self.tracked_fqns.as_ref()
    }

    /// Returns true if instances of `class_name` are counted individually.
    pub fn is_tracked(&self, class_name: &str) -> bool {
        self.tracked_fqns
            .as_ref()
            .is_some_and(|fqns| fqns.contains(class_name))
    }

    /// Class names of class loaders owned by this component.
    pub fn custom_class_loaders(&self) -> &[String] {
        &self.custom_class_loaders
    }

    /// Returns true if a loader of class `loader_class_name` belongs to this component.
    pub fn is_class_loader_owned(&self, loader_class_name: &str) -> bool {
        self.custom_class_loaders.iter().any(|l| l == loader_class_name)
    }

    /// Bit of this component in an ownership mask.
    pub fn mask(&self) -> u64 {
        1 << self.id
    }
}

/// Everything needed to register a component.
///
/// # Examples
///
/// ```
/// use memory_usage::{ComponentRegistration, ComponentsSet};
///
/// let mut set = ComponentsSet::default();
/// let category = set.register_category("ui", u64::MAX, Vec::new()).unwrap();
/// let id = set
///     .add_component_with_packages_and_class_names(
///         category,
///         ComponentRegistration::new("ui:widgets").package("com.example.widgets"),
///     )
///     .unwrap();
/// assert_eq!(set.component(id).unwrap().label(), "ui:widgets");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComponentRegistration {
    label: String,
    threshold: Option<u64>,
    package_names: Vec<String>,
    class_names: Vec<String>,
    tracked_fqns: Vec<String>,
    custom_class_loaders: Vec<String>,
}

impl ComponentRegistration {
    /// Starts a registration with only a label.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Self::default()
        }
    }

    /// Sets the extended report threshold.
    pub fn threshold(mut self, bytes: u64) -> Self {
        self.threshold = Some(bytes);
        self
    }

    /// Adds an owned package prefix.
    pub fn package(mut self, name: impl Into<String>) -> Self {
        self.package_names.push(name.into());
        self
    }

    /// Adds an owned class name.
    pub fn class_name(mut self, name: impl Into<String>) -> Self {
        self.class_names.push(name.into());
        self
    }

    /// Adds a tracked class name.
    pub fn tracked_fqn(mut self, name: impl Into<String>) -> Self {
        self.tracked_fqns.push(name.into());
        self
    }

    /// Adds an owned class loader class name.
    pub fn custom_class_loader(mut self, name: impl Into<String>) -> Self {
        self.custom_class_loaders.push(name.into());
        self
    }
}

fn tracked_set(fqns: Vec<String>) -> Option<HashSet<String>> {
    (!fqns.is_empty()).then(|| fqns.into_iter().collect())
}

/// All components and categories of a session.
///
/// Lookups take `&self`; the package prefix cache sits behind a mutex so a
/// set can be shared between threads.
#[derive(Debug)]
pub struct ComponentsSet {
    components: Vec<Component>,
    categories: Vec<ComponentCategory>,
    class_name_to_component: HashMap<String, usize>,
    package_name_to_component: HashMap<String, usize>,
    package_lookup_cache: Mutex<HashMap<String, Option<usize>>>,
    shared_cluster_extended_report_threshold: u64,
}

impl Default for ComponentsSet {
    fn default() -> Self {
        Self::new(DEFAULT_EXTENDED_REPORT_THRESHOLD, DEFAULT_EXTENDED_REPORT_THRESHOLD)
    }
}

impl ComponentsSet {
    /// Creates a set holding only the uncategorized category and component.
    pub fn new(shared_cluster_threshold: u64, uncategorized_component_threshold: u64) -> Self {
        let mut set = Self {
            components: Vec::new(),
            categories: Vec::new(),
            class_name_to_component: HashMap::new(),
            package_name_to_component: HashMap::new(),
            package_lookup_cache: Mutex::new(HashMap::new()),
            shared_cluster_extended_report_threshold: shared_cluster_threshold,
        };
        set.categories.push(ComponentCategory {
            id: 0,
            label: UNCATEGORIZED_CATEGORY_LABEL.to_string(),
            extended_report_threshold_bytes: uncategorized_component_threshold,
            tracked_fqns: None,
        });
        set.components.push(Component {
            id: 0,
            label: UNCATEGORIZED_COMPONENT_LABEL.to_string(),
            extended_report_threshold_bytes: uncategorized_component_threshold,
            category: 0,
            tracked_fqns: None,
            custom_class_loaders: Vec::new(),
        });
        set
    }

    /// Builds a set from a parsed configuration.
    ///
    /// Missing thresholds mean "never exceeded".
    pub fn from_configuration(
        configuration: &MemoryUsageReportConfiguration,
    ) -> Result<Self, ConfigurationError> {
        let mut set = Self::new(
            configuration
                .shared_cluster_extended_report_threshold_bytes
                .unwrap_or(u64::MAX),
            configuration
                .uncategorized_component_extended_report_threshold_bytes
                .unwrap_or(u64::MAX),
        );
        for category in &configuration.categories {
            let category_id = set.register_category(
                category.label.clone(),
                category.extended_report_threshold_bytes.unwrap_or(u64::MAX),
                category.tracked_fqns.clone(),
            )?;
            for component in &category.components {
                let registration = ComponentRegistration {
                    label: component.label.clone(),
                    threshold: component.extended_report_threshold_bytes,
                    package_names: component.package_names.clone(),
                    class_names: component.class_names.clone(),
                    tracked_fqns: component.tracked_fqns.clone(),
                    custom_class_loaders: component.custom_class_loaders.clone(),
                };
                set.add_component_with_packages_and_class_names(category_id, registration)?;
            }
        }
        set.validate()?;
        Ok(set)
    }

    /// Parses and builds a set, falling back to the bundled configuration
    /// when `json` is missing or invalid.
    pub fn load_or_default(json: Option<&str>) -> Self {
        let Some(json) = json else {
            tracing::warn!("no memory usage configuration provided, using the bundled default");
            return Self::bundled_default();
        };
        match MemoryUsageReportConfiguration::from_json(json)
            .and_then(|configuration| Self::from_configuration(&configuration))
        {
            Ok(set) => set,
            Err(err) => {
                tracing::warn!(error = %err, "invalid memory usage configuration, using the bundled default");
                Self::bundled_default()
            }
        }
    }

    /// Set built from the bundled configuration.
    pub fn bundled_default() -> Self {
        match Self::from_configuration(&MemoryUsageReportConfiguration::bundled_default()) {
            Ok(set) => set,
            Err(err) => {
                tracing::error!(error = %err, "bundled memory usage configuration is invalid");
                Self::default()
            }
        }
    }

    /// Registers a category and returns its id.
    pub fn register_category(
        &mut self,
        label: impl Into<String>,
        extended_report_threshold_bytes: u64,
        tracked_fqns: Vec<String>,
    ) -> Result<usize, ConfigurationError> {
        if self.categories.len() >= MAX_CATEGORIES {
            return Err(ConfigurationError::TooManyCategories {
                max: MAX_CATEGORIES,
            });
        }
        let id = self.categories.len();
        self.categories.push(ComponentCategory {
            id,
            label: label.into(),
            extended_report_threshold_bytes,
            tracked_fqns: tracked_set(tracked_fqns),
        });
        Ok(id)
    }

    /// Registers a component without any class or package names.
    pub fn register_component(
        &mut self,
        label: impl Into<String>,
        extended_report_threshold_bytes: u64,
        category: usize,
        tracked_fqns: Vec<String>,
    ) -> Result<usize, ConfigurationError> {
        let registration = ComponentRegistration {
            label: label.into(),
            threshold: Some(extended_report_threshold_bytes),
            tracked_fqns,
            ..ComponentRegistration::default()
        };
        self.add_component_with_packages_and_class_names(category, registration)
    }

    /// Registers a component and maps its class and package names to it.
    pub fn add_component_with_packages_and_class_names(
        &mut self,
        category: usize,
        registration: ComponentRegistration,
    ) -> Result<usize, ConfigurationError> {
        if category >= self.categories.len() {
            return Err(ConfigurationError::UnknownCategory(category));
        }
        if self.components.len() >= MAX_COMPONENTS {
            return Err(ConfigurationError::TooManyComponents {
                max: MAX_COMPONENTS,
            });
        }
        let id = self.components.len();
        self.components.push(Component {
            id,
            label: registration.label,
            extended_report_threshold_bytes: registration.threshold.unwrap_or(u64::MAX),
            category,
            tracked_fqns: tracked_set(registration.tracked_fqns),
            custom_class_loaders: registration.custom_class_loaders,
        });
        for name in registration.class_names {
            self.class_name_to_component.insert(name, id);
        }
        for name in registration.package_names {
            self.package_name_to_component.insert(name, id);
        }
        self.package_lookup_cache.lock().clear();
        Ok(id)
    }

    /// Checks that every id equals its registration index.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        for (index, component) in self.components.iter().enumerate() {
            if component.id != index {
                return Err(ConfigurationError::InconsistentId {
                    kind: "component",
                    label: component.label.clone(),
                    id: component.id,
                    index,
                });
            }
        }
        for (index, category) in self.categories.iter().enumerate() {
            if category.id != index {
                return Err(ConfigurationError::InconsistentId {
                    kind: "category",
                    label: category.label.clone(),
                    id: category.id,
                    index,
                });
            }
        }
        Ok(())
    }

    /// All components in id order.
    pub fn components(&self) -> &[Component] {
        &self.components
    }

    /// All categories in id order.
    pub fn categories(&self) -> &[ComponentCategory] {
        &self.categories
    }

    /// Component with the given id.
    pub fn component(&self, id: usize) -> Option<&Component> {
        self.components.get(id)
    }

    /// Category with the given id.
    pub fn category(&self, id: usize) -> Option<&ComponentCategory> {
        self.categories.get(id)
    }

    /// Component used for unowned objects.
    pub fn uncategorized_component(&self) -> &Component {
        &self.components[0]
    }

    /// Size above which a shared cluster counts as exceeded.
    pub fn shared_cluster_extended_report_threshold(&self) -> u64 {
        self.shared_cluster_extended_report_threshold
    }

    /// Component owning `obj`, `None` for uncategorized objects.
    ///
    /// Class objects resolve through the class they represent, every other
    /// object through its dynamic class.
    pub fn component_of_object<H: HeapHost + ?Sized>(
        &self,
        host: &H,
        obj: ObjectRef,
    ) -> Option<&Component> {
        let class = host.mirrored_class(obj).or_else(|| host.class_of(obj))?;
        let info = host.class_info(class)?;
        self.component_of_class(&info)
    }

    /// Component owning instances of `class`.
    pub fn component_of_class(&self, class: &ClassInfo) -> Option<&Component> {
        let name: &str = &class.name;
        if class.flags.synthetic || class.flags.member || class.flags.anonymous {
            if let Some(dollar) = name.find('$') {
                if let Some(&id) = self.class_name_to_component.get(&name[..dollar]) {
                    return self.components.get(id);
                }
            }
        }
        if let Some(&id) = self.class_name_to_component.get(name) {
            return self.components.get(id);
        }
        self.component_of_package(class.package_name())
            .and_then(|id| self.components.get(id))
    }

    fn component_of_package(&self, package: &str) -> Option<usize> {
        if let Some(cached) = self.package_lookup_cache.lock().get(package) {
            return *cached;
        }
        let mut prefix = package;
        let found = loop {
            if let Some(&id) = self.package_name_to_component.get(prefix) {
                break Some(id);
            }
            match prefix.rfind('.') {
                Some(dot) if dot > 0 => prefix = &prefix[..dot],
                _ => break None,
            }
        };
        self.package_lookup_cache
            .lock()
            .insert(package.to_string(), found);
        found
    }

    /// Number of package names with a cached lookup result.
    pub fn cached_package_count(&self) -> usize {
        self.package_lookup_cache.lock().len()
    }
}
