//! Class histograms, nominated classes and root path trees of the extended run.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use crate::object_tag::MAX_EXCEEDED_CLUSTERS;
use crate::presentation::objects_stats_presentation;
use crate::root_path_tree::{
    RootPathTree, DISPOSED_BUT_REFERENCED_NOMINATED_NODE_TYPE, MAX_NUMBER_OF_NOMINATED_NODE_TYPES,
    NOMINATED_CLASSES_NUMBER_IN_SECTION,
};
use crate::{ComponentsSet, ObjectsStatistics, PresentationStyle};

/// Classes printed per histogram.
pub const HISTOGRAM_PRINT_LIMIT: usize = 10;

const NOMINATION_SECTIONS: [&str; 3] = ["owned", "cluster roots", "disposed but referenced"];

/// Clusters whose owned size went over their threshold.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExceededClusters {
    /// Component ids
    pub components: Vec<usize>,
    /// Category ids, reported but not traced
    pub categories: Vec<usize>,
    /// Component masks of shared clusters
    pub shared_masks: Vec<u64>,
}

impl ExceededClusters {
    /// Returns true if nothing exceeded its threshold.
    pub fn is_empty(&self) -> bool {
        self.components.is_empty() && self.categories.is_empty() && self.shared_masks.is_empty()
    }

    /// Traced clusters in index order: components first, then shared clusters.
    /// At most [`MAX_EXCEEDED_CLUSTERS`] fit in an object tag.
    pub fn traced_clusters(&self) -> Vec<ExceededClusterKind> {
        self.components
            .iter()
            .map(|id| ExceededClusterKind::Component(*id))
            .chain(self.shared_masks.iter().map(|mask| ExceededClusterKind::SharedCluster(*mask)))
            .take(MAX_EXCEEDED_CLUSTERS)
            .collect()
    }
}

/// A traced exceeded cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceededClusterKind {
    /// A single component
    Component(usize),
    /// A shared cluster, by component mask
    SharedCluster(u64),
}

/// Per-class statistics of one cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterHistogram {
    owned: HashMap<String, ObjectsStatistics>,
    roots: HashMap<String, ObjectsStatistics>,
    disposed: HashMap<String, ObjectsStatistics>,
}

impl ClusterHistogram {
    fn add(&mut self, class_name: &str, size: u64, is_root: bool, is_disposed_but_referenced: bool) {
        add_to(&mut self.owned, class_name, size);
        if is_root {
            add_to(&mut self.roots, class_name, size);
        }
        if is_disposed_but_referenced {
            add_to(&mut self.disposed, class_name, size);
        }
    }

    /// Owned instances of `class_name`.
    pub fn owned(&self, class_name: &str) -> ObjectsStatistics {
        self.owned.get(class_name).copied().unwrap_or_default()
    }

    /// Instances of `class_name` that were cluster roots or merge points.
    pub fn roots(&self, class_name: &str) -> ObjectsStatistics {
        self.roots.get(class_name).copied().unwrap_or_default()
    }

    /// Disposed but referenced instances of `class_name`.
    pub fn disposed(&self, class_name: &str) -> ObjectsStatistics {
        self.disposed.get(class_name).copied().unwrap_or_default()
    }

    fn section(&self, section: usize) -> &HashMap<String, ObjectsStatistics> {
        match section {
            0 => &self.owned,
            1 => &self.roots,
            _ => &self.disposed,
        }
    }

    fn disposed_total(&self) -> ObjectsStatistics {
        let mut total = ObjectsStatistics::default();
        for stats in self.disposed.values() {
            total.add_stats(stats);
        }
        total
    }

    fn write<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        write_histogram(writer, "    Histogram:", &self.owned)?;
        write_histogram(writer, "    Cluster roots histogram:", &self.roots)?;
        write_histogram(writer, "    Disposed but referenced histogram:", &self.disposed)
    }
}

fn add_to(histogram: &mut HashMap<String, ObjectsStatistics>, class_name: &str, size: u64) {
    match histogram.get_mut(class_name) {
        Some(stats) => stats.add_object(size),
        None => {
            let mut stats = ObjectsStatistics::default();
            stats.add_object(size);
            histogram.insert(class_name.to_string(), stats);
        }
    }
}

/// Classes of `histogram` by size, largest first, ties by name.
fn largest_classes(histogram: &HashMap<String, ObjectsStatistics>) -> Vec<(&str, ObjectsStatistics)> {
    let mut entries: Vec<_> = histogram.iter().map(|(name, stats)| (name.as_str(), *stats)).collect();
    entries.sort_by(|a, b| b.1.total_size_bytes.cmp(&a.1.total_size_bytes).then(a.0.cmp(b.0)));
    entries
}

fn write_histogram<W: fmt::Write>(
    writer: &mut W,
    title: &str,
    histogram: &HashMap<String, ObjectsStatistics>,
) -> fmt::Result {
    if histogram.is_empty() {
        return Ok(());
    }
    writeln!(writer, "{title}")?;
    for (name, stats) in largest_classes(histogram).into_iter().take(HISTOGRAM_PRINT_LIMIT) {
        writeln!(
            writer,
            "      {}: {}",
            objects_stats_presentation(&stats, PresentationStyle::OptimalUnits),
            name
        )?;
    }
    Ok(())
}

/// Diagnostic state of one traced exceeded cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceededClusterStatistics {
    /// Dense index, stored in object tags
    pub index: usize,
    /// What exceeded
    pub kind: ExceededClusterKind,
    nominated_classes: HashMap<String, usize>,
    nominated_type_totals: Vec<ObjectsStatistics>,
}

impl ExceededClusterStatistics {
    fn new(index: usize, kind: ExceededClusterKind) -> Self {
        Self {
            index,
            kind,
            nominated_classes: HashMap::new(),
            nominated_type_totals: vec![ObjectsStatistics::default(); MAX_NUMBER_OF_NOMINATED_NODE_TYPES],
        }
    }

    /// Nominated type of `class_name`, if the class was nominated.
    pub fn nominated_type(&self, class_name: &str) -> Option<usize> {
        self.nominated_classes.get(class_name).copied()
    }

    /// Nominated classes ordered by type.
    pub fn nominated_classes(&self) -> Vec<(&str, usize)> {
        let mut classes: Vec<_> = self
            .nominated_classes
            .iter()
            .map(|(name, node_type)| (name.as_str(), *node_type))
            .collect();
        classes.sort_by_key(|(_, node_type)| *node_type);
        classes
    }

    /// Expected total of nominated objects of `node_type`, used for percentages.
    pub fn nominated_type_total(&self, node_type: usize) -> ObjectsStatistics {
        self.nominated_type_totals.get(node_type).copied().unwrap_or_default()
    }
}

/// Everything collected only on the extended run.
#[derive(Debug)]
pub struct ExtendedReportStatistics {
    exceeded_clusters: Vec<ExceededClusterStatistics>,
    component_to_exceeded: HashMap<usize, usize>,
    shared_mask_to_exceeded: HashMap<u64, usize>,
    component_histograms: Vec<ClusterHistogram>,
    category_histograms: Vec<ClusterHistogram>,
    shared_histograms: HashMap<u64, ClusterHistogram>,
    disposed_but_referenced: ObjectsStatistics,
    disposed_but_referenced_classes: HashMap<String, ObjectsStatistics>,
    /// Root paths of nominated objects
    pub root_path_tree: RootPathTree,
}

impl ExtendedReportStatistics {
    /// Empty statistics tracing the clusters in `exceeded`.
    pub fn new(components: &ComponentsSet, exceeded: &ExceededClusters) -> Self {
        let mut component_to_exceeded = HashMap::new();
        let mut shared_mask_to_exceeded = HashMap::new();
        let exceeded_clusters: Vec<_> = exceeded
            .traced_clusters()
            .into_iter()
            .enumerate()
            .map(|(index, kind)| {
                match kind {
                    ExceededClusterKind::Component(id) => component_to_exceeded.insert(id, index),
                    ExceededClusterKind::SharedCluster(mask) => shared_mask_to_exceeded.insert(mask, index),
                };
                ExceededClusterStatistics::new(index, kind)
            })
            .collect();
        Self {
            exceeded_clusters,
            component_to_exceeded,
            shared_mask_to_exceeded,
            component_histograms: vec![ClusterHistogram::default(); components.components().len()],
            category_histograms: vec![ClusterHistogram::default(); components.categories().len()],
            shared_histograms: HashMap::new(),
            disposed_but_referenced: ObjectsStatistics::default(),
            disposed_but_referenced_classes: HashMap::new(),
            root_path_tree: RootPathTree::new(),
        }
    }

    /// Traced clusters by index.
    pub fn exceeded_clusters(&self) -> &[ExceededClusterStatistics] {
        &self.exceeded_clusters
    }

    /// The traced cluster with `index`.
    pub fn exceeded_cluster(&self, index: usize) -> Option<&ExceededClusterStatistics> {
        self.exceeded_clusters.get(index)
    }

    /// Index of the traced cluster of component `id`.
    pub fn exceeded_cluster_of_component(&self, id: usize) -> Option<usize> {
        self.component_to_exceeded.get(&id).copied()
    }

    /// Index of the traced cluster owning objects with `owned_mask`.
    pub fn exceeded_cluster_of_mask(&self, owned_mask: u64) -> Option<usize> {
        if owned_mask.count_ones() == 1 {
            return self.exceeded_cluster_of_component(owned_mask.trailing_zeros() as usize);
        }
        self.shared_mask_to_exceeded.get(&owned_mask).copied()
    }

    /// Exceeded components tracing class loader crossings, with their cluster index.
    pub fn exceeded_components(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.exceeded_clusters.iter().filter_map(|cluster| match cluster.kind {
            ExceededClusterKind::Component(id) => Some((id, cluster.index)),
            ExceededClusterKind::SharedCluster(_) => None,
        })
    }

    /// Counts an object owned by component `id`.
    pub fn add_class_name_to_component_owned_histogram(
        &mut self,
        id: usize,
        class_name: &str,
        size: u64,
        is_root: bool,
        is_disposed_but_referenced: bool,
    ) {
        if let Some(histogram) = self.component_histograms.get_mut(id) {
            histogram.add(class_name, size, is_root, is_disposed_but_referenced);
        }
    }

    /// Counts an object owned by category `id`.
    pub fn add_class_name_to_category_owned_histogram(
        &mut self,
        id: usize,
        class_name: &str,
        size: u64,
        is_root: bool,
        is_disposed_but_referenced: bool,
    ) {
        if let Some(histogram) = self.category_histograms.get_mut(id) {
            histogram.add(class_name, size, is_root, is_disposed_but_referenced);
        }
    }

    /// Counts an object of the shared cluster `mask`.
    pub fn add_class_name_to_shared_cluster_histogram(
        &mut self,
        mask: u64,
        class_name: &str,
        size: u64,
        is_merge_point: bool,
        is_disposed_but_referenced: bool,
    ) {
        self.shared_histograms
            .entry(mask)
            .or_default()
            .add(class_name, size, is_merge_point, is_disposed_but_referenced);
    }

    /// Counts a disposed object that is still reachable.
    pub fn add_disposed_but_referenced_object(&mut self, size: u64, class_name: &str) {
        self.disposed_but_referenced.add_object(size);
        add_to(&mut self.disposed_but_referenced_classes, class_name, size);
    }

    /// Histogram of component `id`.
    pub fn component_histogram(&self, id: usize) -> Option<&ClusterHistogram> {
        self.component_histograms.get(id)
    }

    /// Histogram of category `id`.
    pub fn category_histogram(&self, id: usize) -> Option<&ClusterHistogram> {
        self.category_histograms.get(id)
    }

    /// Histogram of the shared cluster `mask`.
    pub fn shared_cluster_histogram(&self, mask: u64) -> Option<&ClusterHistogram> {
        self.shared_histograms.get(&mask)
    }

    /// Disposed but referenced objects over the whole heap.
    pub fn disposed_but_referenced(&self) -> &ObjectsStatistics {
        &self.disposed_but_referenced
    }

    fn histogram_of(&self, kind: ExceededClusterKind) -> Option<&ClusterHistogram> {
        match kind {
            ExceededClusterKind::Component(id) => self.component_histograms.get(id),
            ExceededClusterKind::SharedCluster(mask) => self.shared_histograms.get(&mask),
        }
    }

    /// Picks the nominated classes of every traced cluster from its histogram:
    /// the largest owned classes, the largest cluster root classes and the
    /// largest disposed classes. A class keeps the first type it was given.
    pub fn compute_nominated_classes(&mut self) {
        let mut nominations = Vec::with_capacity(self.exceeded_clusters.len());
        for cluster in &self.exceeded_clusters {
            let mut classes: HashMap<String, usize> = HashMap::new();
            let mut totals = vec![ObjectsStatistics::default(); MAX_NUMBER_OF_NOMINATED_NODE_TYPES];
            if let Some(histogram) = self.histogram_of(cluster.kind) {
                for section in 0..NOMINATION_SECTIONS.len() {
                    let largest = largest_classes(histogram.section(section));
                    for (rank, (name, _)) in largest.into_iter().take(NOMINATED_CLASSES_NUMBER_IN_SECTION).enumerate() {
                        if classes.contains_key(name) {
                            continue;
                        }
                        let node_type = section * NOMINATED_CLASSES_NUMBER_IN_SECTION + rank;
                        classes.insert(name.to_string(), node_type);
                        totals[node_type] = histogram.owned(name);
                    }
                }
                totals[DISPOSED_BUT_REFERENCED_NOMINATED_NODE_TYPE] = histogram.disposed_total();
            }
            nominations.push((classes, totals));
        }
        for (cluster, (classes, totals)) in self.exceeded_clusters.iter_mut().zip(nominations) {
            cluster.nominated_classes = classes;
            cluster.nominated_type_totals = totals;
        }
    }

    /// Writes the histogram of component `id`.
    pub fn log_component_histogram<W: fmt::Write>(&self, writer: &mut W, id: usize) -> fmt::Result {
        match self.component_histograms.get(id) {
            Some(histogram) => histogram.write(writer),
            None => Ok(()),
        }
    }

    /// Writes the histogram of category `id`.
    pub fn log_category_histogram<W: fmt::Write>(&self, writer: &mut W, id: usize) -> fmt::Result {
        match self.category_histograms.get(id) {
            Some(histogram) => histogram.write(writer),
            None => Ok(()),
        }
    }

    /// Writes the histogram of the shared cluster `mask`.
    pub fn log_shared_cluster_histogram<W: fmt::Write>(&self, writer: &mut W, mask: u64) -> fmt::Result {
        match self.shared_histograms.get(&mask) {
            Some(histogram) => histogram.write(writer),
            None => Ok(()),
        }
    }

    /// Writes the disposed-but-referenced summary.
    pub fn log_disposer_tree_report<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        writeln!(
            writer,
            "Disposed but referenced objects: {}",
            objects_stats_presentation(&self.disposed_but_referenced, PresentationStyle::OptimalUnits)
        )?;
        for (name, stats) in largest_classes(&self.disposed_but_referenced_classes)
            .into_iter()
            .take(HISTOGRAM_PRINT_LIMIT)
        {
            writeln!(
                writer,
                "  {}: {}",
                objects_stats_presentation(&stats, PresentationStyle::OptimalUnits),
                name
            )?;
        }
        Ok(())
    }

    /// Writes the root path trees of the traced cluster with `index`.
    ///
    /// `custom_class_loaders` are the nominated loaders of the component, empty
    /// for shared clusters.
    pub fn print_exceeded_cluster_statistics<W: fmt::Write>(
        &self,
        writer: &mut W,
        index: usize,
        custom_class_loaders: &[String],
    ) -> fmt::Result {
        let Some(cluster) = self.exceeded_clusters.get(index) else {
            return Ok(());
        };
        for (class_name, node_type) in cluster.nominated_classes() {
            let total = cluster.nominated_type_total(node_type);
            if total.is_empty() {
                continue;
            }
            let section = NOMINATION_SECTIONS[node_type / NOMINATED_CLASSES_NUMBER_IN_SECTION];
            writeln!(writer, "================= {class_name} ({section}) ================")?;
            self.root_path_tree
                .print_path_tree_for_cluster_and_type(writer, index, node_type, &total)?;
        }
        self.root_path_tree.print_path_tree_for_disposed_referenced_objects(
            writer,
            index,
            &cluster.nominated_type_total(DISPOSED_BUT_REFERENCED_NOMINATED_NODE_TYPE),
        )?;
        self.root_path_tree
            .print_path_tree_for_objects_referring_nominated_loaders(writer, index, custom_class_loaders)
    }
}
