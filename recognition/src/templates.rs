use crate::label::ObjectLabel;
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use sv_core::{Error, PointCloud, Result};
use sv_registration::OrientationPolicy;
use tracing::{debug, info};

pub const CATALOG_FILE: &str = "catalog.json";
pub const CATALOG_VERSION: u32 = 1;

/// Reference cloud of one known object.
#[derive(Debug)]
pub struct Template {
    pub label: ObjectLabel,
    pub cloud: PointCloud,
    pub policy: OrientationPolicy,
}

#[derive(Deserialize)]
struct CatalogFile {
    version: u32,
    templates: BTreeMap<String, String>,
}

/// Versioned on-disk catalog of template clouds.
///
/// `catalog.json` in the catalog directory maps label names to PCD files
/// relative to that directory. Templates are read lazily and cached; callers
/// share them through `Arc`.
pub struct TemplateCatalog {
    dir: PathBuf,
    entries: BTreeMap<ObjectLabel, PathBuf>,
    cache: RwLock<HashMap<ObjectLabel, Arc<Template>>>,
}

impl TemplateCatalog {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let text = fs::read_to_string(dir.join(CATALOG_FILE))?;
        let file: CatalogFile =
            serde_json::from_str(&text).map_err(|e| Error::ModelLoad(format!("{CATALOG_FILE}: {e}")))?;
        if file.version != CATALOG_VERSION {
            return Err(Error::ModelLoad(format!(
                "unsupported catalog version {}, expected {}",
                file.version, CATALOG_VERSION
            )));
        }

        let mut entries = BTreeMap::new();
        for (name, rel) in file.templates {
            let label: ObjectLabel = name
                .parse()
                .map_err(|_| Error::ModelLoad(format!("{CATALOG_FILE}: unknown label '{name}'")))?;
            entries.insert(label, dir.join(rel));
        }
        info!(dir = %dir.display(), templates = entries.len(), "opened template catalog");
        Ok(Self {
            dir,
            entries,
            cache: RwLock::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn labels(&self) -> Vec<ObjectLabel> {
        self.entries.keys().copied().collect()
    }

    pub fn contains(&self, label: ObjectLabel) -> bool {
        self.entries.contains_key(&label)
    }

    /// Template for a label given by name. Unknown names and labels without
    /// a catalog entry fail with [`Error::CatalogMiss`].
    pub fn load_template(&self, name: &str) -> Result<Arc<Template>> {
        self.get(name.parse()?)
    }

    pub fn get(&self, label: ObjectLabel) -> Result<Arc<Template>> {
        if let Some(t) = self.cache.read().get(&label) {
            return Ok(Arc::clone(t));
        }

        let path = self
            .entries
            .get(&label)
            .ok_or_else(|| Error::CatalogMiss(label.as_str().to_string()))?;
        let cloud = sv_io::read_pcd_file(path)?.with_frame("template");
        debug!(%label, points = cloud.len(), "loaded template");
        let template = Arc::new(Template {
            label,
            cloud,
            policy: label.orientation_policy(),
        });

        let mut cache = self.cache.write();
        Ok(Arc::clone(cache.entry(label).or_insert(template)))
    }
}
