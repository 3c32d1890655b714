//! Object recognition
//!
//! - [`label`]: the closed set of object classes
//! - [`forest`]: decision-tree ensembles evaluated by majority vote
//! - [`model`]: versioned classifier artifact with its feature-length contract
//! - [`classifier`]: combination of the color and shape ensembles
//! - [`templates`]: on-disk catalog of reference clouds per label

pub mod classifier;
pub mod forest;
pub mod label;
pub mod model;
pub mod templates;

pub use classifier::{Classification, Classifier, CombinationRule};
pub use forest::{Forest, Node, Tree};
pub use label::ObjectLabel;
pub use model::{ClassifierModel, MODEL_VERSION};
pub use templates::{Template, TemplateCatalog, CATALOG_FILE, CATALOG_VERSION};
