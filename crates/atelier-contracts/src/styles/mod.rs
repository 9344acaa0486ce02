mod catalog;
mod selector;

pub use catalog::{FormKind, StyleCatalog, StyleProfile};
pub use selector::{seed_digest, StyleSelection, StyleSelector};
