//! The ordered scene dictionary an export produces.

use indexmap::IndexMap;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::props::{Props, Value};

#[derive(Debug, Clone, PartialEq)]
pub struct SceneEntry {
    pub props: Props,
    /// The id has to be written even when generated ids are not exported:
    /// it was chosen by the caller or something references it.
    pub keep_id: bool,
}

/// Insertion-ordered map from sanitized id to plugin description. The
/// implicit root is `{type: scene}`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SceneDict {
    entries: IndexMap<String, SceneEntry>,
}

impl SceneDict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Props> {
        self.entries.get(id).map(|e| &e.props)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Props> {
        self.entries.get_mut(id).map(|e| &mut e.props)
    }

    pub fn entry(&self, id: &str) -> Option<&SceneEntry> {
        self.entries.get(id)
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.entries.get_index_of(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SceneEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Append an entry. Returns `false` when the id is taken.
    pub(crate) fn insert(&mut self, id: String, props: Props, keep_id: bool) -> bool {
        if self.entries.contains_key(&id) {
            return false;
        }
        self.entries.insert(id, SceneEntry { props, keep_id });
        true
    }

    /// Entries whose plugin is one of `plugins`.
    pub fn of_plugin<'a>(&'a self, plugins: &'a [&str]) -> impl Iterator<Item = (&'a str, &'a Props)> {
        self.entries
            .iter()
            .filter(move |(_, e)| plugins.contains(&e.props.plugin()))
            .map(|(k, e)| (k.as_str(), &e.props))
    }

    /// The root `scene` bag with every entry nested under its id, the shape
    /// the importer consumes.
    pub fn to_props(&self) -> Props {
        let mut root = Props::new("scene");
        for (id, entry) in &self.entries {
            let bag = entry.props.clone().with_id(id.clone());
            root.set(id.clone(), Value::Bag(bag));
        }
        root
    }
}

impl Serialize for SceneDict {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len() + 1))?;
        map.serialize_entry("type", "scene")?;
        for (id, entry) in &self.entries {
            map.serialize_entry(id, &entry.props)?;
        }
        map.end()
    }
}
