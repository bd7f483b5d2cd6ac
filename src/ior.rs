//! Index-of-refraction presets understood by the renderer.

use crate::props::Value;

const PRESETS: &[(&str, f32)] = &[
    ("vacuum", 1.0),
    ("helium", 1.00004),
    ("hydrogen", 1.00013),
    ("air", 1.00028),
    ("carbon dioxide", 1.00045),
    ("water", 1.3330),
    ("acetone", 1.36),
    ("ethanol", 1.361),
    ("carbon tetrachloride", 1.461),
    ("glycerol", 1.4729),
    ("benzene", 1.501),
    ("silicone oil", 1.52045),
    ("bromine", 1.661),
    ("water ice", 1.31),
    ("fused quartz", 1.458),
    ("pyrex", 1.470),
    ("acrylic glass", 1.49),
    ("polypropylene", 1.49),
    ("bk7", 1.5046),
    ("sodium chloride", 1.544),
    ("amber", 1.55),
    ("pet", 1.5750),
    ("diamond", 2.419),
];

/// An IOR as written by the user: a number or a preset name.
#[derive(Debug, Clone, PartialEq)]
pub enum Ior {
    Value(f32),
    Named(String),
}

impl Ior {
    pub fn value(&self) -> Option<f32> {
        match self {
            Ior::Value(v) => Some(*v),
            Ior::Named(name) => lookup(name),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Ior::Value(v) => Value::Float(*v),
            Ior::Named(name) => Value::String(name.clone()),
        }
    }

    pub fn from_value(v: &Value) -> Option<Ior> {
        match v {
            Value::Float(_) | Value::Int(_) => v.as_float().map(Ior::Value),
            Value::String(s) => lookup(s).map(|_| Ior::Named(s.clone())),
            _ => None,
        }
    }
}

/// Resolve a preset name. Accepts `-` and `_` as word separators.
pub fn lookup(name: &str) -> Option<f32> {
    let key = name.trim().to_ascii_lowercase().replace(['-', '_'], " ");
    PRESETS
        .iter()
        .find(|(preset, _)| *preset == key)
        .map(|(_, v)| *v)
}

pub fn preset_names() -> impl Iterator<Item = &'static str> {
    PRESETS.iter().map(|(name, _)| *name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_presets_with_any_separator() {
        assert_eq!(lookup("bk7"), Some(1.5046));
        assert_eq!(lookup("fused-quartz"), Some(1.458));
        assert_eq!(lookup("Water_Ice"), Some(1.31));
        assert_eq!(lookup("unobtainium"), None);
    }

    #[test]
    fn named_ior_keeps_user_choice() {
        let ior = Ior::from_value(&Value::String("diamond".into())).unwrap();
        assert_eq!(ior.to_value(), Value::String("diamond".into()));
        assert_eq!(ior.value(), Some(2.419));
    }

    #[test]
    fn table_has_all_presets() {
        assert_eq!(preset_names().count(), 23);
    }
}
