//! Named Bind Values
//!
//! Ordered `name -> value` pairs referenced by `:name` placeholders.
//! Names are unique within one statement: asking for a name that is already
//! taken yields `name_2`, `name_3`, ... so compilers never overwrite each
//! other's values and emission order stays deterministic.

use serde_json::Value;

/// Ordered, collision-free bind values
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Binds {
    entries: Vec<(String, Value)>,
}

impl Binds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `value` under a name derived from `base`, returning the name used.
    ///
    /// Dots in `base` become underscores so that JSON sub-path fields yield
    /// valid placeholder names.
    pub fn bind(&mut self, base: &str, value: Value) -> String {
        let base = placeholder_base(base);
        let name = if self.contains(&base) {
            let mut n = 2;
            loop {
                let candidate = format!("{}_{}", base, n);
                if !self.contains(&candidate) {
                    break candidate;
                }
                n += 1;
            }
        } else {
            base
        };

        self.entries.push((name.clone(), value));
        name
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }
}

impl<'a> IntoIterator for &'a Binds {
    type Item = &'a (String, Value);
    type IntoIter = std::slice::Iter<'a, (String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Placeholder-safe form of a field name
pub fn placeholder_base(field: &str) -> String {
    field.replace('.', "_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bind_keeps_order() {
        let mut binds = Binds::new();
        assert_eq!(binds.bind("b", json!(2)), "b");
        assert_eq!(binds.bind("a", json!(1)), "a");

        let names: Vec<&str> = binds.names().collect();
        assert_eq!(names, vec!["b", "a"]);
        assert_eq!(binds.get("a"), Some(&json!(1)));
    }

    #[test]
    fn test_repeated_name_is_suffixed() {
        let mut binds = Binds::new();
        assert_eq!(binds.bind("count", json!(1)), "count");
        assert_eq!(binds.bind("count", json!(3)), "count_2");
        assert_eq!(binds.bind("count", json!(5)), "count_3");
        assert_eq!(binds.len(), 3);
    }

    #[test]
    fn test_suffix_skips_taken_names() {
        let mut binds = Binds::new();
        binds.bind("f_2", json!("x"));
        binds.bind("f", json!("y"));
        assert_eq!(binds.bind("f", json!("z")), "f_3");
    }

    #[test]
    fn test_dotted_field_placeholder() {
        let mut binds = Binds::new();
        assert_eq!(
            binds.bind("extension.self_link", json!("l")),
            "extension_self_link"
        );
    }
}
