use std::collections::BTreeMap;

use crate::hierarchy::ClassProvider;
use crate::ir::Class;

/// Loaded classes keyed by internal name. The first definition of a name
/// wins, matching JVM classpath order.
#[derive(Debug, Default)]
pub(crate) struct ClassPool {
    classes: BTreeMap<String, Class>,
}

impl ClassPool {
    pub(crate) fn new(classes: Vec<Class>) -> Self {
        let mut pool = BTreeMap::new();
        for class in classes {
            if pool.contains_key(&class.name) {
                tracing::warn!(
                    "duplicate class {} on the classpath; keeping the first",
                    class.name
                );
                continue;
            }
            pool.insert(class.name.clone(), class);
        }
        Self { classes: pool }
    }

    pub(crate) fn len(&self) -> usize {
        self.classes.len()
    }

    /// Look up by internal (`a/b/C`) or binary (`a.b.C`) name.
    pub(crate) fn get(&self, name: &str) -> Option<&Class> {
        self.classes
            .get(name)
            .or_else(|| self.classes.get(&name.replace('.', "/")))
    }
}

impl ClassProvider for ClassPool {
    fn load_class(&self, name: &str) -> Option<&Class> {
        self.get(name)
    }
}
