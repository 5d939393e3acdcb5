use std::collections::BTreeMap;
use std::fmt;

use cellgraph_kernel::CellBehavior;

type Constructor = Box<dyn Fn() -> Box<dyn CellBehavior>>;

/// Maps recorded type names back to behavior constructors.
#[derive(Default)]
pub struct CellFactory {
    constructors: BTreeMap<&'static str, Constructor>,
}

impl CellFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `B` under its own type name.
    pub fn register<B: CellBehavior + Default>(&mut self) -> &mut Self {
        let name = B::default().type_name();
        self.register_with(name, || Box::new(B::default()) as Box<dyn CellBehavior>)
    }

    pub fn register_with(
        &mut self,
        type_name: &'static str,
        constructor: impl Fn() -> Box<dyn CellBehavior> + 'static,
    ) -> &mut Self {
        self.constructors.insert(type_name, Box::new(constructor));
        self
    }

    pub fn knows(&self, type_name: &str) -> bool {
        self.constructors.contains_key(type_name)
    }

    pub fn build(&self, type_name: &str) -> Option<Box<dyn CellBehavior>> {
        self.constructors.get(type_name).map(|make| make())
    }
}

impl fmt::Debug for CellFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.constructors.keys()).finish()
    }
}
