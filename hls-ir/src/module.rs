use crate::graph::{BlockId, Graph, RegionId, ValueId};
use hls_core::Type;

/// A function: one graph whose body region is an affine scope.
#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub graph: Graph,
    pub body: RegionId,
    pub result_types: Vec<Type>,
}

impl Function {
    /// Creates a function with an empty entry block whose arguments have
    /// `arg_types`.
    pub fn new(name: impl Into<String>, arg_types: &[Type], result_types: &[Type]) -> Self {
        let mut graph = Graph::new();
        let body = graph.create_region(None);
        graph.create_block(body, arg_types);
        Self {
            name: name.into(),
            graph,
            body,
            result_types: result_types.to_vec(),
        }
    }

    pub fn entry_block(&self) -> BlockId {
        self.graph.region(self.body).blocks[0]
    }

    pub fn arguments(&self) -> &[ValueId] {
        &self.graph.block(self.entry_block()).args
    }

    pub fn argument_types(&self) -> Vec<Type> {
        self.arguments()
            .iter()
            .map(|&a| self.graph.value_type(a))
            .collect()
    }
}

#[derive(Debug, Default, Clone)]
pub struct Module {
    pub functions: Vec<Function>,
}

impl Module {
    pub fn new() -> Self {
        Self {
            functions: Vec::new(),
        }
    }

    pub fn add_function(&mut self, func: Function) {
        self.functions.push(func);
    }

    pub fn get_function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn get_function_mut(&mut self, name: &str) -> Option<&mut Function> {
        self.functions.iter_mut().find(|f| f.name == name)
    }
}
