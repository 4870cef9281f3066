use crate::module::Module;
use crate::printer::print_module;
use crate::validation::Validator;

pub trait Pass {
    fn name(&self) -> &str;
    fn run(&mut self, module: &mut Module);
}

#[derive(Debug, Clone)]
pub struct OptimizationOptions {
    /// Log the printed module after every pass at debug level.
    pub debug: bool,
    /// Validate the module after every pass.
    pub validate: bool,
    pub perfect_loops: bool,
    pub forward_stores: bool,
}

impl Default for OptimizationOptions {
    fn default() -> Self {
        Self {
            debug: false,
            validate: true,
            perfect_loops: false,
            forward_stores: false,
        }
    }
}

impl OptimizationOptions {
    pub fn o0() -> Self {
        Self::default()
    }

    pub fn o1() -> Self {
        Self {
            perfect_loops: true,
            forward_stores: true,
            ..Default::default()
        }
    }
}

pub struct PassRunner {
    passes: Vec<Box<dyn Pass>>,
    validate_after_pass: bool,
    debug: bool,
}

impl Default for PassRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl PassRunner {
    pub fn new() -> Self {
        Self {
            passes: Vec::new(),
            validate_after_pass: false,
            debug: false,
        }
    }

    pub fn set_validate_globally(&mut self, validate: bool) {
        self.validate_after_pass = validate;
    }

    pub fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
    }

    pub fn add<P: Pass + 'static>(&mut self, pass: P) {
        self.passes.push(Box::new(pass));
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// Perfection runs first so forwarding sees the sunk statements next to
    /// the loads they feed.
    pub fn add_default_optimization_passes(&mut self, options: &OptimizationOptions) {
        self.validate_after_pass |= options.validate;
        self.debug |= options.debug;
        if options.perfect_loops {
            self.add(crate::passes::affine_loop_perfection::AffineLoopPerfection::new());
        }
        if options.forward_stores {
            self.add(crate::passes::affine_store_forward::AffineStoreForward::new());
        }
    }

    pub fn get_all_pass_names() -> Vec<&'static str> {
        vec!["affine-loop-perfection", "affine-store-forward", "print"]
    }

    pub fn add_by_name(&mut self, name: &str) -> bool {
        match name {
            "affine-loop-perfection" => {
                self.add(crate::passes::affine_loop_perfection::AffineLoopPerfection::new())
            }
            "affine-store-forward" => {
                self.add(crate::passes::affine_store_forward::AffineStoreForward::new())
            }
            "print" => self.add(crate::passes::print::Print),
            _ => return false,
        }
        true
    }

    pub fn run(&mut self, module: &mut Module) {
        for pass in &mut self.passes {
            log::debug!("running pass '{}'", pass.name());
            pass.run(module);

            if self.debug {
                log::debug!("after '{}':\n{}", pass.name(), print_module(module));
            }

            if self.validate_after_pass {
                let validator = Validator::new(module);
                let (valid, errors) = validator.validate();
                if !valid {
                    let err_msg = errors.join("\n");
                    panic!(
                        "Validation failed after pass '{}':\n{}",
                        pass.name(),
                        err_msg
                    );
                }
            }
        }
    }
}
