use crate::module::Module;
use crate::pass::Pass;
use crate::printer::print_module;

/// Prints the module in its textual form to stdout.
pub struct Print;

impl Pass for Print {
    fn name(&self) -> &str {
        "print"
    }

    fn run(&mut self, module: &mut Module) {
        println!("{}", print_module(module));
    }
}
