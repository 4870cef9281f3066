use crate::dataflow::DominanceInfo;
use crate::graph::{Graph, OpId, RegionId, Use, ValueDef};
use crate::module::{Function, Module};
use crate::ops::OpKind;
use crate::visitor::{walk_region, WalkOrder};
use hls_core::Type;

pub struct Validator<'m> {
    module: &'m Module,
    valid: bool,
    errors: Vec<String>,
}

impl<'m> Validator<'m> {
    pub fn new(module: &'m Module) -> Self {
        Self {
            module,
            valid: true,
            errors: Vec::new(),
        }
    }

    pub fn validate(mut self) -> (bool, Vec<String>) {
        for func in &self.module.functions {
            self.validate_function(func);
        }
        (self.valid, self.errors)
    }

    fn fail(&mut self, msg: &str) {
        self.valid = false;
        self.errors.push(msg.to_string());
    }

    fn validate_function(&mut self, func: &Function) {
        let context = format!("Function '{}': ", func.name);
        let graph = &func.graph;
        let errors_before = self.errors.len();
        self.check_region(graph, func.body, None, &context);
        // Operation checks assume sound structure.
        if self.errors.len() > errors_before {
            return;
        }

        let mut ops = Vec::new();
        walk_region(graph, func.body, WalkOrder::PreOrder, &mut |op| ops.push(op));
        let mut dom = DominanceInfo::new();
        for op in ops {
            self.check_uses(graph, op, &context);
            self.check_op(func, op, &context);
            for (i, &operand) in graph.op(op).operands.iter().enumerate() {
                if graph.contains_value(operand) && !dom.value_dominates(graph, operand, op) {
                    self.fail(&format!(
                        "{}operand {} of {} ({:?}) does not dominate its use",
                        context,
                        i,
                        graph.kind(op).name(),
                        op
                    ));
                }
            }
        }
    }

    /// Parent links and terminator placement, recursively.
    fn check_region(&mut self, graph: &Graph, region: RegionId, parent: Option<OpId>, context: &str) {
        if graph.region(region).parent != parent {
            self.fail(&format!("{}{:?} has a wrong parent link", context, region));
        }
        let parent_kind = parent.map(|p| graph.kind(p));
        let needs_yield = parent_kind.map_or(false, |k| k.is_affine_for() || k.is_affine_if());
        let is_body = parent.is_none();

        for &block in &graph.region(region).blocks {
            if graph.block(block).parent != region {
                self.fail(&format!("{}{:?} has a wrong parent link", context, block));
            }
            let ops = &graph.block(block).ops;
            for (i, &op) in ops.iter().enumerate() {
                if graph.op(op).parent != Some(block) {
                    self.fail(&format!("{}{:?} has a wrong parent link", context, op));
                }
                let is_last = i + 1 == ops.len();
                let kind = graph.kind(op);
                if kind.traits().is_terminator() && !is_last {
                    self.fail(&format!("{}terminator {} is not last in {:?}", context, kind.name(), block));
                }
                for &succ in &graph.op(op).successors {
                    if graph.block(succ).parent != region {
                        self.fail(&format!("{}branch from {:?} leaves its region", context, block));
                    }
                }
                for &inner in &graph.op(op).regions {
                    self.check_region(graph, inner, Some(op), context);
                }
            }
            let last = ops.last().map(|&op| graph.kind(op));
            if needs_yield && !matches!(last, Some(OpKind::AffineYield)) {
                self.fail(&format!("{}{:?} must end with affine.yield", context, block));
            }
            if is_body
                && !matches!(
                    last,
                    Some(OpKind::Return) | Some(OpKind::Branch) | Some(OpKind::CondBranch)
                )
            {
                self.fail(&format!("{}{:?} must end with a return or branch", context, block));
            }
        }
    }

    fn check_uses(&mut self, graph: &Graph, op: OpId, context: &str) {
        let operation = graph.op(op);
        for (index, &operand) in operation.operands.iter().enumerate() {
            if !graph.contains_value(operand) {
                self.fail(&format!("{}{:?} uses a dangling value", context, op));
                continue;
            }
            let recorded = Use { op, operand: index };
            if !graph.value(operand).uses.contains(&recorded) {
                self.fail(&format!("{}use {} of {:?} is not recorded", context, index, op));
            }
        }
        for (index, &result) in operation.results.iter().enumerate() {
            let value = graph.value(result);
            if value.def != (ValueDef::OpResult { op, index }) {
                self.fail(&format!("{}result {} of {:?} has a wrong definition", context, index, op));
            }
            for u in &value.uses {
                let holds = graph.contains_op(u.op)
                    && graph.op(u.op).operands.get(u.operand) == Some(&result);
                if !holds {
                    self.fail(&format!("{}stale use of result {} of {:?}", context, index, op));
                }
            }
        }
    }

    fn check_memref_access(
        &mut self,
        graph: &Graph,
        op: OpId,
        value_ty: Option<Type>,
        num_indices: usize,
        context: &str,
    ) {
        let name = graph.kind(op).name().to_string();
        let Some(memref) = graph.memref_operand(op) else {
            self.fail(&format!("{}{} without a memref operand", context, name));
            return;
        };
        let Some(info) = graph.value_type(memref).memref_info() else {
            self.fail(&format!("{}{} on a non-memref value", context, name));
            return;
        };
        if num_indices != info.shape.len() {
            self.fail(&format!(
                "{}{} has {} indices for rank {}",
                context,
                name,
                num_indices,
                info.shape.len()
            ));
        }
        if let Some(ty) = value_ty {
            if ty != info.element {
                self.fail(&format!(
                    "{}{} value type {} does not match element type {}",
                    context, name, ty, info.element
                ));
            }
        }
    }

    fn check_op(&mut self, func: &Function, op: OpId, context: &str) {
        let graph = &func.graph;
        let operation = graph.op(op);
        let n = operation.operands.len();
        match &operation.kind {
            OpKind::AffineApply { map } => {
                if map.num_inputs() != n || map.num_results() != 1 {
                    self.fail(&format!("{}affine.apply map {} does not fit {} operands", context, map, n));
                }
            }
            OpKind::AffineLoad { map } => {
                if map.num_inputs() + 1 != n {
                    self.fail(&format!("{}affine.load map {} does not fit its operands", context, map));
                }
                let ty = graph.value_type(graph.result(op));
                self.check_memref_access(graph, op, Some(ty), map.num_results(), context);
            }
            OpKind::AffineStore { map } => {
                if map.num_inputs() + 2 != n {
                    self.fail(&format!("{}affine.store map {} does not fit its operands", context, map));
                }
                let ty = graph.stored_value(op).map(|v| graph.value_type(v));
                self.check_memref_access(graph, op, ty, map.num_results(), context);
            }
            OpKind::Load => {
                let ty = graph.value_type(graph.result(op));
                self.check_memref_access(graph, op, Some(ty), n.saturating_sub(1), context);
            }
            OpKind::Store => {
                let ty = graph.stored_value(op).map(|v| graph.value_type(v));
                self.check_memref_access(graph, op, ty, n.saturating_sub(2), context);
            }
            OpKind::AffineFor { lower, upper, step } => {
                if lower.num_inputs() + upper.num_inputs() != n {
                    self.fail(&format!("{}affine.for bounds do not fit {} operands", context, n));
                }
                if lower.num_results() == 0 || upper.num_results() == 0 {
                    self.fail(&format!("{}affine.for bound without results", context));
                }
                if *step <= 0 {
                    self.fail(&format!("{}affine.for step {} is not positive", context, step));
                }
                let single_block = operation.regions.len() == 1
                    && graph.region(operation.regions[0]).blocks.len() == 1;
                if !single_block {
                    self.fail(&format!("{}affine.for body must be a single block", context));
                } else {
                    let args = &graph.block(graph.for_body(op)).args;
                    if args.len() != 1 || graph.value_type(args[0]) != Type::INDEX {
                        self.fail(&format!("{}affine.for body needs one index argument", context));
                    }
                }
            }
            OpKind::AffineIf { set } => {
                if set.num_inputs() != n {
                    self.fail(&format!("{}affine.if set {} does not fit {} operands", context, set, n));
                }
                let shaped = operation.regions.len() == 2
                    && graph.region(operation.regions[0]).blocks.len() == 1
                    && graph.region(operation.regions[1]).blocks.len() <= 1;
                if !shaped {
                    self.fail(&format!("{}affine.if needs a then block and an optional else block", context));
                }
            }
            OpKind::AffineSelect { set } => {
                if set.num_inputs() + 2 != n {
                    self.fail(&format!("{}affine.select set {} does not fit its operands", context, set));
                } else {
                    let (t, f) = (operation.operands[n - 2], operation.operands[n - 1]);
                    let result = graph.value_type(graph.result(op));
                    if graph.value_type(t) != result || graph.value_type(f) != result {
                        self.fail(&format!("{}affine.select operand types differ", context));
                    }
                }
            }
            OpKind::Select => {
                let ok = n == 3
                    && graph.value_type(operation.operands[0]) == Type::I1
                    && graph.value_type(operation.operands[1]) == graph.value_type(operation.operands[2]);
                if !ok {
                    self.fail(&format!("{}arith.select needs an i1 condition and matching values", context));
                }
            }
            OpKind::Arith(arith) => {
                let ok = n == 2
                    && graph.value_type(operation.operands[0]) == graph.value_type(operation.operands[1]);
                if !ok {
                    self.fail(&format!("{}{} operands type mismatch", context, arith.mnemonic()));
                }
            }
            OpKind::Return => {
                let types: Vec<Type> = operation.operands.iter().map(|&v| graph.value_type(v)).collect();
                if types != func.result_types {
                    self.fail(&format!(
                        "{}Result mismatch. Expected {:?}, got {:?}",
                        context, func.result_types, types
                    ));
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::affine::AffineMap;
    use crate::builder::Builder;
    use hls_core::Literal;

    fn module_of(func: Function) -> Module {
        let mut module = Module::new();
        module.add_function(func);
        module
    }

    #[test]
    fn test_valid_function() {
        let ty = Type::memref(&[4], Type::F32);
        let mut func = Function::new("ok", &[ty], &[Type::F32]);
        let a = func.arguments()[0];
        let entry = func.entry_block();
        let mut b = Builder::at_end(&mut func.graph, entry);
        let c = b.index_constant(1);
        let v = b.affine_load(a, AffineMap::identity(1), vec![c]);
        let lp = b.affine_for_const(0, 4, 1);
        b.set_insertion_point_to_body(lp.body);
        b.affine_store(v, a, AffineMap::identity(1), vec![lp.iv]);
        b.set_insertion_point_to_end(entry);
        b.ret(vec![v]);

        let module = module_of(func);
        let (valid, errors) = Validator::new(&module).validate();
        assert!(valid, "{:?}", errors);
    }

    #[test]
    fn test_missing_terminator_and_bad_types() {
        let ty = Type::memref(&[4], Type::F32);
        let mut func = Function::new("bad", &[ty], &[]);
        let a = func.arguments()[0];
        let entry = func.entry_block();
        let mut b = Builder::at_end(&mut func.graph, entry);
        let c = b.index_constant(0);
        let wrong = b.constant(Literal::I32(7));
        b.affine_store(wrong, a, AffineMap::identity(1), vec![c]);

        let module = module_of(func);
        let (valid, errors) = Validator::new(&module).validate();
        assert!(!valid);
        assert!(errors.iter().any(|e| e.contains("must end with a return")));
    }

    #[test]
    fn test_store_type_and_rank() {
        let ty = Type::memref(&[4, 4], Type::F32);
        let mut func = Function::new("bad", &[ty], &[]);
        let a = func.arguments()[0];
        let entry = func.entry_block();
        let mut b = Builder::at_end(&mut func.graph, entry);
        let c = b.index_constant(0);
        let wrong = b.constant(Literal::I32(7));
        b.affine_store(wrong, a, AffineMap::identity(1), vec![c]);
        b.ret(vec![]);

        let module = module_of(func);
        let (valid, errors) = Validator::new(&module).validate();
        assert!(!valid);
        assert!(errors.iter().any(|e| e.contains("does not match element type")));
        assert!(errors.iter().any(|e| e.contains("1 indices for rank 2")));
    }

    #[test]
    fn test_use_before_def() {
        let mut func = Function::new("order", &[], &[]);
        let entry = func.entry_block();
        let mut b = Builder::at_end(&mut func.graph, entry);
        let x = b.index_constant(1);
        let y = b.index_constant(2);
        let sum = b.arith(crate::ops::ArithOp::AddI, x, y);
        b.ret(vec![]);
        let g = &mut func.graph;
        let (x_op, sum_op) = (g.defining_op(x).unwrap(), g.defining_op(sum).unwrap());
        g.move_op_before(sum_op, x_op);

        let module = module_of(func);
        let (valid, errors) = Validator::new(&module).validate();
        assert!(!valid);
        assert!(errors.iter().any(|e| e.contains("does not dominate")));
    }
}
