//! MLIR-flavoured textual form.
//!
//! Function arguments and block arguments print as `%argN`, operation
//! results as `%N`, non-entry blocks as `^bbN`, all numbered in print order.
//! `affine.yield` without operands is implied and not printed.

use crate::affine::AffineMap;
use crate::graph::{BlockId, Graph, OpId, RegionId, ValueId};
use crate::module::{Function, Module};
use crate::ops::OpKind;
use std::collections::HashMap;
use std::fmt::Write;

struct Printer<'g> {
    graph: &'g Graph,
    values: HashMap<ValueId, String>,
    blocks: HashMap<BlockId, String>,
    next_value: usize,
    next_arg: usize,
    next_block: usize,
    out: String,
    indent: usize,
}

impl<'g> Printer<'g> {
    fn new(graph: &'g Graph) -> Self {
        Self {
            graph,
            values: HashMap::new(),
            blocks: HashMap::new(),
            next_value: 0,
            next_arg: 0,
            next_block: 0,
            out: String::new(),
            indent: 0,
        }
    }

    fn name(&self, value: ValueId) -> String {
        self.values
            .get(&value)
            .cloned()
            .unwrap_or_else(|| format!("%<{:?}>", value))
    }

    fn names(&self, values: &[ValueId]) -> Vec<String> {
        values.iter().map(|&v| self.name(v)).collect()
    }

    fn list(&self, values: &[ValueId]) -> String {
        self.names(values).join(", ")
    }

    fn name_arg(&mut self, value: ValueId) -> String {
        let name = format!("%arg{}", self.next_arg);
        self.next_arg += 1;
        self.values.insert(value, name.clone());
        name
    }

    fn name_results(&mut self, op: OpId) -> Option<String> {
        let graph = self.graph;
        let results = &graph.op(op).results;
        if results.is_empty() {
            return None;
        }
        let mut names = Vec::with_capacity(results.len());
        for &r in results {
            let name = format!("%{}", self.next_value);
            self.next_value += 1;
            self.values.insert(r, name.clone());
            names.push(name);
        }
        Some(names.join(", "))
    }

    fn line(&mut self, text: &str) {
        for _ in 0..self.indent {
            self.out.push_str("  ");
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn print_function(&mut self, func: &Function) {
        let args: Vec<String> = func
            .arguments()
            .iter()
            .map(|&a| format!("{}: {}", self.name_arg(a), func.graph.value_type(a)))
            .collect();
        let mut header = format!("func @{}({})", func.name, args.join(", "));
        if !func.result_types.is_empty() {
            let results: Vec<String> = func.result_types.iter().map(|t| t.to_string()).collect();
            let _ = write!(header, " -> ({})", results.join(", "));
        }
        header.push_str(" {");
        self.line(&header);
        self.print_region_body(func.body, true);
        self.line("}");
    }

    /// Prints the blocks of a region. The entry block's arguments are named
    /// by the caller.
    fn print_region_body(&mut self, region: RegionId, entry_named: bool) {
        let graph = self.graph;
        let blocks = &graph.region(region).blocks;
        for &block in blocks.iter().skip(1) {
            let label = format!("^bb{}", self.next_block);
            self.next_block += 1;
            self.blocks.insert(block, label);
        }
        for (i, &block) in blocks.iter().enumerate() {
            if i > 0 || !entry_named {
                let args: Vec<String> = graph
                    .block(block)
                    .args
                    .iter()
                    .map(|&a| format!("{}: {}", self.name_arg(a), graph.value_type(a)))
                    .collect();
                if i > 0 {
                    let label = self.blocks[&block].clone();
                    if args.is_empty() {
                        self.line(&format!("{}:", label));
                    } else {
                        self.line(&format!("{}({}):", label, args.join(", ")));
                    }
                }
            }
            self.indent += 1;
            for &op in &graph.block(block).ops {
                self.print_op(op);
            }
            self.indent -= 1;
        }
    }

    fn bound(&self, map: &AffineMap, operands: &[ValueId], combine: &str) -> String {
        let rendered = map.render(&self.names(operands));
        if map.num_results() > 1 {
            format!("{}({})", combine, rendered)
        } else {
            rendered
        }
    }

    fn print_op(&mut self, op: OpId) {
        let graph = self.graph;
        let operation = graph.op(op);
        let operands = &operation.operands;
        let ty_of = |v: ValueId| graph.value_type(v);

        let body = match &operation.kind {
            OpKind::AffineYield if operands.is_empty() => return,
            OpKind::AffineFor { lower, upper, step } => {
                let lb = self.bound(lower, graph.for_lower_operands(op), "max");
                let ub = self.bound(upper, graph.for_upper_operands(op), "min");
                let iv = self.name_arg(graph.induction_var(op));
                let mut head = format!("affine.for {} = {} to {}", iv, lb, ub);
                if *step != 1 {
                    let _ = write!(head, " step {}", step);
                }
                head.push_str(" {");
                self.line(&head);
                self.print_region_body(operation.regions[0], true);
                self.line("}");
                return;
            }
            OpKind::AffineIf { set } => {
                self.line(&format!("affine.if {} {{", set.render(&self.names(operands))));
                self.print_region_body(operation.regions[0], false);
                if let Some(&else_region) = operation.regions.get(1) {
                    if !graph.region(else_region).blocks.is_empty() {
                        self.line("} else {");
                        self.print_region_body(else_region, false);
                    }
                }
                self.line("}");
                return;
            }
            OpKind::Generic { name, .. } if !operation.regions.is_empty() => {
                let results = self.name_results(op);
                let prefix = results.map(|r| format!("{} = ", r)).unwrap_or_default();
                self.line(&format!("{}\"{}\"({}) ({{", prefix, name, self.list(operands)));
                for (i, &region) in operation.regions.iter().enumerate() {
                    if i > 0 {
                        self.line("}, {");
                    }
                    self.print_region_body(region, false);
                }
                self.line("})");
                return;
            }
            OpKind::Constant(lit) => format!("arith.constant {} : {}", lit, lit.get_type()),
            OpKind::Arith(arith) => format!(
                "{} {} : {}",
                arith.mnemonic(),
                self.list(operands),
                ty_of(operands[0])
            ),
            OpKind::Cmp(pred) => format!(
                "arith.cmp {}, {} : {}",
                pred.name(),
                self.list(operands),
                ty_of(operands[0])
            ),
            OpKind::Select => format!("arith.select {} : {}", self.list(operands), ty_of(operands[1])),
            OpKind::AffineApply { map } => format!("affine.apply ({})", map.render(&self.names(operands))),
            OpKind::AffineLoad { map } => format!(
                "affine.load {}[{}] : {}",
                self.name(operands[0]),
                map.render(&self.names(&operands[1..])),
                ty_of(operands[0])
            ),
            OpKind::AffineStore { map } => format!(
                "affine.store {}, {}[{}] : {}",
                self.name(operands[0]),
                self.name(operands[1]),
                map.render(&self.names(&operands[2..])),
                ty_of(operands[1])
            ),
            OpKind::AffineSelect { set } => {
                let n = set.num_inputs();
                format!(
                    "affine.select {} ? {} : {}",
                    set.render(&self.names(&operands[..n])),
                    self.name(operands[n]),
                    self.name(operands[n + 1])
                )
            }
            OpKind::AffineYield => format!("affine.yield {}", self.list(operands)),
            OpKind::Alloc => format!("memref.alloc() : {}", ty_of(operation.results[0])),
            OpKind::Dealloc => format!("memref.dealloc {} : {}", self.name(operands[0]), ty_of(operands[0])),
            OpKind::Load => format!(
                "memref.load {}[{}] : {}",
                self.name(operands[0]),
                self.list(&operands[1..]),
                ty_of(operands[0])
            ),
            OpKind::Store => format!(
                "memref.store {}, {}[{}] : {}",
                self.name(operands[0]),
                self.name(operands[1]),
                self.list(&operands[2..]),
                ty_of(operands[1])
            ),
            OpKind::Call { callee } => format!("call @{}({})", callee, self.list(operands)),
            OpKind::Generic { name, .. } => format!("\"{}\"({})", name, self.list(operands)),
            OpKind::Branch => format!("cf.br {}", self.blocks[&operation.successors[0]]),
            OpKind::CondBranch => format!(
                "cf.cond_br {}, {}, {}",
                self.name(operands[0]),
                self.blocks[&operation.successors[0]],
                self.blocks[&operation.successors[1]]
            ),
            OpKind::Return if operands.is_empty() => "return".to_string(),
            OpKind::Return => {
                let types: Vec<String> = operands.iter().map(|&v| ty_of(v).to_string()).collect();
                format!("return {} : {}", self.list(operands), types.join(", "))
            }
        };
        let text = match self.name_results(op) {
            Some(results) => format!("{} = {}", results, body),
            None => body,
        };
        self.line(&text);
    }
}

pub fn print_function(func: &Function) -> String {
    let mut printer = Printer::new(&func.graph);
    printer.print_function(func);
    printer.out
}

pub fn print_module(module: &Module) -> String {
    module
        .functions
        .iter()
        .map(print_function)
        .collect::<Vec<_>>()
        .join("\n")
}
