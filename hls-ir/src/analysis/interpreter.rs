use crate::error::{InterpError, InterpResult};
use crate::graph::{BlockId, Graph, OpId, RegionId, ValueId};
use crate::module::Function;
use crate::ops::{ArithOp, CmpPredicate, OpKind};
use hls_core::{Literal, MemRefType, Type};
use std::collections::HashMap;

/// Default bound on executed operations per run
pub const DEFAULT_STEP_LIMIT: u64 = 1_000_000;

/// Runtime value: a scalar or a handle to an interpreter-owned buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtValue {
    Scalar(Literal),
    Buffer(usize),
}

#[derive(Debug, Clone)]
struct Buffer {
    ty: MemRefType,
    data: Vec<Literal>,
    freed: bool,
}

enum Flow {
    /// Fell off the block or reached `affine.yield`
    Done,
    Branch(BlockId),
    Return(Vec<RtValue>),
}

/// Reference interpreter for a single function
pub struct Interpreter<'f> {
    func: &'f Function,
    buffers: Vec<Buffer>,
    env: HashMap<ValueId, RtValue>,
    exec_counts: HashMap<OpId, u64>,
    steps: u64,
    step_limit: u64,
}

impl<'f> Interpreter<'f> {
    pub fn new(func: &'f Function) -> Self {
        Self {
            func,
            buffers: Vec::new(),
            env: HashMap::new(),
            exec_counts: HashMap::new(),
            steps: 0,
            step_limit: DEFAULT_STEP_LIMIT,
        }
    }

    pub fn with_step_limit(mut self, limit: u64) -> Self {
        self.step_limit = limit;
        self
    }

    fn graph(&self) -> &'f Graph {
        &self.func.graph
    }

    /// Creates a buffer of memref type `ty`, zero-filled unless `init` is
    /// given.
    pub fn alloc_buffer(&mut self, ty: Type, init: Option<Vec<Literal>>) -> InterpResult<RtValue> {
        let info = ty
            .memref_info()
            .ok_or_else(|| InterpError::TypeMismatch(format!("{} is not a memref", ty)))?;
        let zero = Literal::zero(info.element)
            .ok_or_else(|| InterpError::TypeMismatch(format!("element type {}", info.element)))?;
        let data = match init {
            Some(data) if data.len() == info.num_elements() => data,
            Some(data) => {
                return Err(InterpError::TypeMismatch(format!(
                    "{} initial values for {}",
                    data.len(),
                    ty
                )))
            }
            None => vec![zero; info.num_elements()],
        };
        self.buffers.push(Buffer {
            ty: info,
            data,
            freed: false,
        });
        Ok(RtValue::Buffer(self.buffers.len() - 1))
    }

    /// Contents of a buffer, including freed ones.
    pub fn buffer(&self, handle: RtValue) -> Option<&[Literal]> {
        match handle {
            RtValue::Buffer(id) => self.buffers.get(id).map(|b| b.data.as_slice()),
            RtValue::Scalar(_) => None,
        }
    }

    /// How many times `op` executed over all runs so far.
    pub fn exec_count(&self, op: OpId) -> u64 {
        self.exec_counts.get(&op).copied().unwrap_or(0)
    }

    pub fn run(&mut self, args: &[RtValue]) -> InterpResult<Vec<RtValue>> {
        let func = self.func;
        let params = func.arguments();
        if params.len() != args.len() {
            return Err(InterpError::ArgumentCount {
                expected: params.len(),
                found: args.len(),
            });
        }
        for (&param, &arg) in params.iter().zip(args) {
            self.env.insert(param, arg);
        }
        match self.run_region(func.body)? {
            Flow::Return(values) => Ok(values),
            _ => Ok(Vec::new()),
        }
    }

    fn run_region(&mut self, region: RegionId) -> InterpResult<Flow> {
        let Some(mut block) = self.graph().entry_block(region) else {
            return Ok(Flow::Done);
        };
        loop {
            match self.run_block(block)? {
                Flow::Branch(next) => block = next,
                other => return Ok(other),
            }
        }
    }

    fn run_block(&mut self, block: BlockId) -> InterpResult<Flow> {
        let graph = self.graph();
        for &op in &graph.block(block).ops {
            self.steps += 1;
            if self.steps > self.step_limit {
                return Err(InterpError::StepLimitExceeded(self.step_limit));
            }
            *self.exec_counts.entry(op).or_insert(0) += 1;
            match self.exec_op(op)? {
                Flow::Done => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Done)
    }

    fn get(&self, value: ValueId) -> InterpResult<RtValue> {
        self.env
            .get(&value)
            .copied()
            .ok_or_else(|| InterpError::TypeMismatch(format!("unbound value {:?}", value)))
    }

    fn scalar(&self, value: ValueId) -> InterpResult<Literal> {
        match self.get(value)? {
            RtValue::Scalar(lit) => Ok(lit),
            RtValue::Buffer(_) => Err(InterpError::TypeMismatch(format!("{:?} is a buffer", value))),
        }
    }

    fn int(&self, value: ValueId) -> InterpResult<i64> {
        self.scalar(value)?
            .as_i64()
            .ok_or_else(|| InterpError::TypeMismatch(format!("{:?} is not an integer", value)))
    }

    fn ints(&self, values: &[ValueId]) -> InterpResult<Vec<i64>> {
        values.iter().map(|&v| self.int(v)).collect()
    }

    fn buffer_id(&self, value: ValueId) -> InterpResult<usize> {
        match self.get(value)? {
            RtValue::Buffer(id) if self.buffers.get(id).map_or(false, |b| !b.freed) => Ok(id),
            RtValue::Buffer(id) => Err(InterpError::UseOfFreedBuffer(id)),
            RtValue::Scalar(_) => Err(InterpError::TypeMismatch(format!("{:?} is not a buffer", value))),
        }
    }

    fn element_slot(&self, memref: ValueId, indices: &[i64]) -> InterpResult<(usize, usize)> {
        let id = self.buffer_id(memref)?;
        let offset = self.buffers[id]
            .ty
            .linearize(indices)
            .ok_or_else(|| InterpError::OutOfBounds {
                buffer: id,
                indices: indices.to_vec(),
            })?;
        Ok((id, offset))
    }

    fn set_result(&mut self, op: OpId, value: RtValue) {
        let result = self.graph().result(op);
        self.env.insert(result, value);
    }

    fn exec_op(&mut self, op: OpId) -> InterpResult<Flow> {
        let graph = self.graph();
        let operation = graph.op(op);
        let operands = &operation.operands;
        match &operation.kind {
            OpKind::Constant(lit) => self.set_result(op, RtValue::Scalar(*lit)),
            OpKind::Arith(arith) => {
                let (l, r) = (self.scalar(operands[0])?, self.scalar(operands[1])?);
                let out = eval_arith(*arith, l, r)
                    .ok_or_else(|| InterpError::TypeMismatch(arith.mnemonic().to_string()))?;
                self.set_result(op, RtValue::Scalar(out));
            }
            OpKind::Cmp(pred) => {
                let (l, r) = (self.scalar(operands[0])?, self.scalar(operands[1])?);
                let out = eval_cmp(*pred, l, r)
                    .ok_or_else(|| InterpError::TypeMismatch(format!("cmp {}", pred.name())))?;
                self.set_result(op, RtValue::Scalar(Literal::Bool(out)));
            }
            OpKind::Select => {
                let cond = self.scalar(operands[0])?.get_bool();
                let chosen = self.get(operands[if cond { 1 } else { 2 }])?;
                self.set_result(op, chosen);
            }
            OpKind::AffineApply { map } => {
                let inputs = self.ints(operands)?;
                let out = map
                    .eval(&inputs)
                    .and_then(|r| r.first().copied())
                    .ok_or(InterpError::InvalidAffineEval(op))?;
                self.set_result(op, RtValue::Scalar(Literal::Index(out)));
            }
            OpKind::AffineLoad { map } => {
                let indices = map
                    .eval(&self.ints(&operands[1..])?)
                    .ok_or(InterpError::InvalidAffineEval(op))?;
                let (id, offset) = self.element_slot(operands[0], &indices)?;
                let value = self.buffers[id].data[offset];
                self.set_result(op, RtValue::Scalar(value));
            }
            OpKind::AffineStore { map } => {
                let value = self.scalar(operands[0])?;
                let indices = map
                    .eval(&self.ints(&operands[2..])?)
                    .ok_or(InterpError::InvalidAffineEval(op))?;
                let (id, offset) = self.element_slot(operands[1], &indices)?;
                self.buffers[id].data[offset] = value;
            }
            OpKind::AffineFor { lower, upper, step } => {
                if *step <= 0 {
                    return Err(InterpError::NonPositiveStep(op));
                }
                let lbs = lower
                    .eval(&self.ints(graph.for_lower_operands(op))?)
                    .ok_or(InterpError::InvalidAffineEval(op))?;
                let ubs = upper
                    .eval(&self.ints(graph.for_upper_operands(op))?)
                    .ok_or(InterpError::InvalidAffineEval(op))?;
                let (Some(lb), Some(ub)) = (lbs.into_iter().max(), ubs.into_iter().min()) else {
                    return Err(InterpError::InvalidAffineEval(op));
                };
                let iv = graph.induction_var(op);
                let mut i = lb;
                while i < ub {
                    self.env.insert(iv, RtValue::Scalar(Literal::Index(i)));
                    if let Flow::Return(values) = self.run_region(operation.regions[0])? {
                        return Ok(Flow::Return(values));
                    }
                    i = match i.checked_add(*step) {
                        Some(next) => next,
                        None => break,
                    };
                }
            }
            OpKind::AffineIf { set } => {
                let taken = set
                    .contains(&self.ints(operands)?)
                    .ok_or(InterpError::InvalidAffineEval(op))?;
                let region = if taken {
                    Some(operation.regions[0])
                } else {
                    operation.regions.get(1).copied()
                };
                if let Some(region) = region {
                    if let Flow::Return(values) = self.run_region(region)? {
                        return Ok(Flow::Return(values));
                    }
                }
            }
            OpKind::AffineSelect { set } => {
                let n = set.num_inputs();
                let taken = set
                    .contains(&self.ints(&operands[..n])?)
                    .ok_or(InterpError::InvalidAffineEval(op))?;
                let chosen = self.get(operands[if taken { n } else { n + 1 }])?;
                self.set_result(op, chosen);
            }
            OpKind::AffineYield => return Ok(Flow::Done),
            OpKind::Alloc => {
                let ty = graph.value_type(graph.result(op));
                let handle = self.alloc_buffer(ty, None)?;
                self.set_result(op, handle);
            }
            OpKind::Dealloc => {
                let id = self.buffer_id(operands[0])?;
                self.buffers[id].freed = true;
            }
            OpKind::Load => {
                let indices = self.ints(&operands[1..])?;
                let (id, offset) = self.element_slot(operands[0], &indices)?;
                let value = self.buffers[id].data[offset];
                self.set_result(op, RtValue::Scalar(value));
            }
            OpKind::Store => {
                let value = self.scalar(operands[0])?;
                let indices = self.ints(&operands[2..])?;
                let (id, offset) = self.element_slot(operands[1], &indices)?;
                self.buffers[id].data[offset] = value;
            }
            OpKind::Call { .. } | OpKind::Generic { .. } => {
                return Err(InterpError::UnsupportedOp(operation.kind.name().to_string()))
            }
            OpKind::Branch => return Ok(Flow::Branch(operation.successors[0])),
            OpKind::CondBranch => {
                let cond = self.scalar(operands[0])?.get_bool();
                let target = operation.successors[if cond { 0 } else { 1 }];
                return Ok(Flow::Branch(target));
            }
            OpKind::Return => {
                let values = operands
                    .iter()
                    .map(|&v| self.get(v))
                    .collect::<InterpResult<Vec<_>>>()?;
                return Ok(Flow::Return(values));
            }
        }
        Ok(Flow::Done)
    }
}

fn eval_arith(op: ArithOp, l: Literal, r: Literal) -> Option<Literal> {
    match (op, l, r) {
        (ArithOp::AddI, Literal::I32(l), Literal::I32(r)) => Some(Literal::I32(l.wrapping_add(r))),
        (ArithOp::SubI, Literal::I32(l), Literal::I32(r)) => Some(Literal::I32(l.wrapping_sub(r))),
        (ArithOp::MulI, Literal::I32(l), Literal::I32(r)) => Some(Literal::I32(l.wrapping_mul(r))),
        (ArithOp::AddI, Literal::I64(l), Literal::I64(r)) => Some(Literal::I64(l.wrapping_add(r))),
        (ArithOp::SubI, Literal::I64(l), Literal::I64(r)) => Some(Literal::I64(l.wrapping_sub(r))),
        (ArithOp::MulI, Literal::I64(l), Literal::I64(r)) => Some(Literal::I64(l.wrapping_mul(r))),
        (ArithOp::AddI, Literal::Index(l), Literal::Index(r)) => {
            Some(Literal::Index(l.wrapping_add(r)))
        }
        (ArithOp::SubI, Literal::Index(l), Literal::Index(r)) => {
            Some(Literal::Index(l.wrapping_sub(r)))
        }
        (ArithOp::MulI, Literal::Index(l), Literal::Index(r)) => {
            Some(Literal::Index(l.wrapping_mul(r)))
        }
        (ArithOp::AddF, Literal::F32(l), Literal::F32(r)) => Some(Literal::F32(l + r)),
        (ArithOp::SubF, Literal::F32(l), Literal::F32(r)) => Some(Literal::F32(l - r)),
        (ArithOp::MulF, Literal::F32(l), Literal::F32(r)) => Some(Literal::F32(l * r)),
        (ArithOp::AddF, Literal::F64(l), Literal::F64(r)) => Some(Literal::F64(l + r)),
        (ArithOp::SubF, Literal::F64(l), Literal::F64(r)) => Some(Literal::F64(l - r)),
        (ArithOp::MulF, Literal::F64(l), Literal::F64(r)) => Some(Literal::F64(l * r)),
        _ => None,
    }
}

fn eval_cmp(pred: CmpPredicate, l: Literal, r: Literal) -> Option<bool> {
    let ord = match (l, r) {
        (Literal::F32(l), Literal::F32(r)) => l.partial_cmp(&r),
        (Literal::F64(l), Literal::F64(r)) => l.partial_cmp(&r),
        _ if l.get_type() == r.get_type() => Some(l.as_i64()?.cmp(&r.as_i64()?)),
        _ => return None,
    };
    // Unordered float comparisons are false except `ne`.
    let Some(ord) = ord else {
        return Some(pred == CmpPredicate::Ne);
    };
    Some(match pred {
        CmpPredicate::Eq => ord.is_eq(),
        CmpPredicate::Ne => ord.is_ne(),
        CmpPredicate::Lt => ord.is_lt(),
        CmpPredicate::Le => ord.is_le(),
        CmpPredicate::Gt => ord.is_gt(),
        CmpPredicate::Ge => ord.is_ge(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::affine::{AffineExpr, AffineMap, IntegerSet};
    use crate::builder::Builder;

    #[test]
    fn test_eval_arith() {
        assert_eq!(
            eval_arith(ArithOp::AddI, Literal::I32(i32::MAX), Literal::I32(1)),
            Some(Literal::I32(i32::MIN))
        );
        assert_eq!(
            eval_arith(ArithOp::MulF, Literal::F32(1.5), Literal::F32(2.0)),
            Some(Literal::F32(3.0))
        );
        assert_eq!(eval_arith(ArithOp::AddI, Literal::I32(1), Literal::I64(1)), None);
        assert_eq!(eval_cmp(CmpPredicate::Lt, Literal::Index(1), Literal::Index(2)), Some(true));
        assert_eq!(eval_cmp(CmpPredicate::Ne, Literal::F64(f64::NAN), Literal::F64(0.0)), Some(true));
    }

    #[test]
    fn test_loop_fills_buffer() {
        // for i in 0..4 { a[i] = i * 2 }
        let ty = Type::memref(&[4], Type::INDEX);
        let mut func = Function::new("fill", &[ty], &[]);
        let a = func.arguments()[0];
        let entry = func.entry_block();
        let mut b = Builder::at_end(&mut func.graph, entry);
        let lp = b.affine_for_const(0, 4, 1);
        b.set_insertion_point_to_body(lp.body);
        let doubled = b.affine_apply(AffineMap::new(1, 0, vec![AffineExpr::dim(0) * 2]), vec![lp.iv]);
        let st = b.affine_store(doubled, a, AffineMap::identity(1), vec![lp.iv]);
        b.set_insertion_point_to_end(entry);
        b.ret(vec![]);

        let mut interp = Interpreter::new(&func);
        let buf = interp.alloc_buffer(ty, None).unwrap();
        interp.run(&[buf]).unwrap();
        let expected: Vec<Literal> = (0..4).map(|i| Literal::Index(i * 2)).collect();
        assert_eq!(interp.buffer(buf).unwrap(), expected.as_slice());
        assert_eq!(interp.exec_count(st), 4);
        assert_eq!(interp.exec_count(lp.op), 1);
    }

    #[test]
    fn test_if_and_select() {
        let mut func = Function::new("pick", &[Type::INDEX], &[Type::I32]);
        let i = func.arguments()[0];
        let entry = func.entry_block();
        let mut b = Builder::at_end(&mut func.graph, entry);
        let set = IntegerSet::new(1, 0, vec![AffineExpr::dim(0) - 2], vec![true]);
        let yes = b.constant(Literal::I32(10));
        let no = b.constant(Literal::I32(20));
        let picked = b.affine_select(set.clone(), vec![i], yes, no);
        let guard = b.affine_if(set, vec![i], false);
        b.set_insertion_point_to_body(guard.then_block);
        let marker = b.index_constant(0);
        b.set_insertion_point_to_end(entry);
        b.ret(vec![picked]);
        let marker = func.graph.defining_op(marker).unwrap();

        let mut interp = Interpreter::new(&func);
        let out = interp.run(&[RtValue::Scalar(Literal::Index(2))]).unwrap();
        assert_eq!(out, vec![RtValue::Scalar(Literal::I32(10))]);
        let out = interp.run(&[RtValue::Scalar(Literal::Index(3))]).unwrap();
        assert_eq!(out, vec![RtValue::Scalar(Literal::I32(20))]);
        assert_eq!(interp.exec_count(marker), 1);
    }

    #[test]
    fn test_errors() {
        let ty = Type::memref(&[2], Type::F32);
        let mut func = Function::new("oob", &[ty], &[]);
        let a = func.arguments()[0];
        let entry = func.entry_block();
        let mut b = Builder::at_end(&mut func.graph, entry);
        b.affine_load(a, AffineMap::constant(5), vec![]);
        b.call("external", vec![], &[]);

        let mut interp = Interpreter::new(&func);
        assert_eq!(
            interp.run(&[]),
            Err(InterpError::ArgumentCount {
                expected: 1,
                found: 0
            })
        );
        let buf = interp.alloc_buffer(ty, None).unwrap();
        assert_eq!(
            interp.run(&[buf]),
            Err(InterpError::OutOfBounds {
                buffer: 0,
                indices: vec![5]
            })
        );
        assert!(interp.alloc_buffer(Type::F32, None).is_err());
    }

    #[test]
    fn test_step_limit() {
        let mut func = Function::new("spin", &[], &[]);
        let entry = func.entry_block();
        let mut b = Builder::at_end(&mut func.graph, entry);
        let lp = b.affine_for_const(0, 1000, 1);
        b.set_insertion_point_to_body(lp.body);
        b.index_constant(1);
        let mut interp = Interpreter::new(&func).with_step_limit(100);
        assert_eq!(interp.run(&[]), Err(InterpError::StepLimitExceeded(100)));
    }

    #[test]
    fn test_branches() {
        // entry: cond_br %c, ^t, ^f ; ^t: return 1 ; ^f: return 2
        let mut func = Function::new("br", &[Type::I1], &[Type::I32]);
        let c = func.arguments()[0];
        let body = func.body;
        let entry = func.entry_block();
        let mut b = Builder::at_end(&mut func.graph, entry);
        let t = b.create_block(body, &[]);
        let f = b.create_block(body, &[]);
        b.cond_branch(c, t, f);
        b.set_insertion_point_to_end(t);
        let one = b.constant(Literal::I32(1));
        b.ret(vec![one]);
        b.set_insertion_point_to_end(f);
        let two = b.constant(Literal::I32(2));
        b.ret(vec![two]);

        let mut interp = Interpreter::new(&func);
        let out = interp.run(&[RtValue::Scalar(Literal::Bool(false))]).unwrap();
        assert_eq!(out, vec![RtValue::Scalar(Literal::I32(2))]);
    }
}
