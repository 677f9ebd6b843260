//! Bytecode compiler - lowers the AST into function prototypes

use std::sync::Arc;

use crate::ast::{
    BinOp, Block, Expr, ExprKind, FunctionBody, Stmt, StmtKind, TableField, UnaryOp,
};
use crate::lexer::{LineIndex, Location, Span};

use super::chunk::Chunk;
use super::error::{CompileError, CompileErrorKind};
use super::instruction::Constant;
use super::opcode::OpCode;
use super::source::{SourceCode, SourceRef};
use super::value::{FunctionProto, UpvalueDesc};

/// A local variable in scope
#[derive(Debug, Clone)]
struct Local {
    name: String,

    /// Frame slot; every declaration gets a fresh one
    slot: u16,

    /// Scope depth of the declaration
    depth: u32,
}

/// Loop information for `break`
#[derive(Debug, Default)]
struct LoopInfo {
    /// Offsets of break jumps to patch
    break_jumps: Vec<usize>,
}

/// Compiler state for a single function
struct FunctionState {
    /// The prototype being built
    proto: FunctionProto,

    /// Locals currently in scope
    locals: Vec<Local>,

    /// Captured variable names, parallel to `proto.upvalues`
    upvalue_names: Vec<String>,

    scope_depth: u32,

    /// Active loops, innermost last
    loops: Vec<LoopInfo>,

    /// Enclosing function state (for nested functions)
    enclosing: Option<Box<FunctionState>>,
}

impl FunctionState {
    fn new(name: String, source_name: &str) -> Self {
        Self {
            proto: FunctionProto::new(name, source_name),
            locals: Vec::new(),
            upvalue_names: Vec::new(),
            scope_depth: 0,
            loops: Vec::new(),
            enclosing: None,
        }
    }

    fn chunk_mut(&mut self) -> &mut Chunk {
        &mut self.proto.chunk
    }

    fn resolve_local(&self, name: &str) -> Option<u16> {
        self.locals
            .iter()
            .rev()
            .find(|local| local.name == name)
            .map(|local| local.slot)
    }

    fn add_upvalue(&mut self, name: &str, desc: UpvalueDesc) -> Option<u16> {
        if let Some(i) = self.proto.upvalues.iter().position(|u| *u == desc) {
            return u16::try_from(i).ok();
        }
        let index = u16::try_from(self.proto.upvalues.len()).ok()?;
        self.proto.upvalues.push(desc);
        self.upvalue_names.push(name.to_string());
        Some(index)
    }

    /// Resolve `name` as a capture, walking outwards through enclosing functions
    fn resolve_upvalue(&mut self, name: &str) -> Option<u16> {
        if let Some(i) = self.upvalue_names.iter().position(|n| n == name) {
            return u16::try_from(i).ok();
        }
        let enclosing = self.enclosing.as_deref_mut()?;
        if let Some(slot) = enclosing.resolve_local(name) {
            return self.add_upvalue(name, UpvalueDesc::Local(slot));
        }
        let index = enclosing.resolve_upvalue(name)?;
        self.add_upvalue(name, UpvalueDesc::Upvalue(index))
    }
}

/// Output of a successful compilation
#[derive(Debug)]
pub struct CompiledChunk {
    /// The main function of the chunk
    pub proto: Arc<FunctionProto>,
    /// Every source ref created, for the owning [`SourceCode`]
    pub refs: Vec<Arc<SourceRef>>,
}

/// Bytecode compiler
pub struct Compiler {
    /// Current function state
    current: FunctionState,

    /// Collected errors
    errors: Vec<CompileError>,

    source_id: usize,
    source_name: String,
    line_index: LineIndex,
    line_lengths: Vec<u32>,

    /// Refs created so far
    refs: Vec<Arc<SourceRef>>,

    /// Ref attached to emitted instructions
    current_ref: Option<Arc<SourceRef>>,

    /// Emit a `Debug` hook point before each statement
    emit_debug: bool,
}

impl Compiler {
    /// Create a compiler for the given source
    #[must_use]
    pub fn new(source: &SourceCode) -> Self {
        Self {
            current: FunctionState::new("main chunk".to_string(), &source.name),
            errors: Vec::new(),
            source_id: source.id,
            source_name: source.name.clone(),
            line_index: LineIndex::new(&source.code),
            line_lengths: source.code.lines().map(|l| l.len() as u32).collect(),
            refs: Vec::new(),
            current_ref: None,
            emit_debug: true,
        }
    }

    /// Enable or disable `Debug` hook points
    #[must_use]
    pub fn with_debug_instructions(mut self, enabled: bool) -> Self {
        self.emit_debug = enabled;
        self
    }

    /// Compile a chunk; the result is a vararg function with no parameters
    pub fn compile_chunk(mut self, block: &Block) -> Result<CompiledChunk, Vec<CompileError>> {
        self.current.proto.is_vararg = true;
        self.block(block);
        self.emit_implicit_return(block.end_span);
        self.finish()
    }

    /// Compile a single expression as `return <expr>`
    pub fn compile_expression(mut self, expr: &Expr) -> Result<CompiledChunk, Vec<CompileError>> {
        let r = self.locate(expr.span, false);
        self.current_ref = Some(self.register_ref(r));
        self.expression(expr);
        self.emit(OpCode::Ret, 1);
        self.finish()
    }

    fn finish(self) -> Result<CompiledChunk, Vec<CompileError>> {
        if self.errors.is_empty() {
            Ok(CompiledChunk {
                proto: Arc::new(self.current.proto),
                refs: self.refs,
            })
        } else {
            Err(self.errors)
        }
    }

    // ===== Statement Compilation =====

    fn block(&mut self, block: &Block) {
        self.begin_scope();
        for stmt in &block.stmts {
            self.statement(stmt);
        }
        self.end_scope();
    }

    fn statement(&mut self, stmt: &Stmt) {
        let r = self.locate(stmt.span, true);
        let r = self.register_ref(r);
        let saved_ref = self.current_ref.replace(r);
        let start = self.next_index();
        if self.emit_debug {
            self.emit(OpCode::Debug, 0);
        }

        match &stmt.kind {
            StmtKind::Local { names, values } => self.local_statement(names, values, stmt.span),
            StmtKind::LocalFunction { name, body } => {
                let slot = self.declare_local(name, stmt.span);
                let nil = self.constant(Constant::Nil);
                self.emit(OpCode::Literal, nil);
                self.emit(OpCode::InitLcl, i32::from(slot));
                self.function(body);
                self.emit(OpCode::StoreLcl, i32::from(slot));
            }
            StmtKind::Function { path, method, body } => {
                self.function_statement(path, method.as_deref(), body);
            }
            StmtKind::Assign { targets, values } => {
                self.adjust(values, targets.len());
                for target in targets.iter().rev() {
                    self.store(target);
                }
            }
            StmtKind::Call(expr) => {
                self.expression(expr);
                self.emit(OpCode::Pop, 1);
            }
            StmtKind::Do(body) => self.block(body),
            StmtKind::While { condition, body } => self.while_loop(start, condition, body),
            StmtKind::Repeat { body, condition } => self.repeat_loop(body, condition),
            StmtKind::If {
                branches,
                else_block,
            } => self.if_statement(branches, else_block.as_ref()),
            StmtKind::NumericFor {
                var,
                start: first,
                limit,
                step,
                body,
            } => self.numeric_for(var, first, limit, step.as_ref(), body, stmt.span),
            StmtKind::GenericFor { names, exprs, body } => {
                self.generic_for(names, exprs, body, stmt.span);
            }
            StmtKind::Return(values) => self.return_statement(values),
            StmtKind::Break => {
                let jump = self.emit(OpCode::Jump, -1);
                match self.current.loops.last_mut() {
                    Some(info) => info.break_jumps.push(jump),
                    None => self.error(CompileErrorKind::BreakOutsideLoop, stmt.span),
                }
            }
        }

        self.current_ref = saved_ref;
    }

    fn local_statement(&mut self, names: &[String], values: &[Expr], span: Span) {
        self.adjust(values, names.len());
        // Names become visible only after the initializers are evaluated
        let slots: Vec<u16> = names
            .iter()
            .map(|name| self.declare_local(name, span))
            .collect();
        for slot in slots.into_iter().rev() {
            self.emit(OpCode::InitLcl, i32::from(slot));
        }
    }

    fn function_statement(&mut self, path: &[String], method: Option<&str>, body: &FunctionBody) {
        self.function(body);

        let (last, prefix) = match method {
            Some(m) => (m, path),
            None => match path.split_last() {
                Some((last, prefix)) => (last.as_str(), prefix),
                None => return,
            },
        };

        let Some((root, fields)) = prefix.split_first() else {
            self.set_variable(last);
            return;
        };
        self.get_variable(root);
        for field in fields {
            let name = self.name_constant(field);
            self.emit(OpCode::IndexN, name);
        }
        let name = self.name_constant(last);
        self.emit(OpCode::IndexSetN, name);
    }

    /// Pop the value on top of the stack into an assignment target
    fn store(&mut self, target: &Expr) {
        match &target.kind {
            ExprKind::Name(name) => self.set_variable(name),
            ExprKind::Index { object, key } => {
                self.expression_scalar(object);
                if let ExprKind::String(field) = &key.kind {
                    let name = self.name_constant(field);
                    self.emit(OpCode::IndexSetN, name);
                } else {
                    self.expression_scalar(key);
                    self.emit(OpCode::IndexSet, 0);
                }
            }
            _ => self.error(CompileErrorKind::InvalidAssignmentTarget, target.span),
        }
    }

    fn while_loop(&mut self, loop_start: usize, condition: &Expr, body: &Block) {
        self.expression_scalar(condition);
        let exit = self.emit(OpCode::Jf, -1);

        self.current.loops.push(LoopInfo::default());
        self.block(body);
        self.emit(OpCode::Jump, loop_start as i32);

        self.patch_here(exit);
        self.end_loop();
    }

    fn repeat_loop(&mut self, body: &Block, condition: &Expr) {
        let loop_start = self.next_index();
        self.current.loops.push(LoopInfo::default());

        // The condition sees the body's locals
        self.begin_scope();
        for stmt in &body.stmts {
            self.statement(stmt);
        }
        self.expression_scalar(condition);
        self.end_scope();

        self.emit(OpCode::Jf, loop_start as i32);
        self.end_loop();
    }

    fn if_statement(&mut self, branches: &[(Expr, Block)], else_block: Option<&Block>) {
        let mut end_jumps = Vec::new();
        for (i, (condition, block)) in branches.iter().enumerate() {
            self.expression_scalar(condition);
            let next = self.emit(OpCode::Jf, -1);
            self.block(block);
            if i + 1 < branches.len() || else_block.is_some() {
                end_jumps.push(self.emit(OpCode::Jump, -1));
            }
            self.patch_here(next);
        }
        if let Some(block) = else_block {
            self.block(block);
        }
        for jump in end_jumps {
            self.patch_here(jump);
        }
    }

    fn numeric_for(
        &mut self,
        var: &str,
        start: &Expr,
        limit: &Expr,
        step: Option<&Expr>,
        body: &Block,
        span: Span,
    ) {
        self.begin_scope();
        let counter = self.declare_local("(for counter)", span);
        let limit_slot = self.declare_local("(for limit)", span);
        let step_slot = self.declare_local("(for step)", span);

        let parts = [
            (counter, Some(start)),
            (limit_slot, Some(limit)),
            (step_slot, step),
        ];
        for (which, (slot, expr)) in parts.into_iter().enumerate() {
            match expr {
                Some(expr) => self.expression_scalar(expr),
                None => {
                    let one = self.constant(Constant::Number(1.0));
                    self.emit(OpCode::Literal, one);
                }
            }
            self.emit(OpCode::ToNum, which as i32);
            self.emit(OpCode::InitLcl, i32::from(slot));
        }

        let loop_start = self.next_index();
        self.emit(OpCode::Local, i32::from(counter));
        self.emit(OpCode::Local, i32::from(limit_slot));
        self.emit(OpCode::Local, i32::from(step_slot));
        let exit = self.emit(OpCode::JFor, -1);

        self.current.loops.push(LoopInfo::default());
        self.begin_scope();
        let visible = self.declare_local(var, span);
        self.emit(OpCode::Local, i32::from(counter));
        self.emit(OpCode::InitLcl, i32::from(visible));
        self.block(body);
        self.end_scope();

        self.emit(OpCode::Local, i32::from(counter));
        self.emit(OpCode::Local, i32::from(step_slot));
        self.emit(OpCode::Add, 0);
        self.emit(OpCode::StoreLcl, i32::from(counter));
        self.emit(OpCode::Jump, loop_start as i32);

        self.patch_here(exit);
        self.end_loop();
        self.end_scope();
    }

    fn generic_for(&mut self, names: &[String], exprs: &[Expr], body: &Block, span: Span) {
        self.begin_scope();
        self.adjust(exprs, 3);
        let iterator = self.declare_local("(for iterator)", span);
        let state = self.declare_local("(for state)", span);
        let control = self.declare_local("(for control)", span);
        for slot in [control, state, iterator] {
            self.emit(OpCode::InitLcl, i32::from(slot));
        }

        let loop_start = self.next_index();
        self.emit(OpCode::Local, i32::from(iterator));
        self.emit(OpCode::Local, i32::from(state));
        self.emit(OpCode::Local, i32::from(control));
        self.emit(OpCode::Call, 2);
        self.emit(OpCode::ExpTuple, names.len() as i32);

        self.current.loops.push(LoopInfo::default());
        self.begin_scope();
        let slots: Vec<u16> = names
            .iter()
            .map(|name| self.declare_local(name, span))
            .collect();
        for slot in slots.iter().rev() {
            self.emit(OpCode::InitLcl, i32::from(*slot));
        }
        let first = slots.first().copied().unwrap_or(control);
        self.emit(OpCode::Local, i32::from(first));
        self.emit(OpCode::Copy, 0);
        self.emit(OpCode::StoreLcl, i32::from(control));
        let exit = self.emit(OpCode::JNil, -1);

        self.block(body);
        self.end_scope();
        self.emit(OpCode::Jump, loop_start as i32);

        self.patch_here(exit);
        self.end_loop();
        self.end_scope();
    }

    fn return_statement(&mut self, values: &[Expr]) {
        match values {
            [] => {
                self.emit(OpCode::Ret, 0);
            }
            [single] => {
                self.expression(single);
                self.emit(OpCode::Ret, 1);
            }
            _ => {
                self.expression_list(values);
                self.emit(OpCode::MkTuple, values.len() as i32);
                self.emit(OpCode::Ret, 1);
            }
        }
    }

    // ===== Expression Compilation =====

    /// Compile an expression leaving one stack entry, which may be a tuple
    fn expression(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Nil => self.literal(Constant::Nil),
            ExprKind::True => self.literal(Constant::Boolean(true)),
            ExprKind::False => self.literal(Constant::Boolean(false)),
            ExprKind::Number(n) => self.literal(Constant::Number(*n)),
            ExprKind::String(s) => self.literal(Constant::String(Arc::from(s.as_str()))),
            ExprKind::Vararg => {
                if !self.current.proto.is_vararg {
                    self.error(CompileErrorKind::VarargOutsideVarargFunction, expr.span);
                }
                self.emit(OpCode::VarArgs, 0);
            }
            ExprKind::Function(body) => self.function(body),
            ExprKind::Table(fields) => self.table(fields),
            ExprKind::Name(name) => self.get_variable(name),
            ExprKind::Index { object, key } => {
                self.expression_scalar(object);
                if let ExprKind::String(field) = &key.kind {
                    let name = self.name_constant(field);
                    self.emit(OpCode::IndexN, name);
                } else {
                    self.expression_scalar(key);
                    self.emit(OpCode::Index, 0);
                }
            }
            ExprKind::Call { callee, args } => {
                self.expression_scalar(callee);
                self.expression_list(args);
                self.emit(OpCode::Call, args.len() as i32);
            }
            ExprKind::MethodCall {
                object,
                method,
                args,
            } => {
                self.expression_scalar(object);
                self.emit(OpCode::Copy, 0);
                let name = self.name_constant(method);
                self.emit(OpCode::IndexN, name);
                self.emit(OpCode::Swap, 0);
                self.expression_list(args);
                self.emit(OpCode::Call, args.len() as i32 + 1);
            }
            ExprKind::Paren(inner) => self.expression_scalar(inner),
            ExprKind::Unary { op, operand } => self.unary(*op, operand),
            ExprKind::Binary { op, left, right } => self.binary(*op, left, right),
            ExprKind::Power { base, exponent } => {
                self.expression_scalar(base);
                self.expression_scalar(exponent);
                self.emit(OpCode::Power, 0);
            }
        }
    }

    /// Compile an expression truncated to a single value
    fn expression_scalar(&mut self, expr: &Expr) {
        self.expression(expr);
        if expr.is_multi_value() {
            self.emit(OpCode::Scalar, 0);
        }
    }

    /// Compile a list; only the last entry may stay multi-valued
    fn expression_list(&mut self, exprs: &[Expr]) {
        if let Some((last, init)) = exprs.split_last() {
            for expr in init {
                self.expression_scalar(expr);
            }
            self.expression(last);
        }
    }

    /// Compile `exprs` so that exactly `wanted` values end up on the stack
    fn adjust(&mut self, exprs: &[Expr], wanted: usize) {
        let count = exprs.len();
        let mut produced = 0;
        for (i, expr) in exprs.iter().enumerate() {
            if i + 1 == count && expr.is_multi_value() && wanted > i {
                self.expression(expr);
                self.emit(OpCode::ExpTuple, (wanted - i) as i32);
                produced = wanted;
            } else {
                self.expression_scalar(expr);
                produced += 1;
            }
        }
        if produced > wanted {
            self.emit(OpCode::Pop, (produced - wanted) as i32);
        }
        for _ in produced..wanted {
            self.literal(Constant::Nil);
        }
    }

    fn unary(&mut self, op: UnaryOp, operand: &Expr) {
        if let (UnaryOp::Neg, ExprKind::Number(n)) = (op, &operand.kind) {
            self.literal(Constant::Number(-n));
            return;
        }
        self.expression_scalar(operand);
        let opcode = match op {
            UnaryOp::Neg => OpCode::Neg,
            UnaryOp::Not => OpCode::Not,
            UnaryOp::Len => OpCode::Len,
            UnaryOp::BitNot => OpCode::BitNot,
        };
        self.emit(opcode, 0);
    }

    fn binary(&mut self, op: BinOp, left: &Expr, right: &Expr) {
        match op {
            // Short-circuit operators keep the deciding operand on the stack
            BinOp::Or | BinOp::And => {
                self.expression_scalar(left);
                let opcode = if op == BinOp::Or {
                    OpCode::JtOrPop
                } else {
                    OpCode::JfOrPop
                };
                let end = self.emit(opcode, -1);
                self.expression_scalar(right);
                self.patch_here(end);
            }
            _ => {
                self.expression_scalar(left);
                self.expression_scalar(right);
                let ops: &[OpCode] = match op {
                    BinOp::Lt => &[OpCode::Less, OpCode::ToBool],
                    BinOp::Le => &[OpCode::LessEq, OpCode::ToBool],
                    // a > b is not (a <= b); a >= b is not (a < b)
                    BinOp::Gt => &[OpCode::LessEq, OpCode::CNot],
                    BinOp::Ge => &[OpCode::Less, OpCode::CNot],
                    BinOp::Eq => &[OpCode::Eq, OpCode::ToBool],
                    BinOp::Ne => &[OpCode::Eq, OpCode::ToBool, OpCode::Not],
                    BinOp::Concat => &[OpCode::Concat],
                    BinOp::Add => &[OpCode::Add],
                    BinOp::Sub => &[OpCode::Sub],
                    BinOp::Mul => &[OpCode::Mul],
                    BinOp::Div => &[OpCode::Div],
                    BinOp::FloorDiv => &[OpCode::FloorDiv],
                    BinOp::Mod => &[OpCode::Mod],
                    BinOp::Pow => &[OpCode::Power],
                    BinOp::BitAnd => &[OpCode::BitAnd],
                    BinOp::BitOr => &[OpCode::BitOr],
                    BinOp::BitXor => &[OpCode::BitXor],
                    BinOp::Shl => &[OpCode::ShiftLeft],
                    BinOp::Shr => &[OpCode::ShiftRight],
                    BinOp::Or | BinOp::And => &[],
                };
                for opcode in ops {
                    self.emit(*opcode, 0);
                }
            }
        }
    }

    fn table(&mut self, fields: &[TableField]) {
        self.emit(OpCode::NewTable, 0);
        let mut position = 1;
        for (i, field) in fields.iter().enumerate() {
            match field {
                TableField::Positional(value) => {
                    if i + 1 == fields.len() {
                        self.expression(value);
                    } else {
                        self.expression_scalar(value);
                    }
                    self.emit(OpCode::TblInitI, position);
                    position += 1;
                }
                TableField::Named(name, value) => {
                    self.literal(Constant::String(Arc::from(name.as_str())));
                    self.expression_scalar(value);
                    self.emit(OpCode::TblInitN, 0);
                }
                TableField::Keyed(key, value) => {
                    self.expression_scalar(key);
                    self.expression_scalar(value);
                    self.emit(OpCode::TblInitN, 0);
                }
            }
        }
    }

    /// Compile a nested function and push a closure for it
    fn function(&mut self, body: &FunctionBody) {
        let name = body.name.clone().unwrap_or_else(|| "anonymous".to_string());
        let enclosing = std::mem::replace(
            &mut self.current,
            FunctionState::new(name, &self.source_name),
        );
        self.current.enclosing = Some(Box::new(enclosing));
        self.current.proto.is_vararg = body.is_vararg;
        self.current.proto.param_count = u16::try_from(body.params.len()).unwrap_or(u16::MAX);

        self.begin_scope();
        for param in &body.params {
            self.declare_local(param, body.span);
        }
        self.block(&body.body);
        self.end_scope();
        self.emit_implicit_return(body.body.end_span);

        let Some(enclosing) = self.current.enclosing.take() else {
            self.error(
                CompileErrorKind::Internal("function state lost its parent".to_string()),
                body.span,
            );
            return;
        };
        let finished = std::mem::replace(&mut self.current, *enclosing);

        let index = self.current.proto.protos.len();
        self.current.proto.protos.push(Arc::new(finished.proto));
        self.emit(OpCode::Closure, index as i32);
    }

    // ===== Variable Management =====

    fn declare_local(&mut self, name: &str, span: Span) -> u16 {
        let Ok(slot) = u16::try_from(self.current.proto.local_names.len()) else {
            self.error(CompileErrorKind::TooManyLocals, span);
            return u16::MAX;
        };
        self.current.proto.local_names.push(name.to_string());
        self.current.locals.push(Local {
            name: name.to_string(),
            slot,
            depth: self.current.scope_depth,
        });
        slot
    }

    fn get_variable(&mut self, name: &str) {
        if let Some(slot) = self.current.resolve_local(name) {
            self.emit(OpCode::Local, i32::from(slot));
        } else if let Some(index) = self.current.resolve_upvalue(name) {
            self.emit(OpCode::UpValue, i32::from(index));
        } else {
            let constant = self.name_constant(name);
            self.emit(OpCode::GetGlobal, constant);
        }
    }

    fn set_variable(&mut self, name: &str) {
        if let Some(slot) = self.current.resolve_local(name) {
            self.emit(OpCode::StoreLcl, i32::from(slot));
        } else if let Some(index) = self.current.resolve_upvalue(name) {
            self.emit(OpCode::StoreUpv, i32::from(index));
        } else {
            let constant = self.name_constant(name);
            self.emit(OpCode::SetGlobal, constant);
        }
    }

    // ===== Scope Management =====

    fn begin_scope(&mut self) {
        self.current.scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.current.scope_depth -= 1;
        let depth = self.current.scope_depth;
        self.current.locals.retain(|local| local.depth <= depth);
    }

    fn end_loop(&mut self) {
        if let Some(info) = self.current.loops.pop() {
            for jump in info.break_jumps {
                self.patch_here(jump);
            }
        }
    }

    // ===== Bytecode Emission Helpers =====

    fn emit(&mut self, op: OpCode, operand: i32) -> usize {
        let source_ref = self.current_ref.clone();
        self.current.chunk_mut().emit(op, operand, source_ref)
    }

    fn next_index(&self) -> usize {
        self.current.proto.chunk.next_index()
    }

    fn patch_here(&mut self, jump: usize) {
        let target = self.next_index();
        self.current.chunk_mut().patch_jump(jump, target);
    }

    fn constant(&mut self, constant: Constant) -> i32 {
        self.current.chunk_mut().add_constant(constant) as i32
    }

    fn name_constant(&mut self, name: &str) -> i32 {
        self.current.chunk_mut().add_name(name) as i32
    }

    fn literal(&mut self, constant: Constant) {
        let index = self.constant(constant);
        self.emit(OpCode::Literal, index);
    }

    fn emit_implicit_return(&mut self, end_span: Span) {
        // Synthetic returns never hold breakpoints
        let r = self.locate(end_span, false).no_breakpoint();
        let r = self.register_ref(r);
        let saved = self.current_ref.replace(r);
        self.emit(OpCode::Ret, 0);
        self.current_ref = saved;
    }

    /// Build a ref for a span; statement refs are clipped to their first line
    fn locate(&self, span: Span, clip_to_first_line: bool) -> SourceRef {
        let (from, mut to) = self.line_index.span_locations(span);
        if clip_to_first_line && to.line != from.line {
            let len = self
                .line_lengths
                .get(from.line as usize - 1)
                .copied()
                .unwrap_or(from.column);
            to = Location::new(from.line, len.max(from.column));
        }
        SourceRef::new(self.source_id, from.line, from.column, to.line, to.column)
    }

    fn register_ref(&mut self, r: SourceRef) -> Arc<SourceRef> {
        let r = Arc::new(r);
        self.refs.push(Arc::clone(&r));
        r
    }

    // ===== Error Handling =====

    fn error(&mut self, kind: CompileErrorKind, span: Span) {
        self.errors.push(CompileError::new(kind, span));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn compile_chunk(source: &str) -> Result<CompiledChunk, Vec<CompileError>> {
        let block = Parser::parse_chunk(source).expect("Parse error");
        let code = SourceCode::new(0, "test", source);
        Compiler::new(&code).compile_chunk(&block)
    }

    fn ops(source: &str) -> Vec<OpCode> {
        let expr = Parser::parse_expression(source).expect("Parse error");
        let code = SourceCode::new(0, "test", source);
        let compiled = Compiler::new(&code).compile_expression(&expr).unwrap();
        compiled.proto.chunk.code().iter().map(|i| i.op).collect()
    }

    #[test]
    fn or_emits_jt_or_pop() {
        assert_eq!(
            ops("a or b"),
            vec![OpCode::GetGlobal, OpCode::JtOrPop, OpCode::GetGlobal, OpCode::Ret]
        );
    }

    #[test]
    fn short_circuit_jump_skips_right_operand() {
        let expr = Parser::parse_expression("a and b").unwrap();
        let code = SourceCode::new(0, "test", "a and b");
        let compiled = Compiler::new(&code).compile_expression(&expr).unwrap();
        let jump = &compiled.proto.chunk.code()[1];
        assert_eq!(jump.op, OpCode::JfOrPop);
        assert_eq!(jump.operand, 3);
    }

    #[test]
    fn comparison_shapes() {
        use OpCode::{CNot, Eq, GetGlobal, Less, LessEq, Not, Ret, ToBool};
        assert_eq!(ops("a < b"), vec![GetGlobal, GetGlobal, Less, ToBool, Ret]);
        assert_eq!(ops("a <= b"), vec![GetGlobal, GetGlobal, LessEq, ToBool, Ret]);
        assert_eq!(ops("a > b"), vec![GetGlobal, GetGlobal, LessEq, CNot, Ret]);
        assert_eq!(ops("a >= b"), vec![GetGlobal, GetGlobal, Less, CNot, Ret]);
        assert_eq!(ops("a ~= b"), vec![GetGlobal, GetGlobal, Eq, ToBool, Not, Ret]);
    }

    #[test]
    fn negative_literals_are_folded() {
        assert_eq!(ops("-2"), vec![OpCode::Literal, OpCode::Ret]);
    }

    #[test]
    fn statements_get_debug_points() {
        let compiled = compile_chunk("local a = 1\nprint(a)").unwrap();
        assert_eq!(compiled.proto.chunk.debug_points().count(), 2);
        // two statements plus the implicit return
        assert_eq!(compiled.refs.len(), 3);
        assert!(compiled.refs[2].cannot_breakpoint);
    }

    #[test]
    fn debug_points_can_be_disabled() {
        let block = Parser::parse_chunk("local a = 1").unwrap();
        let code = SourceCode::new(0, "test", "local a = 1");
        let compiled = Compiler::new(&code)
            .with_debug_instructions(false)
            .compile_chunk(&block)
            .unwrap();
        assert_eq!(compiled.proto.chunk.debug_points().count(), 0);
    }

    #[test]
    fn captures_resolve_through_levels() {
        let compiled =
            compile_chunk("local x = 1\nlocal function f() return function() return x end end")
                .unwrap();
        let f = &compiled.proto.protos[0];
        assert_eq!(f.upvalues, vec![UpvalueDesc::Local(0)]);
        assert_eq!(f.protos[0].upvalues, vec![UpvalueDesc::Upvalue(0)]);
    }

    #[test]
    fn break_outside_loop_is_rejected() {
        let errors = compile_chunk("break").unwrap_err();
        assert_eq!(errors[0].kind, CompileErrorKind::BreakOutsideLoop);
    }

    #[test]
    fn vararg_requires_vararg_function() {
        let errors = compile_chunk("function f() return ... end").unwrap_err();
        assert_eq!(errors[0].kind, CompileErrorKind::VarargOutsideVarargFunction);
        assert!(compile_chunk("return ...").is_ok());
    }

    #[test]
    fn multi_line_statements_clip_their_ref() {
        let compiled = compile_chunk("while x do\n  x = false\nend").unwrap();
        let outer = &compiled.refs[0];
        assert_eq!((outer.from_line, outer.to_line), (1, 1));
        assert_eq!(compiled.refs[1].from_line, 2);
    }
}
