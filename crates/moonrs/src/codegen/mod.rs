// Bytecode generation.
//
// One pass over the AST. Lexical scopes live in a flat name list
// partitioned by a scope stack; registers are handed out by a per-function
// bump watermark that statements restore on exit, so after any statement
// the watermark has only moved by the locals it declared. Parents tell
// expressions how many values they expect through two count stacks pushed
// immediately before descent and popped by the visited node.

use tracing::trace;

use crate::ast::{
    Block, Chunk, Expr, ExpressionList, FuncCallArgs, FuncCallStmt, LocalNameListStmt, NameList,
    NormalFuncCallExpr, ReturnStmt, Stmt, Token, TokenKind,
};
use crate::bytecode::{ENV_UPVALUE_INDEX, EXP_VALUE_COUNT_ANY, Instruction, OpCode};
use crate::gc::FunctionId;
use crate::state::State;
use crate::value::Value;
use crate::value::function::UpvalueDesc;

/// Errors surfaced to the caller of chunk compilation.
#[derive(Debug, Clone, PartialEq)]
pub enum CodegenError {
    /// AST form the generator does not lower yet.
    UnsupportedSyntax { construct: &'static str, line: u32 },
    /// Register allocation ran past the instruction A field.
    TooManyRegisters { line: u32 },
    /// The parser handed over a malformed tree.
    MalformedAst { message: &'static str, line: u32 },
}

impl std::fmt::Display for CodegenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodegenError::UnsupportedSyntax { construct, line } => {
                write!(f, "line {line}: unsupported syntax: {construct}")
            }
            CodegenError::TooManyRegisters { line } => {
                write!(f, "line {line}: function needs too many registers")
            }
            CodegenError::MalformedAst { message, line } => {
                write!(f, "line {line}: malformed syntax tree: {message}")
            }
        }
    }
}

impl std::error::Error for CodegenError {}

pub type CodegenResult<T> = Result<T, CodegenError>;

/// Compile `chunk` against `state`. On success the operand stack's top
/// holds the chunk closure, whose sole upvalue binds the environment table
/// through the bootstrap frame.
pub fn generate(state: &mut State, chunk: &Chunk) -> CodegenResult<()> {
    CodeGenerator::new(state).visit_chunk(chunk)
}

fn unsupported(construct: &'static str, line: u32) -> CodegenError {
    CodegenError::UnsupportedSyntax { construct, line }
}

/// A name bound to a register, owned by some scope.
struct LocalName {
    name: smol_str::SmolStr,
    register: u32,
}

/// One lexical scope: its slice of the name list starts at `start`, and
/// `func` indexes the function that owns its registers.
struct ScopeRecord {
    start: usize,
    func: usize,
}

/// Per-function generation state, pushed when entering a chunk or function
/// body and popped on exit.
struct GenFunc {
    function: FunctionId,
    /// `(register, name token)` pairs collected by the last name list,
    /// drained by the declaring statement.
    pending_names: Vec<(u32, Token)>,
    /// How many results the parent expects from the next expression.
    exp_value_count: Vec<i32>,
    /// How many values the parent expects from the next expression list.
    exp_list_value_count: Vec<i32>,
}

impl GenFunc {
    fn new(function: FunctionId) -> Self {
        GenFunc {
            function,
            pending_names: Vec::new(),
            exp_value_count: Vec::new(),
            exp_list_value_count: Vec::new(),
        }
    }
}

enum Resolved {
    /// Bound in the current function; the register holding it.
    Local(u32),
    /// Bound in an enclosing function.
    Enclosing,
    /// Not bound anywhere: environment lookup.
    Global,
}

const PROTO_ALIVE: &str = "prototype stays alive during generation";
const FUNC_ACTIVE: &str = "generation state is non-empty inside a chunk";

struct CodeGenerator<'a> {
    state: &'a mut State,
    funcs: Vec<GenFunc>,
    names: Vec<LocalName>,
    scopes: Vec<ScopeRecord>,
}

impl<'a> CodeGenerator<'a> {
    fn new(state: &'a mut State) -> Self {
        CodeGenerator {
            state,
            funcs: Vec::new(),
            names: Vec::new(),
            scopes: Vec::new(),
        }
    }

    // ============ Function / scope bookkeeping ============

    fn current(&self) -> &GenFunc {
        self.funcs.last().expect(FUNC_ACTIVE)
    }

    fn current_mut(&mut self) -> &mut GenFunc {
        self.funcs.last_mut().expect(FUNC_ACTIVE)
    }

    fn func_id(&self) -> FunctionId {
        self.current().function
    }

    fn next_register(&self) -> u32 {
        self.state
            .gc()
            .function(self.func_id())
            .expect(PROTO_ALIVE)
            .next_register()
    }

    fn set_next_register(&mut self, register: u32) {
        let id = self.func_id();
        self.state
            .gc_mut()
            .function_mut(id)
            .expect(PROTO_ALIVE)
            .set_next_register(register);
    }

    fn alloca_register(&mut self, line: u32) -> CodegenResult<u32> {
        let id = self.func_id();
        let register = self
            .state
            .gc_mut()
            .function_mut(id)
            .expect(PROTO_ALIVE)
            .alloca_next_register();
        if register > Instruction::MAX_A {
            return Err(CodegenError::TooManyRegisters { line });
        }
        Ok(register)
    }

    fn enter_scope(&mut self) {
        let func = self.funcs.len() - 1;
        self.scopes.push(ScopeRecord {
            start: self.names.len(),
            func,
        });
    }

    /// Scope exit truncates the name list back to the scope start,
    /// releasing every binding made inside it.
    fn leave_scope(&mut self) {
        let scope = self.scopes.pop().expect("scope stack is non-empty");
        self.names.truncate(scope.start);
    }

    /// Innermost-to-outermost name lookup.
    fn resolve(&self, name: &str) -> Resolved {
        let current_func = self.funcs.len() - 1;
        let mut upper = self.names.len();
        for scope in self.scopes.iter().rev() {
            for local in self.names[scope.start..upper].iter().rev() {
                if local.name == name {
                    return if scope.func == current_func {
                        Resolved::Local(local.register)
                    } else {
                        Resolved::Enclosing
                    };
                }
            }
            upper = scope.start;
        }
        Resolved::Global
    }

    fn find_in_current_scope(&self, name: &str) -> Option<u32> {
        let scope = self.scopes.last()?;
        self.names[scope.start..]
            .iter()
            .rev()
            .find(|local| local.name == name)
            .map(|local| local.register)
    }

    // ============ Emission ============

    fn emit(&mut self, instruction: u32, line: u32) {
        let id = self.func_id();
        self.state
            .gc_mut()
            .function_mut(id)
            .expect(PROTO_ALIVE)
            .push_instruction(instruction, line);
    }

    fn emit_a(&mut self, op: OpCode, a: u32, line: u32) {
        self.emit(Instruction::create_a(op, a), line);
    }

    fn emit_ab(&mut self, op: OpCode, a: u32, b: u32, line: u32) {
        self.emit(Instruction::create_ab(op, a, b), line);
    }

    fn emit_abc(&mut self, op: OpCode, a: u32, b: u32, c: u32, line: u32) {
        self.emit(Instruction::create_abc(op, a, b, c), line);
    }

    fn emit_asbx(&mut self, op: OpCode, a: u32, sbx: i32, line: u32) {
        self.emit(Instruction::create_asbx(op, a, sbx), line);
    }

    // ============ Visitors ============

    fn visit_chunk(&mut self, chunk: &Chunk) -> CodegenResult<()> {
        let function = self.state.gc_mut().new_function(chunk.line);
        let module = self.state.gc_mut().new_string(&chunk.module);
        self.state.gc_mut().set_module_name(function, module);
        if let Some(parent) = self.funcs.last() {
            let superior = parent.function;
            self.state.gc_mut().add_child_function(superior, function);
        }

        self.funcs.push(GenFunc::new(function));
        let result = self.visit_block(&chunk.block);
        let finished = self.funcs.pop().expect(FUNC_ACTIVE);
        result?;
        debug_assert!(
            finished.exp_value_count.is_empty() && finished.exp_list_value_count.is_empty(),
            "value-count stacks drained at chunk exit"
        );

        let closure = self.state.gc_mut().new_closure(function);
        self.state
            .gc_mut()
            .closure_add_upvalue(closure, UpvalueDesc::Stack(ENV_UPVALUE_INDEX));
        self.state.push(Value::Closure(closure));
        trace!(module = %chunk.module, "generated chunk");
        Ok(())
    }

    fn visit_block(&mut self, block: &Block) -> CodegenResult<()> {
        self.enter_scope();
        let watermark = self.next_register();
        let result = self.visit_block_body(block);
        if result.is_ok() {
            self.set_next_register(watermark);
            self.emit_a(OpCode::SetTop, watermark, block.end_line);
        }
        self.leave_scope();
        result
    }

    fn visit_block_body(&mut self, block: &Block) -> CodegenResult<()> {
        for stmt in &block.stmts {
            self.visit_stmt(stmt)?;
        }
        if let Some(ret) = &block.ret {
            self.visit_return(ret)?;
        }
        Ok(())
    }

    fn visit_stmt(&mut self, stmt: &Stmt) -> CodegenResult<()> {
        match stmt {
            Stmt::LocalNameList(s) => self.visit_local_name_list(s),
            Stmt::FuncCall(s) => self.visit_func_call_stmt(s),
            Stmt::Assignment(s) => Err(unsupported("assignment", s.line)),
            Stmt::Break(t) => Err(unsupported("break", t.line)),
            Stmt::Do(s) => Err(unsupported("do block", s.line)),
            Stmt::While(s) => Err(unsupported("while loop", s.line)),
            Stmt::Repeat(s) => Err(unsupported("repeat loop", s.line)),
            Stmt::If(s) => Err(unsupported("if statement", s.line)),
            Stmt::NumericFor(s) => Err(unsupported("numeric for loop", s.line)),
            Stmt::GenericFor(s) => Err(unsupported("generic for loop", s.line)),
            Stmt::FunctionDecl(s) => Err(unsupported("function declaration", s.line)),
            Stmt::LocalFunctionDecl(s) => Err(unsupported("local function declaration", s.line)),
        }
    }

    /// Bind each name at the current watermark, reusing the register when
    /// the same scope already declares the name. The `(register, token)`
    /// pairs pile up for the declaring statement.
    fn visit_name_list(&mut self, list: &NameList) -> CodegenResult<()> {
        for token in &list.names {
            let TokenKind::Id(name) = &token.kind else {
                return Err(CodegenError::MalformedAst {
                    message: "name list entry is not an identifier",
                    line: token.line,
                });
            };
            let register = match self.find_in_current_scope(name) {
                Some(register) => register,
                None => {
                    let register = self.alloca_register(token.line)?;
                    self.names.push(LocalName {
                        name: name.clone(),
                        register,
                    });
                    register
                }
            };
            self.current_mut().pending_names.push((register, token.clone()));
        }
        Ok(())
    }

    /// `local a, b = e1, e2`: the names get stable registers first, the
    /// expression list evaluates into the temporaries above them, and the
    /// moves copy each value down into its name's register.
    fn visit_local_name_list(&mut self, stmt: &LocalNameListStmt) -> CodegenResult<()> {
        self.visit_name_list(&stmt.names)?;
        let count = self.current().pending_names.len();
        let watermark = self.next_register();

        if let Some(exprs) = &stmt.exprs {
            self.current_mut()
                .exp_list_value_count
                .push(count as i32);
            self.visit_expression_list(exprs)?;
        }

        let pending = std::mem::take(&mut self.current_mut().pending_names);
        for (i, (register, token)) in pending.iter().enumerate() {
            self.emit_ab(OpCode::Move, *register, watermark + i as u32, token.line);
        }

        self.set_next_register(watermark);
        self.emit_a(OpCode::SetTop, watermark, stmt.line);
        Ok(())
    }

    /// A call in statement position: results are discarded and the
    /// temporaries released.
    fn visit_func_call_stmt(&mut self, stmt: &FuncCallStmt) -> CodegenResult<()> {
        let watermark = self.next_register();
        self.current_mut().exp_value_count.push(0);
        self.visit_expr(&stmt.call)?;
        self.set_next_register(watermark);
        self.emit_a(OpCode::SetTop, watermark, stmt.line);
        Ok(())
    }

    fn visit_return(&mut self, ret: &ReturnStmt) -> CodegenResult<()> {
        let base = self.next_register();
        match &ret.exprs {
            Some(exprs) => {
                self.current_mut()
                    .exp_list_value_count
                    .push(EXP_VALUE_COUNT_ANY);
                self.visit_expression_list(exprs)?;
                self.emit_asbx(OpCode::Return, base, EXP_VALUE_COUNT_ANY, ret.line);
            }
            None => {
                self.emit_asbx(OpCode::Return, base, 0, ret.line);
            }
        }
        Ok(())
    }

    /// Only the final expression of a list may fan out to multiple values;
    /// the ones before it are truncated to a single value each.
    fn visit_expression_list(&mut self, list: &ExpressionList) -> CodegenResult<()> {
        let mut remaining = self
            .current_mut()
            .exp_list_value_count
            .pop()
            .ok_or(CodegenError::MalformedAst {
                message: "expression list visited without an expected count",
                line: list.line,
            })?;
        let last = list.exprs.len().saturating_sub(1);
        for (i, expr) in list.exprs.iter().enumerate() {
            let count = if remaining == 0 {
                0
            } else if i == last {
                remaining
            } else {
                1
            };
            self.current_mut().exp_value_count.push(count);
            if remaining != 0 && remaining != EXP_VALUE_COUNT_ANY {
                remaining -= count;
            }
            self.visit_expr(expr)?;
        }
        Ok(())
    }

    fn visit_expr(&mut self, expr: &Expr) -> CodegenResult<()> {
        match expr {
            Expr::Terminator(token) => self.visit_terminator(token),
            Expr::NormalFuncCall(call) => self.visit_normal_func_call(call),
            Expr::Binary(e) => Err(unsupported("binary operator", e.line)),
            Expr::Unary(e) => Err(unsupported("unary operator", e.line)),
            Expr::FunctionBody(e) => Err(unsupported("function definition", e.line)),
            Expr::TableDefine(e) => Err(unsupported("table constructor", e.line)),
            Expr::IndexAccessor(e) => Err(unsupported("index access", e.line)),
            Expr::MemberAccessor(e) => Err(unsupported("member access", e.line)),
            Expr::MemberFuncCall(e) => Err(unsupported("method call", e.line)),
        }
    }

    fn visit_terminator(&mut self, token: &Token) -> CodegenResult<()> {
        let count = self
            .current_mut()
            .exp_value_count
            .pop()
            .ok_or(CodegenError::MalformedAst {
                message: "expression visited without an expected count",
                line: token.line,
            })?;
        match &token.kind {
            TokenKind::Number(n) => {
                let id = self.func_id();
                let index = self.state.gc_mut().add_const_number(id, *n);
                if count != 0 {
                    let register = self.alloca_register(token.line)?;
                    self.emit_ab(OpCode::LoadConst, register, index, token.line);
                }
                Ok(())
            }
            TokenKind::Str(s) => {
                let id = self.func_id();
                let string = self.state.gc_mut().new_string(s);
                let index = self.state.gc_mut().add_const_string(id, string);
                if count != 0 {
                    let register = self.alloca_register(token.line)?;
                    self.emit_ab(OpCode::LoadConst, register, index, token.line);
                }
                Ok(())
            }
            TokenKind::Id(name) => match self.resolve(name) {
                Resolved::Local(source) => {
                    if count != 0 {
                        let register = self.alloca_register(token.line)?;
                        self.emit_ab(OpCode::Move, register, source, token.line);
                    }
                    Ok(())
                }
                Resolved::Global => {
                    let id = self.func_id();
                    let string = self.state.gc_mut().new_string(name);
                    let index = self.state.gc_mut().add_const_string(id, string);
                    let register = self.alloca_register(token.line)?;
                    self.emit_ab(OpCode::LoadConst, register, index, token.line);
                    self.emit_abc(
                        OpCode::GetUpTable,
                        register,
                        ENV_UPVALUE_INDEX,
                        register,
                        token.line,
                    );
                    Ok(())
                }
                Resolved::Enclosing => Err(unsupported(
                    "name captured from enclosing function",
                    token.line,
                )),
            },
            TokenKind::Op(_) => Err(CodegenError::MalformedAst {
                message: "operator token in expression position",
                line: token.line,
            }),
        }
    }

    /// The callee lands at the call base register, arguments stack up above
    /// it, and the call instruction carries the expected result count.
    fn visit_normal_func_call(&mut self, call: &NormalFuncCallExpr) -> CodegenResult<()> {
        let base = self.next_register();
        let result_count =
            self.current_mut()
                .exp_value_count
                .pop()
                .ok_or(CodegenError::MalformedAst {
                    message: "call visited without an expected count",
                    line: call.line,
                })?;

        self.current_mut().exp_value_count.push(1);
        self.visit_expr(&call.caller)?;
        self.visit_func_call_args(&call.args)?;

        self.emit_asbx(OpCode::Call, base, result_count, call.line);
        Ok(())
    }

    /// Call sites propagate multi-value mode into the argument list; the
    /// single-expression forms take exactly one value.
    fn visit_func_call_args(&mut self, args: &FuncCallArgs) -> CodegenResult<()> {
        match args {
            FuncCallArgs::ExpList(Some(list)) => {
                self.current_mut()
                    .exp_list_value_count
                    .push(EXP_VALUE_COUNT_ANY);
                self.visit_expression_list(list)
            }
            FuncCallArgs::ExpList(None) => Ok(()),
            FuncCallArgs::String(expr) | FuncCallArgs::Table(expr) => {
                self.current_mut().exp_value_count.push(1);
                self.visit_expr(expr)
            }
        }
    }
}
