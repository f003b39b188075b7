// Abstract syntax tree handed over by the parser.
//
// Tagged variants with exhaustive matching downstream: a node kind the code
// generator does not handle is a compile error at the match, not a silent
// no-op. Every node carries enough line information to attribute each
// emitted instruction.

use smol_str::SmolStr;

/// Identifier and name payload.
pub type Name = SmolStr;

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: u32,
}

impl Token {
    pub fn number(n: f64, line: u32) -> Token {
        Token {
            kind: TokenKind::Number(n),
            line,
        }
    }

    pub fn string(s: &str, line: u32) -> Token {
        Token {
            kind: TokenKind::Str(SmolStr::new(s)),
            line,
        }
    }

    pub fn id(name: &str, line: u32) -> Token {
        Token {
            kind: TokenKind::Id(SmolStr::new(name)),
            line,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Number(f64),
    Str(SmolStr),
    Id(SmolStr),
    /// Operators are carried through but not lowered by the generator.
    Op(Operator),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Concat,
    Len,
    Eq,
    NotEq,
    Less,
    LessEq,
    Greater,
    GreaterEq,
    And,
    Or,
    Not,
}

/// Root of a compilation unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub module: Name,
    pub block: Block,
    pub line: u32,
}

/// Ordered statements plus an optional trailing return.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub stmts: Vec<Stmt>,
    pub ret: Option<ReturnStmt>,
    /// Line of the block's closing token, for epilogue instructions.
    pub end_line: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    LocalNameList(LocalNameListStmt),
    Assignment(AssignmentStmt),
    FuncCall(FuncCallStmt),
    Break(Token),
    Do(DoStmt),
    While(WhileStmt),
    Repeat(RepeatStmt),
    If(IfStmt),
    NumericFor(NumericForStmt),
    GenericFor(GenericForStmt),
    FunctionDecl(FunctionDeclStmt),
    LocalFunctionDecl(LocalFunctionDeclStmt),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocalNameListStmt {
    pub names: NameList,
    pub exprs: Option<ExpressionList>,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssignmentStmt {
    pub vars: VarList,
    pub exprs: ExpressionList,
    pub line: u32,
}

/// A function call in statement position, results discarded.
#[derive(Debug, Clone, PartialEq)]
pub struct FuncCallStmt {
    pub call: Expr,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReturnStmt {
    pub exprs: Option<ExpressionList>,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DoStmt {
    pub block: Block,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WhileStmt {
    pub condition: Expr,
    pub block: Block,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RepeatStmt {
    pub block: Block,
    pub condition: Expr,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfStmt {
    pub condition: Expr,
    pub then_block: Block,
    pub else_branch: Option<Box<ElseBranch>>,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ElseBranch {
    ElseIf(IfStmt),
    Else(Block),
}

#[derive(Debug, Clone, PartialEq)]
pub struct NumericForStmt {
    pub var: Token,
    pub start: Expr,
    pub limit: Expr,
    pub step: Option<Expr>,
    pub block: Block,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenericForStmt {
    pub names: NameList,
    pub exprs: ExpressionList,
    pub block: Block,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDeclStmt {
    pub name: FunctionName,
    pub body: Expr,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocalFunctionDeclStmt {
    pub name: Token,
    pub body: Expr,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A single token in expression position: literal or identifier.
    Terminator(Token),
    Binary(BinaryExpr),
    Unary(UnaryExpr),
    FunctionBody(FunctionBodyExpr),
    TableDefine(TableDefineExpr),
    IndexAccessor(IndexAccessorExpr),
    MemberAccessor(MemberAccessorExpr),
    NormalFuncCall(NormalFuncCallExpr),
    MemberFuncCall(MemberFuncCallExpr),
}

impl Expr {
    pub fn line(&self) -> u32 {
        match self {
            Expr::Terminator(t) => t.line,
            Expr::Binary(e) => e.line,
            Expr::Unary(e) => e.line,
            Expr::FunctionBody(e) => e.line,
            Expr::TableDefine(e) => e.line,
            Expr::IndexAccessor(e) => e.line,
            Expr::MemberAccessor(e) => e.line,
            Expr::NormalFuncCall(e) => e.line,
            Expr::MemberFuncCall(e) => e.line,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BinaryExpr {
    pub op: Token,
    pub lhs: Box<Expr>,
    pub rhs: Box<Expr>,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnaryExpr {
    pub op: Token,
    pub operand: Box<Expr>,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionBodyExpr {
    pub params: ParamList,
    pub block: Block,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableDefineExpr {
    pub fields: Vec<TableField>,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TableField {
    /// `[index] = value`
    Index(Expr, Expr),
    /// `name = value`
    Name(Token, Expr),
    /// positional array entry
    Array(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexAccessorExpr {
    pub table: Box<Expr>,
    pub index: Box<Expr>,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemberAccessorExpr {
    pub table: Box<Expr>,
    pub member: Token,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalFuncCallExpr {
    pub caller: Box<Expr>,
    pub args: FuncCallArgs,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemberFuncCallExpr {
    pub caller: Box<Expr>,
    pub member: Token,
    pub args: FuncCallArgs,
    pub line: u32,
}

/// Argument forms of a call site: a parenthesised list, a single string
/// literal, or a single table constructor.
#[derive(Debug, Clone, PartialEq)]
pub enum FuncCallArgs {
    ExpList(Option<ExpressionList>),
    String(Box<Expr>),
    Table(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct NameList {
    pub names: Vec<Token>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExpressionList {
    pub exprs: Vec<Expr>,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamList {
    pub params: Vec<Token>,
    pub vararg: bool,
}

/// Left-hand sides of an assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct VarList {
    pub vars: Vec<Expr>,
}

/// Dotted function name with optional method part, e.g. `a.b.c:m`.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionName {
    pub names: Vec<Token>,
    pub method: Option<Token>,
}
