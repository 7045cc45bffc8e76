//! Syntax tree of a compiled artifact

use super::value::Value;

/// A parsed, named compiled unit
#[derive(Debug, Clone)]
pub struct Program {
    pub name: String,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// Literal template text between code islands
    Text(String),
    Echo(Vec<Expr>),
    Expr(Expr),
    If {
        branches: Vec<(Expr, Vec<Stmt>)>,
        otherwise: Option<Vec<Stmt>>,
    },
    Foreach {
        subject: Expr,
        key: Option<Expr>,
        value: Expr,
        body: Vec<Stmt>,
    },
    For {
        init: Vec<Expr>,
        cond: Option<Expr>,
        step: Vec<Expr>,
        body: Vec<Stmt>,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
    },
    Switch {
        subject: Expr,
        arms: Vec<SwitchArm>,
    },
    Break,
    Continue,
    Exit,
}

/// One `case`/`default` arm; arms fall through into the next
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchArm {
    /// `None` for `default`
    pub label: Option<Expr>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Var(String),
    Const(String),
    Member(Box<Expr>, String),
    /// `base[index]`; `None` is the append form `base[]`
    Index(Box<Expr>, Option<Box<Expr>>),
    Call {
        name: String,
        args: Vec<Expr>,
    },
    MethodCall {
        target: Box<Expr>,
        name: String,
        args: Vec<Expr>,
    },
    Array(Vec<(Option<Expr>, Expr)>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Assign {
        op: AssignOp,
        target: Box<Expr>,
        value: Box<Expr>,
    },
    IncDec {
        target: Box<Expr>,
        increment: bool,
        prefix: bool,
    },
    Ternary {
        cond: Box<Expr>,
        /// `None` for the `a ?: b` shorthand
        then: Option<Box<Expr>>,
        otherwise: Box<Expr>,
    },
}

impl Expr {
    pub fn is_place(&self) -> bool {
        matches!(self, Expr::Var(_) | Expr::Member(..) | Expr::Index(..))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Plus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Identical,
    NotIdentical,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Concat,
    Mul,
    Div,
    Mod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Set,
    Add,
    Sub,
    Mul,
    Div,
    Concat,
}

impl AssignOp {
    /// The binary operator a compound assignment applies
    pub fn binary(self) -> Option<BinaryOp> {
        match self {
            AssignOp::Set => None,
            AssignOp::Add => Some(BinaryOp::Add),
            AssignOp::Sub => Some(BinaryOp::Sub),
            AssignOp::Mul => Some(BinaryOp::Mul),
            AssignOp::Div => Some(BinaryOp::Div),
            AssignOp::Concat => Some(BinaryOp::Concat),
        }
    }
}
