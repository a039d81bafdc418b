//! Factor formula AST and the fixed function table.

use std::fmt;

use crate::domain::error::ParseError;
use crate::domain::expr_parser;

/// Name of the single variable bound per evaluation.
pub const CURRENT_DATE: &str = "currentDate";

/// Argument kind accepted by a function parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// ISO `YYYY-MM-DD` text.
    Date,
    /// Whole number.
    Integer,
}

impl ParamKind {
    pub fn describe(self) -> &'static str {
        match self {
            ParamKind::Date => "date",
            ParamKind::Integer => "integer",
        }
    }
}

/// Every function a formula may call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Function {
    AddDate,
    NDaysAgo,
    NMonthsAgo,
    NYearsAgo,
    Price,
    PricePercentChange,
    Stdev,
    MarketCap,
    PeRatio,
    PbRatio,
}

impl Function {
    pub const ALL: [Function; 10] = [
        Function::AddDate,
        Function::NDaysAgo,
        Function::NMonthsAgo,
        Function::NYearsAgo,
        Function::Price,
        Function::PricePercentChange,
        Function::Stdev,
        Function::MarketCap,
        Function::PeRatio,
        Function::PbRatio,
    ];

    pub fn from_name(name: &str) -> Option<Function> {
        Function::ALL.into_iter().find(|f| f.name() == name)
    }

    pub fn name(self) -> &'static str {
        match self {
            Function::AddDate => "addDate",
            Function::NDaysAgo => "nDaysAgo",
            Function::NMonthsAgo => "nMonthsAgo",
            Function::NYearsAgo => "nYearsAgo",
            Function::Price => "price",
            Function::PricePercentChange => "pricePercentChange",
            Function::Stdev => "stdev",
            Function::MarketCap => "marketCap",
            Function::PeRatio => "peRatio",
            Function::PbRatio => "pbRatio",
        }
    }

    /// Parameter kinds, in order. The length is the function's arity.
    pub fn params(self) -> &'static [ParamKind] {
        use ParamKind::*;
        match self {
            Function::AddDate => &[Date, Integer, Integer, Integer],
            Function::NDaysAgo | Function::NMonthsAgo | Function::NYearsAgo => &[Integer],
            Function::Price | Function::MarketCap | Function::PeRatio | Function::PbRatio => {
                &[Date]
            }
            Function::PricePercentChange | Function::Stdev => &[Date, Date],
        }
    }

    pub fn arity(self) -> usize {
        self.params().len()
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    pub fn symbol(self) -> char {
        match self {
            BinaryOp::Add => '+',
            BinaryOp::Sub => '-',
            BinaryOp::Mul => '*',
            BinaryOp::Div => '/',
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Text(String),
    CurrentDate,
    Neg(Box<Expr>),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Call {
        function: Function,
        args: Vec<Expr>,
    },
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Number(n) => write!(f, "{n}"),
            Expr::Text(s) => write!(f, "\"{s}\""),
            Expr::CurrentDate => f.write_str(CURRENT_DATE),
            Expr::Neg(inner) => write!(f, "-{inner}"),
            Expr::Binary { op, left, right } => write!(f, "({left} {} {right})", op.symbol()),
            Expr::Call { function, args } => {
                write!(f, "{function}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")
            }
        }
    }
}

/// A parsed, immutable factor formula.
#[derive(Debug, Clone, PartialEq)]
pub struct FactorExpression {
    source: String,
    ast: Expr,
}

impl FactorExpression {
    pub fn parse(source: &str) -> Result<Self, ParseError> {
        let ast = expr_parser::parse(source)?;
        Ok(Self {
            source: source.to_string(),
            ast,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn ast(&self) -> &Expr {
        &self.ast
    }
}

impl fmt::Display for FactorExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
