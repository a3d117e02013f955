//! Expression tree shared by parsed and compiled formulas
//!
//! `Expr<String>` is what the parser produces (leaves are aliases);
//! `Expr<Operand>` is what the compiler produces (leaves index into a
//! sample's arrays). Evaluation walks the tree with a leaf resolver.

use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    fn apply(self, lhs: f64, rhs: f64) -> f64 {
        match self {
            Self::Add => lhs + rhs,
            Self::Sub => lhs - rhs,
            Self::Mul => lhs * rhs,
            Self::Div => lhs / rhs,
        }
    }

    fn symbol(self) -> char {
        match self {
            Self::Add => '+',
            Self::Sub => '-',
            Self::Mul => '*',
            Self::Div => '/',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Max,
    Min,
}

impl Function {
    /// Case-insensitive lookup
    pub fn from_name(name: &str) -> Option<Self> {
        if name.eq_ignore_ascii_case("max") {
            Some(Self::Max)
        } else if name.eq_ignore_ascii_case("min") {
            Some(Self::Min)
        } else {
            None
        }
    }
}

/// A leaf could not be resolved for this sample
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    #[error("operand {operand} is not available for this sample")]
    MissingOperand { operand: String },

    #[error("result is not a finite number")]
    NonFinite,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr<R> {
    Const(f64),
    Ref(R),
    Neg(Box<Expr<R>>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr<R>>,
        rhs: Box<Expr<R>>,
    },
    Call {
        func: Function,
        args: Vec<Expr<R>>,
    },
}

impl<R> Expr<R> {
    pub fn binary(op: BinaryOp, lhs: Expr<R>, rhs: Expr<R>) -> Self {
        Self::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    /// Every leaf reference, in left-to-right order
    pub fn refs(&self) -> Vec<&R> {
        let mut out = Vec::new();
        self.collect_refs(&mut out);
        out
    }

    fn collect_refs<'a>(&'a self, out: &mut Vec<&'a R>) {
        match self {
            Self::Const(_) => {}
            Self::Ref(r) => out.push(r),
            Self::Neg(inner) => inner.collect_refs(out),
            Self::Binary { lhs, rhs, .. } => {
                lhs.collect_refs(out);
                rhs.collect_refs(out);
            }
            Self::Call { args, .. } => args.iter().for_each(|a| a.collect_refs(out)),
        }
    }

    /// Replace every leaf with an expression, failing on the first leaf `f` rejects
    pub fn try_substitute<S, E, F>(self, f: &mut F) -> Result<Expr<S>, E>
    where
        F: FnMut(R) -> Result<Expr<S>, E>,
    {
        Ok(match self {
            Self::Const(v) => Expr::Const(v),
            Self::Ref(r) => f(r)?,
            Self::Neg(inner) => Expr::Neg(Box::new(inner.try_substitute(f)?)),
            Self::Binary { op, lhs, rhs } => {
                let lhs = lhs.try_substitute(f)?;
                let rhs = rhs.try_substitute(f)?;
                Expr::binary(op, lhs, rhs)
            }
            Self::Call { func, args } => Expr::Call {
                func,
                args: args
                    .into_iter()
                    .map(|a| a.try_substitute(f))
                    .collect::<Result<_, _>>()?,
            },
        })
    }

    pub fn eval<F>(&self, resolve: &F) -> Result<f64, EvalError>
    where
        F: Fn(&R) -> Result<f64, EvalError>,
    {
        match self {
            Self::Const(v) => Ok(*v),
            Self::Ref(r) => resolve(r),
            Self::Neg(inner) => Ok(-inner.eval(resolve)?),
            Self::Binary { op, lhs, rhs } => Ok(op.apply(lhs.eval(resolve)?, rhs.eval(resolve)?)),
            Self::Call { func, args } => {
                let mut values = args.iter().map(|a| a.eval(resolve));
                let first = values.next().ok_or(EvalError::NonFinite)??;
                values.try_fold(first, |acc, v| {
                    let v = v?;
                    Ok(match func {
                        Function::Max => acc.max(v),
                        Function::Min => acc.min(v),
                    })
                })
            }
        }
    }
}

impl<R: fmt::Display> fmt::Display for Expr<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Const(v) => write!(f, "{v}"),
            Self::Ref(r) => write!(f, "{r}"),
            Self::Neg(inner) => write!(f, "-{inner}"),
            Self::Binary { op, lhs, rhs } => write!(f, "({lhs} {} {rhs})", op.symbol()),
            Self::Call { func, args } => {
                let name = match func {
                    Function::Max => "MAX",
                    Function::Min => "MIN",
                };
                write!(f, "{name}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
        }
    }
}
