//! Metric formula language
//!
//! Formulas such as `100 * (a - b) / c` are parsed once into an expression
//! tree over their aliases, then compiled per configuration group into trees
//! whose leaves index a sample's delta, begin/end, interpolation and constant
//! arrays. Supported: `+ - * /`, unary minus, parentheses and `MAX`/`MIN`
//! with two or more arguments.

mod compiler;
mod expr;
mod parser;

pub use compiler::{
    compile_catalog, CompiledConfig, CompiledEquation, DegradeReason, DegradedMetric, EvalContext,
    Operand,
};
pub use expr::{BinaryOp, EvalError, Expr, Function};
pub use parser::{parse_formula, FormulaError, MAX_DEPTH};
