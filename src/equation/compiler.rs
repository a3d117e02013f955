// Per-configuration formula compilation
//
// Each configuration group fixes an event ordering, so the same metric
// compiles to different array indices (or to a degraded state) depending
// on which group a sample was collected with.

use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{debug, warn};

use super::expr::{BinaryOp, EvalError, Expr};
use super::parser::{parse_formula, FormulaError};
use crate::catalog::{
    composite_byte, ConfigurationGroup, MetricCatalog, MetricDefinition, DURATION_MS_CONSTANT,
    PACKED_METRICS_EVENT, SLOTS_EVENT,
};
use crate::error::{Error, Result};

/// Leaf of a compiled formula
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    /// `end - begin` of the event at this position
    Delta(usize),
    Begin(usize),
    End(usize),
    /// One byte of a begin read (packed register)
    BeginByte { event: usize, byte: u8 },
    /// One byte of an end read (packed register)
    EndByte { event: usize, byte: u8 },
    /// Result of the configuration's k-th interpolation
    PerfMetric(usize),
    /// Position in the sample's constant list
    Constant(usize),
    /// The sample's own duration in milliseconds
    DurationMs,
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Delta(i) => write!(f, "delta[{i}]"),
            Self::Begin(i) => write!(f, "begin[{i}]"),
            Self::End(i) => write!(f, "end[{i}]"),
            Self::BeginByte { event, byte } => write!(f, "begin[{event}].byte{byte}"),
            Self::EndByte { event, byte } => write!(f, "end[{event}].byte{byte}"),
            Self::PerfMetric(k) => write!(f, "perf[{k}]"),
            Self::Constant(i) => write!(f, "const[{i}]"),
            Self::DurationMs => write!(f, "duration_ms"),
        }
    }
}

/// Per-sample arrays a compiled formula reads from
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    pub deltas: &'a [f64],
    pub begin: &'a [u64],
    pub end: &'a [u64],
    pub perf_metrics: &'a [f64],
    pub constants: &'a [f64],
    pub duration_ms: f64,
}

impl EvalContext<'_> {
    fn resolve(&self, operand: &Operand) -> std::result::Result<f64, EvalError> {
        let missing = || EvalError::MissingOperand {
            operand: operand.to_string(),
        };
        let byte = |value: u64, byte: u8| ((value >> (8 * u32::from(byte))) & 0xff) as f64;

        match *operand {
            Operand::Delta(i) => self.deltas.get(i).copied().ok_or_else(missing),
            Operand::Begin(i) => self.begin.get(i).map(|v| *v as f64).ok_or_else(missing),
            Operand::End(i) => self.end.get(i).map(|v| *v as f64).ok_or_else(missing),
            Operand::BeginByte { event, byte: b } => {
                self.begin.get(event).map(|v| byte(*v, b)).ok_or_else(missing)
            }
            Operand::EndByte { event, byte: b } => {
                self.end.get(event).map(|v| byte(*v, b)).ok_or_else(missing)
            }
            Operand::PerfMetric(k) => self.perf_metrics.get(k).copied().ok_or_else(missing),
            Operand::Constant(i) => self.constants.get(i).copied().ok_or_else(missing),
            Operand::DurationMs => Ok(self.duration_ms),
        }
    }
}

/// A named formula bound to one configuration's arrays
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledEquation {
    pub name: String,
    expr: Expr<Operand>,
}

impl CompiledEquation {
    pub fn expr(&self) -> &Expr<Operand> {
        &self.expr
    }

    /// Evaluate against one sample; non-finite results are errors
    pub fn evaluate(&self, ctx: &EvalContext<'_>) -> std::result::Result<f64, EvalError> {
        let value = self.expr.eval(&|op: &Operand| ctx.resolve(op))?;
        if value.is_finite() {
            Ok(value)
        } else {
            Err(EvalError::NonFinite)
        }
    }
}

/// Why a metric could not be compiled for a configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DegradeReason {
    #[error("event '{event}' is not programmed by any configuration")]
    EventUnavailable { event: String },

    #[error("composite event '{event}' needs {PACKED_METRICS_EVENT} and {SLOTS_EVENT} in one configuration")]
    MissingRegisters { event: String },

    #[error("constant '{constant}' has no position in the sample constants")]
    ConstantUnavailable { constant: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DegradedMetric {
    pub metric: String,
    pub reason: DegradeReason,
}

/// Everything needed to evaluate samples collected with one configuration group
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledConfig {
    pub index: usize,
    pub event_names: Vec<String>,
    /// Packed-counter interpolations, evaluated before `equations`
    pub interpolations: Vec<CompiledEquation>,
    pub equations: Vec<CompiledEquation>,
    pub degraded: Vec<DegradedMetric>,
}

impl CompiledConfig {
    /// At least one requested metric could not be compiled
    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }
}

enum Unresolved {
    Degrade(DegradeReason),
    Fatal(FormulaError),
}

struct ConfigBuilder<'a> {
    catalog: &'a MetricCatalog,
    index: usize,
    group: &'a ConfigurationGroup,
    interpolations: Vec<CompiledEquation>,
}

impl ConfigBuilder<'_> {
    fn position(&self, event: &str) -> Option<usize> {
        self.group.event_names.iter().position(|e| e == event)
    }

    /// Operand expression for one event name in this configuration
    fn event(&mut self, event: &str) -> std::result::Result<Expr<Operand>, Unresolved> {
        if let Some(pos) = self.position(event) {
            return Ok(Expr::Ref(Operand::Delta(pos)));
        }

        if let Some(byte) = composite_byte(event) {
            return self.interpolation(event, byte);
        }

        if self.catalog.is_event_programmed(event) {
            // Multiplexed into another group: contributes nothing here
            Ok(Expr::Const(0.0))
        } else {
            Err(Unresolved::Degrade(DegradeReason::EventUnavailable {
                event: event.to_string(),
            }))
        }
    }

    // (byte(end[P], i) * end[S] - byte(begin[P], i) * begin[S]) / 255
    fn interpolation(
        &mut self,
        event: &str,
        byte: u8,
    ) -> std::result::Result<Expr<Operand>, Unresolved> {
        if let Some(k) = self.interpolations.iter().position(|i| i.name == event) {
            return Ok(Expr::Ref(Operand::PerfMetric(k)));
        }

        let (Some(packed), Some(slots)) = (self.position(PACKED_METRICS_EVENT), self.position(SLOTS_EVENT))
        else {
            if self.catalog.has_packed_registers() {
                // Multiplexed into another group, like a plain event
                return Ok(Expr::Const(0.0));
            }
            return Err(Unresolved::Degrade(DegradeReason::MissingRegisters {
                event: event.to_string(),
            }));
        };

        let end = Expr::binary(
            BinaryOp::Mul,
            Expr::Ref(Operand::EndByte { event: packed, byte }),
            Expr::Ref(Operand::End(slots)),
        );
        let begin = Expr::binary(
            BinaryOp::Mul,
            Expr::Ref(Operand::BeginByte { event: packed, byte }),
            Expr::Ref(Operand::Begin(slots)),
        );
        let expr = Expr::binary(
            BinaryOp::Div,
            Expr::binary(BinaryOp::Sub, end, begin),
            Expr::Const(255.0),
        );

        self.interpolations.push(CompiledEquation {
            name: event.to_string(),
            expr,
        });
        Ok(Expr::Ref(Operand::PerfMetric(self.interpolations.len() - 1)))
    }

    fn constant(&self, name: &str) -> std::result::Result<Expr<Operand>, Unresolved> {
        if name == DURATION_MS_CONSTANT {
            return Ok(Expr::Ref(Operand::DurationMs));
        }
        self.catalog
            .constant_position(self.index, name)
            .map(|i| Expr::Ref(Operand::Constant(i)))
            .ok_or_else(|| {
                Unresolved::Degrade(DegradeReason::ConstantUnavailable {
                    constant: name.to_string(),
                })
            })
    }

    fn metric(
        &mut self,
        definition: &MetricDefinition,
        parsed: &Expr<String>,
    ) -> std::result::Result<Expr<Operand>, Unresolved> {
        parsed.clone().try_substitute(&mut |alias: String| {
            if let Some(event) = definition.events.iter().find(|e| e.alias == alias) {
                return self.event(&event.name);
            }
            if let Some(constant) = definition.constants.iter().find(|c| c.alias == alias) {
                return self.constant(&constant.name);
            }
            Err(Unresolved::Fatal(FormulaError::UnboundAlias { alias }))
        })
    }
}

/// Compile every configuration group of a validated catalog
///
/// Parse failures and unbound aliases are fatal; unavailable events only
/// degrade the affected configuration.
pub fn compile_catalog(catalog: &MetricCatalog) -> Result<Vec<CompiledConfig>> {
    // Each requested formula is parsed once and shared by all groups
    let mut parsed: HashMap<&str, (&MetricDefinition, Expr<String>)> = HashMap::new();
    for group in &catalog.configs {
        for name in &group.metrics {
            if parsed.contains_key(name.as_str()) {
                continue;
            }
            let definition = catalog
                .metric(name)
                .ok_or_else(|| Error::Catalog(format!("unknown metric '{name}'")))?;
            let expr = parse_formula(&definition.formula).map_err(|source| Error::Formula {
                metric: name.clone(),
                source,
            })?;
            parsed.insert(name.as_str(), (definition, expr));
        }
    }

    let mut compiled = Vec::with_capacity(catalog.configs.len());
    for (index, group) in catalog.configs.iter().enumerate() {
        let mut builder = ConfigBuilder {
            catalog,
            index,
            group,
            interpolations: Vec::new(),
        };
        let mut equations = Vec::new();
        let mut degraded = Vec::new();

        for name in &group.metrics {
            let Some((definition, expr)) = parsed.get(name.as_str()) else {
                continue;
            };
            match builder.metric(definition, expr) {
                Ok(expr) => equations.push(CompiledEquation {
                    name: name.clone(),
                    expr,
                }),
                Err(Unresolved::Degrade(reason)) => {
                    warn!(config = index, metric = %name, %reason, "metric degraded to raw deltas");
                    degraded.push(DegradedMetric {
                        metric: name.clone(),
                        reason,
                    });
                }
                Err(Unresolved::Fatal(source)) => {
                    return Err(Error::Formula {
                        metric: name.clone(),
                        source,
                    })
                }
            }
        }

        debug!(
            config = index,
            equations = equations.len(),
            interpolations = builder.interpolations.len(),
            degraded = degraded.len(),
            "configuration compiled"
        );
        compiled.push(CompiledConfig {
            index,
            event_names: group.event_names.clone(),
            interpolations: builder.interpolations,
            equations,
            degraded,
        });
    }

    let requested = catalog.configs.iter().any(|g| !g.metrics.is_empty());
    if requested && compiled.iter().all(|c| c.equations.is_empty()) {
        return Err(Error::Catalog(
            "no metric equation compiles for any configuration".into(),
        ));
    }

    Ok(compiled)
}
