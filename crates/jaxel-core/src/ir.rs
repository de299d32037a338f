use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::BTreeSet;
use std::fmt::Write;

use crate::aval::ShapedArray;
use crate::params::Params;
use crate::primitive::Primitive;
use crate::value::{Literal, Value};

/// Program-unique identity of a binder within one jaxpr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VarId(pub u32);

/// An SSA binder: identity plus abstract value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Var {
    pub id: VarId,
    pub aval: ShapedArray,
}

impl Var {
    #[must_use]
    pub fn new(id: VarId, aval: ShapedArray) -> Self {
        Self { id, aval }
    }
}

/// An equation operand: a binder reference or an inline literal constant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Atom {
    Var(Var),
    Lit(Literal),
}

impl Atom {
    #[must_use]
    pub fn aval(&self) -> ShapedArray {
        match self {
            Self::Var(var) => var.aval.clone(),
            Self::Lit(lit) => ShapedArray::scalar(lit.natural_dtype()),
        }
    }

    #[must_use]
    pub fn as_var(&self) -> Option<&Var> {
        match self {
            Self::Var(var) => Some(var),
            Self::Lit(_) => None,
        }
    }
}

/// One IR statement: outputs, primitive, inputs, parameters, and nested
/// sub-jaxprs for call-like primitives (a `jit` call carries exactly one).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Equation {
    pub primitive: Primitive,
    pub inputs: SmallVec<[Atom; 4]>,
    pub outputs: SmallVec<[Var; 2]>,
    pub params: Params,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_jaxprs: Vec<Jaxpr>,
}

/// The typed IR: constants, inputs, equations, outputs.
///
/// Well-formedness invariants: every binder use is preceded by its
/// definition; binders bind exactly once; output atoms are bound binders or
/// literals. `validate_well_formed` checks all of them.
#[derive(Debug, Serialize, Deserialize)]
pub struct Jaxpr {
    pub invars: Vec<Var>,
    pub constvars: Vec<Var>,
    pub equations: Vec<Equation>,
    pub outs: Vec<Atom>,
    #[serde(skip)]
    fingerprint_cache: std::sync::OnceLock<String>,
}

impl Clone for Jaxpr {
    fn clone(&self) -> Self {
        Self {
            invars: self.invars.clone(),
            constvars: self.constvars.clone(),
            equations: self.equations.clone(),
            outs: self.outs.clone(),
            fingerprint_cache: std::sync::OnceLock::new(),
        }
    }
}

impl PartialEq for Jaxpr {
    fn eq(&self, other: &Self) -> bool {
        self.invars == other.invars
            && self.constvars == other.constvars
            && self.equations == other.equations
            && self.outs == other.outs
    }
}

impl Eq for Jaxpr {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JaxprValidationError {
    DuplicateBinding { section: &'static str, var: VarId },
    UnboundInputVar { equation_index: usize, var: VarId },
    OutputShadowsBinding { equation_index: usize, var: VarId },
    UnboundOutputAtom { var: VarId },
}

impl std::fmt::Display for JaxprValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateBinding { section, var } => {
                write!(f, "duplicate binding in {} for var v{}", section, var.0)
            }
            Self::UnboundInputVar {
                equation_index,
                var,
            } => {
                write!(
                    f,
                    "equation {} references unbound input var v{}",
                    equation_index, var.0
                )
            }
            Self::OutputShadowsBinding {
                equation_index,
                var,
            } => {
                write!(
                    f,
                    "equation {} output var v{} shadows an existing binding",
                    equation_index, var.0
                )
            }
            Self::UnboundOutputAtom { var } => {
                write!(f, "output atom v{} does not have a defining binding", var.0)
            }
        }
    }
}

impl std::error::Error for JaxprValidationError {}

impl Jaxpr {
    #[must_use]
    pub fn new(
        invars: Vec<Var>,
        constvars: Vec<Var>,
        equations: Vec<Equation>,
        outs: Vec<Atom>,
    ) -> Self {
        Self {
            invars,
            constvars,
            equations,
            outs,
            fingerprint_cache: std::sync::OnceLock::new(),
        }
    }

    /// Abstract values of the jaxpr outputs, in order.
    #[must_use]
    pub fn out_avals(&self) -> Vec<ShapedArray> {
        self.outs.iter().map(Atom::aval).collect()
    }

    /// Abstract values of the jaxpr inputs (constvars excluded), in order.
    #[must_use]
    pub fn in_avals(&self) -> Vec<ShapedArray> {
        self.invars.iter().map(|var| var.aval.clone()).collect()
    }

    /// Smallest id strictly greater than every id bound anywhere in this
    /// jaxpr. Used as a base when α-renaming during inlining.
    #[must_use]
    pub fn fresh_id_base(&self) -> u32 {
        let eqn_max = self
            .equations
            .iter()
            .flat_map(|eqn| eqn.outputs.iter())
            .map(|var| var.id.0)
            .max()
            .unwrap_or(0);
        let bound_max = self
            .invars
            .iter()
            .chain(self.constvars.iter())
            .map(|var| var.id.0)
            .max()
            .unwrap_or(0);
        eqn_max.max(bound_max) + 1
    }

    /// Canonical byte string identifying this jaxpr up to metadata caches.
    /// Two structurally equal jaxprs produce identical fingerprints.
    #[must_use]
    pub fn canonical_fingerprint(&self) -> &str {
        self.fingerprint_cache.get_or_init(|| {
            let mut out = String::new();
            write_binder_list(&mut out, "const", &self.constvars);
            write_binder_list(&mut out, "in", &self.invars);

            for eqn in &self.equations {
                let _ = write!(&mut out, "eqn:{}(", eqn.primitive.name());
                for atom in &eqn.inputs {
                    write_atom(&mut out, atom);
                    out.push(',');
                }
                out.push(')');
                out.push_str("->");
                for outvar in &eqn.outputs {
                    let _ = write!(&mut out, "v{}:{},", outvar.id.0, outvar.aval);
                }
                out.push('{');
                for (key, value) in &eqn.params {
                    let _ = write!(&mut out, "{key}={value};");
                }
                out.push('}');
                for sub in &eqn.sub_jaxprs {
                    out.push('<');
                    out.push_str(sub.canonical_fingerprint());
                    out.push('>');
                }
                out.push('|');
            }

            out.push_str("out=[");
            for atom in &self.outs {
                write_atom(&mut out, atom);
                out.push(',');
            }
            out.push(']');
            out
        })
    }

    pub fn validate_well_formed(&self) -> Result<(), JaxprValidationError> {
        let mut bindings = BTreeSet::new();

        for var in &self.constvars {
            if !bindings.insert(var.id) {
                return Err(JaxprValidationError::DuplicateBinding {
                    section: "constvars",
                    var: var.id,
                });
            }
        }
        for var in &self.invars {
            if !bindings.insert(var.id) {
                return Err(JaxprValidationError::DuplicateBinding {
                    section: "invars",
                    var: var.id,
                });
            }
        }

        for (equation_index, eqn) in self.equations.iter().enumerate() {
            for atom in &eqn.inputs {
                if let Atom::Var(var) = atom
                    && !bindings.contains(&var.id)
                {
                    return Err(JaxprValidationError::UnboundInputVar {
                        equation_index,
                        var: var.id,
                    });
                }
            }
            for out_var in &eqn.outputs {
                if !bindings.insert(out_var.id) {
                    return Err(JaxprValidationError::OutputShadowsBinding {
                        equation_index,
                        var: out_var.id,
                    });
                }
            }
            for sub in &eqn.sub_jaxprs {
                sub.validate_well_formed()?;
            }
        }

        for atom in &self.outs {
            if let Atom::Var(var) = atom
                && !bindings.contains(&var.id)
            {
                return Err(JaxprValidationError::UnboundOutputAtom { var: var.id });
            }
        }

        Ok(())
    }
}

/// A jaxpr together with the concrete constants captured at trace time,
/// one per constvar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosedJaxpr {
    pub jaxpr: Jaxpr,
    pub consts: Vec<Value>,
}

impl ClosedJaxpr {
    #[must_use]
    pub fn new(jaxpr: Jaxpr, consts: Vec<Value>) -> Self {
        Self { jaxpr, consts }
    }
}

fn write_binder_list(out: &mut String, label: &str, vars: &[Var]) {
    let _ = write!(out, "{label}=[");
    for var in vars {
        let _ = write!(out, "v{}:{},", var.id.0, var.aval);
    }
    out.push(']');
}

fn write_atom(out: &mut String, atom: &Atom) {
    match atom {
        Atom::Var(var) => {
            let _ = write!(out, "v{}", var.id.0);
        }
        Atom::Lit(lit) => write_literal(out, *lit),
    }
}

fn write_literal(out: &mut String, lit: Literal) {
    match lit {
        Literal::I64(value) => {
            let _ = write!(out, "i64:{value}");
        }
        Literal::Bool(value) => {
            let _ = write!(out, "bool:{value}");
        }
        Literal::F64Bits(value) => {
            let _ = write!(out, "f64bits:{value}");
        }
        Literal::Complex64Bits(re, im) => {
            let _ = write!(out, "c64:{re},{im}");
        }
    }
}
