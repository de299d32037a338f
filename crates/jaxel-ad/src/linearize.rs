//! Linearisation: stage the jvp of a function and partially evaluate it with
//! the tangents unknown.
//!
//! The known half runs once on the primals and yields the primal outputs
//! plus the residual values; the unknown half is a jaxpr linear in its
//! tangent inputs, closed over the residuals. Its transpose realises
//! reverse-mode differentiation.

use jaxel_core::{CoreError, Jaxpr, ShapedArray};
use jaxel_trace::{
    FlatFn, Tracer, eval_jaxpr_traced, partial_eval_jaxpr, stage_function,
};

use crate::jvp::jvp_flat;
use crate::transpose::eval_transposed;

/// One output of a linearised function.
#[derive(Debug, Clone)]
enum LinearOut {
    /// Produced by the linear jaxpr at this output position.
    FromJaxpr(usize),
    /// Independent of the tangent inputs (a propagated zero tangent).
    Constant(Tracer),
}

/// The linear map captured by `linearize`: a jaxpr over the tangent inputs,
/// closed over residual values from the primal pass.
#[derive(Debug, Clone)]
pub struct LinearMap {
    jaxpr: Jaxpr,
    residuals: Vec<Tracer>,
    tangent_avals: Vec<ShapedArray>,
    outs: Vec<LinearOut>,
}

impl LinearMap {
    /// Number of tangent inputs.
    #[must_use]
    pub fn num_inputs(&self) -> usize {
        self.tangent_avals.len()
    }

    /// Number of outputs.
    #[must_use]
    pub fn num_outputs(&self) -> usize {
        self.outs.len()
    }

    /// The linear jaxpr (residual inputs first, then tangent inputs).
    #[must_use]
    pub fn jaxpr(&self) -> &Jaxpr {
        &self.jaxpr
    }

    /// Apply the linear map forward to a tangent vector.
    pub fn forward(&self, tangents: &[Tracer]) -> Result<Vec<Tracer>, CoreError> {
        if tangents.len() != self.tangent_avals.len() {
            return Err(CoreError::shape(
                "linearize",
                format!(
                    "expected {} tangents, got {}",
                    self.tangent_avals.len(),
                    tangents.len()
                ),
            ));
        }
        let mut inputs = self.residuals.clone();
        inputs.extend(tangents.iter().cloned());
        let jaxpr_outs = eval_jaxpr_traced(&self.jaxpr, &[], &inputs)?;
        self.outs
            .iter()
            .map(|out| match out {
                LinearOut::FromJaxpr(index) => Ok(jaxpr_outs[*index].clone()),
                LinearOut::Constant(tracer) => Ok(tracer.clone()),
            })
            .collect()
    }

    /// Apply the transposed map to output cotangents, producing one
    /// cotangent per tangent input (zeros where nothing contributed).
    pub fn backward(&self, cotangents: &[Tracer]) -> Result<Vec<Tracer>, CoreError> {
        if cotangents.len() != self.outs.len() {
            return Err(CoreError::shape(
                "transpose",
                format!(
                    "expected {} cotangents, got {}",
                    self.outs.len(),
                    cotangents.len()
                ),
            ));
        }
        let mut seeded: Vec<Option<Tracer>> = vec![None; self.jaxpr.outs.len()];
        for (out, cotangent) in self.outs.iter().zip(cotangents.iter()) {
            if let LinearOut::FromJaxpr(index) = out {
                seeded[*index] = Some(cotangent.clone());
            }
        }
        eval_transposed(&self.jaxpr, &self.residuals, &seeded, &self.tangent_avals)
    }
}

/// Linearise `f` at the given primals: returns the primal outputs and the
/// linear map over tangents. Works on tracers, so it composes with enclosing
/// traces.
pub fn linearize_flat(
    f: FlatFn<'_>,
    primals: &[Tracer],
) -> Result<(Vec<Tracer>, LinearMap), CoreError> {
    let n = primals.len();
    let in_avals: Vec<ShapedArray> = primals
        .iter()
        .map(Tracer::aval)
        .collect::<Result<Vec<_>, _>>()?;
    let mut staged_avals = in_avals.clone();
    staged_avals.extend(in_avals.iter().cloned());

    // Stage (p, t) ↦ jvp(f, p, t) with primal outputs before tangent outputs.
    let jvp_fn = |args: &[Tracer]| -> Result<Vec<Tracer>, CoreError> {
        let (primal_args, tangent_args) = args.split_at(n);
        let (mut primal_outs, tangent_outs) = jvp_flat(f, primal_args, tangent_args)?;
        primal_outs.extend(tangent_outs);
        Ok(primal_outs)
    };
    let (jaxpr, consts) = stage_function(&jvp_fn, &staged_avals)?;

    if jaxpr.outs.len() % 2 != 0 {
        return Err(CoreError::shape("linearize", "unpaired jvp outputs"));
    }
    let num_outs = jaxpr.outs.len() / 2;

    let mut unknown_mask = vec![false; n];
    unknown_mask.extend(std::iter::repeat_n(true, n));
    let split = partial_eval_jaxpr(&jaxpr, &unknown_mask)?;

    // The known half computes the primal outputs, any constant tangent
    // outputs, and the residuals.
    let known_values = eval_jaxpr_traced(&split.jaxpr_known, &consts, primals)?;
    let num_known_outs = split.out_unknowns.iter().filter(|unknown| !**unknown).count();
    let (known_outs, residuals) = known_values.split_at(num_known_outs);

    let mut known_iter = known_outs.iter();
    let mut unknown_index = 0_usize;
    let mut primal_outs = Vec::with_capacity(num_outs);
    let mut linear_outs = Vec::with_capacity(num_outs);
    for (position, unknown) in split.out_unknowns.iter().enumerate() {
        if *unknown {
            if position >= num_outs {
                linear_outs.push(LinearOut::FromJaxpr(unknown_index));
            } else {
                return Err(CoreError::shape(
                    "linearize",
                    "primal output depends on tangent inputs",
                ));
            }
            unknown_index += 1;
        } else {
            let value = known_iter
                .next()
                .cloned()
                .ok_or_else(|| CoreError::shape("linearize", "known output underflow"))?;
            if position < num_outs {
                primal_outs.push(value);
            } else {
                linear_outs.push(LinearOut::Constant(value));
            }
        }
    }

    let tangent_avals = in_avals;
    let linear = LinearMap {
        jaxpr: split.jaxpr_unknown,
        residuals: residuals.to_vec(),
        tangent_avals,
        outs: linear_outs,
    };
    Ok((primal_outs, linear))
}

#[cfg(test)]
mod tests {
    use super::linearize_flat;
    use jaxel_core::CoreError;
    use jaxel_lax::ops;
    use jaxel_trace::Tracer;

    fn square(args: &[Tracer]) -> Result<Vec<Tracer>, CoreError> {
        Ok(vec![ops::mul(&args[0], &args[0])?])
    }

    #[test]
    fn linearize_square_gives_doubling_map() {
        let (primals, linear) = linearize_flat(&square, &[Tracer::scalar_f64(3.0)]).unwrap();
        assert_eq!(primals[0].to_value().unwrap().as_f64_scalar(), Some(9.0));
        assert_eq!(linear.num_inputs(), 1);
        assert_eq!(linear.num_outputs(), 1);

        let tangent_out = linear.forward(&[Tracer::scalar_f64(1.0)]).unwrap();
        assert_eq!(
            tangent_out[0].to_value().unwrap().as_f64_scalar(),
            Some(6.0)
        );

        let cotangent_in = linear.backward(&[Tracer::scalar_f64(1.0)]).unwrap();
        assert_eq!(
            cotangent_in[0].to_value().unwrap().as_f64_scalar(),
            Some(6.0)
        );
    }

    #[test]
    fn linearize_is_linear_in_tangents() {
        let f = |args: &[Tracer]| -> Result<Vec<Tracer>, CoreError> {
            Ok(vec![ops::sin(&args[0])?])
        };
        let (_, linear) = linearize_flat(&f, &[Tracer::scalar_f64(0.5)]).unwrap();
        let at_one = linear.forward(&[Tracer::scalar_f64(1.0)]).unwrap()[0]
            .to_value()
            .unwrap()
            .as_f64_scalar()
            .unwrap();
        let at_three = linear.forward(&[Tracer::scalar_f64(3.0)]).unwrap()[0]
            .to_value()
            .unwrap()
            .as_f64_scalar()
            .unwrap();
        assert!((at_three - 3.0 * at_one).abs() < 1e-12);
    }

    #[test]
    fn forward_and_backward_agree_on_inner_products() {
        // <J v, c> == <v, J^T c> for scalar functions reduces to equality of
        // products.
        let f = |args: &[Tracer]| -> Result<Vec<Tracer>, CoreError> {
            let y = ops::mul(&args[0], &ops::cos(&args[0])?)?;
            Ok(vec![y])
        };
        let (_, linear) = linearize_flat(&f, &[Tracer::scalar_f64(1.1)]).unwrap();
        let v = 0.7_f64;
        let c = 2.3_f64;
        let forward = linear.forward(&[Tracer::scalar_f64(v)]).unwrap()[0]
            .to_value()
            .unwrap()
            .as_f64_scalar()
            .unwrap();
        let backward = linear.backward(&[Tracer::scalar_f64(c)]).unwrap()[0]
            .to_value()
            .unwrap()
            .as_f64_scalar()
            .unwrap();
        assert!((forward * c - backward * v).abs() < 1e-10);
    }
}
