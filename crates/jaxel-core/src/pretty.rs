//! Canonical text form of jaxprs.
//!
//! Binders are named `a, b, c, …, z, aa, ab, …` in definition order
//! (constvars, then invars, then equation outputs). The rendering is a pure
//! function of the jaxpr, so goldens can compare character-by-character.

use std::collections::BTreeMap;

use crate::ir::{Atom, Equation, Jaxpr, Var, VarId};
use crate::value::Literal;

#[must_use]
pub fn pretty(jaxpr: &Jaxpr) -> String {
    render_lines(jaxpr).join("\n")
}

fn render_lines(jaxpr: &Jaxpr) -> Vec<String> {
    let names = assign_names(jaxpr);

    let const_part = binder_list(&jaxpr.constvars, &names);
    let in_part = binder_list(&jaxpr.invars, &names);
    let binders = match (const_part.is_empty(), in_part.is_empty()) {
        (true, true) => String::new(),
        (true, false) => in_part,
        (false, true) => format!("{const_part} ;"),
        (false, false) => format!("{const_part} ; {in_part}"),
    };
    let header = if binders.is_empty() {
        "{ lambda .".to_owned()
    } else {
        format!("{{ lambda {binders} .")
    };

    let outs = paren_list(
        &jaxpr
            .outs
            .iter()
            .map(|atom| atom_str(atom, &names))
            .collect::<Vec<_>>(),
    );

    if jaxpr.equations.is_empty() {
        return vec![format!("{header} {outs} }}")];
    }

    let mut lines = vec![header];
    for (index, eqn) in jaxpr.equations.iter().enumerate() {
        let prefix = if index == 0 { "  let " } else { "      " };
        lines.push(format!("{prefix}{}", equation_str(eqn, &names)));
        for sub in &eqn.sub_jaxprs {
            lines.push("        jaxpr=".to_owned());
            for sub_line in render_lines(sub) {
                lines.push(format!("          {sub_line}"));
            }
        }
    }
    lines.push(format!("  in {outs} }}"));
    lines
}

fn assign_names(jaxpr: &Jaxpr) -> BTreeMap<VarId, String> {
    let mut names = BTreeMap::new();
    let mut next = 0_usize;
    let mut assign = |names: &mut BTreeMap<VarId, String>, var: &Var| {
        names.entry(var.id).or_insert_with(|| {
            let name = binder_name(next);
            next += 1;
            name
        });
    };
    for var in &jaxpr.constvars {
        assign(&mut names, var);
    }
    for var in &jaxpr.invars {
        assign(&mut names, var);
    }
    for eqn in &jaxpr.equations {
        for var in &eqn.outputs {
            assign(&mut names, var);
        }
    }
    names
}

/// Bijective base-26 naming: 0 → "a", 25 → "z", 26 → "aa", 27 → "ab".
fn binder_name(mut index: usize) -> String {
    let mut bytes = Vec::new();
    loop {
        bytes.push(b'a' + (index % 26) as u8);
        index /= 26;
        if index == 0 {
            break;
        }
        index -= 1;
    }
    bytes.reverse();
    String::from_utf8(bytes).unwrap_or_default()
}

fn binder_list(vars: &[Var], names: &BTreeMap<VarId, String>) -> String {
    vars.iter()
        .map(|var| binder_str(var, names))
        .collect::<Vec<_>>()
        .join(" ")
}

fn binder_str(var: &Var, names: &BTreeMap<VarId, String>) -> String {
    let name = names
        .get(&var.id)
        .map(String::as_str)
        .unwrap_or("?");
    format!("{name}:{}", var.aval)
}

fn atom_str(atom: &Atom, names: &BTreeMap<VarId, String>) -> String {
    match atom {
        Atom::Var(var) => names
            .get(&var.id)
            .cloned()
            .unwrap_or_else(|| "?".to_owned()),
        Atom::Lit(lit) => literal_str(*lit),
    }
}

fn literal_str(lit: Literal) -> String {
    match lit {
        Literal::I64(value) => format!("{value}"),
        Literal::Bool(value) => format!("{value}"),
        Literal::F64Bits(bits) => format!("{:?}", f64::from_bits(bits)),
        Literal::Complex64Bits(re, im) => {
            format!("{:?}+{:?}j", f32::from_bits(re), f32::from_bits(im))
        }
    }
}

fn equation_str(eqn: &Equation, names: &BTreeMap<VarId, String>) -> String {
    let outs = eqn
        .outputs
        .iter()
        .map(|var| binder_str(var, names))
        .collect::<Vec<_>>()
        .join(" ");

    let mut rhs = eqn.primitive.name().to_owned();
    if !eqn.params.is_empty() {
        let params = eqn
            .params
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join(" ");
        rhs.push('[');
        rhs.push_str(&params);
        rhs.push(']');
    }
    for atom in &eqn.inputs {
        rhs.push(' ');
        rhs.push_str(&atom_str(atom, names));
    }

    format!("{outs} = {rhs}")
}

fn paren_list(items: &[String]) -> String {
    if items.is_empty() {
        "( )".to_owned()
    } else {
        format!("( {} )", items.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::{binder_name, pretty};
    use crate::aval::ShapedArray;
    use crate::dtype::{DType, Shape};
    use crate::ir::{Atom, Equation, Jaxpr, Var, VarId};
    use crate::params::Params;
    use crate::primitive::Primitive;
    use crate::value::Literal;
    use smallvec::smallvec;

    #[test]
    fn binder_names_roll_over_alphabet() {
        assert_eq!(binder_name(0), "a");
        assert_eq!(binder_name(25), "z");
        assert_eq!(binder_name(26), "aa");
        assert_eq!(binder_name(27), "ab");
        assert_eq!(binder_name(51), "az");
        assert_eq!(binder_name(52), "ba");
    }

    #[test]
    fn constant_only_jaxpr_renders_on_one_line() {
        let jaxpr = Jaxpr::new(vec![], vec![], vec![], vec![Atom::Lit(Literal::I64(4))]);
        assert_eq!(pretty(&jaxpr), "{ lambda . ( 4 ) }");
    }

    #[test]
    fn golden_add_mul_program() {
        let aval = ShapedArray::new(DType::F32, Shape::from_dims(&[2, 3]));
        let a = Var::new(VarId(0), aval.clone());
        let b = Var::new(VarId(1), aval.clone());
        let c = Var::new(VarId(2), aval.clone());
        let jaxpr = Jaxpr::new(
            vec![a.clone()],
            vec![],
            vec![
                Equation {
                    primitive: Primitive::intern("add"),
                    inputs: smallvec![Atom::Var(a.clone()), Atom::Lit(Literal::I64(2))],
                    outputs: smallvec![b.clone()],
                    params: Params::new(),
                    sub_jaxprs: vec![],
                },
                Equation {
                    primitive: Primitive::intern("mul"),
                    inputs: smallvec![Atom::Var(b), Atom::Var(a)],
                    outputs: smallvec![c.clone()],
                    params: Params::new(),
                    sub_jaxprs: vec![],
                },
            ],
            vec![Atom::Var(c)],
        );

        let expected = "\
{ lambda a:f32[2,3] .
  let b:f32[2,3] = add a 2
      c:f32[2,3] = mul b a
  in ( c ) }";
        assert_eq!(pretty(&jaxpr), expected);
    }

    #[test]
    fn params_render_inline_sorted() {
        let aval = ShapedArray::new(DType::F64, Shape::from_dims(&[3]));
        let out_aval = ShapedArray::scalar(DType::F64);
        let a = Var::new(VarId(0), aval);
        let b = Var::new(VarId(1), out_aval);
        let mut params = Params::new();
        params.insert("axes".to_owned(), "0".to_owned());
        let jaxpr = Jaxpr::new(
            vec![a.clone()],
            vec![],
            vec![Equation {
                primitive: Primitive::intern("reduce_sum"),
                inputs: smallvec![Atom::Var(a)],
                outputs: smallvec![b.clone()],
                params,
                sub_jaxprs: vec![],
            }],
            vec![Atom::Var(b)],
        );

        let expected = "\
{ lambda a:f64[3] .
  let b:f64[] = reduce_sum[axes=0] a
  in ( b ) }";
        assert_eq!(pretty(&jaxpr), expected);
    }

    #[test]
    fn float_literals_keep_a_decimal_point() {
        let aval = ShapedArray::scalar(DType::F64);
        let a = Var::new(VarId(0), aval.clone());
        let b = Var::new(VarId(1), aval);
        let jaxpr = Jaxpr::new(
            vec![a.clone()],
            vec![],
            vec![Equation {
                primitive: Primitive::intern("mul"),
                inputs: smallvec![Atom::Var(a), Atom::Lit(Literal::from_f64(2.0))],
                outputs: smallvec![b.clone()],
                params: Params::new(),
                sub_jaxprs: vec![],
            }],
            vec![Atom::Var(b)],
        );
        let text = pretty(&jaxpr);
        assert!(text.contains("mul a 2.0"), "got: {text}");
    }

    #[test]
    fn pretty_is_deterministic() {
        let jaxpr = Jaxpr::new(vec![], vec![], vec![], vec![Atom::Lit(Literal::I64(4))]);
        assert_eq!(pretty(&jaxpr), pretty(&jaxpr.clone()));
    }
}
