use atomgrad::NetError;
use atomgrad::atoms::{Atom, Conditional, IndexedVariable, Predicate, ScalarVariable};
use atomgrad::functions::{
    cross_entropy, mean_squared_error, sigmoid_expr, softmax, softmax_derivative, softmax_expr,
};

const EPS: f64 = 1e-10;

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < EPS
}

#[test]
fn cube_derivative_is_three_x_squared() {
    let x = ScalarVariable::new("x");
    x.set_in_respect_to(true);
    let derivative = (x.atom() * x.atom() * x.atom()).derivative();

    for v in [0.0, 3.0, 7.0] {
        let got = derivative.eval_with(&[(&x, v)]).unwrap();
        assert!(close(got, 3.0 * v * v), "d/dx x^3 at {v}: got {got}");
    }
}

#[test]
fn quotient_rule_with_respect_to_numerator() {
    let x = ScalarVariable::new("x");
    let y = ScalarVariable::new("y");
    x.set_in_respect_to(true);
    let derivative = (x.atom() / y.atom()).derivative();
    assert!(close(derivative.eval_with(&[(&x, 2.0), (&y, 3.0)]).unwrap(), 1.0 / 3.0));
}

#[test]
fn quotient_rule_with_respect_to_denominator() {
    let x = ScalarVariable::new("x");
    let y = ScalarVariable::new("y");
    y.set_in_respect_to(true);
    let derivative = (x.atom() / y.atom()).derivative();
    assert!(close(derivative.eval_with(&[(&x, 2.0), (&y, 4.0)]).unwrap(), -2.0 / 16.0));
}

#[test]
fn exp_and_log_follow_the_chain_rule() {
    let x = ScalarVariable::new("x");
    x.set_in_respect_to(true);
    let exp = Atom::exp(2.0 * x.atom()).derivative();
    assert!(close(exp.eval_with(&[(&x, 0.5)]).unwrap(), 2.0 * 1.0_f64.exp()));

    let log = Atom::log(x.atom() * x.atom()).derivative();
    assert!(close(log.eval_with(&[(&x, 4.0)]).unwrap(), 0.5));
}

#[test]
fn evaluating_an_unbound_variable_fails() {
    let x = ScalarVariable::new("x");
    let f = x.atom() + 1.0;
    assert_eq!(
        f.eval(),
        Err(NetError::UnboundVariable { name: "x".into() })
    );
}

#[test]
fn derivative_leaves_the_original_tree_evaluable() {
    let x = ScalarVariable::new("x");
    x.set_in_respect_to(true);
    let f = x.atom() * x.atom() + 1.0;
    let before = f.to_string();
    let _ = f.derivative();
    assert_eq!(f.to_string(), before);
    assert!(close(f.eval_with(&[(&x, 2.0)]).unwrap(), 5.0));
}

#[test]
fn relu_derivative_is_a_step() {
    let x = ScalarVariable::new("x");
    let y = ScalarVariable::new("y");
    x.set_in_respect_to(true);
    let derivative = Atom::relu(x.atom() * y.atom() - 5.0).derivative();

    assert!(matches!(derivative, Atom::Conditional(_)));
    assert!(close(derivative.eval_with(&[(&x, 3.0), (&y, 2.0)]).unwrap(), 2.0));
    assert!(close(derivative.eval_with(&[(&x, 1.0), (&y, 2.0)]).unwrap(), 0.0));
}

#[test]
fn conditional_skips_the_branch_not_taken() {
    let x = ScalarVariable::new("x");
    let unbound = ScalarVariable::new("never_bound");
    let guarded = Atom::Conditional(Conditional::new(
        x.atom(),
        Predicate::Positive,
        unbound.atom(),
        Atom::constant(0.0),
    ));

    assert_eq!(guarded.eval_with(&[(&x, -1.0)]).unwrap(), 0.0);
    assert!(guarded.eval_with(&[(&x, 1.0)]).is_err());
}

#[test]
fn reduction_sums_every_slot() {
    let v = IndexedVariable::new("v", vec![1.0, 2.0, 3.0]);
    let over = v.clone();
    let sum = Atom::sum_of(&v, move |i| over.at(i));
    assert!(close(sum.eval().unwrap(), 6.0));
}

#[test]
fn reduction_restores_the_cursor() {
    let v = IndexedVariable::new("v", vec![1.0, 2.0, 3.0]);
    v.set_current_index(2);
    let over = v.clone();
    let sum = Atom::sum_of(&v, move |i| over.at(i));
    sum.eval().unwrap();
    assert_eq!(v.current_index(), 2);
}

#[test]
fn reduction_derivative_only_sees_the_target_slot() {
    let v = IndexedVariable::new("v", vec![1.0, 2.0, 3.0]);
    let over = v.clone();
    let sum = Atom::sum_of(&v, move |i| over.at(i));

    v.set_in_respect_to(true);
    v.set_target_index(Some(0));
    let derivative = sum.derivative();
    for cursor in 0..3 {
        v.set_current_index(cursor);
        assert!(close(derivative.eval().unwrap(), 1.0));
    }
}

#[test]
fn product_with_its_own_reduction() {
    let v = IndexedVariable::new("v", vec![1.0, 2.0, 3.0]);
    let over = v.clone();
    let f = v.current() * Atom::sum_of(&v, move |i| over.at(i));

    v.set_in_respect_to(true);
    v.set_current_index(0);
    assert!(close(f.derivative().eval().unwrap(), 7.0));
}

#[test]
fn reading_past_the_end_reports_the_slot() {
    let v = IndexedVariable::new("v", vec![1.0]);
    v.set_current_index(4);
    assert_eq!(
        v.current().eval(),
        Err(NetError::IndexOutOfBounds {
            name: "v".into(),
            index: 4,
            len: 1
        })
    );
}

#[test]
fn cursor_guard_restores_state() {
    let v = IndexedVariable::new("v", vec![1.0, 2.0]);
    v.set_current_index(1);
    {
        let _guard = v.scope();
        v.set_current_index(0);
        v.set_target_index(Some(0));
        v.set_in_respect_to(true);
    }
    assert_eq!(v.current_index(), 1);
    assert_eq!(v.target_index(), None);
    assert!(!v.is_in_respect_to());
}

#[test]
fn softmax_is_a_distribution_with_a_known_jacobian() {
    let v = [1.0, 2.0, 3.0, -4.0];
    let s = softmax(&v);
    assert!(close(s.iter().sum::<f64>(), 1.0));

    for o in 0..v.len() {
        for i in 0..v.len() {
            let expected = if o == i { s[o] * (1.0 - s[o]) } else { -s[o] * s[i] };
            assert!(close(softmax_derivative(&v, o, i), expected));
        }
    }
}

#[test]
fn softmax_expression_matches_the_closed_form() {
    let values = [1.0, 2.0, 3.0];
    let s = softmax(&values);
    let x = IndexedVariable::new("x", values);
    let expression = softmax_expr(&x);
    let derivative = expression.derivative();

    for i in 0..values.len() {
        x.set_current_index(i);
        x.set_in_respect_to(false);
        assert!(close(expression.eval().unwrap(), s[i]));

        x.set_in_respect_to(true);
        assert!(close(derivative.eval().unwrap(), s[i] * (1.0 - s[i])));
    }
}

#[test]
fn cross_entropy_value_and_gradient() {
    let y = [0.2, 0.3, 0.5];
    let y_hat = [0.1, 0.6, 0.3];
    let expected = IndexedVariable::new("y", y);
    let predicted = IndexedVariable::new("y_hat", y_hat);
    let loss = cross_entropy(&expected, &predicted);

    let manual: f64 = -y.iter().zip(&y_hat).map(|(a, b)| a * b.ln()).sum::<f64>();
    assert!(close(loss.eval().unwrap(), manual));

    predicted.set_in_respect_to(true);
    let derivative = loss.derivative();
    for k in 0..3 {
        predicted.set_current_index(k);
        assert!(close(derivative.eval().unwrap(), -y[k] / y_hat[k]));
    }

    predicted.set_current_index(0);
    predicted.set_target_index(Some(1));
    assert!(close(loss.derivative().eval().unwrap(), -0.5));
}

#[test]
fn mean_squared_error_gradient() {
    let expected = IndexedVariable::new("y", [1.0, 0.0]);
    let predicted = IndexedVariable::new("y_hat", [0.5, 0.5]);
    let loss = mean_squared_error(&expected, &predicted);
    assert!(close(loss.eval().unwrap(), 0.25));

    predicted.set_in_respect_to(true);
    let derivative = loss.derivative();
    predicted.set_current_index(0);
    assert!(close(derivative.eval().unwrap(), -0.5));
    predicted.set_current_index(1);
    assert!(close(derivative.eval().unwrap(), 0.5));
}

#[test]
fn sigmoid_derivative_is_s_times_one_minus_s() {
    let x = IndexedVariable::new("x", [0.0, 2.0]);
    let expression = sigmoid_expr(&x);
    x.set_in_respect_to(true);
    let derivative = expression.derivative();

    for i in 0..2 {
        x.set_current_index(i);
        let s = expression.eval().unwrap();
        assert!(close(derivative.eval().unwrap(), s * (1.0 - s)));
    }
}
