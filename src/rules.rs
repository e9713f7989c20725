//! Local derivative rules for the non-linear operations.
//!
//! Domain errors are not checked: a fractional power of a negative base
//! yields NaN, and that NaN flows through backward like any other value.

use num_traits::Float;

pub fn pow_forward<T: Float>(base: T, exp: T) -> T {
    base.powf(exp)
}

/// d/dx x^e = e * x^(e-1)
pub fn pow_local_grad<T: Float>(base: T, exp: T) -> T {
    exp * base.powf(exp - T::one())
}

pub fn relu_forward<T: Float>(x: T) -> T {
    x.max(T::zero())
}

/// Keyed on the relu node's own output, so an input of exactly zero
/// passes no gradient.
pub fn relu_local_grad<T: Float>(out: T) -> T {
    if out > T::zero() {
        T::one()
    } else {
        T::zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn pow_grad_matches_closed_form() {
        assert_relative_eq!(pow_local_grad(2.0_f64, 3.0), 12.0);
        assert_relative_eq!(pow_local_grad(-2.0_f64, 2.0), -4.0);
        assert_relative_eq!(pow_local_grad(4.0_f64, -1.0), -1.0 / 16.0);
    }

    #[test]
    fn fractional_power_of_negative_base_is_nan() {
        assert!(pow_forward(-2.0_f64, 0.5).is_nan());
        assert!(pow_local_grad(-2.0_f64, 0.5).is_nan());
    }

    #[test]
    fn relu_at_zero_is_inert() {
        assert_eq!(relu_forward(0.0_f64), 0.0);
        assert_eq!(relu_local_grad(0.0_f64), 0.0);
        assert_eq!(relu_forward(-3.0_f32), 0.0);
        assert_eq!(relu_local_grad(2.5_f32), 1.0);
    }
}
