//! Growth function.
//!
//! The growth function determines how a cell reacts to its neighborhood
//! influence: a smooth bump replacing discrete birth/death rules.

/// Compute growth: `G(u; mu, sigma) = 2 * exp(-(u - mu)^2 / (2*sigma^2)) - 1`
///
/// Output range: [-1, 1]
/// - Returns 1.0 when u == mu (optimal activation)
/// - Approaches -1.0 when u is far from mu
#[inline]
pub fn growth(u: f32, mu: f32, sigma: f32) -> f32 {
    let diff = u - mu;
    let sigma_sq_2 = 2.0 * sigma * sigma;
    2.0 * (-diff * diff / sigma_sq_2).exp() - 1.0
}
