use std::f64::consts::PI;

use super::{Rating, RatingError};
use crate::config::RatingConfig;

/// Conversion factor between the public and the Glicko-2 internal scale
const SCALE: f64 = 173.7178;
const CENTER: f64 = 1500.0;
const CONVERGENCE: f64 = 0.000_001;
const MAX_ITERATIONS: usize = 1_000;

/// Computes a player's new rating from one rating period.
pub trait RatingAlgorithm: Send + Sync {
    /// `outcomes[i]` is the result against `opponents[i]`: 1 win, 0.5 draw, 0 loss.
    fn rate(
        &self,
        current: Rating,
        opponents: &[Rating],
        outcomes: &[f64],
    ) -> Result<Rating, RatingError>;

    /// Rating of a user who has never been rated
    fn default_rating(&self) -> Rating;
}

/// Maps the score difference of two members onto a pairwise result.
pub fn pairwise_outcome(mine: f64, theirs: f64) -> f64 {
    (0.5 + (mine - theirs) / 200.0).clamp(0.0, 1.0)
}

/// Glickman's Glicko-2 system, volatility found by the Illinois method.
#[derive(Debug, Clone)]
pub struct Glicko2 {
    tau: f64,
    initial: Rating,
}

impl Default for Glicko2 {
    fn default() -> Self {
        Self::new(0.5, Rating::new(1500.0, 350.0, 0.06))
    }
}

impl Glicko2 {
    pub fn new(tau: f64, initial: Rating) -> Self {
        Self { tau, initial }
    }

    pub fn from_config(config: &RatingConfig) -> Self {
        Self::new(
            config.tau,
            Rating::new(
                config.initial_rating,
                config.initial_deviation,
                config.initial_volatility,
            ),
        )
    }

    fn new_volatility(&self, phi: f64, sigma: f64, variance: f64, delta: f64) -> Result<f64, RatingError> {
        let a = (sigma * sigma).ln();
        let tau2 = self.tau * self.tau;
        let f = |x: f64| {
            let ex = x.exp();
            let denom = phi * phi + variance + ex;
            ex * (delta * delta - phi * phi - variance - ex) / (2.0 * denom * denom) - (x - a) / tau2
        };

        let mut big_a = a;
        let mut big_b = if delta * delta > phi * phi + variance {
            (delta * delta - phi * phi - variance).ln()
        } else {
            let mut k = 1.0;
            while f(a - k * self.tau) < 0.0 {
                k += 1.0;
                if k > MAX_ITERATIONS as f64 {
                    return Err(RatingError::invariant("volatility bracket not found"));
                }
            }
            a - k * self.tau
        };

        let mut f_a = f(big_a);
        let mut f_b = f(big_b);
        let mut iterations = 0;
        while (big_b - big_a).abs() > CONVERGENCE {
            iterations += 1;
            if iterations > MAX_ITERATIONS {
                return Err(RatingError::invariant("volatility iteration did not converge"));
            }
            let c = big_a + (big_a - big_b) * f_a / (f_b - f_a);
            let f_c = f(c);
            if f_c * f_b <= 0.0 {
                big_a = big_b;
                f_a = f_b;
            } else {
                f_a /= 2.0;
            }
            big_b = c;
            f_b = f_c;
        }

        Ok((big_a / 2.0).exp())
    }
}

fn g(phi: f64) -> f64 {
    1.0 / (1.0 + 3.0 * phi * phi / (PI * PI)).sqrt()
}

fn expected(mu: f64, mu_j: f64, phi_j: f64) -> f64 {
    1.0 / (1.0 + (-g(phi_j) * (mu - mu_j)).exp())
}

fn check(rating: &Rating) -> Result<(), RatingError> {
    let valid = rating.rating.is_finite()
        && rating.deviation.is_finite()
        && rating.deviation > 0.0
        && rating.volatility.is_finite()
        && rating.volatility > 0.0;
    if valid {
        Ok(())
    } else {
        Err(RatingError::invariant(format!("invalid rating {rating:?}")))
    }
}

impl RatingAlgorithm for Glicko2 {
    fn rate(
        &self,
        current: Rating,
        opponents: &[Rating],
        outcomes: &[f64],
    ) -> Result<Rating, RatingError> {
        if opponents.len() != outcomes.len() {
            return Err(RatingError::invariant(format!(
                "{} opponents but {} outcomes",
                opponents.len(),
                outcomes.len()
            )));
        }
        check(&current)?;
        for opponent in opponents {
            check(opponent)?;
        }
        if let Some(bad) = outcomes.iter().find(|o| !(0.0..=1.0).contains(*o)) {
            return Err(RatingError::invariant(format!("outcome {bad} outside [0, 1]")));
        }

        let mu = (current.rating - CENTER) / SCALE;
        let phi = current.deviation / SCALE;
        let sigma = current.volatility;

        if opponents.is_empty() {
            // No games this period: only the deviation grows
            let phi_star = (phi * phi + sigma * sigma).sqrt();
            return Ok(Rating::new(current.rating, phi_star * SCALE, sigma));
        }

        let mut inverse_variance = 0.0;
        let mut improvement = 0.0;
        for (opponent, outcome) in opponents.iter().zip(outcomes) {
            let mu_j = (opponent.rating - CENTER) / SCALE;
            let phi_j = opponent.deviation / SCALE;
            let e = expected(mu, mu_j, phi_j);
            inverse_variance += g(phi_j).powi(2) * e * (1.0 - e);
            improvement += g(phi_j) * (outcome - e);
        }
        let variance = 1.0 / inverse_variance;
        let delta = variance * improvement;

        let new_sigma = self.new_volatility(phi, sigma, variance, delta)?;
        let phi_star = (phi * phi + new_sigma * new_sigma).sqrt();
        let new_phi = 1.0 / (1.0 / (phi_star * phi_star) + 1.0 / variance).sqrt();
        let new_mu = mu + new_phi * new_phi * improvement;

        let rated = Rating::new(new_mu * SCALE + CENTER, new_phi * SCALE, new_sigma);
        check(&rated)?;
        Ok(rated)
    }

    fn default_rating(&self) -> Rating {
        self.initial
    }
}
