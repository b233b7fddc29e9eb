//! Learning-rate decay laws.
//!
//! A schedule maps the base rate and the iteration counter to the rate used
//! for that iteration; it holds no state of its own.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum LrSchedule {
    /// lr stays at its base value.
    #[default]
    Constant,
    /// lr · (1 + gamma·itr)^(−power)
    Inverse { gamma: f64, power: f64 },
    /// lr · gamma^⌊itr / step_size⌋
    Step { step_size: usize, gamma: f64 },
    /// lr · gamma^itr
    Exponential { gamma: f64 },
}

// Saturates rather than wrapping to a negative power.
fn exponent(n: usize) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

impl LrSchedule {
    pub fn rate(&self, base: f64, iteration: usize) -> f64 {
        match *self {
            LrSchedule::Constant => base,
            LrSchedule::Inverse { gamma, power } => {
                base * (1.0 + gamma * iteration as f64).powf(-power)
            }
            LrSchedule::Step { step_size, gamma } => {
                base * gamma.powi(exponent(iteration / step_size.max(1)))
            }
            LrSchedule::Exponential { gamma } => base * gamma.powi(exponent(iteration)),
        }
    }

    /// `Err` with a description when the schedule cannot produce sane rates.
    pub fn validate(&self) -> Result<(), String> {
        match *self {
            LrSchedule::Constant => Ok(()),
            LrSchedule::Inverse { gamma, power } if gamma < 0.0 || !power.is_finite() => {
                Err(format!(
                    "inverse schedule needs gamma >= 0 and a finite power, got gamma={} power={}",
                    gamma, power
                ))
            }
            LrSchedule::Step { step_size: 0, .. } => {
                Err("step schedule needs step_size > 0".to_string())
            }
            LrSchedule::Step { gamma, .. } | LrSchedule::Exponential { gamma }
                if !(gamma > 0.0 && gamma.is_finite()) =>
            {
                Err(format!("decay factor gamma must be positive, got {}", gamma))
            }
            _ => Ok(()),
        }
    }
}
