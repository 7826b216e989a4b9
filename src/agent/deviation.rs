//! Distance between the current and planned liquidity shapes.

use num_bigint::BigInt;
use num_traits::{ToPrimitive, Zero};

use crate::allocation::PositionPlan;
use crate::vault::Position;

/// Projects both position sets onto the bin grid spanned by their tick
/// boundaries and returns the width-weighted L1 distance over normalized
/// weights, halved. 0.0 means identical shapes, 1.0 disjoint ones.
pub fn calculate_deviation(current: &[Position], planned: &[PositionPlan]) -> f64 {
    if current.is_empty() && planned.is_empty() {
        return 0.0;
    }
    if current.is_empty() || planned.is_empty() {
        return 1.0;
    }

    let mut ticks: Vec<i32> = Vec::new();
    for position in current {
        if has_liquidity(position.liquidity.as_ref()) {
            ticks.push(position.tick_lower);
            ticks.push(position.tick_upper);
        }
    }
    for plan in planned {
        if plan.liquidity > BigInt::zero() {
            ticks.push(plan.tick_lower);
            ticks.push(plan.tick_upper);
        }
    }
    ticks.sort_unstable();
    ticks.dedup();

    if ticks.len() < 2 {
        // No bin grid to project onto; at most one side contributed bounds.
        return 1.0;
    }

    let bin_count = ticks.len() - 1;
    let mut current_mass = vec![0.0; bin_count];
    let mut planned_mass = vec![0.0; bin_count];

    for i in 0..bin_count {
        let lower = ticks[i];
        let upper = ticks[i + 1];
        let width = (upper - lower) as f64;

        for position in current {
            let Some(liquidity) = position.liquidity.as_ref() else {
                continue;
            };
            if liquidity.is_zero() {
                continue;
            }
            if lower >= position.tick_lower && upper <= position.tick_upper {
                current_mass[i] += liquidity.to_f64().unwrap_or(0.0) * width;
            }
        }
        for plan in planned {
            if plan.liquidity.is_zero() {
                continue;
            }
            if lower >= plan.tick_lower && upper <= plan.tick_upper {
                planned_mass[i] += plan.liquidity.to_f64().unwrap_or(0.0) * width;
            }
        }
    }

    let sum_current: f64 = current_mass.iter().sum();
    let sum_planned: f64 = planned_mass.iter().sum();

    if sum_current == 0.0 || sum_planned == 0.0 {
        if sum_current == 0.0 && sum_planned == 0.0 {
            return 0.0;
        }
        return 1.0;
    }

    let l1: f64 = current_mass
        .iter()
        .zip(&planned_mass)
        .map(|(c, p)| (c / sum_current - p / sum_planned).abs())
        .sum();

    l1 / 2.0
}

fn has_liquidity(liquidity: Option<&BigInt>) -> bool {
    liquidity.is_some_and(|l| *l > BigInt::zero())
}
