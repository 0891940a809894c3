//! Bounded random movement of a trade value.

use rand::Rng;
use staketrade_types::{portion, Amount};

/// Applies a signed change (in basis points) to `current`.
///
/// Gains are `floor(current * change)`. Losses are `floor(current * |change|)`
/// capped at `current / 2`, so one step never takes the value below half.
pub fn apply_movement(current: Amount, change_bps: i32) -> Amount {
    if change_bps >= 0 {
        current.saturating_add(portion(current, change_bps.unsigned_abs()))
    } else {
        let delta = portion(current, change_bps.unsigned_abs()).min(current / 2);
        current - delta
    }
}

/// Moves `current` by a uniformly drawn change in `[-volatility, +volatility]`.
pub fn simulate_movement<R: Rng + ?Sized>(
    rng: &mut R,
    current: Amount,
    volatility_bps: u32,
) -> Amount {
    let bound = i32::try_from(volatility_bps).unwrap_or(i32::MAX);
    let change = rng.gen_range(-bound..=bound);
    apply_movement(current, change)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_zero_change_is_identity() {
        assert_eq!(apply_movement(1_000, 0), 1_000);
    }

    #[test]
    fn test_gain_floors() {
        assert_eq!(apply_movement(1_000, 500), 1_050);
        assert_eq!(apply_movement(999, 500), 1_048);
        assert_eq!(apply_movement(1, 500), 1);
    }

    #[test]
    fn test_loss_floors() {
        assert_eq!(apply_movement(1_000, -500), 950);
        assert_eq!(apply_movement(999, -500), 950);
    }

    #[test]
    fn test_loss_capped_at_half() {
        assert_eq!(apply_movement(1_000, -9_000), 500);
        assert_eq!(apply_movement(1_001, -10_000), 501);
        assert_eq!(apply_movement(1, -10_000), 1);
    }

    #[test]
    fn test_zero_value_stays_zero() {
        let mut rng = StdRng::seed_from_u64(0);
        for _ in 0..100 {
            assert_eq!(simulate_movement(&mut rng, 0, 500), 0);
        }
        assert_eq!(apply_movement(0, 500), 0);
        assert_eq!(apply_movement(0, -500), 0);
    }

    #[test]
    fn test_movement_stays_within_bounds() {
        let mut rng = StdRng::seed_from_u64(42);
        for current in [1u128, 7, 999, 1_000, 123_456_789, 10u128.pow(24)] {
            let floor = current - current / 2;
            let ceiling = current + portion(current, 500);
            for _ in 0..500 {
                let next = simulate_movement(&mut rng, current, 500);
                assert!(next >= floor, "{next} below {floor}");
                assert!(next <= ceiling, "{next} above {ceiling}");
            }
        }
    }

    #[test]
    fn test_movement_covers_both_directions() {
        let mut rng = StdRng::seed_from_u64(7);
        let values: Vec<_> = (0..200)
            .map(|_| simulate_movement(&mut rng, 1_000_000, 500))
            .collect();
        assert!(values.iter().any(|v| *v > 1_000_000));
        assert!(values.iter().any(|v| *v < 1_000_000));
    }

    #[test]
    fn test_zero_volatility_never_moves() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(simulate_movement(&mut rng, 5_000, 0), 5_000);
    }
}
