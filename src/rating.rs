//! Elo update applied once per match.

/// Continuous logistic K-factor: high-rated players move less.
pub fn k_factor(rating: f64) -> f64 {
    35.0115796 / (1.0 + ((rating - 1930.63327881) / 240.64853294).exp()) + 9.99989887
}

/// Expected score of `rating` against `opponent`.
pub fn expected_score(rating: f64, opponent: f64) -> f64 {
    1.0 / (1.0 + 10f64.powf((opponent - rating) / 400.0))
}

/// New ratings after a decisive match. Ratings stay real-valued; rounding is
/// a persistence concern, not a rating concern.
pub fn apply_result(winner: f64, loser: f64) -> (f64, f64) {
    let winner_expected = expected_score(winner, loser);
    let loser_expected = expected_score(loser, winner);
    let new_winner = winner + k_factor(winner) * (1.0 - winner_expected);
    let new_loser = loser + k_factor(loser) * (0.0 - loser_expected);
    (new_winner, new_loser)
}
