use super::models::GameScore;

/// Points shared out between the members of one game.
pub const SCORE_TOTAL: f64 = 100.0;

/// Turns final supply-center counts into scores summing to [`SCORE_TOTAL`].
///
/// A solo winner (named, or the only member still holding centers) takes every
/// point. Otherwise each member gets a share proportional to the square of its
/// center count, so eliminated members score 0 and more centers always means more
/// points. If nobody holds a center the points are split evenly.
///
/// Squaring compresses the gap between small survivors when one member dominates
/// the board; the scoring policy accepts that.
pub fn assign_scores(mut scores: Vec<GameScore>, solo_winner: Option<&str>) -> Vec<GameScore> {
    if scores.is_empty() {
        return scores;
    }

    let solo = solo_winner
        .map(str::to_string)
        .or_else(|| sole_survivor(&scores));

    if let Some(winner) = solo {
        for score in scores.iter_mut() {
            if score.member == winner {
                score.score = SCORE_TOTAL;
                score.explanation = format!("Solo victory:{SCORE_TOTAL}");
            } else {
                score.score = 0.0;
                score.explanation = "Lost to solo victory:0".to_string();
            }
        }
        return scores;
    }

    let weights: Vec<f64> = scores.iter().map(|s| f64::from(s.scs).powi(2)).collect();
    let weight_sum: f64 = weights.iter().sum();

    if weight_sum == 0.0 {
        let share = SCORE_TOTAL / scores.len() as f64;
        for score in scores.iter_mut() {
            score.score = share;
            score.explanation = format!("No supply centers held:{share}");
        }
        return scores;
    }

    for (score, weight) in scores.iter_mut().zip(&weights) {
        if score.scs == 0 {
            score.score = 0.0;
            score.explanation = "Eliminated:0".to_string();
        } else {
            score.score = SCORE_TOTAL * weight / weight_sum;
            score.explanation = format!("Supply centers:{}\nShare:{}", score.scs, score.score);
        }
    }

    scores
}

pub fn total_score(scores: &[GameScore]) -> f64 {
    scores.iter().map(|s| s.score).sum()
}

fn sole_survivor(scores: &[GameScore]) -> Option<String> {
    let mut survivors = scores.iter().filter(|s| s.scs > 0);
    match (survivors.next(), survivors.next()) {
        (Some(only), None) => Some(only.member.clone()),
        _ => None,
    }
}
