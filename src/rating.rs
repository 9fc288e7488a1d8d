//! Skill ratings folded from finishing orders.

use skillratings::{
    weng_lin::{weng_lin_multi_team, WengLinConfig, WengLinRating},
    MultiTeamOutcome,
};

/// Bayesian skill estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Skill {
    /// Estimated skill.
    pub mean: f64,
    /// Standard deviation of the estimate.
    pub uncertainty: f64,
}

impl From<WengLinRating> for Skill {
    fn from(rating: WengLinRating) -> Self {
        Skill {
            mean: rating.rating,
            uncertainty: rating.uncertainty,
        }
    }
}

impl From<Skill> for WengLinRating {
    fn from(skill: Skill) -> Self {
        WengLinRating {
            rating: skill.mean,
            uncertainty: skill.uncertainty,
        }
    }
}

/// Rating algorithm used by tournaments.
pub trait SkillRater: Send {
    /// Estimate of a bot that has not played yet.
    fn initial(&self) -> Skill;

    /// Updated estimates for the participants of one match, given from winner to last.
    /// The result is in the same order.
    fn rate(&self, ranked: &[Skill]) -> Vec<Skill>;
}

/// Weng-Lin (OpenSkill) rating, every seat its own team.
#[derive(Debug, Clone)]
pub struct WengLinRater {
    config: WengLinConfig,
}

impl WengLinRater {
    /// Rater with the default Weng-Lin parameters.
    pub fn new() -> Self {
        WengLinRater {
            config: WengLinConfig::new(),
        }
    }
}

impl Default for WengLinRater {
    fn default() -> Self {
        Self::new()
    }
}

impl SkillRater for WengLinRater {
    fn initial(&self) -> Skill {
        WengLinRating::new().into()
    }

    fn rate(&self, ranked: &[Skill]) -> Vec<Skill> {
        let teams: Vec<[WengLinRating; 1]> = ranked.iter().map(|s| [(*s).into()]).collect();
        let input: Vec<(&[WengLinRating], MultiTeamOutcome)> = teams
            .iter()
            .enumerate()
            .map(|(rank, team)| (&team[..], MultiTeamOutcome::new(rank + 1)))
            .collect();
        weng_lin_multi_team(&input, &self.config)
            .into_iter()
            .zip(ranked)
            .map(|(team, old)| team.first().map_or(*old, |r| (*r).into()))
            .collect()
    }
}

/// Standing of one bot in a tournament.
#[derive(Debug, Clone, PartialEq)]
pub struct Rating {
    /// Bot name.
    pub name: String,
    /// Current estimate.
    pub skill: Skill,
    /// Matches finished.
    pub played: u32,
    /// Matches finished first.
    pub wins: u32,
}

/// Ratings of a whole pool, indexed like the pool.
#[derive(Debug, Clone)]
pub struct Scoreboard {
    ratings: Vec<Rating>,
}

impl Scoreboard {
    /// Fresh ratings for `names`.
    pub fn new(names: impl IntoIterator<Item = String>, rater: &impl SkillRater) -> Self {
        let ratings = names
            .into_iter()
            .map(|name| Rating {
                name,
                skill: rater.initial(),
                played: 0,
                wins: 0,
            })
            .collect();
        Scoreboard { ratings }
    }

    /// Fold one match in. `order` lists pool indexes from winner to last.
    pub fn record(&mut self, order: &[usize], rater: &impl SkillRater) {
        let ranked: Vec<Skill> = order.iter().map(|&i| self.ratings[i].skill).collect();
        let updated = rater.rate(&ranked);
        for (&i, skill) in order.iter().zip(updated) {
            self.ratings[i].skill = skill;
            self.ratings[i].played += 1;
        }
        if let Some(&winner) = order.first() {
            self.ratings[winner].wins += 1;
        }
    }

    /// Ratings in pool order.
    pub fn ratings(&self) -> &[Rating] {
        &self.ratings
    }

    /// Ratings sorted by mean, best first.
    pub fn standings(&self) -> Vec<Rating> {
        let mut standings = self.ratings.clone();
        standings.sort_by(|a, b| b.skill.mean.total_cmp(&a.skill.mean));
        standings
    }
}
