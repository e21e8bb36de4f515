// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Achievement levels derived from the decrypted record counter.

use serde::Serialize;

/// One achievement tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AchievementLevel {
    pub name: String,
    pub threshold: u32,
    pub emoji: String,
    pub description: String,
}

impl AchievementLevel {
    pub fn new(name: &str, threshold: u32, emoji: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            threshold,
            emoji: emoji.to_string(),
            description: description.to_string(),
        }
    }
}

/// Built-in tiers, in ascending threshold order.
pub fn default_levels() -> Vec<AchievementLevel> {
    vec![
        AchievementLevel::new("Health Pioneer", 1, "🌱", "Logged your first health record"),
        AchievementLevel::new("Vitality Expert", 10, "💪", "Logged 10 health records"),
        AchievementLevel::new("Life Guardian", 20, "🛡️", "Logged 20 health records"),
    ]
}

/// Apply on-chain thresholds to the built-in tiers.
///
/// Thresholds beyond the known tiers get a generic name; an empty list
/// keeps the defaults.
pub fn levels_with_thresholds(thresholds: &[u32]) -> Vec<AchievementLevel> {
    if thresholds.is_empty() {
        return default_levels();
    }

    let defaults = default_levels();
    thresholds
        .iter()
        .enumerate()
        .map(|(index, threshold)| match defaults.get(index) {
            Some(level) => AchievementLevel {
                threshold: *threshold,
                ..level.clone()
            },
            None => AchievementLevel::new(
                &format!("Level {}", index + 1),
                *threshold,
                "🏅",
                &format!("Logged {threshold} health records"),
            ),
        })
        .collect()
}

/// Unlock state of one level for a given counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AchievementStatus {
    pub level_index: usize,
    pub level: AchievementLevel,
    pub unlocked: bool,
    /// 0-100, capped
    pub progress_percent: u8,
    pub remaining: u64,
}

/// Unlock state of every level, in level order.
pub fn achievement_progress(counter: u64, levels: &[AchievementLevel]) -> Vec<AchievementStatus> {
    levels
        .iter()
        .enumerate()
        .map(|(level_index, level)| {
            let threshold = u64::from(level.threshold);
            AchievementStatus {
                level_index,
                level: level.clone(),
                unlocked: counter >= threshold,
                progress_percent: progress_percent(counter, threshold),
                remaining: threshold.saturating_sub(counter),
            }
        })
        .collect()
}

fn progress_percent(counter: u64, threshold: u64) -> u8 {
    if counter == 0 {
        return 0;
    }
    if threshold == 0 {
        return 100;
    }
    let percent = counter.saturating_mul(100) / threshold;
    percent.min(100) as u8
}

/// Indices of the levels unlocked at `counter`.
pub fn unlocked_set(counter: u64, levels: &[AchievementLevel]) -> Vec<usize> {
    achievement_progress(counter, levels)
        .into_iter()
        .filter(|status| status.unlocked)
        .map(|status| status.level_index)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_counter_locks_everything_at_zero_percent() {
        let statuses = achievement_progress(0, &default_levels());
        assert_eq!(statuses.len(), 3);
        for status in &statuses {
            assert!(!status.unlocked);
            assert_eq!(status.progress_percent, 0);
        }
        assert_eq!(statuses[2].remaining, 20);
    }

    #[test]
    fn progress_is_capped_and_remaining_saturates() {
        let statuses = achievement_progress(15, &default_levels());
        assert!(statuses[0].unlocked);
        assert_eq!(statuses[0].progress_percent, 100);
        assert!(statuses[1].unlocked);
        assert_eq!(statuses[1].remaining, 0);
        assert!(!statuses[2].unlocked);
        assert_eq!(statuses[2].progress_percent, 75);
        assert_eq!(statuses[2].remaining, 5);
    }

    #[test]
    fn unlocking_is_monotonic_in_the_counter() {
        let levels = default_levels();
        let mut previous = unlocked_set(0, &levels);
        for counter in 1..=30 {
            let current = unlocked_set(counter, &levels);
            assert!(previous.iter().all(|i| current.contains(i)), "lost a level at {counter}");
            previous = current;
        }
        assert_eq!(previous, vec![0, 1, 2]);
    }

    #[test]
    fn chain_thresholds_override_defaults() {
        let levels = levels_with_thresholds(&[2, 5, 8, 50]);
        assert_eq!(levels[0].name, "Health Pioneer");
        assert_eq!(levels[0].threshold, 2);
        assert_eq!(levels[3].name, "Level 4");
        assert_eq!(levels_with_thresholds(&[]), default_levels());
    }
}
