use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;

/// One score record flattened for ranking, joined with the student it
/// belongs to. `total_marks` below zero is the "unset" sentinel.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreRow {
    pub student_id: String,
    pub student_name: String,
    pub index_number: String,
    pub total_marks: f64,
    pub marks: Option<f64>,
    pub part1_marks: Option<f64>,
    pub part2_marks: Option<f64>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RankedEntry {
    pub rank: usize,
    pub student_name: String,
    pub index_number: String,
    pub total_marks: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub marks: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub part1_marks: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub part2_marks: Option<f64>,
}

/// Top-list size depends on how many students the class has in total,
/// not on how many of them have marks recorded.
pub fn leaderboard_limit(population: usize) -> usize {
    if population < 10 {
        5
    } else {
        10
    }
}

/// Builds a competition-ranked ("1224") leaderboard:
///
/// 1. drop rows with an unset total,
/// 2. keep each student's best row only,
/// 3. sort by total descending (ties keep their input order),
/// 4. assign ranks where equal totals share a rank and the next distinct
///    total resumes at its 1-based position,
/// 5. truncate to `leaderboard_limit(population)`.
pub fn compute_leaderboard(rows: &[ScoreRow], population: usize) -> Vec<RankedEntry> {
    // Best row per student, first-seen order preserved.
    let mut best: Vec<ScoreRow> = Vec::new();
    let mut by_student: HashMap<String, usize> = HashMap::new();

    for row in rows {
        if row.total_marks < 0.0 {
            continue;
        }
        match by_student.get(&row.student_id) {
            Some(&i) => {
                if row.total_marks > best[i].total_marks {
                    best[i] = row.clone();
                }
            }
            None => {
                by_student.insert(row.student_id.clone(), best.len());
                best.push(row.clone());
            }
        }
    }

    // Stable sort: no secondary key, so equal totals stay in input order.
    best.sort_by(|a, b| {
        b.total_marks
            .partial_cmp(&a.total_marks)
            .unwrap_or(Ordering::Equal)
    });

    let limit = leaderboard_limit(population);
    let mut entries: Vec<RankedEntry> = Vec::with_capacity(limit.min(best.len()));

    for (i, row) in best.into_iter().enumerate() {
        if entries.len() >= limit {
            break;
        }
        let rank = match entries.last() {
            Some(prev) if prev.total_marks == row.total_marks => prev.rank,
            _ => i + 1,
        };
        entries.push(RankedEntry {
            rank,
            student_name: row.student_name,
            index_number: row.index_number,
            total_marks: row.total_marks,
            marks: row.marks,
            part1_marks: row.part1_marks,
            part2_marks: row.part2_marks,
        });
    }

    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(student: &str, total: f64) -> ScoreRow {
        ScoreRow {
            student_id: student.to_string(),
            student_name: format!("Student {}", student),
            index_number: format!("260428{}", student),
            total_marks: total,
            marks: Some(total),
            part1_marks: None,
            part2_marks: None,
        }
    }

    #[test]
    fn limit_switches_at_population_ten() {
        assert_eq!(leaderboard_limit(0), 5);
        assert_eq!(leaderboard_limit(9), 5);
        assert_eq!(leaderboard_limit(10), 10);
        assert_eq!(leaderboard_limit(35), 10);
    }

    #[test]
    fn ties_share_rank_and_next_rank_skips() {
        let rows = vec![row("a", 90.0), row("b", 90.0), row("c", 80.0)];
        let out = compute_leaderboard(&rows, 12);
        let ranks: Vec<usize> = out.iter().map(|e| e.rank).collect();
        assert_eq!(ranks, vec![1, 1, 3]);
    }

    #[test]
    fn keeps_best_row_per_student() {
        let rows = vec![row("a", 55.0), row("a", 72.0), row("b", 60.0)];
        let out = compute_leaderboard(&rows, 12);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].total_marks, 72.0);
        assert_eq!(out[0].index_number, "260428a");
        assert_eq!(out[1].total_marks, 60.0);
    }

    #[test]
    fn drops_unset_sentinel_totals() {
        let rows = vec![row("a", -1.0), row("b", 40.0)];
        let out = compute_leaderboard(&rows, 12);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].index_number, "260428b");
        assert_eq!(out[0].rank, 1);
    }

    #[test]
    fn truncates_to_population_limit() {
        let rows: Vec<ScoreRow> = (0..8)
            .map(|i| row(&i.to_string(), 100.0 - i as f64))
            .collect();
        let out = compute_leaderboard(&rows, 8);
        assert_eq!(out.len(), 5);
        assert_eq!(out.last().unwrap().rank, 5);

        let out_big = compute_leaderboard(&rows, 10);
        assert_eq!(out_big.len(), 8);
    }

    #[test]
    fn empty_input_yields_empty_board() {
        assert!(compute_leaderboard(&[], 20).is_empty());
    }

    #[test]
    fn recompute_is_idempotent() {
        let rows = vec![row("a", 70.0), row("b", 70.0), row("c", 65.0)];
        let first = compute_leaderboard(&rows, 15);
        let second = compute_leaderboard(&rows, 15);
        assert_eq!(first, second);
    }
}
