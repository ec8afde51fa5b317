//! Index-number allocation.
//!
//! Every student carries a globally unique 7-digit zero-padded index number
//! used for self-service result lookup. Numbers are sequential within a
//! grade, starting from a grade-specific seed.

pub const SUPPORTED_GRADES: [i64; 3] = [3, 4, 5];

const INDEX_NUMBER_WIDTH: u32 = 7;
const INDEX_NUMBER_MAX: i64 = 9_999_999;

#[derive(Debug, Clone, PartialEq)]
pub enum RollError {
    UnsupportedGrade(i64),
    MalformedIndexNumber(String),
    Exhausted(i64),
}

impl RollError {
    pub fn message(&self) -> String {
        match self {
            RollError::UnsupportedGrade(g) => format!("grade must be 3, 4, or 5 (got {})", g),
            RollError::MalformedIndexNumber(s) => {
                format!("stored index number is not numeric: {}", s)
            }
            RollError::Exhausted(g) => format!("index number range exhausted for grade {}", g),
        }
    }
}

pub fn is_supported_grade(grade: i64) -> bool {
    SUPPORTED_GRADES.contains(&grade)
}

/// Starting index number for the first student enrolled in a grade.
/// The ranges are spaced far enough apart that sequences never collide.
pub fn grade_seed(grade: i64) -> Option<i64> {
    match grade {
        3 => Some(2_804_286),
        4 => Some(2_704_286),
        5 => Some(2_604_286),
        _ => None,
    }
}

pub fn format_index_number(n: i64) -> String {
    format!("{:0width$}", n, width = INDEX_NUMBER_WIDTH as usize)
}

/// Computes the next index number for a grade given the highest one already
/// assigned in that grade (`None` when the grade has no students yet).
///
/// Grades outside the supported set are rejected rather than given a shared
/// fallback seed; a fallback range would overlap real sequences.
pub fn next_index_number(grade: i64, highest: Option<&str>) -> Result<String, RollError> {
    let seed = grade_seed(grade).ok_or(RollError::UnsupportedGrade(grade))?;

    let next = match highest {
        None => seed,
        Some(prev) => {
            let parsed: i64 = prev
                .parse()
                .map_err(|_| RollError::MalformedIndexNumber(prev.to_string()))?;
            parsed + 1
        }
    };

    if next > INDEX_NUMBER_MAX {
        return Err(RollError::Exhausted(grade));
    }

    Ok(format_index_number(next))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeds_are_distinct_per_grade() {
        assert_eq!(next_index_number(3, None).unwrap(), "2804286");
        assert_eq!(next_index_number(4, None).unwrap(), "2704286");
        assert_eq!(next_index_number(5, None).unwrap(), "2604286");
    }

    #[test]
    fn increments_from_highest_assigned() {
        assert_eq!(next_index_number(3, Some("2804286")).unwrap(), "2804287");
        assert_eq!(next_index_number(5, Some("2604299")).unwrap(), "2604300");
    }

    #[test]
    fn keeps_seven_digit_zero_padding() {
        assert_eq!(format_index_number(1), "0000001");
        assert_eq!(next_index_number(4, Some("0000009")).unwrap(), "0000010");
    }

    #[test]
    fn rejects_unsupported_grades() {
        assert_eq!(
            next_index_number(6, None),
            Err(RollError::UnsupportedGrade(6))
        );
        assert_eq!(
            next_index_number(0, Some("2604286")),
            Err(RollError::UnsupportedGrade(0))
        );
    }

    #[test]
    fn rejects_malformed_stored_numbers() {
        assert!(matches!(
            next_index_number(3, Some("28O4286")),
            Err(RollError::MalformedIndexNumber(_))
        ));
    }

    #[test]
    fn errors_when_range_exhausted() {
        assert_eq!(
            next_index_number(3, Some("9999999")),
            Err(RollError::Exhausted(3))
        );
    }
}
