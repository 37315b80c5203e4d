/// Completeness ladder, evaluated top-down. The score is informational and
/// never suppresses an event.
pub fn score_completeness(
    before_present: bool,
    after_present: bool,
    missing_data_count: usize,
) -> u8 {
    match (before_present, after_present) {
        (true, true) if missing_data_count == 0 => 100,
        (true, true) => 85,
        (true, false) | (false, true) => 50,
        (false, false) if missing_data_count > 0 => 25,
        (false, false) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::score_completeness;

    #[test]
    fn ladder_values() {
        assert_eq!(score_completeness(true, true, 0), 100);
        assert_eq!(score_completeness(true, true, 2), 85);
        assert_eq!(score_completeness(true, false, 0), 50);
        assert_eq!(score_completeness(false, true, 3), 50);
        assert_eq!(score_completeness(false, false, 1), 25);
        assert_eq!(score_completeness(false, false, 0), 0);
    }
}
