use chrono_tz::America::Sao_Paulo;
use mongodb::bson::DateTime;

/// Shortens a full name for outgoing messages, e.g.
/// "Maria Aparecida dos Santos" becomes "Maria S.".
pub fn format_name(name: &str) -> String {
    let parts: Vec<&str> = name.split_whitespace().collect();

    match parts.as_slice() {
        [] => String::new(),
        [only] => (*only).to_string(),
        [first, .., last] => {
            let initial: String = last
                .chars()
                .next()
                .map(|c| c.to_uppercase().to_string())
                .unwrap_or_default();

            format!("{first} {initial}.")
        }
    }
}

/// Calendar date in the home's local timezone.
pub fn format_date(date: DateTime) -> String {
    chrono::DateTime::from_timestamp_millis(date.timestamp_millis())
        .unwrap_or_default()
        .with_timezone(&Sao_Paulo)
        .format("%d/%m/%Y")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::{format_date, format_name};
    use mongodb::bson::DateTime;

    #[test]
    fn shortens_to_first_name_and_last_initial() {
        assert_eq!(format_name("Maria Aparecida dos Santos"), "Maria S.");
        assert_eq!(format_name("joao pereira"), "joao P.");
    }

    #[test]
    fn single_names_pass_through() {
        assert_eq!(format_name("Ayrton"), "Ayrton");
        assert_eq!(format_name("  Ayrton  "), "Ayrton");
    }

    #[test]
    fn empty_names_stay_empty() {
        assert_eq!(format_name(""), "");
        assert_eq!(format_name("   "), "");
    }

    #[test]
    fn formats_dates_day_first() {
        // 2024-07-01T12:00:00Z is still July 1st in Sao Paulo (UTC-3)
        assert_eq!(format_date(DateTime::from_millis(1_719_835_200_000)), "01/07/2024");
    }
}
