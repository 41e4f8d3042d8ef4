use super::error::FilterError;
use super::types::{FilterOrderInfo, SortDirection};

pub struct FilterOrder;

impl FilterOrder {
    /// Parses `"starts_at desc, name"` against a column whitelist. Returned
    /// column names are the whitelist's own `&'static str`s, so nothing from
    /// the request ever reaches the SQL text.
    pub fn parse(spec: &str, allowed: &[&'static str]) -> Result<Vec<FilterOrderInfo>, FilterError> {
        let mut out = Vec::new();
        for part in spec.split(',') {
            let trimmed = part.trim();
            if trimmed.is_empty() {
                continue;
            }
            let mut it = trimmed.split_whitespace();
            let Some(col) = it.next() else { continue };
            let column = allowed
                .iter()
                .copied()
                .find(|allowed| allowed.eq_ignore_ascii_case(col))
                .ok_or_else(|| FilterError::InvalidColumn(col.to_string()))?;
            let sort = match it.next() {
                None => SortDirection::Asc,
                Some(dir) if dir.eq_ignore_ascii_case("asc") => SortDirection::Asc,
                Some(dir) if dir.eq_ignore_ascii_case("desc") => SortDirection::Desc,
                Some(dir) => return Err(FilterError::InvalidDirection(dir.to_string())),
            };
            if it.next().is_some() {
                return Err(FilterError::InvalidDirection(trimmed.to_string()));
            }
            out.push(FilterOrderInfo { column, sort });
        }
        Ok(out)
    }

    pub fn generate(infos: &[FilterOrderInfo]) -> String {
        if infos.is_empty() {
            return String::new();
        }
        let parts: Vec<String> = infos
            .iter()
            .map(|i| format!("\"{}\" {}", i.column, i.sort.to_sql()))
            .collect();
        format!(" ORDER BY {}", parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COLUMNS: &[&str] = &["name", "starts_at", "created_at"];

    #[test]
    fn parses_multiple_keys() {
        let order = FilterOrder::parse("starts_at desc, name", COLUMNS).unwrap();
        assert_eq!(
            order,
            vec![
                FilterOrderInfo { column: "starts_at", sort: SortDirection::Desc },
                FilterOrderInfo { column: "name", sort: SortDirection::Asc },
            ]
        );
        assert_eq!(FilterOrder::generate(&order), " ORDER BY \"starts_at\" DESC, \"name\" ASC");
    }

    #[test]
    fn rejects_unknown_columns_and_directions() {
        assert!(matches!(
            FilterOrder::parse("password_hash", COLUMNS),
            Err(FilterError::InvalidColumn(_))
        ));
        assert!(matches!(
            FilterOrder::parse("name sideways", COLUMNS),
            Err(FilterError::InvalidDirection(_))
        ));
        assert!(FilterOrder::parse("name; DROP TABLE events", COLUMNS).is_err());
    }

    #[test]
    fn empty_spec_generates_nothing() {
        let order = FilterOrder::parse(" , ", COLUMNS).unwrap();
        assert!(order.is_empty());
        assert_eq!(FilterOrder::generate(&order), "");
    }
}
