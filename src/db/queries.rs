//! Integrity checks shared by every backend.
//!
//! These run as plain SQL because they correlate rows across tables on
//! columns that are not declared as joins. Only integer ids are ever
//! interpolated.

use std::str::FromStr;

use diesel::QueryableByName;
use diesel::sql_types::BigInt;

use super::DatabaseError;

#[derive(Debug, QueryableByName)]
pub struct IdRow {
    #[diesel(sql_type = BigInt)]
    pub id: i64,
}

fn company_clause(column: &str, company_id: Option<i64>) -> String {
    match company_id {
        Some(company_id) => format!(" AND {column} = {company_id}"),
        None => String::new(),
    }
}

pub fn unlinked_conversations_sql(company_id: Option<i64>) -> String {
    format!(
        "SELECT c.id AS id FROM conversations c \
         WHERE NOT EXISTS (\
             SELECT 1 FROM facebook_settings f \
             WHERE f.company_id = c.company_id AND f.page_id = c.facebook_page_id\
         ){} ORDER BY c.id",
        company_clause("c.company_id", company_id)
    )
}

pub fn tenant_mismatch_messages_sql(company_id: Option<i64>) -> String {
    format!(
        "SELECT m.id AS id FROM messages m \
         JOIN conversations c ON c.id = m.conversation_id \
         WHERE m.company_id <> c.company_id{} ORDER BY m.id",
        company_clause("m.company_id", company_id)
    )
}

/// Escape character paired with [`contains_pattern`] in `LIKE ... ESCAPE`.
pub const LIKE_ESCAPE: char = '\\';

/// `LIKE` pattern matching `needle` anywhere, with `%`, `_` and the escape
/// character taken literally.
pub fn contains_pattern(needle: &str) -> String {
    let mut pattern = String::with_capacity(needle.len() + 2);
    pattern.push('%');
    for ch in needle.chars() {
        if matches!(ch, '%' | '_' | LIKE_ESCAPE) {
            pattern.push(LIKE_ESCAPE);
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}

pub fn parse_text<T>(value: &str) -> Result<T, DatabaseError>
where
    T: FromStr<Err = String>,
{
    value.parse::<T>().map_err(DatabaseError::Query)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn company_filter_is_optional() {
        assert!(!unlinked_conversations_sql(None).contains("AND c.company_id"));
        assert!(unlinked_conversations_sql(Some(7)).contains("AND c.company_id = 7"));
        assert!(tenant_mismatch_messages_sql(Some(3)).contains("AND m.company_id = 3"));
    }

    #[test]
    fn like_wildcards_are_escaped() {
        assert_eq!(contains_pattern("dress"), "%dress%");
        assert_eq!(contains_pattern("50%_off"), "%50\\%\\_off%");
        assert_eq!(contains_pattern("a\\b"), "%a\\\\b%");
    }
}
