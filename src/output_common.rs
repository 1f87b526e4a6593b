//! Human and JSON rendering shared by the CLI commands.

use crate::error::QueryError;
use crate::output::{json_response_with_partial, FieldInfo, OutputFormat};
use crate::suggest::SuggestionToken;
use serde::Serialize;

/// Wrap `data` in the response envelope and serialize it for `format`.
pub fn render_json_response<T: Serialize>(data: &T, partial: bool, format: OutputFormat) -> Result<String, QueryError> {
    let payload = json_response_with_partial(data, partial);
    let rendered = match format {
        OutputFormat::Pretty => serde_json::to_string_pretty(&payload)?,
        OutputFormat::Json | OutputFormat::Human => serde_json::to_string(&payload)?,
    };
    Ok(rendered)
}

pub fn is_json_format(format: OutputFormat) -> bool {
    matches!(format, OutputFormat::Json | OutputFormat::Pretty)
}

pub fn format_total_header(total: u64) -> String {
    format!("total: {}", total)
}

/// Footer printed when a limit cut the result list short.
pub fn format_partial_footer(shown: usize, total: u64) -> String {
    format!("partial: true ({} of {} shown)", shown, total)
}

/// `begin..end suggestion`, plus the replaced text when there is one.
pub fn format_suggestion(token: &SuggestionToken) -> String {
    match &token.context {
        Some(partial) => format!("{}..{} {} (replaces '{}')", token.begin, token.end, token.suggestion, partial),
        None => format!("{}..{} {}", token.begin, token.end, token.suggestion),
    }
}

/// One aligned line per field: name, kind, sub-attributes, accepted values.
pub fn format_field(field: &FieldInfo) -> String {
    let mut line = format!("{:<28} {}", field.name, field.kind);
    if !field.sub_attributes.is_empty() {
        line.push_str(&format!(" [{}]", field.sub_attributes.join(", ")));
    }
    if let Some(values) = &field.values {
        line.push_str(&format!(" ({})", values.join("|")));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suggestion_line() {
        let token = SuggestionToken {
            begin: 11,
            end: 15,
            context: Some("na".to_string()),
            suggestion: "name".to_string(),
        };
        assert_eq!(format_suggestion(&token), "11..15 name (replaces 'na')");
    }

    #[test]
    fn test_field_line() {
        let field = FieldInfo {
            name: "updatestatus".to_string(),
            kind: "enum".to_string(),
            sub_attributes: Vec::new(),
            values: Some(vec!["error".to_string(), "pending".to_string()]),
        };
        assert!(format_field(&field).ends_with("enum (error|pending)"));
    }

    #[test]
    fn test_pretty_rendering_is_multiline() {
        let compact = render_json_response(&vec![1], false, OutputFormat::Json).unwrap();
        let pretty = render_json_response(&vec![1], true, OutputFormat::Pretty).unwrap();
        assert!(!compact.contains('\n'));
        assert!(pretty.contains('\n'));
        assert!(pretty.contains("\"partial\": true"));
    }
}
