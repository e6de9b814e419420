//! Schema auto-discovery
//!
//! Fills the destination slots of property mappings from the live schema of
//! the destination table. Explicitly configured slots are never overwritten.

use bw_core::{
    BulkWriterError, MappingProperty, OwnerType, PropertyMapping, Result, SchemaColumnInfo,
    SchemaLookup,
};
use tracing::debug;

/// Resolves every should-map mapping against the columns of `table`
///
/// Unset column names default to the field name and are matched
/// case-insensitively. A field without a matching column fails with
/// [`BulkWriterError::InvalidOperation`] naming both the field and the column.
pub async fn resolve<T>(
    lookup: &dyn SchemaLookup,
    connection: &str,
    table: &str,
    mappings: &mut [PropertyMapping<T>],
) -> Result<()> {
    let mut columns = lookup
        .get_columns(connection, table)
        .await
        .map_err(|e| e.context(format!("reading the schema of `{table}`")))?;
    SchemaColumnInfo::sort(&mut columns);
    debug!(table, columns = columns.len(), "discovered destination schema");

    for mapping in mappings.iter_mut().filter(|m| m.should_map()) {
        let field_name = mapping.source().name().to_owned();
        let destination = mapping.destination_mut();
        if !destination.is_set(MappingProperty::ColumnName) {
            destination.set_column_name(field_name.as_str());
        }
        let column_name = destination.column_name()?.to_owned();

        let column = columns
            .iter()
            .find(|c| c.column_name.eq_ignore_ascii_case(&column_name))
            .ok_or_else(|| {
                BulkWriterError::invalid_operation(format!(
                    "field `{field_name}` is mapped to column `{column_name}`, which does not exist in `{table}`"
                ))
            })?;

        if !destination.is_set(MappingProperty::ColumnOrdinal) {
            destination.set_column_ordinal(column.column_ordinal);
        }
        if !destination.is_set(MappingProperty::ColumnSize) {
            destination.set_column_size(column.column_size);
        }
        if !destination.is_set(MappingProperty::DataTypeName) {
            destination.set_data_type_name(column.data_type_name.as_str());
        }
        if !destination.is_set(MappingProperty::IsKey) {
            destination.set_is_key(column.is_key);
        }
    }
    Ok(())
}

/// True when the table is unknown or any mapping still has an unset slot
pub fn needs_discovery<T>(table: Option<&str>, mappings: &[PropertyMapping<T>]) -> bool {
    table.is_none() || mappings.iter().any(|m| !m.destination().is_resolved())
}

/// Default table name for `T`: its pluralized type name, optionally `[bracketed]`
pub fn table_name<T: 'static>(quoted: bool) -> String {
    let name = pluralize(OwnerType::of::<T>().short_name());
    if quoted {
        format!("[{name}]")
    } else {
        name
    }
}

const IRREGULAR: &[(&str, &str)] = &[
    ("person", "people"),
    ("child", "children"),
    ("man", "men"),
    ("woman", "women"),
    ("mouse", "mice"),
    ("goose", "geese"),
    ("foot", "feet"),
    ("tooth", "teeth"),
];

const UNCOUNTABLE: &[&str] = &[
    "data", "equipment", "information", "money", "news", "series", "species", "sheep", "fish",
];

/// English plural of a type name, preserving its leading case
pub(crate) fn pluralize(name: &str) -> String {
    if name.is_empty() {
        return String::new();
    }
    let lower = name.to_ascii_lowercase();

    if UNCOUNTABLE.iter().any(|u| lower.ends_with(u)) {
        return name.to_owned();
    }
    for (singular, plural) in IRREGULAR {
        if lower.ends_with(plural) {
            return name.to_owned();
        }
        if lower.ends_with(singular) {
            let stem = &name[..name.len() - singular.len()];
            let tail = &name[name.len() - singular.len()..];
            return format!("{stem}{}", match_case(tail, plural));
        }
    }

    if is_plural(&lower) {
        return name.to_owned();
    }

    let bytes = lower.as_bytes();
    let last = bytes[bytes.len() - 1];
    let before_last = bytes.len().checked_sub(2).map(|i| bytes[i]);
    let is_vowel = |c: u8| matches!(c, b'a' | b'e' | b'i' | b'o' | b'u');

    if last == b'y' && before_last.is_some_and(|c| !is_vowel(c)) {
        format!("{}ies", &name[..name.len() - 1])
    } else if lower.ends_with("fe") {
        format!("{}ves", &name[..name.len() - 2])
    } else if ["s", "x", "z", "ch", "sh"].iter().any(|s| lower.ends_with(s)) {
        format!("{name}es")
    } else {
        format!("{name}s")
    }
}

fn is_plural(lower: &str) -> bool {
    (lower.ends_with("ies") || lower.ends_with('s'))
        && !lower.ends_with("ss")
        && !lower.ends_with("us")
        && !lower.ends_with("is")
}

fn match_case(template: &str, replacement: &str) -> String {
    let upper_first = template.chars().next().is_some_and(char::is_uppercase);
    let mut out = String::with_capacity(replacement.len());
    for (i, c) in replacement.chars().enumerate() {
        if i == 0 && upper_first {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pluralizes_type_names() {
        let cases = [
            ("Order", "Orders"),
            ("Category", "Categories"),
            ("Day", "Days"),
            ("Address", "Addresses"),
            ("Box", "Boxes"),
            ("Batch", "Batches"),
            ("Person", "People"),
            ("SalesPerson", "SalesPeople"),
            ("Orders", "Orders"),
            ("Status", "Statuses"),
            ("Knife", "Knives"),
            ("Data", "Data"),
        ];
        for (singular, plural) in cases {
            assert_eq!(pluralize(singular), plural, "{singular}");
        }
    }

    #[test]
    fn table_name_quotes_on_request() {
        struct Invoice;
        assert_eq!(table_name::<Invoice>(false), "Invoices");
        assert_eq!(table_name::<Invoice>(true), "[Invoices]");
    }
}
