//! Tests for schema auto-discovery and mapping-driven writer creation

use bw_core::{
    ColumnTarget, ErrorKind, FieldAttributes, MapBuilder, MappingProperty, Record,
    RecordDescriptor,
};
use bw_io::discover;
use bw_io::{CreateBulkWriter, MemoryBulkCopy, SchemaCatalog};

struct Person {
    id: i32,
    first_name: String,
    last_name: String,
    nickname: Option<String>,
}

impl Record for Person {
    fn descriptor() -> RecordDescriptor<Self> {
        RecordDescriptor::new()
            .field("Id", |p: &Person| p.id)
            .field("firstname", |p: &Person| p.first_name.clone())
            .field("LastName", |p: &Person| p.last_name.clone())
            .field_with(
                "nickname",
                |p: &Person| p.nickname.clone(),
                FieldAttributes::new().not_mapped(),
            )
    }
}

const CATALOG: &str = r#"
tables:
  dbo.People:
    - name: Id
      type: int
      key: true
      nullable: false
    - name: FirstName
      type: nvarchar
      size: 50
    - name: LastName
      type: nvarchar
      size: 80
    - name: Nick
      type: nvarchar
      size: 20
"#;

fn catalog() -> SchemaCatalog {
    SchemaCatalog::from_yaml_str(CATALOG).unwrap()
}

fn people(n: i32) -> Vec<Person> {
    (1..=n)
        .map(|id| Person {
            id,
            first_name: format!("first{id}"),
            last_name: format!("last{id}"),
            nickname: None,
        })
        .collect()
}

// ============================================================================
// resolve Tests
// ============================================================================

#[tokio::test]
async fn test_resolve_fills_unset_slots_case_insensitively() {
    let mut mappings = MapBuilder::map_all_properties::<Person>()
        .map_property_with("nickname", |m| {
            m.do_not_map();
            Ok(())
        })
        .unwrap()
        .build()
        .property_mappings()
        .to_vec();

    discover::resolve(&catalog(), "db", "dbo.People", &mut mappings)
        .await
        .unwrap();

    let first = &mappings[1];
    assert_eq!(first.destination().column_name().unwrap(), "firstname");
    assert_eq!(first.destination().column_ordinal().unwrap(), 1);
    assert_eq!(first.destination().column_size().unwrap(), 50);
    assert_eq!(first.destination().data_type_name().unwrap(), "nvarchar");
    assert!(!first.destination().is_key().unwrap());
    assert!(mappings[0].destination().is_key().unwrap());
}

#[tokio::test]
async fn test_resolve_keeps_explicit_values() {
    let mapping = MapBuilder::map_no_properties::<Person>()
        .map_property_with("LastName", |m| {
            m.to_column_size(20)?.to_data_type_name("varchar")?;
            Ok(())
        })
        .unwrap()
        .map_property_with("firstname", |m| {
            m.to_column_name("LastName")?.to_column_ordinal(7)?;
            Ok(())
        })
        .unwrap()
        .build();
    let mut mappings = mapping.property_mappings().to_vec();

    discover::resolve(&catalog(), "db", "People", &mut mappings)
        .await
        .unwrap();

    let last = mappings[0].destination();
    assert_eq!(last.column_size().unwrap(), 20);
    assert_eq!(last.data_type_name().unwrap(), "varchar");
    assert_eq!(last.column_ordinal().unwrap(), 2);

    let first = mappings[1].destination();
    assert_eq!(first.column_ordinal().unwrap(), 7);
    assert_eq!(first.column_size().unwrap(), 80);
}

#[tokio::test]
async fn test_resolve_reports_missing_column() {
    let mut mappings = MapBuilder::map_no_properties::<Person>()
        .map_property_with("nickname", |m| {
            m.to_column_name("Alias")?;
            Ok(())
        })
        .unwrap()
        .build()
        .property_mappings()
        .to_vec();

    let err = discover::resolve(&catalog(), "db", "People", &mut mappings)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidOperation);
    let message = err.to_string();
    assert!(message.contains("nickname"));
    assert!(message.contains("Alias"));
}

#[tokio::test]
async fn test_resolve_skips_unmapped_fields() {
    let mut mappings = MapBuilder::build_from_annotations::<Person>();
    discover::resolve(&catalog(), "db", "People", &mut mappings)
        .await
        .unwrap();

    let nickname = &mappings[3];
    assert!(!nickname.should_map());
    assert!(!nickname.destination().is_set(MappingProperty::ColumnSize));
}

#[tokio::test]
async fn test_resolve_unknown_table_fails() {
    let mut mappings = MapBuilder::build_from_annotations::<Person>();
    let err = discover::resolve(&catalog(), "db", "Orders", &mut mappings)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Other);
}

// ============================================================================
// needs_discovery Tests
// ============================================================================

#[test]
fn test_needs_discovery() {
    let mut mappings = MapBuilder::map_all_properties::<Person>()
        .build()
        .property_mappings()
        .to_vec();
    assert!(discover::needs_discovery(None, &mappings));
    assert!(discover::needs_discovery(Some("People"), &mappings));

    for (i, mapping) in mappings.iter_mut().enumerate() {
        let destination = mapping.destination_mut();
        destination.set_column_name(format!("c{i}"));
        destination.set_column_ordinal(i);
        destination.set_column_size(0);
        destination.set_data_type_name("int");
        destination.set_is_key(false);
    }
    assert!(!discover::needs_discovery(Some("People"), &mappings));
    assert!(discover::needs_discovery(None, &mappings));
}

// ============================================================================
// CreateBulkWriter Tests
// ============================================================================

#[tokio::test]
async fn test_create_bulk_writer_discovers_table_and_ordinals() {
    let sink = MemoryBulkCopy::new("people");
    let mapping = MapBuilder::map_all_properties::<Person>()
        .map_property_with("nickname", |m| {
            m.do_not_map();
            Ok(())
        })
        .unwrap()
        .build();

    let mut writer = mapping
        .create_bulk_writer(&catalog(), "db", sink.clone())
        .await
        .unwrap();
    assert_eq!(writer.destination_table(), "[People]");
    assert!(writer.options().keep_identity);
    let targets: Vec<_> = writer
        .options()
        .column_mappings
        .iter()
        .map(|m| (m.source_ordinal, m.destination.clone()))
        .collect();
    assert_eq!(
        targets,
        vec![
            (0, ColumnTarget::Ordinal(0)),
            (1, ColumnTarget::Ordinal(1)),
            (2, ColumnTarget::Ordinal(2)),
        ]
    );

    assert_eq!(writer.write_to_database(people(4)).unwrap(), 4);
    assert_eq!(sink.row_count(), 4);
}

#[tokio::test]
async fn test_create_bulk_writer_rejects_empty_connection() {
    let mapping = MapBuilder::build_all_properties::<Person>();
    let err = mapping
        .create_bulk_writer(&catalog(), "  ", MemoryBulkCopy::new("people"))
        .await
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::Argument);
}
