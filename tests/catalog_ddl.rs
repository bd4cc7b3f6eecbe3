//! DDL-path scenarios: table creation validation, constraint
//! deduplication, and catalog lookups against a real on-disk database.

use std::sync::Arc;

use meridb::catalog::{
    is_system_object_id, ColumnDataType, ConstraintType, TableType, FIRST_USER_OBJECT_ID,
};
use meridb::database::SUPER_USER_ID;
use meridb::expr::{Expression, Literal};
use meridb::{ColumnSpecification, ConstraintSpecification, Database, DbError};
use tempfile::TempDir;

fn create_database(dir: &TempDir) -> Arc<Database> {
    Database::create("shop", dir.path(), "none", &[], 1_700_000_000, 100).unwrap()
}

fn int32(name: &str) -> ColumnSpecification {
    ColumnSpecification::new(name, ColumnDataType::Int32)
}

#[test]
fn creates_table_with_master_column_first() {
    let dir = TempDir::new().unwrap();
    let db = create_database(&dir);

    let table = db
        .create_user_table("t1", TableType::Disk, &[int32("a"), int32("b")], SUPER_USER_ID)
        .unwrap();

    assert!(table.id() as u64 >= FIRST_USER_OBJECT_ID);
    let columns = table.columns();
    assert_eq!(columns.len(), 3);
    assert_eq!(columns[0].name(), "TRID");
    assert_eq!(columns[1].name(), "a");
    assert_eq!(columns[2].name(), "b");
    assert_eq!(
        table.master_column().unwrap().id(),
        columns[0].id(),
        "master column is the first column-set entry"
    );

    // Column ids follow declaration order.
    assert!(columns[1].id() < columns[2].id());

    let fetched = db.get_table_checked("t1").unwrap();
    assert_eq!(fetched.id(), table.id());
    let by_id = db.get_table_checked_by_id(table.id()).unwrap();
    assert_eq!(by_id.name(), "t1");
}

#[test]
fn duplicate_table_name_rejected() {
    let dir = TempDir::new().unwrap();
    let db = create_database(&dir);

    db.create_user_table("t1", TableType::Disk, &[int32("a")], SUPER_USER_ID)
        .unwrap();
    let err = db
        .create_user_table("t1", TableType::Disk, &[int32("a")], SUPER_USER_ID)
        .unwrap_err();
    assert!(matches!(err, DbError::TableAlreadyExists { .. }));
}

#[test]
fn unsupported_table_type_rejected() {
    let dir = TempDir::new().unwrap();
    let db = create_database(&dir);

    let err = db
        .create_user_table("t1", TableType::Memory, &[int32("a")], SUPER_USER_ID)
        .unwrap_err();
    assert!(matches!(err, DbError::TableTypeNotSupported(_)));
}

#[test]
fn duplicate_column_name_yields_single_compound_error() {
    let dir = TempDir::new().unwrap();
    let db = create_database(&dir);

    let err = db
        .create_user_table("t1", TableType::Disk, &[int32("a"), int32("a")], SUPER_USER_ID)
        .unwrap_err();

    match &err {
        DbError::Compound(errors) => {
            assert_eq!(errors.len(), 1);
            assert!(matches!(
                &errors[0],
                DbError::CreateTableDuplicateColumnName(name) if name.as_str() == "a"
            ));
        }
        other => panic!("expected compound error, got {other:?}"),
    }

    // All-or-nothing: nothing named t1 is observable afterwards.
    assert!(matches!(
        db.get_table_checked("t1"),
        Err(DbError::TableDoesNotExist { .. })
    ));
}

#[test]
fn duplicate_constraint_kind_on_column_rejected() {
    let dir = TempDir::new().unwrap();
    let db = create_database(&dir);

    let spec = ColumnSpecification::new("b", ColumnDataType::Int32)
        .with_constraint(ConstraintSpecification::not_null())
        .with_constraint(ConstraintSpecification::not_null());
    let err = db
        .create_user_table("t1", TableType::Disk, &[spec], SUPER_USER_ID)
        .unwrap_err();

    let errors: Vec<_> = err.errors().collect();
    assert_eq!(errors.len(), 1);
    assert!(matches!(
        errors[0],
        DbError::CreateTableDuplicateColumnConstraintType { kind, column }
            if *kind == "NN" && column.as_str() == "b"
    ));
}

#[test]
fn validator_accumulates_errors_in_encounter_order() {
    let dir = TempDir::new().unwrap();
    let db = create_database(&dir);

    let specs = vec![
        int32("9bad"),
        int32("ok"),
        int32("ok"),
        ColumnSpecification::new("c", ColumnDataType::Int32)
            .with_constraint(ConstraintSpecification::not_null().named("bad name")),
    ];
    let err = db
        .create_user_table("t1", TableType::Disk, &specs, SUPER_USER_ID)
        .unwrap_err();

    let errors: Vec<_> = err.errors().collect();
    assert_eq!(errors.len(), 3);
    assert!(matches!(errors[0], DbError::InvalidColumnName(name) if name.as_str() == "9bad"));
    assert!(matches!(
        errors[1],
        DbError::CreateTableDuplicateColumnName(name) if name.as_str() == "ok"
    ));
    assert!(matches!(
        errors[2],
        DbError::InvalidConstraintName(name) if name.as_str() == "bad name"
    ));

    assert!(db.get_table_checked("t1").is_err());
}

#[test]
fn duplicate_constraint_names_rejected_across_columns() {
    let dir = TempDir::new().unwrap();
    let db = create_database(&dir);

    let specs = vec![
        ColumnSpecification::new("a", ColumnDataType::Int32)
            .with_constraint(ConstraintSpecification::not_null().named("NN1")),
        ColumnSpecification::new("b", ColumnDataType::Int32)
            .with_constraint(ConstraintSpecification::not_null().named("NN1")),
    ];
    let err = db
        .create_user_table("t1", TableType::Disk, &specs, SUPER_USER_ID)
        .unwrap_err();
    let errors: Vec<_> = err.errors().collect();
    assert_eq!(errors.len(), 1);
    assert!(matches!(
        errors[0],
        DbError::CreateTableDuplicateConstraintName(name) if name.as_str() == "NN1"
    ));
}

#[test]
fn constraint_name_taken_by_existing_table_rejected() {
    let dir = TempDir::new().unwrap();
    let db = create_database(&dir);

    let spec = ColumnSpecification::new("a", ColumnDataType::Int32)
        .with_constraint(ConstraintSpecification::not_null().named("NN1"));
    db.create_user_table("t1", TableType::Disk, &[spec.clone()], SUPER_USER_ID)
        .unwrap();
    assert!(db.is_constraint_exists("NN1"));

    let err = db
        .create_user_table("t2", TableType::Disk, &[spec], SUPER_USER_ID)
        .unwrap_err();
    let errors: Vec<_> = err.errors().collect();
    assert_eq!(errors.len(), 1);
    assert!(matches!(
        errors[0],
        DbError::ConstraintAlreadyExists { constraint, .. } if constraint.as_str() == "NN1"
    ));
}

#[test]
fn default_value_constraints_share_one_definition_across_tables() {
    let dir = TempDir::new().unwrap();
    let db = create_database(&dir);

    let with_default = |column: &str| {
        ColumnSpecification::new(column, ColumnDataType::Int32)
            .with_constraint(ConstraintSpecification::default_value(Literal::Int(0)))
    };

    let t1 = db
        .create_user_table("t1", TableType::Disk, &[with_default("a")], SUPER_USER_ID)
        .unwrap();
    let t2 = db
        .create_user_table("t2", TableType::Disk, &[with_default("b")], SUPER_USER_ID)
        .unwrap();

    // Follow each column to its constraint's definition id.
    let definition_id_of = |table: &Arc<meridb::objects::Table>, column: &str| {
        let column = table.get_column(column).unwrap();
        let def = db
            .get_column_definition_record(column.current_column_definition_id())
            .unwrap();
        let default_link = def
            .constraints
            .iter()
            .map(|link| db.get_constraint_record(link.constraint_id).unwrap())
            .find(|record| {
                db.get_constraint_definition_record(record.constraint_definition_id)
                    .unwrap()
                    .constraint_type
                    == ConstraintType::DefaultValue
            })
            .unwrap();
        default_link.constraint_definition_id
    };

    let d1 = definition_id_of(&t1, "a");
    let d2 = definition_id_of(&t2, "b");
    assert_eq!(d1, d2, "equal DEFAULT 0 definitions are deduplicated");

    let record = db.get_constraint_definition_record(d1).unwrap();
    assert_eq!(record.constraint_type, ConstraintType::DefaultValue);
    assert!(!is_system_object_id(d1));
}

#[test]
fn find_or_create_constraint_definition_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let db = create_database(&dir);

    let expression = Expression::constant(Literal::String("pending".into()));
    let serialized = expression.serialize();

    let (first, existing) = db
        .find_or_create_constraint_definition(false, ConstraintType::DefaultValue, &serialized)
        .unwrap();
    assert!(!existing);

    let (second, existing) = db
        .find_or_create_constraint_definition(false, ConstraintType::DefaultValue, &serialized)
        .unwrap();
    assert!(existing, "second call must report an existing definition");
    assert_eq!(first.id(), second.id());

    // Same bytes, other partition: a distinct definition.
    let (system_def, existing) = db
        .find_or_create_constraint_definition(true, ConstraintType::DefaultValue, &serialized)
        .unwrap();
    assert!(!existing);
    assert_ne!(system_def.id(), first.id());
    assert!(is_system_object_id(system_def.id()));
    assert!(!is_system_object_id(first.id()));

    // Same bytes, other kind: also distinct.
    let (other_kind, existing) = db
        .find_or_create_constraint_definition(false, ConstraintType::NotNull, &serialized)
        .unwrap();
    assert!(!existing);
    assert_ne!(other_kind.id(), first.id());
}

#[test]
fn master_columns_share_the_system_not_null_definition() {
    let dir = TempDir::new().unwrap();
    let db = create_database(&dir);

    let t1 = db
        .create_user_table("t1", TableType::Disk, &[int32("a")], SUPER_USER_ID)
        .unwrap();
    let t2 = db
        .create_user_table("t2", TableType::Disk, &[int32("b")], SUPER_USER_ID)
        .unwrap();

    let master_definition_id = |table: &Arc<meridb::objects::Table>| {
        let master = table.master_column().unwrap();
        let def = db
            .get_column_definition_record(master.current_column_definition_id())
            .unwrap();
        let constraint = db.get_constraint_record(def.constraints[0].constraint_id).unwrap();
        constraint.constraint_definition_id
    };

    let d1 = master_definition_id(&t1);
    let d2 = master_definition_id(&t2);
    assert_eq!(d1, d2);
    assert!(is_system_object_id(d1));
}

#[test]
fn create_constraint_by_handle() {
    let dir = TempDir::new().unwrap();
    let db = create_database(&dir);

    let table = db
        .create_user_table("t1", TableType::Disk, &[int32("a")], SUPER_USER_ID)
        .unwrap();
    let column = table.get_column("a").unwrap();

    let (definition, _) = db
        .create_constraint_definition(
            false,
            ConstraintType::NotNull,
            Expression::constant(Literal::Bool(true)),
        )
        .unwrap();

    let constraint = db
        .create_constraint(&table, Some(&column), "NN_A", &definition)
        .unwrap();
    assert_eq!(constraint.name(), "NN_A");
    assert!(constraint.is_not_null());
    assert!(db.is_constraint_exists("NN_A"));

    let err = db
        .create_constraint(&table, Some(&column), "NN_A", &definition)
        .unwrap_err();
    assert!(matches!(err, DbError::ConstraintAlreadyExists { .. }));
}

#[test]
fn auto_generated_constraint_names_are_deterministic_and_unique() {
    let dir = TempDir::new().unwrap();
    let db = create_database(&dir);

    let table = db
        .create_user_table(
            "orders",
            TableType::Disk,
            &[ColumnSpecification::new("qty", ColumnDataType::Int32)
                .with_constraint(ConstraintSpecification::not_null())],
            SUPER_USER_ID,
        )
        .unwrap();

    let column = table.get_column("qty").unwrap();
    let def = db
        .get_column_definition_record(column.current_column_definition_id())
        .unwrap();
    let constraint = db.get_constraint_record(def.constraints[0].constraint_id).unwrap();
    assert_eq!(
        constraint.name,
        format!("orders_qty_NN_{}", constraint.id)
    );
}

#[test]
fn constraint_on_foreign_table_rejected() {
    let dir1 = TempDir::new().unwrap();
    let dir2 = TempDir::new().unwrap();
    let db1 = create_database(&dir1);
    let db2 = Database::create("other", dir2.path(), "none", &[], 1_700_000_001, 100).unwrap();

    let foreign_table = db2
        .create_user_table("t1", TableType::Disk, &[int32("a")], SUPER_USER_ID)
        .unwrap();
    let column = foreign_table.get_column("a").unwrap();

    let (definition, _) = db1
        .create_constraint_definition(
            false,
            ConstraintType::NotNull,
            Expression::constant(Literal::Bool(true)),
        )
        .unwrap();

    let err = db1
        .create_constraint(&foreign_table, Some(&column), "NN_X", &definition)
        .unwrap_err();
    assert!(matches!(err, DbError::TableDoesNotBelongToDatabase { .. }));
}

#[test]
fn unsupported_constraint_kind_rejected_at_bind_time() {
    let dir = TempDir::new().unwrap();
    let db = create_database(&dir);

    let table = db
        .create_user_table("t1", TableType::Disk, &[int32("a")], SUPER_USER_ID)
        .unwrap();
    let column = table.get_column("a").unwrap();

    let (definition, _) = db
        .find_or_create_constraint_definition(
            false,
            ConstraintType::Unique,
            &Expression::constant(Literal::Null).serialize(),
        )
        .unwrap();
    let err = db
        .create_constraint(&table, Some(&column), "UQ_A", &definition)
        .unwrap_err();
    assert!(matches!(err, DbError::ConstraintNotSupported(_)));
}

#[test]
fn latest_column_definition_resolution() {
    let dir = TempDir::new().unwrap();
    let db = create_database(&dir);

    let table = db
        .create_user_table("t1", TableType::Disk, &[int32("a"), int32("b")], SUPER_USER_ID)
        .unwrap();

    for column in table.columns() {
        let latest = db
            .get_latest_column_definition_id_for_column(table.id(), column.id())
            .unwrap();
        assert_eq!(latest, column.current_column_definition_id());
    }

    // A column id nobody ever defined.
    let err = db
        .get_latest_column_definition_id_for_column(table.id(), 0xdead_beef)
        .unwrap_err();
    assert!(matches!(
        err,
        DbError::MissingColumnDefinitionsForColumn { column_id, .. } if column_id == 0xdead_beef
    ));
}

#[test]
fn record_getters_fail_on_unknown_ids() {
    let dir = TempDir::new().unwrap();
    let db = create_database(&dir);

    assert!(matches!(
        db.get_column_record(0xffff),
        Err(DbError::ColumnDoesNotExist { .. })
    ));
    assert!(matches!(
        db.get_column_set_record(0xffff),
        Err(DbError::ColumnSetDoesNotExist { .. })
    ));
    assert!(matches!(
        db.get_column_definition_record(0xffff),
        Err(DbError::ColumnDefinitionDoesNotExist { .. })
    ));
    assert!(matches!(
        db.get_constraint_record(0xffff),
        Err(DbError::ConstraintDoesNotExist { .. })
    ));
    assert!(matches!(
        db.get_constraint_definition_record(0xffff),
        Err(DbError::ConstraintDefinitionDoesNotExist { .. })
    ));
    assert!(matches!(
        db.get_index_record(0xffff),
        Err(DbError::IndexDoesNotExist { .. })
    ));
}

#[test]
fn unsupported_constraint_kind_rejected_by_validator() {
    let dir = TempDir::new().unwrap();
    let db = create_database(&dir);

    let spec = ColumnSpecification::new("a", ColumnDataType::Int32).with_constraint(
        ConstraintSpecification {
            name: String::new(),
            constraint_type: ConstraintType::Unique,
            expression: Expression::constant(Literal::Null),
        },
    );
    let err = db
        .create_user_table("t1", TableType::Disk, &[spec], SUPER_USER_ID)
        .unwrap_err();
    let errors: Vec<_> = err.errors().collect();
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], DbError::ConstraintNotSupported(_)));
    assert!(db.get_table_checked("t1").is_err());
}

#[test]
fn simple_column_specifications_expand_to_constraints() {
    let dir = TempDir::new().unwrap();
    let db = create_database(&dir);

    let specs = [
        meridb::SimpleColumnSpecification::new("name", ColumnDataType::Text).not_null(),
        meridb::SimpleColumnSpecification::new("balance", ColumnDataType::Double)
            .with_default(Literal::Double(0.0)),
    ];
    let table = db
        .create_user_table_simple("customers", TableType::Disk, &specs, SUPER_USER_ID)
        .unwrap();

    let name_column = table.get_column("name").unwrap();
    let def = db
        .get_column_definition_record(name_column.current_column_definition_id())
        .unwrap();
    assert_eq!(def.constraints.len(), 1);
    let constraint = db.get_constraint_record(def.constraints[0].constraint_id).unwrap();
    let definition = db
        .get_constraint_definition_checked(constraint.constraint_definition_id)
        .unwrap();
    assert_eq!(definition.constraint_type(), ConstraintType::NotNull);

    // The typed-kind check accepts the actual kind and rejects others.
    db.check_constraint_type(
        &table,
        Some(&name_column),
        &constraint.name,
        &definition,
        ConstraintType::NotNull,
    )
    .unwrap();
    let err = db
        .check_constraint_type(
            &table,
            Some(&name_column),
            &constraint.name,
            &definition,
            ConstraintType::DefaultValue,
        )
        .unwrap_err();
    assert!(matches!(err, DbError::ColumnConstraintTypeMismatch { .. }));
    let err = db
        .check_constraint_record_type(&table, None, &constraint, ConstraintType::DefaultValue)
        .unwrap_err();
    assert!(matches!(err, DbError::TableConstraintTypeMismatch { .. }));
}

#[test]
fn add_column_opens_a_new_schema_version() {
    let dir = TempDir::new().unwrap();
    let db = create_database(&dir);

    let table = db
        .create_user_table("t1", TableType::Disk, &[int32("a")], SUPER_USER_ID)
        .unwrap();
    let first_set_id = table.current_column_set_id();
    let first_set = db.get_column_set_record(first_set_id).unwrap();
    assert_eq!(first_set.columns.len(), 2); // TRID + a

    let added = db
        .add_column(
            &table,
            &ColumnSpecification::new("b", ColumnDataType::Int32)
                .with_constraint(ConstraintSpecification::default_value(Literal::Int(7))),
            SUPER_USER_ID,
        )
        .unwrap();

    let second_set_id = table.current_column_set_id();
    assert_ne!(second_set_id, first_set_id);

    // The old set stays registered; the new one carries every column.
    assert!(db.get_column_set_record(first_set_id).is_ok());
    let second_set = db.get_column_set_record(second_set_id).unwrap();
    assert_eq!(second_set.columns.len(), 3);
    assert_eq!(second_set.columns[2].column_id, added.id());

    // The table row moved to the new schema version.
    assert_eq!(
        db.get_table_record(table.id()).unwrap().current_column_set_id,
        second_set_id
    );

    assert_eq!(
        db.get_latest_column_definition_id_for_column(table.id(), added.id())
            .unwrap(),
        added.current_column_definition_id()
    );

    // Duplicate column names are rejected without touching the catalog.
    let err = db
        .add_column(&table, &int32("b"), SUPER_USER_ID)
        .unwrap_err();
    assert!(matches!(err, DbError::ColumnAlreadyExists { .. }));
    assert_eq!(table.columns().len(), 3);
}

#[test]
fn create_index_over_table_columns() {
    let dir = TempDir::new().unwrap();
    let db = create_database(&dir);

    let table = db
        .create_user_table("t1", TableType::Disk, &[int32("a")], SUPER_USER_ID)
        .unwrap();
    let column = table.get_column("a").unwrap();

    let record = db
        .create_index(&table, "t1_a_idx", &[column], meridb::catalog::IndexType::BTree)
        .unwrap();
    assert_eq!(record.table_id, table.id());
    assert_eq!(record.columns.len(), 1);

    let fetched = db.get_index_record(record.id).unwrap();
    assert_eq!(fetched.name, "t1_a_idx");

    let column = table.get_column("a").unwrap();
    let err = db
        .create_index(&table, "t1_a_idx", &[column], meridb::catalog::IndexType::BTree)
        .unwrap_err();
    assert!(matches!(err, DbError::IndexAlreadyExists { .. }));
}
