use std::sync::Arc;

use gridbase::{
    DataLayer, Error, JoinType, MemoryStorage, QueryRequest, Relation, Result, SchemaBuilder,
    Value,
};

fn text(s: &str) -> Value {
    Value::Text(s.into())
}

fn layer() -> Result<DataLayer> {
    let _ = tracing_subscriber::fmt().try_init();
    let catalog = Arc::new(
        SchemaBuilder::new()
            .table("users")
            .primary_key("id", "INTEGER")
            .required("name", "VARCHAR(50)")
            .unique("email", "VARCHAR(100)")
            .column("age", "INTEGER")
            .column("uf", "VARCHAR(2)")
            .column("note", "VARCHAR(200)")
            .column("interests", "JSON")
            .finish()
            .table("orders")
            .primary_key("id", "INTEGER")
            .required("user_id", "INTEGER")
            .required("product", "VARCHAR(100)")
            .column("price", "DOUBLE")
            .finish()
            .build()?,
    );
    let driver = Arc::new(MemoryStorage::new(&catalog));
    let layer = DataLayer::new(catalog, driver);

    layer.merge(
        "users",
        &[
            vec![text("id"), text("name"), text("email"), text("age"), text("uf"), text("note")],
            vec![Value::Int(0), text("Mariana"), text("mariana@x.com"), Value::Int(34), text("SP"), text("vip")],
            vec![Value::Int(0), text("Bruno"), text("bruno@x.com"), Value::Int(25), text("RJ"), Value::Null],
            vec![Value::Int(0), text("Ana"), text("ana@x.com"), Value::Int(30), text("MG"), text("")],
            vec![Value::Int(0), text("Wilson"), text("wilson@x.com"), Value::Int(41), text("SP"), Value::Null],
        ],
    )?;
    layer.merge(
        "orders",
        &[
            vec![text("id"), text("user_id"), text("product"), text("price")],
            vec![Value::Int(0), Value::Int(1), text("Notebook"), Value::Float(3500.0)],
            vec![Value::Int(0), Value::Int(3), text("Mouse"), Value::Float(120.5)],
            vec![Value::Int(0), Value::Int(1), text("Headset"), Value::Float(350.0)],
        ],
    )?;
    Ok(layer)
}

fn names(rows: &[Vec<Value>]) -> Vec<String> {
    rows.iter().map(|row| row[0].to_string()).collect()
}

#[test]
fn sign_criteria_filter_rows() -> Result<()> {
    let layer = layer()?;
    let request = QueryRequest::new(vec!["name".into()], vec!["users".into()])
        .with_criteria(vec![vec![text("age")], vec![text(">=30")]]);
    let rows = layer.query(&request)?;
    assert_eq!(names(&rows), ["Mariana", "Ana", "Wilson"]);

    let request = QueryRequest::new(vec!["name".into()], vec!["users".into()])
        .with_criteria(vec![vec![text("age")], vec![text("<>25")]]);
    let rows = layer.query(&request)?;
    assert!(!names(&rows).contains(&"Bruno".to_owned()));
    Ok(())
}

#[test]
fn wildcard_criteria_are_case_insensitive() -> Result<()> {
    let layer = layer()?;
    let request = QueryRequest::new(vec!["name".into()], vec!["users".into()])
        .with_criteria(vec![vec![text("name")], vec![text("*ana*")]]);
    let rows = layer.query(&request)?;
    assert_eq!(names(&rows), ["Mariana", "Ana"]);

    let request = QueryRequest::new(vec!["name".into()], vec!["users".into()])
        .with_criteria(vec![vec![text("name")], vec![text("*son")]]);
    assert_eq!(names(&layer.query(&request)?), ["Wilson"]);

    let request = QueryRequest::new(vec!["name".into()], vec!["users".into()])
        .with_criteria(vec![vec![text("name")], vec![text("bru*")]]);
    assert_eq!(names(&layer.query(&request)?), ["Bruno"]);
    Ok(())
}

#[test]
fn semicolon_alternatives_and_rows_combine_with_or() -> Result<()> {
    let layer = layer()?;
    let request = QueryRequest::new(vec!["name".into()], vec!["users".into()])
        .with_criteria(vec![vec![text("uf")], vec![text("MG;RJ")]]);
    assert_eq!(names(&layer.query(&request)?), ["Bruno", "Ana"]);

    // Two criterion rows OR together; the empty unsigned age cell in the
    // second row is no filter on that column.
    let request = QueryRequest::new(vec!["name".into()], vec!["users".into()]).with_criteria(vec![
        vec![text("uf"), text("age")],
        vec![text("SP"), text(">40")],
        vec![text("MG"), text("")],
    ]);
    assert_eq!(names(&layer.query(&request)?), ["Ana", "Wilson"]);
    Ok(())
}

#[test]
fn signed_empty_criterion_matches_null_and_empty_string() -> Result<()> {
    let layer = layer()?;
    let request = QueryRequest::new(vec!["name".into()], vec!["users".into()])
        .with_criteria(vec![vec![text("note")], vec![text("=")]]);
    assert_eq!(names(&layer.query(&request)?), ["Bruno", "Ana", "Wilson"]);

    // "!=" against the empty cell keeps every non-null note, the stored
    // empty string included; only the NULL rows drop out.
    let request = QueryRequest::new(vec!["name".into()], vec!["users".into()])
        .with_criteria(vec![vec![text("note")], vec![text("!=")]]);
    assert_eq!(names(&layer.query(&request)?), ["Mariana", "Ana"]);
    Ok(())
}

#[test]
fn unresolved_columns_come_back_as_sentinel() -> Result<()> {
    let layer = layer()?;
    let request = QueryRequest::new(
        vec!["name".into(), "ghost".into(), "age".into()],
        vec!["users".into(), "users".into(), "users".into()],
    )
    .with_criteria(vec![vec![text("name")], vec![text("Ana")]]);
    let rows = layer.query(&request)?;
    assert_eq!(rows, vec![vec![text("Ana"), text("-"), Value::Int(30)]]);

    let custom = layer.query(&QueryRequest::new(
        vec!["ghost".into(), "name".into()],
        vec!["users".into(), "users".into()],
    ).with_sentinel("?").with_criteria(vec![vec![text("name")], vec![text("Bruno")]]))?;
    assert_eq!(custom, vec![vec![text("?"), text("Bruno")]]);
    Ok(())
}

#[test]
fn inner_join_narrows_to_matched_rows() -> Result<()> {
    let layer = layer()?;
    let request = QueryRequest::new(
        vec!["name".into(), "product".into()],
        vec!["users".into(), "orders".into()],
    )
    .with_relations(vec![Relation::new("users", "orders", "id", "user_id", JoinType::Inner)]);
    let rows = layer.query(&request)?;
    assert_eq!(
        rows,
        vec![
            vec![text("Mariana"), text("Notebook")],
            vec![text("Mariana"), text("Headset")],
            vec![text("Ana"), text("Mouse")],
        ]
    );
    Ok(())
}

#[test]
fn left_join_keeps_unmatched_users_with_null_order_columns() -> Result<()> {
    let layer = layer()?;
    let request = QueryRequest::new(
        vec!["name".into(), "product".into()],
        vec!["users".into(), "orders".into()],
    )
    .with_relations(vec![Relation::new("users", "orders", "id", "user_id", JoinType::Left)]);
    let rows = layer.query(&request)?;
    assert_eq!(rows.len(), 5);
    assert!(rows.contains(&vec![text("Bruno"), Value::Null]));
    assert!(rows.contains(&vec![text("Wilson"), Value::Null]));
    Ok(())
}

#[test]
fn right_join_preserves_the_swapped_operand() -> Result<()> {
    let layer = layer()?;
    // users RIGHT JOIN orders: every order survives, and all orders have a
    // user here, so this is the inner result seen through the swap.
    let request = QueryRequest::new(
        vec!["name".into(), "product".into()],
        vec!["users".into(), "orders".into()],
    )
    .with_relations(vec![Relation::new("users", "orders", "id", "user_id", JoinType::Right)]);
    let rows = layer.query(&request)?;
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|row| row[1] != Value::Null));
    Ok(())
}

#[test]
fn criteria_bind_to_joined_tables() -> Result<()> {
    let layer = layer()?;
    let request = QueryRequest::new(
        vec!["name".into(), "product".into()],
        vec!["users".into(), "orders".into()],
    )
    .with_relations(vec![Relation::new("users", "orders", "id", "user_id", JoinType::Inner)])
    .with_criteria(vec![vec![text("price")], vec![text(">300")]])
    .with_criteria_tables(vec!["orders".into()]);
    let rows = layer.query(&request)?;
    assert_eq!(
        rows,
        vec![
            vec![text("Mariana"), text("Notebook")],
            vec![text("Mariana"), text("Headset")],
        ]
    );
    Ok(())
}

#[test]
fn unknown_projection_table_fails_fast() -> Result<()> {
    let layer = layer()?;
    let request = QueryRequest::new(vec!["name".into()], vec!["ghosts".into()]);
    assert_eq!(layer.query(&request).unwrap_err(), Error::UnknownTable("ghosts".into()));
    Ok(())
}

#[test]
fn unknown_relation_table_fails_before_execution() -> Result<()> {
    let layer = layer()?;
    let request = QueryRequest::new(vec!["name".into()], vec!["users".into()])
        .with_relations(vec![Relation::new("ghosts", "users", "id", "id", JoinType::Inner)]);
    assert_eq!(layer.query(&request).unwrap_err(), Error::UnknownTable("ghosts".into()));
    Ok(())
}

#[test]
fn query_with_no_resolvable_columns_is_rejected() -> Result<()> {
    let layer = layer()?;
    let request = QueryRequest::new(vec!["ghost".into()], vec!["users".into()]);
    assert!(matches!(layer.query(&request).unwrap_err(), Error::Validation(_)));
    Ok(())
}

#[test]
fn describe_subsets_the_structure() -> Result<()> {
    let layer = layer()?;
    let all = layer.describe(None)?;
    assert_eq!(all.len(), 2);
    let subset = layer.describe(Some(&["orders".into()]))?;
    assert_eq!(subset.keys().collect::<Vec<_>>(), ["orders"]);
    assert!(layer.describe(Some(&["ghosts".into()])).is_err());
    Ok(())
}
